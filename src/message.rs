//! Messages arriving on the filtered stream.
//!
//! Every line of the stream body is one JSON object. Its shape decides what
//! kind of message it is: ordinary tweets carry `text` and `user`, control
//! messages wrap their payload in a single well-known key (`warning`,
//! `disconnect`, `limit`, `delete`, ...).

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

/// A tweet as delivered by the stream. Only the fields we persist are decoded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PostMessage {
    pub id: i64,
    pub created_at: String,
    pub text: String,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub extended_tweet: Option<ExtendedText>,
    pub user: Author,
}

/// Full text of a tweet longer than the classic 140 character field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtendedText {
    pub full_text: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Author {
    pub screen_name: String,
}

/// Keep-alive notice sent when the client is falling behind.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StallWarning {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub percent_full: u32,
}

/// Sent by the service right before it closes the connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DisconnectNotice {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub stream_name: String,
    #[serde(default)]
    pub reason: String,
}

/// One unit read off the stream, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum RawStreamMessage {
    Post(Box<PostMessage>),
    StallWarning(StallWarning),
    Disconnect(DisconnectNotice),
    /// Number of matching tweets withheld due to rate limiting
    Limit { track: u64 },
    Deletion { id: Option<i64> },
    /// Recognised JSON object of a kind we do not handle (first key)
    Other(String),
    Malformed { line: String, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Post,
    StallWarning,
    Disconnect,
    Limit,
    Deletion,
    Other,
    Malformed,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Post => "post",
            Self::StallWarning => "stall_warning",
            Self::Disconnect => "disconnect",
            Self::Limit => "limit",
            Self::Deletion => "deletion",
            Self::Other => "other",
            Self::Malformed => "malformed",
        };
        f.write_str(name)
    }
}

impl RawStreamMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Post(_) => MessageKind::Post,
            Self::StallWarning(_) => MessageKind::StallWarning,
            Self::Disconnect(_) => MessageKind::Disconnect,
            Self::Limit { .. } => MessageKind::Limit,
            Self::Deletion { .. } => MessageKind::Deletion,
            Self::Other(_) => MessageKind::Other,
            Self::Malformed { .. } => MessageKind::Malformed,
        }
    }

    /// Classify a single line of the stream body. Never fails: anything that
    /// cannot be understood comes back as `Malformed`.
    pub fn parse(line: &str) -> Self {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => return Self::malformed(line, e),
        };

        let Some(object) = value.as_object() else {
            return Self::malformed(line, "expected a JSON object");
        };

        if object.contains_key("text") && object.contains_key("user") {
            return match PostMessage::deserialize(&value) {
                Ok(post) => Self::Post(Box::new(post)),
                Err(e) => Self::malformed(line, e),
            };
        }

        if let Some(warning) = object.get("warning") {
            return match StallWarning::deserialize(warning) {
                Ok(warning) => Self::StallWarning(warning),
                Err(e) => Self::malformed(line, e),
            };
        }

        if let Some(disconnect) = object.get("disconnect") {
            return match DisconnectNotice::deserialize(disconnect) {
                Ok(notice) => Self::Disconnect(notice),
                Err(e) => Self::malformed(line, e),
            };
        }

        if let Some(limit) = object.get("limit") {
            let track = limit.get("track").and_then(Value::as_u64).unwrap_or(0);
            return Self::Limit { track };
        }

        if let Some(delete) = object.get("delete") {
            let id = delete
                .pointer("/status/id")
                .and_then(Value::as_i64);
            return Self::Deletion { id };
        }

        match object.keys().next() {
            Some(key) => Self::Other(key.clone()),
            None => Self::Other(String::new()),
        }
    }

    fn malformed(line: &str, error: impl fmt::Display) -> Self {
        Self::Malformed {
            line: line.to_string(),
            error: error.to_string(),
        }
    }
}
