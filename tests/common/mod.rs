#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use tweetsink::error::SinkError;
use tweetsink::normalize::NormalizedPost;
use tweetsink::sink::PostSink;

pub const STALL_WARNING: &str = r#"{"warning":{"code":"FALLING_BEHIND","message":"Your connection is falling behind and messages are being queued for delivery to you.","percent_full":60}}"#;
pub const POST_42: &str = r#"{"id":42,"created_at":"Mon Jan 02 15:04:05 +0000 2024","text":"hello","truncated":false,"user":{"screen_name":"alice"}}"#;
pub const POST_43: &str = r#"{"id":43,"created_at":"Mon Jan 02 15:04:05 +0000 2024","text":"full expa…","truncated":true,"extended_tweet":{"full_text":"full expanded text"},"user":{"screen_name":"bob"}}"#;

/// Stand-in for a primary key violation reported by the database.
#[derive(Debug)]
pub struct UniqueViolation;

impl fmt::Display for UniqueViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("duplicate key value violates unique constraint")
    }
}

impl std::error::Error for UniqueViolation {}

impl sqlx::error::DatabaseError for UniqueViolation {
    fn message(&self) -> &str {
        "duplicate key value violates unique constraint"
    }

    fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> sqlx::error::ErrorKind {
        sqlx::error::ErrorKind::UniqueViolation
    }
}

/// In-memory sink. Ids in `fail_ids` are rejected as duplicates.
#[derive(Default)]
pub struct MemorySink {
    fail_ids: HashSet<i64>,
    attempts: Mutex<Vec<i64>>,
    stored: Mutex<Vec<NormalizedPost>>,
}

impl MemorySink {
    pub fn failing(ids: &[i64]) -> Self {
        Self {
            fail_ids: ids.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn attempts(&self) -> Vec<i64> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn stored(&self) -> Vec<NormalizedPost> {
        self.stored.lock().unwrap().clone()
    }
}

#[async_trait]
impl PostSink for MemorySink {
    async fn insert(&self, post: &NormalizedPost) -> Result<(), SinkError> {
        self.attempts.lock().unwrap().push(post.id);
        if self.fail_ids.contains(&post.id) {
            return Err(SinkError::Database(sqlx::Error::Database(Box::new(
                UniqueViolation,
            ))));
        }
        self.stored.lock().unwrap().push(post.clone());
        Ok(())
    }
}

/// One CRLF-terminated chunk per line, like the service sends.
pub fn body(
    lines: &[&str],
) -> impl futures::Stream<Item = Result<Vec<u8>, Infallible>> + Send + 'static {
    let chunks: Vec<Result<Vec<u8>, Infallible>> = lines
        .iter()
        .map(|line| Ok(format!("{line}\r\n").into_bytes()))
        .collect();
    futures::stream::iter(chunks)
}

/// A tracing event with its fields rendered to strings.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub target: String,
    pub fields: BTreeMap<String, String>,
}

impl CapturedEvent {
    pub fn message(&self) -> &str {
        self.field("message").unwrap_or_default()
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Layer that records every event for later assertions.
#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    /// Install as the default subscriber for the current thread.
    pub fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn with_message(&self, message: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.message() == message)
            .collect()
    }
}

struct FieldRecorder<'a>(&'a mut BTreeMap<String, String>);

impl Visit for FieldRecorder<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut fields = BTreeMap::new();
        event.record(&mut FieldRecorder(&mut fields));
        let metadata = event.metadata();
        self.events.lock().unwrap().push(CapturedEvent {
            level: *metadata.level(),
            target: metadata.target().to_string(),
            fields,
        });
    }
}
