use chrono::{DateTime, Utc};
use tracing::warn;

use crate::message::PostMessage;

/// Layout of `created_at` on stream tweets, minus the leading weekday.
/// Example: `Mon Jan 02 15:04:05 +0000 2024`.
const CREATED_AT_FORMAT: &str = "%b %d %H:%M:%S %z %Y";

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Stored in place of a creation time that could not be parsed.
pub const UNPARSED_CREATED_AT: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// The record written to storage for one tweet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPost {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub screen_name: String,
}

impl NormalizedPost {
    /// False when `created_at` holds the sentinel.
    pub fn has_created_at(&self) -> bool {
        self.created_at != UNPARSED_CREATED_AT
    }
}

/// Derive the stored record from a stream tweet.
///
/// Extended text wins over the short text when it is present and non-empty.
/// A bad timestamp is logged and replaced with [`UNPARSED_CREATED_AT`].
pub fn normalize(post: PostMessage) -> NormalizedPost {
    let created_at = match parse_created_at(&post.created_at) {
        Some(ts) => ts,
        None => {
            warn!(
                post_id = post.id,
                created_at = %post.created_at,
                "Cannot parse creation time, storing sentinel"
            );
            UNPARSED_CREATED_AT
        }
    };

    let text = match post.extended_tweet {
        Some(extended) if !extended.full_text.is_empty() => extended.full_text,
        _ => post.text,
    };

    NormalizedPost {
        id: post.id,
        created_at,
        text,
        screen_name: post.user.screen_name,
    }
}

/// Parse the service timestamp. The weekday has to be a real day name but is
/// not checked against the date itself.
pub fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    let (weekday, rest) = raw.trim().split_once(' ')?;
    if !WEEKDAYS.contains(&weekday) {
        return None;
    }

    DateTime::parse_from_str(rest.trim_start(), CREATED_AT_FORMAT)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
