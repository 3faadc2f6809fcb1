//! Routes stream messages to handlers by kind.
//!
//! Only tweets have a handler. Control messages are logged and dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::message::{MessageKind, PostMessage, RawStreamMessage};
use crate::normalize::normalize;
use crate::sink::PostSink;
use crate::stream::Messages;

#[async_trait]
pub trait PostHandler: Send + Sync {
    /// Must not fail: anything that goes wrong is logged here.
    async fn handle_post(&self, post: PostMessage);
}

/// What happened to one dispatched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    Dropped(MessageKind),
    Malformed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    pub posts: u64,
    pub dropped: u64,
    pub malformed: u64,
}

/// Live dispatch counters. Shared so totals survive an aborted consumer.
#[derive(Debug, Default)]
pub struct StatsCounter {
    posts: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
}

impl StatsCounter {
    fn record(&self, outcome: Dispatch) {
        let counter = match outcome {
            Dispatch::Handled => &self.posts,
            Dispatch::Dropped(_) => &self.dropped,
            Dispatch::Malformed => &self.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DemuxStats {
        DemuxStats {
            posts: self.posts.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Dispatch table, built once at startup and owned by the consuming task.
#[derive(Default)]
pub struct Demux {
    post: Option<Box<dyn PostHandler>>,
    stats: Arc<StatsCounter>,
}

impl Demux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_post(mut self, handler: impl PostHandler + 'static) -> Self {
        self.post = Some(Box::new(handler));
        self
    }

    /// Handle on the counters `run` updates after every message.
    pub fn stats(&self) -> Arc<StatsCounter> {
        Arc::clone(&self.stats)
    }

    pub async fn dispatch(&self, msg: RawStreamMessage) -> Dispatch {
        match msg {
            RawStreamMessage::Post(post) => match &self.post {
                Some(handler) => {
                    handler.handle_post(*post).await;
                    Dispatch::Handled
                }
                None => Dispatch::Dropped(MessageKind::Post),
            },
            RawStreamMessage::StallWarning(warning) => {
                warn!(
                    code = %warning.code,
                    percent_full = warning.percent_full,
                    detail = %warning.message,
                    "Stall warning"
                );
                Dispatch::Dropped(MessageKind::StallWarning)
            }
            RawStreamMessage::Disconnect(notice) => {
                warn!(
                    code = notice.code,
                    stream_name = %notice.stream_name,
                    reason = %notice.reason,
                    "Disconnect notice"
                );
                Dispatch::Dropped(MessageKind::Disconnect)
            }
            RawStreamMessage::Malformed { line, error } => {
                warn!(error = %error, line = %line, "Skipping malformed stream message");
                Dispatch::Malformed
            }
            other => {
                let kind = other.kind();
                debug!(kind = %kind, "Ignoring stream message");
                Dispatch::Dropped(kind)
            }
        }
    }

    /// Consume messages until the sequence ends, in arrival order.
    /// Returns the totals since this demux was built.
    pub async fn run(&self, messages: &mut Messages) -> DemuxStats {
        while let Some(msg) = messages.next().await {
            let outcome = self.dispatch(msg).await;
            self.stats.record(outcome);
        }
        debug!("Message loop finished");
        self.stats.snapshot()
    }
}

/// Post handler that normalizes each tweet and writes it to a sink.
pub struct PersistPosts<S> {
    sink: S,
}

impl<S: PostSink> PersistPosts<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl<S: PostSink> PostHandler for PersistPosts<S> {
    async fn handle_post(&self, post: PostMessage) {
        let record = normalize(post);
        debug!(post_id = record.id, screen_name = %record.screen_name, "Persisting tweet");

        if let Err(e) = self.sink.insert(&record).await {
            if e.is_duplicate() {
                warn!(post_id = record.id, duplicate = true, error = %e, "Failed to insert tweet");
            } else {
                error!(post_id = record.id, error = %e, "Failed to insert tweet");
            }
        }
    }
}
