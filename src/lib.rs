//! Filtered tweet stream ingestion.
//!
//! The pipeline is: [`stream::Session`] (authenticated long-lived HTTP
//! stream) -> [`demux::Demux`] (route by message kind) ->
//! [`normalize::normalize`] (pick text, parse time) -> [`sink::PostSink`]
//! (one insert per tweet). [`lifecycle::run`] supervises the loop and stops
//! the session on shutdown.

pub mod config;
pub mod demux;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod message;
pub mod normalize;
pub mod sink;
pub mod stream;
pub mod token;

pub use config::{Config, Credentials};
pub use demux::{Demux, DemuxStats, Dispatch, PersistPosts, PostHandler, StatsCounter};
pub use error::{ConfigError, SinkError, StreamError, TokenError};
pub use lifecycle::{run, LifecycleState, RunOutcome};
pub use message::{PostMessage, RawStreamMessage};
pub use normalize::{normalize, NormalizedPost};
pub use sink::{PgSink, PostSink};
pub use stream::{Session, StreamClient, StreamFilter};
