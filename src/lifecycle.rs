//! Runs the message loop next to a shutdown waiter.
//!
//! Two tasks exist while streaming: the spawned consumer driving the
//! [`Demux`] and the caller waiting on the shutdown future. When shutdown
//! fires the session is stopped, which ends the consumer's message sequence.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::demux::{Demux, DemuxStats, StatsCounter};
use crate::stream::Session;

/// How long the consumer may take to finish its current message after stop.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Streaming,
    Stopping,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Streaming => "streaming",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Tracks the process state and rejects undefined transitions.
#[derive(Debug)]
pub struct Lifecycle {
    state: LifecycleState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Starting,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Move to `next` if the transition is defined. Returns whether it moved.
    pub fn advance(&mut self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        let allowed = matches!(
            (self.state, next),
            (Starting, Streaming) | (Streaming, Stopping) | (Stopping, Stopped)
        );
        if allowed {
            debug!(from = %self.state, to = %next, "Lifecycle transition");
            self.state = next;
        } else {
            debug!(from = %self.state, to = %next, "Ignoring lifecycle transition");
        }
        allowed
    }
}

/// How the streaming phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Shutdown was requested and the stream was stopped
    Shutdown(DemuxStats),
    /// The stream ended without being asked to
    StreamEnded(DemuxStats),
}

impl RunOutcome {
    pub fn stats(&self) -> DemuxStats {
        match self {
            Self::Shutdown(stats) | Self::StreamEnded(stats) => *stats,
        }
    }
}

/// Drive `session` through `demux` until `shutdown` resolves or the stream
/// ends on its own.
pub async fn run<F>(session: Session, demux: Demux, shutdown: F) -> RunOutcome
where
    F: Future<Output = ()>,
{
    drive(session, demux, shutdown, DRAIN_TIMEOUT).await
}

async fn drive<F>(session: Session, demux: Demux, shutdown: F, drain: Duration) -> RunOutcome
where
    F: Future<Output = ()>,
{
    let mut lifecycle = Lifecycle::new();
    let (mut messages, stop) = session.into_parts();
    let counter = demux.stats();

    let mut consumer: JoinHandle<DemuxStats> =
        tokio::spawn(async move { demux.run(&mut messages).await });
    lifecycle.advance(LifecycleState::Streaming);
    info!("Streaming");

    let outcome = tokio::select! {
        _ = shutdown => {
            lifecycle.advance(LifecycleState::Stopping);
            info!("Stopping stream...");
            stop.stop().await;

            let stats = match tokio::time::timeout(drain, &mut consumer).await {
                Ok(joined) => joined_stats(joined, &counter),
                Err(_) => {
                    warn!("Message loop did not finish in time, aborting");
                    consumer.abort();
                    counter.snapshot()
                }
            };
            lifecycle.advance(LifecycleState::Stopped);
            RunOutcome::Shutdown(stats)
        }
        joined = &mut consumer => {
            warn!("Stream ended without a stop request");
            stop.stop().await;
            RunOutcome::StreamEnded(joined_stats(joined, &counter))
        }
    };

    let stats = outcome.stats();
    info!(
        posts = stats.posts,
        dropped = stats.dropped,
        malformed = stats.malformed,
        "Ingestion finished"
    );
    outcome
}

fn joined_stats(
    joined: Result<DemuxStats, tokio::task::JoinError>,
    counter: &StatsCounter,
) -> DemuxStats {
    match joined {
        Ok(stats) => stats,
        Err(e) => {
            error!(error = %e, "Message loop task failed");
            counter.snapshot()
        }
    }
}

/// Which signal asked us to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

/// Resolves on the first SIGINT or SIGTERM. Later signals are swallowed by
/// the installed handlers, so they have no further effect.
#[cfg(unix)]
pub async fn shutdown_signal() -> std::io::Result<ShutdownSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|_| ShutdownSignal::Interrupt),
        _ = terminate.recv() => Ok(ShutdownSignal::Terminate),
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal() -> std::io::Result<ShutdownSignal> {
    tokio::signal::ctrl_c().await.map(|_| ShutdownSignal::Interrupt)
}
