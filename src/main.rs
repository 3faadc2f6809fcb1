//! tweetsink: stream tweets matching a set of keywords into PostgreSQL.
//!
//! ```bash
//! TWITTER_CONSUMER_KEY=... TWITTER_CONSUMER_SECRET=... \
//! TWITTER_ACCESS_TOKEN=... TWITTER_ACCESS_SECRET=... \
//! tweetsink --db-url postgres://localhost/tweets --track rustlang,golang
//! ```
//!
//! SIGINT or SIGTERM stops the stream and exits 0. If the service closes
//! the stream on its own the process exits with status 2 and does not
//! reconnect.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use tweetsink::config::{Args, Config};
use tweetsink::lifecycle::{self, shutdown_signal, RunOutcome};
use tweetsink::{logging, Demux, PersistPosts, PgSink, Session, StreamClient, StreamFilter};

const EXIT_STREAM_ENDED: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    logging::init(args.json_logs)?;

    let config = Config::from_args(args)?;
    info!(
        tracks = ?config.tracks,
        stall_warnings = config.stall_warnings,
        table = %config.table,
        credentials = ?config.credentials,
        "Configuration loaded"
    );

    let sink = PgSink::connect(
        &config.db_url,
        &config.table,
        config.max_connections,
        config.insert_timeout,
    )
    .await
    .context("Failed to open database")?;

    if config.init_schema {
        sink.ensure_schema()
            .await
            .with_context(|| format!("Failed to create table {}", config.table))?;
        info!(table = %config.table, "Schema ready");
    }
    let sink = Arc::new(sink);

    let client = StreamClient::new(config.credentials.clone(), config.stream_url.as_str())
        .context("Failed to build HTTP client")?;
    let filter = StreamFilter::new(config.tracks.clone(), config.stall_warnings);
    let session = Session::open(&client, &filter)
        .await
        .with_context(|| format!("Failed to open stream at {}", client.endpoint()))?;

    let demux = Demux::new().on_post(PersistPosts::new(Arc::clone(&sink)));

    let shutdown = async {
        match shutdown_signal().await {
            Ok(signal) => info!(?signal, "Shutdown signal received"),
            Err(e) => {
                // Without a handler we can only be killed, so keep streaming
                error!(error = %e, "Failed to listen for shutdown signals");
                std::future::pending::<()>().await;
            }
        }
    };

    let outcome = lifecycle::run(session, demux, shutdown).await;
    sink.close().await;

    Ok(match outcome {
        RunOutcome::Shutdown(_) => ExitCode::SUCCESS,
        RunOutcome::StreamEnded(_) => {
            error!("Stream ended unexpectedly");
            ExitCode::from(EXIT_STREAM_ENDED)
        }
    })
}
