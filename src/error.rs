use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Startup configuration problems. All of these are fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Consumer key/secret and Access token/secret required")]
    MissingCredentials,

    #[error("Database URL required")]
    MissingDatabaseUrl,

    #[error("At least one track keyword is required")]
    EmptyTracks,

    #[error("Invalid table name: {0:?}")]
    InvalidTable(String),

    #[error("Config file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Failures opening the filtered stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The service rejected our credentials during registration
    #[error("Stream authentication failed ({status}): {message}")]
    Authentication { status: u16, message: String },

    /// Any other non-success status on registration
    #[error("Stream API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Stream transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("OAuth error: {0}")]
    OAuth(String),
}

/// A single failed insert. Never fatal to the pipeline.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Insert timed out after {0:?}")]
    Timeout(Duration),
}

impl SinkError {
    /// True when the insert hit the primary key constraint.
    pub fn is_duplicate(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

/// Bearer token exchange failures.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Error obtaining token: {0}")]
    Api(String),

    #[error("Malformed token response: {0}")]
    Malformed(String),
}
