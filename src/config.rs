use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Parser};
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_STREAM_URL: &str = "https://stream.twitter.com/1.1/statuses/filter.json";
pub const DEFAULT_TABLE: &str = "twitter_tweet";
pub const DEFAULT_TRACKS: [&str; 5] = ["rustlang", "golang", "python", "cat", "dog"];

/// Streams tweets matching a set of keywords into PostgreSQL.
///
/// Every credential flag can also be set through the environment using the
/// `TWITTER_` prefix, e.g. `--consumer-key` is read from `TWITTER_CONSUMER_KEY`
/// when the flag is absent.
#[derive(Parser, Debug, Default)]
#[command(name = "tweetsink")]
#[command(version)]
pub struct Args {
    /// Twitter Consumer Key
    #[arg(long, env = "TWITTER_CONSUMER_KEY", hide_env_values = true)]
    pub consumer_key: Option<String>,

    /// Twitter Consumer Secret
    #[arg(long, env = "TWITTER_CONSUMER_SECRET", hide_env_values = true)]
    pub consumer_secret: Option<String>,

    /// Twitter Access Token
    #[arg(long, env = "TWITTER_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Twitter Access Secret
    #[arg(long, env = "TWITTER_ACCESS_SECRET", hide_env_values = true)]
    pub access_secret: Option<String>,

    /// PostgreSQL database URL
    #[arg(long, env = "TWITTER_DB_URL", hide_env_values = true)]
    pub db_url: Option<String>,

    /// Keywords to track (repeatable or comma-separated)
    #[arg(long = "track", value_delimiter = ',')]
    pub tracks: Vec<String>,

    /// Ask the service for periodic stall warnings
    #[arg(long, action = ArgAction::Set)]
    pub stall_warnings: Option<bool>,

    /// Table receiving the tweets
    #[arg(long)]
    pub table: Option<String>,

    /// Filter stream endpoint
    #[arg(long, default_value = DEFAULT_STREAM_URL)]
    pub stream_url: String,

    /// Upper bound for a single insert in seconds (0 disables)
    #[arg(long, default_value = "10")]
    pub insert_timeout_secs: u64,

    /// Maximum pooled database connections
    #[arg(long, default_value = "2")]
    pub max_connections: u32,

    /// Create the table if it does not exist
    #[arg(long)]
    pub init_schema: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Path to a TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// OAuth 1.0a user-context credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"[redacted]")
            .field("access_token", &self.access_token)
            .field("access_secret", &"[redacted]")
            .finish()
    }
}

/// Optional on-disk settings. Anything given on the command line wins.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub stream: StreamSection,
    pub store: StoreSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    pub track: Option<Vec<String>>,
    pub stall_warnings: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub table: Option<String>,
}

impl FileConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tweetsink").join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load an explicit path (must exist) or the default path (if present).
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) if !path.exists() => Err(ConfigError::FileNotFound(path.to_path_buf())),
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }
}

/// Fully validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub db_url: String,
    pub tracks: Vec<String>,
    pub stall_warnings: bool,
    pub table: String,
    pub stream_url: String,
    pub insert_timeout: Option<Duration>,
    pub max_connections: u32,
    pub init_schema: bool,
}

impl Config {
    /// Merge CLI/env arguments over the file config and validate the result.
    pub fn resolve(args: Args, file: FileConfig) -> Result<Self, ConfigError> {
        let credentials = match (
            non_empty(args.consumer_key),
            non_empty(args.consumer_secret),
            non_empty(args.access_token),
            non_empty(args.access_secret),
        ) {
            (Some(consumer_key), Some(consumer_secret), Some(access_token), Some(access_secret)) => {
                Credentials {
                    consumer_key,
                    consumer_secret,
                    access_token,
                    access_secret,
                }
            }
            _ => return Err(ConfigError::MissingCredentials),
        };

        let db_url = non_empty(args.db_url).ok_or(ConfigError::MissingDatabaseUrl)?;

        let tracks = if !args.tracks.is_empty() {
            args.tracks
        } else if let Some(tracks) = file.stream.track {
            tracks
        } else {
            DEFAULT_TRACKS.iter().map(|t| t.to_string()).collect()
        };
        let tracks: Vec<String> = tracks
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if tracks.is_empty() {
            return Err(ConfigError::EmptyTracks);
        }

        let table = args
            .table
            .or(file.store.table)
            .unwrap_or_else(|| DEFAULT_TABLE.to_string());
        if !is_identifier(&table) {
            return Err(ConfigError::InvalidTable(table));
        }

        Ok(Self {
            credentials,
            db_url,
            tracks,
            stall_warnings: args
                .stall_warnings
                .or(file.stream.stall_warnings)
                .unwrap_or(true),
            table,
            stream_url: args.stream_url,
            insert_timeout: (args.insert_timeout_secs > 0)
                .then(|| Duration::from_secs(args.insert_timeout_secs)),
            max_connections: args.max_connections.max(1),
            init_schema: args.init_schema,
        })
    }

    /// Parse the process arguments, read the config file and validate.
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        let file = FileConfig::discover(args.config.as_deref())?;
        Self::resolve(args, file)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Plain SQL identifier, optionally schema-qualified (`schema.table`).
pub fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').count() <= 2
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
