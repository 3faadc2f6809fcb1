use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::SinkError;
use crate::normalize::NormalizedPost;

/// Destination for normalized tweets. One call, one row, no retries.
#[async_trait]
pub trait PostSink: Send + Sync {
    async fn insert(&self, post: &NormalizedPost) -> Result<(), SinkError>;
}

#[async_trait]
impl<S: PostSink + ?Sized> PostSink for std::sync::Arc<S> {
    async fn insert(&self, post: &NormalizedPost) -> Result<(), SinkError> {
        (**self).insert(post).await
    }
}

/// PostgreSQL sink writing into a single table keyed by tweet id.
pub struct PgSink {
    pool: PgPool,
    table: String,
    insert_sql: String,
    insert_timeout: Option<Duration>,
}

impl PgSink {
    /// Open the pool eagerly so a bad URL fails at startup.
    ///
    /// `table` must already be a validated identifier (see
    /// [`crate::config::is_identifier`]); it is interpolated into the SQL.
    pub async fn connect(
        url: &str,
        table: &str,
        max_connections: u32,
        insert_timeout: Option<Duration>,
    ) -> Result<Self, SinkError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;

        Ok(Self::with_pool(pool, table, insert_timeout))
    }

    pub fn with_pool(pool: PgPool, table: &str, insert_timeout: Option<Duration>) -> Self {
        Self {
            pool,
            table: table.to_string(),
            insert_sql: insert_statement(table),
            insert_timeout,
        }
    }

    /// Create the target table when it is missing.
    pub async fn ensure_schema(&self) -> Result<(), SinkError> {
        sqlx::query(&create_table_statement(&self.table))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl PostSink for PgSink {
    async fn insert(&self, post: &NormalizedPost) -> Result<(), SinkError> {
        let query = sqlx::query(&self.insert_sql)
            .bind(post.id)
            .bind(post.created_at)
            .bind(&post.text)
            .bind(&post.screen_name)
            .execute(&self.pool);

        match self.insert_timeout {
            Some(limit) => match tokio::time::timeout(limit, query).await {
                Ok(result) => result.map(|_| ())?,
                Err(_) => return Err(SinkError::Timeout(limit)),
            },
            None => query.await.map(|_| ())?,
        }
        Ok(())
    }
}

pub fn insert_statement(table: &str) -> String {
    format!("INSERT INTO {table}(id, created_at, text, screenname) VALUES($1, $2, $3, $4)")
}

pub fn create_table_statement(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
            id BIGINT PRIMARY KEY, \
            created_at TIMESTAMPTZ NOT NULL, \
            text TEXT NOT NULL, \
            screenname TEXT NOT NULL\
        )"
    )
}
