// ============================================================================
// Chirp DB - PostgreSQL storage
// ============================================================================
//
// Pool construction, schema bootstrap, and the sqlx-backed implementations
// of the pipeline storage traits. The cascade deletes are plain predicate
// deletes, so re-running one after a partial failure or a redelivery is
// always safe.
//
// ============================================================================

mod schema;

pub use schema::init_schema;

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use chirp_broker::DeletionEvent;
use chirp_config::DbConfig;
use chirp_pipeline::{CascadeStore, CascadeTarget, OutboxEvent, OutboxStore, StorageError};

/// Create a PostgreSQL connection pool and verify connectivity
pub async fn create_pool(database_url: &str, config: &DbConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    sqlx::query("SELECT 1").execute(&pool).await?;
    info!(max_connections = config.max_connections, "Database pool ready");

    Ok(pool)
}

/// Liveness probe used by the health endpoint
pub async fn ping(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

/// Cascade deletes over the tweet-owning tables
#[derive(Clone)]
pub struct PgCascadeStore {
    pool: PgPool,
}

impl PgCascadeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn delete_where(
        &self,
        target: CascadeTarget,
        sql: &str,
        username: &str,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query(sql)
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::new(target, e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CascadeStore for PgCascadeStore {
    async fn delete_tweets(&self, username: &str) -> Result<u64, StorageError> {
        self.delete_where(
            CascadeTarget::Tweets,
            "DELETE FROM tweets WHERE author = $1",
            username,
        )
        .await
    }

    async fn delete_likes(&self, username: &str) -> Result<u64, StorageError> {
        self.delete_where(
            CascadeTarget::Likes,
            "DELETE FROM likes WHERE liked_by = $1",
            username,
        )
        .await
    }

    async fn delete_replies(&self, username: &str) -> Result<u64, StorageError> {
        self.delete_where(
            CascadeTarget::Replies,
            "DELETE FROM replies WHERE author = $1",
            username,
        )
        .await
    }
}

/// Durable outbox over the `deletion_outbox` table
#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn fetch_unpublished(&self, limit: i64) -> anyhow::Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            "SELECT id, event_id, username, payload::text AS payload, attempts, created_at \
             FROM deletion_outbox \
             WHERE published_at IS NULL \
             ORDER BY id \
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.try_get("payload")?;
            events.push(OutboxEvent {
                id: row.try_get("id")?,
                event_id: row.try_get("event_id")?,
                username: row.try_get("username")?,
                payload: payload.into_bytes(),
                attempts: row.try_get("attempts")?,
                created_at: row.try_get("created_at")?,
            });
        }

        Ok(events)
    }

    async fn mark_published(&self, id: i64) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE deletion_outbox \
             SET published_at = NOW(), attempts = attempts + 1 \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(&self, id: i64, error: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE deletion_outbox \
             SET attempts = attempts + 1, last_error = $2 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Delete a user row and enqueue its deletion event atomically
///
/// The outbox row commits in the same transaction as the user delete, so a
/// committed delete always leaves an event behind for the relay even if the
/// broker is down. Returns whether the user existed.
pub async fn delete_user_and_enqueue(pool: &PgPool, username: &str) -> anyhow::Result<bool> {
    let event = DeletionEvent::new(username);
    let event_id = Uuid::from_str(&event.id).context("generated event id is not a UUID")?;
    let payload =
        String::from_utf8(event.to_bytes()?).context("envelope serialized to invalid UTF-8")?;

    let mut tx = pool.begin().await?;

    let deleted = sqlx::query("DELETE FROM users WHERE username = $1")
        .bind(username)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if deleted == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query(
        "INSERT INTO deletion_outbox (event_id, username, payload) \
         VALUES ($1, $2, CAST($3 AS JSONB))",
    )
    .bind(event_id)
    .bind(username)
    .bind(payload)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(event_id = %event_id, username = %username, "User deleted, deletion event enqueued");
    Ok(true)
}
