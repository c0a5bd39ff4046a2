// ============================================================================
// In-memory test doubles
// ============================================================================
//
// Deterministic stand-ins for the storage traits, used by unit and
// integration tests across the workspace. Failure injection is per cascade
// target so tests can exercise partial-cascade behavior.
//
// ============================================================================

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::outbox::{OutboxEvent, OutboxStore};
use crate::store::{CascadeStore, CascadeTarget, StorageError};

/// In-memory cascade store keyed by username
///
/// Rows are modeled as per-username counts per collection, which is all
/// the delete-by-predicate contract can observe.
#[derive(Default)]
pub struct InMemoryCascadeStore {
    tweets: Mutex<HashMap<String, u64>>,
    likes: Mutex<HashMap<String, u64>>,
    replies: Mutex<HashMap<String, u64>>,
    failing: Mutex<HashSet<CascadeTarget>>,
}

impl InMemoryCascadeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed row counts for a username
    pub fn seed(&self, username: &str, tweets: u64, likes: u64, replies: u64) {
        self.tweets
            .lock()
            .unwrap()
            .insert(username.to_string(), tweets);
        self.likes
            .lock()
            .unwrap()
            .insert(username.to_string(), likes);
        self.replies
            .lock()
            .unwrap()
            .insert(username.to_string(), replies);
    }

    /// Make every delete against `target` fail until cleared
    pub fn fail_on(&self, target: CascadeTarget) {
        self.failing.lock().unwrap().insert(target);
    }

    pub fn clear_failure(&self, target: CascadeTarget) {
        self.failing.lock().unwrap().remove(&target);
    }

    /// Remaining (tweets, likes, replies) row counts for a username
    pub fn remaining(&self, username: &str) -> (u64, u64, u64) {
        (
            *self.tweets.lock().unwrap().get(username).unwrap_or(&0),
            *self.likes.lock().unwrap().get(username).unwrap_or(&0),
            *self.replies.lock().unwrap().get(username).unwrap_or(&0),
        )
    }

    fn delete(
        &self,
        table: &Mutex<HashMap<String, u64>>,
        target: CascadeTarget,
        username: &str,
    ) -> Result<u64, StorageError> {
        if self.failing.lock().unwrap().contains(&target) {
            return Err(StorageError::new(
                target,
                anyhow::anyhow!("simulated {target} storage failure"),
            ));
        }
        Ok(table.lock().unwrap().remove(username).unwrap_or(0))
    }
}

#[async_trait]
impl CascadeStore for InMemoryCascadeStore {
    async fn delete_tweets(&self, username: &str) -> Result<u64, StorageError> {
        self.delete(&self.tweets, CascadeTarget::Tweets, username)
    }

    async fn delete_likes(&self, username: &str) -> Result<u64, StorageError> {
        self.delete(&self.likes, CascadeTarget::Likes, username)
    }

    async fn delete_replies(&self, username: &str) -> Result<u64, StorageError> {
        self.delete(&self.replies, CascadeTarget::Replies, username)
    }
}

struct OutboxRow {
    event: OutboxEvent,
    published: bool,
    last_error: Option<String>,
}

/// In-memory outbox store
#[derive(Default)]
pub struct InMemoryOutboxStore {
    rows: Mutex<Vec<OutboxRow>>,
    next_id: Mutex<i64>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a serialized envelope, returning its row id
    pub fn enqueue(&self, event_id: uuid::Uuid, username: &str, payload: Vec<u8>) -> i64 {
        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let id = *next_id;

        self.rows.lock().unwrap().push(OutboxRow {
            event: OutboxEvent {
                id,
                event_id,
                username: username.to_string(),
                payload,
                attempts: 0,
                created_at: chrono::Utc::now(),
            },
            published: false,
            last_error: None,
        });
        id
    }

    pub fn published_count(&self) -> usize {
        self.rows.lock().unwrap().iter().filter(|r| r.published).count()
    }

    pub fn pending_count(&self) -> usize {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.published)
            .count()
    }

    pub fn last_error(&self, id: i64) -> Option<String> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.event.id == id)
            .and_then(|r| r.last_error.clone())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn fetch_unpublished(&self, limit: i64) -> anyhow::Result<Vec<OutboxEvent>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.published)
            .take(limit as usize)
            .map(|r| r.event.clone())
            .collect())
    }

    async fn mark_published(&self, id: i64) -> anyhow::Result<()> {
        let mut rows = self.rows.lock().unwrap();
        match rows.iter_mut().find(|r| r.event.id == id) {
            Some(row) => {
                row.published = true;
                row.event.attempts += 1;
                Ok(())
            }
            None => anyhow::bail!("unknown outbox row {id}"),
        }
    }

    async fn record_failure(&self, id: i64, error: &str) -> anyhow::Result<()> {
        let mut rows = self.rows.lock().unwrap();
        match rows.iter_mut().find(|r| r.event.id == id) {
            Some(row) => {
                row.event.attempts += 1;
                row.last_error = Some(error.to_string());
                Ok(())
            }
            None => anyhow::bail!("unknown outbox row {id}"),
        }
    }
}
