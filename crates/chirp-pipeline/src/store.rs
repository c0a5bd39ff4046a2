use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// The three collections a deletion cascades across
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CascadeTarget {
    Tweets,
    Likes,
    Replies,
}

impl CascadeTarget {
    /// Cascade order: tweets first, by convention
    pub const ALL: [CascadeTarget; 3] = [
        CascadeTarget::Tweets,
        CascadeTarget::Likes,
        CascadeTarget::Replies,
    ];
}

impl fmt::Display for CascadeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CascadeTarget::Tweets => write!(f, "tweets"),
            CascadeTarget::Likes => write!(f, "likes"),
            CascadeTarget::Replies => write!(f, "replies"),
        }
    }
}

/// A failed delete against one cascade target
///
/// Storage failures are treated as transient: the message is requeued and
/// the cascade re-runs, which is safe because delete-by-predicate on rows
/// that are already gone is a no-op.
#[derive(Debug, Error)]
#[error("failed to delete {target} rows: {source}")]
pub struct StorageError {
    pub target: CascadeTarget,
    #[source]
    pub source: anyhow::Error,
}

impl StorageError {
    pub fn new(target: CascadeTarget, source: impl Into<anyhow::Error>) -> Self {
        Self {
            target,
            source: source.into(),
        }
    }
}

/// Delete operations against the tweet-owning service's store
///
/// Each operation removes every row owned by `username` in one collection
/// and returns the number of rows affected. Implementations must be
/// idempotent: a username with no matching rows deletes zero rows and
/// succeeds.
#[async_trait]
pub trait CascadeStore: Send + Sync {
    /// Delete all tweets where `author == username`
    async fn delete_tweets(&self, username: &str) -> Result<u64, StorageError>;

    /// Delete all likes where `liked_by == username`
    async fn delete_likes(&self, username: &str) -> Result<u64, StorageError>;

    /// Delete all replies where `author == username`
    async fn delete_replies(&self, username: &str) -> Result<u64, StorageError>;
}
