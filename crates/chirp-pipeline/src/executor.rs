// ============================================================================
// Cascade-delete executor
// ============================================================================
//
// Runs the three delete sub-operations sequentially (tweets, likes,
// replies). Each sub-operation is independent best-effort: a failure in one
// does not stop the remaining targets from being attempted, and the result
// reports exactly which targets completed and which failed so the caller
// can decide whether to ack or retry.
//
// ============================================================================

use tracing::{debug, warn};

use crate::store::{CascadeStore, CascadeTarget, StorageError};

/// Rows removed by a fully successful cascade
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub tweets_deleted: u64,
    pub likes_deleted: u64,
    pub replies_deleted: u64,
}

impl CascadeReport {
    pub fn total(&self) -> u64 {
        self.tweets_deleted + self.likes_deleted + self.replies_deleted
    }
}

/// A cascade where at least one target failed
///
/// `completed` lists targets that did delete (their effect persists across
/// the retry that this failure triggers); `failures` carries one error per
/// failed target.
#[derive(Debug, thiserror::Error)]
#[error("cascade delete incomplete: {} of 3 target(s) failed", failures.len())]
pub struct CascadeFailure {
    pub completed: Vec<(CascadeTarget, u64)>,
    pub failures: Vec<StorageError>,
}

impl CascadeFailure {
    /// Targets that did not complete in this run
    pub fn failed_targets(&self) -> Vec<CascadeTarget> {
        self.failures.iter().map(|e| e.target).collect()
    }
}

/// Remove every row owned by `username` across all cascade targets
///
/// Idempotent: re-running for a username with no matching rows deletes
/// zero rows and succeeds, which is what makes broker redelivery safe.
pub async fn cascade_delete(
    store: &dyn CascadeStore,
    username: &str,
) -> Result<CascadeReport, CascadeFailure> {
    let mut completed = Vec::new();
    let mut failures = Vec::new();

    for target in CascadeTarget::ALL {
        let result = match target {
            CascadeTarget::Tweets => store.delete_tweets(username).await,
            CascadeTarget::Likes => store.delete_likes(username).await,
            CascadeTarget::Replies => store.delete_replies(username).await,
        };

        match result {
            Ok(rows) => {
                debug!(target = %target, rows = rows, "Cascade target deleted");
                completed.push((target, rows));
            }
            Err(e) => {
                warn!(target = %target, error = %e, "Cascade target delete failed");
                failures.push(e);
            }
        }
    }

    if failures.is_empty() {
        let mut report = CascadeReport::default();
        for (target, rows) in completed {
            match target {
                CascadeTarget::Tweets => report.tweets_deleted = rows,
                CascadeTarget::Likes => report.likes_deleted = rows,
                CascadeTarget::Replies => report.replies_deleted = rows,
            }
        }
        Ok(report)
    } else {
        Err(CascadeFailure {
            completed,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::InMemoryCascadeStore;

    #[tokio::test]
    async fn test_full_cascade() {
        let store = InMemoryCascadeStore::new();
        store.seed("gulsan", 3, 2, 1);

        let report = cascade_delete(&store, "gulsan").await.unwrap();
        assert_eq!(report.tweets_deleted, 3);
        assert_eq!(report.likes_deleted, 2);
        assert_eq!(report.replies_deleted, 1);
        assert_eq!(report.total(), 6);
        assert_eq!(store.remaining("gulsan"), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_idempotent_rerun() {
        let store = InMemoryCascadeStore::new();
        store.seed("gulsan", 3, 2, 1);

        let first = cascade_delete(&store, "gulsan").await.unwrap();
        assert_eq!(first.total(), 6);

        // Second run deletes zero rows and still succeeds
        let second = cascade_delete(&store, "gulsan").await.unwrap();
        assert_eq!(second.total(), 0);
        assert_eq!(store.remaining("gulsan"), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_unknown_user_is_noop() {
        let store = InMemoryCascadeStore::new();
        store.seed("someone-else", 5, 5, 5);

        let report = cascade_delete(&store, "nonexistent-user").await.unwrap();
        assert_eq!(report.total(), 0);
        assert_eq!(store.remaining("someone-else"), (5, 5, 5));
    }

    #[tokio::test]
    async fn test_partial_failure_is_surfaced_per_target() {
        let store = InMemoryCascadeStore::new();
        store.seed("gulsan", 3, 2, 1);
        store.fail_on(CascadeTarget::Likes);

        let failure = cascade_delete(&store, "gulsan").await.unwrap_err();

        assert_eq!(failure.failed_targets(), vec![CascadeTarget::Likes]);
        // Tweets and replies completed despite the likes failure
        assert!(failure
            .completed
            .iter()
            .any(|(t, rows)| *t == CascadeTarget::Tweets && *rows == 3));
        assert!(failure
            .completed
            .iter()
            .any(|(t, rows)| *t == CascadeTarget::Replies && *rows == 1));
        // Likes rows are still there for the retry
        assert_eq!(store.remaining("gulsan"), (0, 2, 0));
    }
}
