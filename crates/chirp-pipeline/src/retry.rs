// ============================================================================
// Bounded retry tracking
// ============================================================================
//
// Counts transient failures per event id so a message that keeps failing
// is dead-lettered after max_retries attempts instead of cycling through
// redelivery forever. Counts are held in process: this pipeline runs one
// consumer per queue, and losing the counts on restart only grants a
// failing message a fresh retry budget, which at-least-once semantics
// already tolerate.
//
// ============================================================================

use std::collections::{HashMap, VecDeque};

/// Cap on tracked event ids; oldest entries are evicted past this
const TRACKER_CAPACITY: usize = 1024;

/// Verdict after registering a transient failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Within budget: requeue, attempt count so far
    Retry(u32),
    /// Budget exhausted: dead-letter, total attempts made
    Exhausted(u32),
}

/// Per-message failure counter with an eviction cap
pub struct RetryTracker {
    max_retries: u32,
    counts: HashMap<String, u32>,
    order: VecDeque<String>,
}

impl RetryTracker {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            counts: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record one failed attempt for `event_id` and decide its fate
    pub fn register_failure(&mut self, event_id: &str) -> RetryDecision {
        let count = match self.counts.get_mut(event_id) {
            Some(count) => {
                *count += 1;
                *count
            }
            None => {
                self.counts.insert(event_id.to_string(), 1);
                self.order.push_back(event_id.to_string());
                self.evict_over_capacity();
                1
            }
        };

        if count >= self.max_retries {
            RetryDecision::Exhausted(count)
        } else {
            RetryDecision::Retry(count)
        }
    }

    /// Forget a message that completed or was dead-lettered
    pub fn clear(&mut self, event_id: &str) {
        if self.counts.remove(event_id).is_some() {
            // Release the eviction-order slot too, or cleared ids would
            // accumulate there for the life of the worker.
            self.order.retain(|id| id != event_id);
        }
    }

    fn evict_over_capacity(&mut self) {
        while self.counts.len() > TRACKER_CAPACITY {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.counts.remove(&oldest);
                }
                None => break,
            }
        }
    }
}
