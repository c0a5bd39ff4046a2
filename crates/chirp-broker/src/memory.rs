// ============================================================================
// In-memory broker (test transport)
// ============================================================================
//
// A process-local hub implementing both transport traits, with the same
// at-least-once accounting as the real adapters: received messages sit in
// an unacked set until acked, requeued, or dead-lettered. Tests use the
// inspection methods to assert ack-after-effect ordering.
//
// ============================================================================

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use crate::error::BrokerError;
use crate::transport::{Delivery, MessageConsumer, MessagePublisher};

#[derive(Default)]
struct HubState {
    queue: VecDeque<(u64, Vec<u8>)>,
    unacked: HashMap<u64, Vec<u8>>,
    dead: Vec<(Vec<u8>, String, u32)>,
    redelivered_tags: HashSet<u64>,
    next_tag: u64,
    acked: u64,
    published: u64,
    closed: bool,
}

/// Shared in-memory message hub
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<HubState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publisher(&self) -> InMemoryPublisher {
        InMemoryPublisher { hub: self.clone() }
    }

    pub fn consumer(&self) -> InMemoryConsumer {
        InMemoryConsumer { hub: self.clone() }
    }

    /// Messages waiting in the main queue
    pub async fn queued_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Messages handed out but not yet acked / requeued / dead-lettered
    pub async fn unacked_len(&self) -> usize {
        self.state.lock().await.unacked.len()
    }

    /// Total successful acknowledgments
    pub async fn acked_count(&self) -> u64 {
        self.state.lock().await.acked
    }

    /// Total publishes accepted
    pub async fn published_count(&self) -> u64 {
        self.state.lock().await.published
    }

    /// Dead-lettered messages as (original payload, reason, retry count)
    pub async fn dead_letters(&self) -> Vec<(Vec<u8>, String, u32)> {
        self.state.lock().await.dead.clone()
    }
}

/// Publishing half of the in-memory hub
pub struct InMemoryPublisher {
    hub: InMemoryBroker,
}

#[async_trait]
impl MessagePublisher for InMemoryPublisher {
    async fn publish(&self, payload: &[u8]) -> Result<(), BrokerError> {
        let mut state = self.hub.state.lock().await;
        if state.closed {
            return Err(BrokerError::Closed);
        }
        state.next_tag += 1;
        let tag = state.next_tag;
        state.queue.push_back((tag, payload.to_vec()));
        state.published += 1;
        drop(state);
        self.hub.notify.notify_one();
        Ok(())
    }
}

/// Consuming half of the in-memory hub
pub struct InMemoryConsumer {
    hub: InMemoryBroker,
}

#[async_trait]
impl MessageConsumer for InMemoryConsumer {
    async fn recv(&mut self, timeout: Duration) -> Result<Option<Delivery>, BrokerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self.hub.state.lock().await;
                if state.closed {
                    return Err(BrokerError::Closed);
                }
                if let Some((tag, payload)) = state.queue.pop_front() {
                    state.unacked.insert(tag, payload.clone());
                    let redelivered = !state.redelivered_tags.insert(tag);
                    return Ok(Some(Delivery {
                        payload,
                        tag,
                        partition: -1,
                        offset: -1,
                        redelivered,
                    }));
                }
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let _ = tokio::time::timeout(remaining, self.hub.notify.notified()).await;
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut state = self.hub.state.lock().await;
        match state.unacked.remove(&delivery.tag) {
            Some(_) => {
                state.acked += 1;
                Ok(())
            }
            None => Err(BrokerError::Ack(format!(
                "unknown delivery tag {}",
                delivery.tag
            ))),
        }
    }

    async fn requeue(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut state = self.hub.state.lock().await;
        match state.unacked.remove(&delivery.tag) {
            Some(payload) => {
                state.queue.push_front((delivery.tag, payload));
                drop(state);
                self.hub.notify.notify_one();
                Ok(())
            }
            None => Err(BrokerError::Ack(format!(
                "unknown delivery tag {}",
                delivery.tag
            ))),
        }
    }

    async fn dead_letter(
        &mut self,
        delivery: &Delivery,
        reason: &str,
        retry_count: u32,
    ) -> Result<(), BrokerError> {
        let mut state = self.hub.state.lock().await;
        match state.unacked.remove(&delivery.tag) {
            Some(payload) => {
                state.dead.push((payload, reason.to_string(), retry_count));
                Ok(())
            }
            None => Err(BrokerError::DeadLetter(format!(
                "unknown delivery tag {}",
                delivery.tag
            ))),
        }
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        Ok(())
    }
}
