// ============================================================================
// Chirp Pipeline - cascade-delete propagation semantics
// ============================================================================
//
// Everything between "a deletion event arrived" and "the broker may discard
// it" lives here, independent of which broker adapter or store backend is
// wired in:
//
// - store.rs     - storage trait seams and the per-target error type
// - executor.rs  - the idempotent three-target cascade delete
// - processor.rs - decode -> cascade -> ack/retry/dead-letter decision
// - retry.rs     - bounded per-message retry accounting
// - worker.rs    - the long-running consumer loop and its state machine
// - publisher.rs - fire-and-forget deletion publishing
// - outbox.rs    - the guaranteed-delivery outbox relay
// - testing.rs   - in-memory store doubles for tests
//
// ============================================================================

pub mod executor;
pub mod outbox;
pub mod processor;
pub mod publisher;
pub mod retry;
pub mod store;
pub mod testing;
pub mod worker;

pub use executor::{cascade_delete, CascadeFailure, CascadeReport};
pub use outbox::{OutboxEvent, OutboxRelay, OutboxStore};
pub use processor::{process_delivery, ProcessOutcome};
pub use publisher::{DeletionPublisher, PublishError};
pub use retry::{RetryDecision, RetryTracker};
pub use store::{CascadeStore, CascadeTarget, StorageError};
pub use worker::{CascadeWorker, PhaseCell, WorkerPhase, WorkerStats};
