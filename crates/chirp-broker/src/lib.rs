// ============================================================================
// Chirp Broker - transport abstraction for the deletion-event pipeline
// ============================================================================
//
// One logical operation ("publish and consume a deletion fact reliably")
// behind one pair of traits, with interchangeable adapters selected by
// deployment configuration:
//
// - rabbitmq.rs - durable queue via lapin (basic_ack / basic_nack semantics)
// - kafka.rs    - topic via rdkafka (manual offset commit as ack)
// - memory.rs   - in-process hub for tests
//
// Business logic never sees which adapter is active.
//
// ============================================================================

mod envelope;
mod error;
mod kafka;
mod memory;
mod rabbitmq;
mod transport;

pub use envelope::{DeletionEvent, SCHEMA_VERSION};
pub use error::{BrokerError, EnvelopeError};
pub use kafka::{KafkaConsumer, KafkaPublisher};
pub use memory::InMemoryBroker;
pub use rabbitmq::{RabbitmqConsumer, RabbitmqPublisher};
pub use transport::{DeadLetterRecord, Delivery, MessageConsumer, MessagePublisher};

use chirp_config::{BrokerConfig, BrokerKind};

/// Open a publisher connection to the configured broker
pub async fn connect_publisher(
    config: &BrokerConfig,
) -> Result<Box<dyn MessagePublisher>, BrokerError> {
    match config.kind {
        BrokerKind::Rabbitmq => Ok(Box::new(RabbitmqPublisher::connect(&config.rabbitmq).await?)),
        BrokerKind::Kafka => Ok(Box::new(KafkaPublisher::new(&config.kafka)?)),
    }
}

/// Open a consumer connection to the configured broker
pub async fn connect_consumer(
    config: &BrokerConfig,
) -> Result<Box<dyn MessageConsumer>, BrokerError> {
    match config.kind {
        BrokerKind::Rabbitmq => Ok(Box::new(RabbitmqConsumer::connect(&config.rabbitmq).await?)),
        BrokerKind::Kafka => Ok(Box::new(KafkaConsumer::new(&config.kafka)?)),
    }
}
