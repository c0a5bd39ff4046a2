// ============================================================================
// Kafka adapter (rdkafka)
// ============================================================================
//
// Manual offset commits: committing the consumer state is the ack, exactly
// like the delivery-worker pattern this adapter descends from. Requeue is a
// seek back to the failed record's offset so bounded in-session retry
// behaves like an AMQP nack-with-requeue. Dead letters go to `{topic}-dlq`.
//
// ============================================================================

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset};
use std::time::Duration;
use tracing::{info, warn};

use chirp_config::KafkaConfig;

use crate::error::BrokerError;
use crate::transport::{DeadLetterRecord, Delivery, MessageConsumer, MessagePublisher};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);

fn base_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", &config.brokers);
    client_config
}

/// Publisher over a Kafka topic
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaPublisher {
    pub fn new(config: &KafkaConfig) -> Result<Self, BrokerError> {
        let producer: FutureProducer = base_config(config)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("request.timeout.ms", "30000")
            .create()
            .map_err(|e| BrokerError::Connection(format!("failed to create producer: {e}")))?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            "Kafka publisher initialized"
        );

        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }

    /// Wait for in-flight sends before shutdown
    pub fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| BrokerError::Publish(format!("failed to flush producer: {e}")))
    }
}

#[async_trait]
impl MessagePublisher for KafkaPublisher {
    async fn publish(&self, payload: &[u8]) -> Result<(), BrokerError> {
        let record = FutureRecord::<(), _>::to(&self.topic).payload(payload);

        self.producer
            .send(record, Timeout::After(SEND_TIMEOUT))
            .await
            .map_err(|(e, _)| BrokerError::Publish(e.to_string()))?;

        Ok(())
    }
}

/// Consumer over a Kafka topic with manual offset management
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    topic: String,
    dlq_producer: FutureProducer,
    dlq_topic: String,
}

impl KafkaConsumer {
    pub fn new(config: &KafkaConfig) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = base_config(config)
            .set("group.id", &config.consumer_group)
            // Commit is the ack: never auto-commit
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .create()
            .map_err(|e| BrokerError::Connection(format!("failed to create consumer: {e}")))?;

        consumer
            .subscribe(&[&config.topic])
            .map_err(|e| BrokerError::Connection(format!("failed to subscribe: {e}")))?;

        let dlq_producer: FutureProducer = base_config(config)
            .set("acks", "all")
            .create()
            .map_err(|e| BrokerError::Connection(format!("failed to create DLQ producer: {e}")))?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            consumer_group = %config.consumer_group,
            dlq_topic = %config.dead_letter_topic(),
            "Kafka consumer initialized"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
            dlq_producer,
            dlq_topic: config.dead_letter_topic(),
        })
    }
}

#[async_trait]
impl MessageConsumer for KafkaConsumer {
    async fn recv(&mut self, timeout: Duration) -> Result<Option<Delivery>, BrokerError> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Ok(Ok(message)) => {
                let payload = message.payload().unwrap_or_default().to_vec();
                Ok(Some(Delivery {
                    payload,
                    tag: 0,
                    partition: message.partition(),
                    offset: message.offset(),
                    redelivered: false,
                }))
            }
            Ok(Err(e)) => Err(BrokerError::Receive(e.to_string())),
            Err(_) => Ok(None),
        }
    }

    async fn ack(&mut self, _delivery: &Delivery) -> Result<(), BrokerError> {
        // Sequential processing: consumer state is exactly "everything up to
        // and including this message".
        self.consumer
            .commit_consumer_state(CommitMode::Sync)
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }

    async fn requeue(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.consumer
            .seek(
                &self.topic,
                delivery.partition,
                Offset::Offset(delivery.offset),
                Timeout::After(Duration::from_secs(5)),
            )
            .map_err(|e| BrokerError::Ack(format!("failed to seek for requeue: {e}")))
    }

    async fn dead_letter(
        &mut self,
        delivery: &Delivery,
        reason: &str,
        retry_count: u32,
    ) -> Result<(), BrokerError> {
        let record = DeadLetterRecord::new(&delivery.payload, reason, retry_count);
        let body = record.to_bytes()?;

        let dlq_record = FutureRecord::<(), _>::to(&self.dlq_topic).payload(&body);
        self.dlq_producer
            .send(dlq_record, Timeout::After(SEND_TIMEOUT))
            .await
            .map_err(|(e, _)| BrokerError::DeadLetter(e.to_string()))?;

        // Commit only after the DLQ copy is acknowledged.
        self.ack(delivery).await
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if let Err(e) = self.dlq_producer.flush(Timeout::After(Duration::from_secs(10))) {
            warn!(error = %e, "Failed to flush DLQ producer on close");
        }
        self.consumer.unsubscribe();
        Ok(())
    }
}
