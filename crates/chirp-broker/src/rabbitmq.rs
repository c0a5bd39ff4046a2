// ============================================================================
// RabbitMQ adapter (lapin)
// ============================================================================
//
// Durable queue, prefetch 1, explicit basic_ack / basic_nack. Dead-lettered
// messages are wrapped in a DeadLetterRecord and published to
// `{queue}.dead-letter`, then the original is acked off the main queue.
//
// ============================================================================

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::time::Duration;
use tracing::{info, warn};

use chirp_config::RabbitmqConfig;

use crate::error::BrokerError;
use crate::transport::{DeadLetterRecord, Delivery, MessageConsumer, MessagePublisher};

async fn open_channel(config: &RabbitmqConfig) -> Result<(Connection, Channel), BrokerError> {
    let connection = Connection::connect(&config.amqp_uri(), ConnectionProperties::default())
        .await
        .map_err(|e| BrokerError::Connection(format!("failed to connect to RabbitMQ: {e}")))?;

    let channel = connection
        .create_channel()
        .await
        .map_err(|e| BrokerError::Connection(format!("failed to create channel: {e}")))?;

    Ok((connection, channel))
}

async fn declare_durable_queue(channel: &Channel, queue: &str) -> Result<(), BrokerError> {
    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| BrokerError::Connection(format!("failed to declare queue {queue}: {e}")))?;
    Ok(())
}

/// Publisher over a durable RabbitMQ queue
pub struct RabbitmqPublisher {
    _connection: Connection,
    channel: Channel,
    queue: String,
}

impl RabbitmqPublisher {
    pub async fn connect(config: &RabbitmqConfig) -> Result<Self, BrokerError> {
        let (connection, channel) = open_channel(config).await?;
        declare_durable_queue(&channel, &config.queue).await?;

        info!(
            host = %config.host,
            queue = %config.queue,
            "Connected to RabbitMQ for publishing deletion events"
        );

        Ok(Self {
            _connection: connection,
            channel,
            queue: config.queue.clone(),
        })
    }
}

#[async_trait]
impl MessagePublisher for RabbitmqPublisher {
    async fn publish(&self, payload: &[u8]) -> Result<(), BrokerError> {
        self.channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default(),
            )
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        Ok(())
    }
}

/// Consumer over a durable RabbitMQ queue
pub struct RabbitmqConsumer {
    connection: Connection,
    channel: Channel,
    consumer: lapin::Consumer,
    dead_letter_queue: String,
}

impl RabbitmqConsumer {
    pub async fn connect(config: &RabbitmqConfig) -> Result<Self, BrokerError> {
        let (connection, channel) = open_channel(config).await?;

        declare_durable_queue(&channel, &config.queue).await?;
        declare_durable_queue(&channel, &config.dead_letter_queue()).await?;

        // One unacked message at a time: processing is sequential by design.
        channel
            .basic_qos(1, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("failed to set prefetch: {e}")))?;

        let consumer = channel
            .basic_consume(
                &config.queue,
                "chirp-cascade-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                BrokerError::Connection(format!("failed to consume from {}: {e}", config.queue))
            })?;

        info!(
            host = %config.host,
            queue = %config.queue,
            dead_letter_queue = %config.dead_letter_queue(),
            "Attached to RabbitMQ deletion-event queue"
        );

        Ok(Self {
            connection,
            channel,
            consumer,
            dead_letter_queue: config.dead_letter_queue(),
        })
    }
}

#[async_trait]
impl MessageConsumer for RabbitmqConsumer {
    async fn recv(&mut self, timeout: Duration) -> Result<Option<Delivery>, BrokerError> {
        match tokio::time::timeout(timeout, self.consumer.next()).await {
            Ok(Some(Ok(delivery))) => {
                let mapped = Delivery {
                    payload: delivery.data.clone(),
                    tag: delivery.delivery_tag,
                    partition: -1,
                    offset: -1,
                    redelivered: delivery.redelivered,
                };
                Ok(Some(mapped))
            }
            Ok(Some(Err(e))) => Err(BrokerError::Receive(e.to_string())),
            Ok(None) => Err(BrokerError::Closed),
            // Timeout: no message available, let the caller re-check shutdown
            Err(_) => Ok(None),
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(delivery.tag, BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }

    async fn requeue(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        self.channel
            .basic_nack(
                delivery.tag,
                BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }

    async fn dead_letter(
        &mut self,
        delivery: &Delivery,
        reason: &str,
        retry_count: u32,
    ) -> Result<(), BrokerError> {
        let record = DeadLetterRecord::new(&delivery.payload, reason, retry_count);
        let body = record.to_bytes()?;

        self.channel
            .basic_publish(
                "",
                &self.dead_letter_queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default(),
            )
            .await
            .map_err(|e| BrokerError::DeadLetter(e.to_string()))?
            .await
            .map_err(|e| BrokerError::DeadLetter(e.to_string()))?;

        // Only remove the original once the dead-letter copy is confirmed.
        self.ack(delivery).await
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        if let Err(e) = self.connection.close(200, "worker shutting down").await {
            warn!(error = %e, "RabbitMQ connection close reported an error");
        }
        Ok(())
    }
}
