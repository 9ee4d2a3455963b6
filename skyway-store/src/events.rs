use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use skyway_core::notify::{QueueError, TaskQueue};
use skyway_shared::models::events::NotificationEnvelope;
use skyway_shared::NotificationTask;
use std::time::Duration;
use tracing::{error, info};

/// Publishes notification tasks to the worker topic.
#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
    topic: String,
}

impl EventProducer {
    pub fn new(brokers: &str, topic: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }

    pub async fn publish(&self, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);

        match self
            .producer
            .send(record, Timeout::After(Duration::from_secs(0)))
            .await
        {
            Ok(delivery) => {
                info!(
                    "Sent message to {}/{}: partition {} offset {}",
                    self.topic, key, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", self.topic, e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl TaskQueue for EventProducer {
    async fn enqueue(&self, task: NotificationTask) -> Result<(), QueueError> {
        let key = task.key();
        let payload = serde_json::to_string(&NotificationEnvelope::now(task))
            .map_err(|e| QueueError::Encode(e.to_string()))?;
        self.publish(&key, &payload)
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))
    }
}
