use super::with_timeout;
use crate::config::QueueConfig;
use crate::domain::intent::TransactionIntent;
use crate::domain::ports::{DeadLetter, DeliveryTag, QueueHandle, QueueStats, Received};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Receives decoded intents from [`BrokerClient::consume`].
///
/// The handler owns the delivery and must settle it with [`IntentDelivery::ack`] or
/// [`IntentDelivery::nack`]. A delivery dropped unsettled stays claimed until the
/// queue's visibility timeout hands it to another consumer.
#[async_trait]
pub trait IntentHandler: Send + Sync {
    async fn handle(&self, delivery: IntentDelivery);
}

/// A decoded intent together with the claim on the message that carried it.
pub struct IntentDelivery {
    pub intent: TransactionIntent,
    pub attempt: u32,
    payload: Vec<u8>,
    tag: DeliveryTag,
    queue: QueueHandle,
    timeout: Duration,
}

impl IntentDelivery {
    /// The message exactly as it was published.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub async fn ack(self) -> Result<()> {
        with_timeout(self.timeout, "ack", self.queue.ack(self.tag)).await
    }

    /// Releases the message. With `requeue` it is delivered again later, otherwise
    /// it is routed to the dead-letter queue with `reason`.
    pub async fn nack(self, reason: &str, requeue: bool) -> Result<()> {
        with_timeout(
            self.timeout,
            "nack",
            self.queue.nack(self.tag, requeue, reason),
        )
        .await
    }
}

/// Typed JSON client over a [`MessageQueue`](crate::domain::ports::MessageQueue).
#[derive(Clone)]
pub struct BrokerClient {
    queue: QueueHandle,
    timeout: Duration,
}

impl BrokerClient {
    pub fn new(queue: QueueHandle, config: &QueueConfig) -> Self {
        Self {
            queue,
            timeout: config.receive_timeout(),
        }
    }

    pub async fn publish(&self, intent: &TransactionIntent) -> Result<()> {
        let payload = intent.to_json()?;
        with_timeout(self.timeout, "publish", self.queue.publish(payload)).await?;
        debug!(intent_id = %intent.id, kind = ?intent.kind, "published intent");
        Ok(())
    }

    /// Publishes a raw JSON intent after checking it decodes. Unknown transaction
    /// types fail here with a validation error and never reach the queue.
    pub async fn publish_json(&self, value: serde_json::Value) -> Result<Uuid> {
        let intent = TransactionIntent::from_value(value)?;
        self.publish(&intent).await?;
        Ok(intent.id)
    }

    /// Feeds every delivered message to `handler` until the queue is closed.
    ///
    /// Payloads that do not decode into an intent are dead-lettered here, since no
    /// amount of redelivery will fix them.
    pub async fn consume<H>(&self, handler: &H) -> Result<()>
    where
        H: IntentHandler + ?Sized,
    {
        loop {
            let raw = match self.queue.receive(self.timeout).await? {
                Received::Message(raw) => raw,
                Received::Empty => continue,
                Received::Closed => {
                    debug!("queue closed, consumer stopping");
                    return Ok(());
                }
            };

            match TransactionIntent::from_json(&raw.payload) {
                Ok(intent) => {
                    let delivery = IntentDelivery {
                        intent,
                        attempt: raw.attempt,
                        payload: raw.payload,
                        tag: raw.tag,
                        queue: self.queue.clone(),
                        timeout: self.timeout,
                    };
                    handler.handle(delivery).await;
                }
                Err(err) => {
                    warn!(
                        payload = %String::from_utf8_lossy(&raw.payload),
                        error = %err,
                        "dead-lettering undecodable message"
                    );
                    let reason = err.to_string();
                    if let Err(settle_err) = with_timeout(
                        self.timeout,
                        "nack",
                        self.queue.nack(raw.tag, false, &reason),
                    )
                    .await
                    {
                        warn!(error = %settle_err, "failed to dead-letter undecodable message");
                    }
                }
            }
        }
    }

    /// Drops every queued message that is not currently claimed.
    pub async fn purge(&self) -> Result<usize> {
        with_timeout(self.timeout, "purge", self.queue.purge()).await
    }

    pub async fn close(&self) -> Result<()> {
        with_timeout(self.timeout, "close", self.queue.close()).await
    }

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        with_timeout(self.timeout, "dead_letters", self.queue.dead_letters()).await
    }

    pub async fn replay_dead_letters(&self) -> Result<usize> {
        with_timeout(self.timeout, "replay", self.queue.replay_dead_letters()).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        with_timeout(self.timeout, "stats", self.queue.stats()).await
    }
}
