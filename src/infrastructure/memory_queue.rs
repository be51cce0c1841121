use crate::config::QueueConfig;
use crate::domain::ports::{
    DeadLetter, DeliveryTag, MessageQueue, QueueStats, RawDelivery, Received,
};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

struct Message {
    payload: Vec<u8>,
    deliveries: u32,
}

struct Claim {
    message: Message,
    expires_at: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Message>,
    in_flight: HashMap<DeliveryTag, Claim>,
    dead: Vec<DeadLetter>,
    last_tag: DeliveryTag,
    closed: bool,
}

impl QueueState {
    /// Returns expired claims to the queue so another consumer can pick them up.
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<DeliveryTag> = self
            .in_flight
            .iter()
            .filter(|(_, claim)| claim.expires_at <= now)
            .map(|(tag, _)| *tag)
            .collect();
        for tag in expired {
            if let Some(claim) = self.in_flight.remove(&tag) {
                debug!(tag, deliveries = claim.message.deliveries, "claim expired, requeueing");
                self.ready.push_back(claim.message);
            }
        }
    }

    fn settle(&mut self, tag: DeliveryTag) -> Result<Message> {
        self.in_flight
            .remove(&tag)
            .map(|claim| claim.message)
            .ok_or(LedgerError::StaleDelivery(tag))
    }
}

/// An in-process queue with at-least-once delivery.
///
/// Delivered messages stay claimed until they are acked or nacked. A claim that is
/// neither settled within the visibility timeout is handed out again, which is how
/// a crashed consumer's work gets redelivered. Cloning shares the same queue.
#[derive(Clone)]
pub struct InMemoryQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl InMemoryQueue {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
            visibility_timeout: config.visibility_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(&QueueConfig::default())
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn publish(&self, payload: Vec<u8>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(LedgerError::QueueClosed);
        }
        state.ready.push_back(Message {
            payload,
            deliveries: 0,
        });
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Received> {
        let deadline = Instant::now() + wait;
        loop {
            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Ok(Received::Closed);
                }
                let now = Instant::now();
                state.reclaim_expired(now);
                if let Some(mut message) = state.ready.pop_front() {
                    message.deliveries += 1;
                    state.last_tag += 1;
                    let delivery = RawDelivery {
                        tag: state.last_tag,
                        payload: message.payload.clone(),
                        attempt: message.deliveries,
                    };
                    state.in_flight.insert(
                        delivery.tag,
                        Claim {
                            message,
                            expires_at: now + self.visibility_timeout,
                        },
                    );
                    return Ok(Received::Message(delivery));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Received::Empty);
            }
            let nap = self.poll_interval.min(deadline - now);
            let _ = tokio::time::timeout(nap, self.notify.notified()).await;
        }
    }

    async fn ack(&self, tag: DeliveryTag) -> Result<()> {
        let mut state = self.state.lock().await;
        state.settle(tag)?;
        Ok(())
    }

    async fn nack(&self, tag: DeliveryTag, requeue: bool, reason: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let message = state.settle(tag)?;
        if requeue {
            state.ready.push_back(message);
            drop(state);
            self.notify.notify_one();
        } else {
            state.dead.push(DeadLetter {
                payload: message.payload,
                reason: reason.to_string(),
                attempts: message.deliveries,
            });
        }
        Ok(())
    }

    async fn purge(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let purged = state.ready.len();
        state.ready.clear();
        Ok(purged)
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(self.state.lock().await.dead.clone())
    }

    async fn replay_dead_letters(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(LedgerError::QueueClosed);
        }
        let dead = std::mem::take(&mut state.dead);
        let replayed = dead.len();
        state.ready.extend(dead.into_iter().map(|letter| Message {
            payload: letter.payload,
            deliveries: 0,
        }));
        drop(state);
        for _ in 0..replayed {
            self.notify.notify_one();
        }
        Ok(replayed)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.state.lock().await;
        Ok(QueueStats {
            ready: state.ready.len(),
            in_flight: state.in_flight.len(),
            dead_lettered: state.dead.len(),
        })
    }
}
