//! Lease-based in-memory queue.
//!
//! Applies a [`RetryPolicy`] exactly: received messages stay invisible for the
//! visibility window, expire back onto the queue when not acknowledged, become
//! visible immediately when released, and are moved to an inspectable dead-letter
//! list once their next delivery would exceed the receive limit.
//!
//! Time is measured on the tokio clock so tests can drive visibility expiry with a
//! paused runtime.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::QueueError;
use crate::interfaces::{MessageQueue, Publisher};
use crate::message::QueueMessage;
use crate::policy::{DeliveryEvent, DeliveryState, RetryPolicy};

/// A message moved to the dead-letter channel, with its payload untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub message_id: String,
    pub body: Vec<u8>,
    pub receive_count: u32,
    pub channel: String,
}

#[derive(Debug)]
struct Entry {
    message_id: String,
    body: Vec<u8>,
    receive_count: u32,
    state: DeliveryState,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: Vec<Entry>,
    dead_letters: Vec<DeadLetter>,
}

/// In-memory stage queue.
pub struct InMemoryQueue {
    policy: RetryPolicy,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Enqueue a payload and return its message id.
    pub async fn send(&self, body: impl Into<Vec<u8>>) -> String {
        let message_id = Uuid::new_v4().to_string();
        let mut state = self.state.lock().await;
        state.entries.push(Entry {
            message_id: message_id.clone(),
            body: body.into(),
            receive_count: 0,
            state: DeliveryState::Enqueued,
            visible_at: Instant::now(),
        });
        drop(state);
        self.notify.notify_waiters();
        message_id
    }

    /// Messages still owned by the queue, leased or not.
    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Messages currently leased to a consumer.
    pub async fn in_flight(&self) -> usize {
        self.state
            .lock()
            .await
            .entries
            .iter()
            .filter(|entry| entry.state == DeliveryState::InFlight)
            .count()
    }

    /// Snapshot of the dead-letter channel.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }

    /// Lease every visible message, up to `max_messages`.
    ///
    /// Expired leases are returned to the queue first. Returns the leased batch and
    /// the earliest instant at which another message becomes visible.
    fn lease(
        &self,
        state: &mut QueueState,
        max_messages: usize,
        now: Instant,
    ) -> (Vec<QueueMessage>, Option<Instant>) {
        let policy = &self.policy;
        let mut batch = Vec::new();
        let mut next_visible: Option<Instant> = None;
        let mut index = 0;

        while index < state.entries.len() {
            let entry = &mut state.entries[index];

            if entry.state == DeliveryState::InFlight && entry.visible_at <= now {
                if let Some(next) = policy.transition(
                    entry.state,
                    DeliveryEvent::VisibilityExpired,
                    entry.receive_count,
                ) {
                    debug!(
                        message_id = %entry.message_id,
                        receive_count = entry.receive_count,
                        "Visibility timeout expired"
                    );
                    entry.state = next;
                }
            }

            if entry.visible_at > now || batch.len() >= max_messages {
                next_visible = Some(match next_visible {
                    Some(at) => at.min(entry.visible_at),
                    None => entry.visible_at,
                });
                index += 1;
                continue;
            }

            match policy.transition(entry.state, DeliveryEvent::Receive, entry.receive_count) {
                Some(DeliveryState::InFlight) => {
                    entry.receive_count += 1;
                    entry.state = DeliveryState::InFlight;
                    entry.visible_at = now + policy.visibility_timeout;
                    batch.push(QueueMessage::new(
                        entry.message_id.clone(),
                        entry.body.clone(),
                        entry.receive_count,
                    ));
                    index += 1;
                }
                Some(DeliveryState::DeadLettered) => {
                    let entry = state.entries.remove(index);
                    warn!(
                        message_id = %entry.message_id,
                        receive_count = entry.receive_count,
                        channel = %policy.dead_letter_channel,
                        "Moving message to dead-letter channel"
                    );
                    state.dead_letters.push(DeadLetter {
                        message_id: entry.message_id,
                        body: entry.body,
                        receive_count: entry.receive_count,
                        channel: policy.dead_letter_channel.clone(),
                    });
                }
                _ => index += 1,
            }
        }

        (batch, next_visible)
    }

    /// Apply `event` to the lease held by `message`.
    ///
    /// The receive count a delivery was handed out with is its receipt: once the
    /// message has been delivered again, the older delivery can no longer settle it.
    /// An expired lease that nobody picked up yet can still be settled.
    async fn finish(&self, message: &QueueMessage, event: DeliveryEvent) -> Result<(), QueueError> {
        let message_id = message.message_id.as_str();
        let mut state = self.state.lock().await;
        let index = state
            .entries
            .iter()
            .position(|entry| entry.message_id == message_id)
            .ok_or_else(|| QueueError::UnknownMessage(message_id.to_string()))?;

        let entry = &mut state.entries[index];
        if entry.state == DeliveryState::InFlight && entry.receive_count != message.receive_count {
            warn!(
                message_id,
                receive_count = message.receive_count,
                current_receive_count = entry.receive_count,
                "Rejected settlement of a stale delivery"
            );
            return Err(QueueError::LeaseLost(message_id.to_string()));
        }

        match self
            .policy
            .transition(entry.state, event, entry.receive_count)
        {
            Some(DeliveryState::Acknowledged) => {
                state.entries.remove(index);
            }
            Some(next) => {
                entry.state = next;
                entry.visible_at = Instant::now();
                drop(state);
                self.notify.notify_waiters();
            }
            None => return Err(QueueError::UnknownMessage(message_id.to_string())),
        }
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns as soon as at least one message is visible, or after `wait`.
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let deadline = Instant::now() + wait;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = Instant::now();
            let next_visible = {
                let mut state = self.state.lock().await;
                let (batch, next_visible) = self.lease(&mut state, max_messages, now);
                if !batch.is_empty() {
                    return Ok(batch);
                }
                next_visible
            };

            if now >= deadline {
                return Ok(Vec::new());
            }

            let wake_at = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    async fn acknowledge(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.finish(message, DeliveryEvent::Acknowledge).await
    }

    async fn release(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.finish(message, DeliveryEvent::ExplicitFailure).await
    }
}

#[async_trait]
impl Publisher for InMemoryQueue {
    async fn publish(&self, body: &[u8]) -> Result<String, QueueError> {
        Ok(self.send(body.to_vec()).await)
    }
}
