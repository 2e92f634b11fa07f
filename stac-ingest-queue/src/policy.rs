//! Retry and dead-letter policy.
//!
//! Both stages share the same policy shape: an unacknowledged message becomes
//! deliverable again once its visibility window lapses or once its consumer reports
//! it as failed, and a message whose receive count would exceed `max_receive_count`
//! is moved to the stage's dead-letter channel instead of being delivered again.
//!
//! The receive count of a message is the number of times it has been handed to a
//! consumer, so the first delivery carries count 1. With `max_receive_count = 5` a
//! message can be delivered five times; the sixth delivery attempt dead-letters it.

use std::fmt;
use std::time::Duration;

/// Visibility window of the generation stage. It covers the hard timeout of the
/// external transformation.
pub const GENERATION_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(120);

/// Visibility window of the load stage.
pub const LOAD_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum number of deliveries of one message, shared by both stages.
pub const DEFAULT_MAX_RECEIVE_COUNT: u32 = 5;

/// Default dead-letter channel of the generation stage.
pub const GENERATION_DEAD_LETTER_CHANNEL: &str = "item-gen-dlq";

/// Default dead-letter channel of the load stage.
pub const LOAD_DEAD_LETTER_CHANNEL: &str = "item-load-dlq";

/// Pipeline stage a queue belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Generation requests waiting for the external transformation.
    Generation,
    /// Catalog items waiting to be loaded into the catalog store.
    Load,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Generation => "generation",
            Stage::Load => "load",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of one message on a stage queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Waiting on the queue for a consumer.
    Enqueued,
    /// Leased to a consumer until acknowledged, failed or expired.
    InFlight,
    /// Processed successfully and removed from the queue.
    Acknowledged,
    /// Moved to the dead-letter channel; never delivered from the main queue again.
    DeadLettered,
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryState::Acknowledged | DeliveryState::DeadLettered)
    }
}

/// Events that move a message between delivery states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// A consumer asked for the message.
    Receive,
    /// The consumer finished the message.
    Acknowledge,
    /// The consumer reported the message as failed.
    ExplicitFailure,
    /// The lease lapsed without an acknowledgment.
    VisibilityExpired,
}

/// Redelivery parameters of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Time an unacknowledged message stays invisible to other consumers.
    pub visibility_timeout: Duration,
    /// Maximum number of deliveries before the message is dead-lettered.
    pub max_receive_count: u32,
    /// Where messages go once they exhaust their deliveries.
    pub dead_letter_channel: String,
}

impl RetryPolicy {
    pub fn new(
        visibility_timeout: Duration,
        max_receive_count: u32,
        dead_letter_channel: impl Into<String>,
    ) -> Self {
        Self {
            visibility_timeout,
            max_receive_count,
            dead_letter_channel: dead_letter_channel.into(),
        }
    }

    /// Default policy of the given stage.
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Generation => Self::new(
                GENERATION_VISIBILITY_TIMEOUT,
                DEFAULT_MAX_RECEIVE_COUNT,
                GENERATION_DEAD_LETTER_CHANNEL,
            ),
            Stage::Load => Self::new(
                LOAD_VISIBILITY_TIMEOUT,
                DEFAULT_MAX_RECEIVE_COUNT,
                LOAD_DEAD_LETTER_CHANNEL,
            ),
        }
    }

    /// Replace the dead-letter channel.
    pub fn with_dead_letter_channel(mut self, channel: impl Into<String>) -> Self {
        self.dead_letter_channel = channel.into();
        self
    }

    /// Whether a delivery carrying `receive_count` is still allowed.
    pub fn admits(&self, receive_count: u32) -> bool {
        receive_count <= self.max_receive_count
    }

    /// Apply `event` to a message in `state` that has been delivered
    /// `receive_count` times so far.
    ///
    /// Returns `None` when the event does not apply to the state, e.g. an
    /// acknowledgment for a message that is not in flight.
    pub fn transition(
        &self,
        state: DeliveryState,
        event: DeliveryEvent,
        receive_count: u32,
    ) -> Option<DeliveryState> {
        match (state, event) {
            (DeliveryState::Enqueued, DeliveryEvent::Receive) => {
                if self.admits(receive_count.saturating_add(1)) {
                    Some(DeliveryState::InFlight)
                } else {
                    Some(DeliveryState::DeadLettered)
                }
            }
            (DeliveryState::InFlight, DeliveryEvent::Acknowledge) => {
                Some(DeliveryState::Acknowledged)
            }
            (
                DeliveryState::InFlight,
                DeliveryEvent::ExplicitFailure | DeliveryEvent::VisibilityExpired,
            ) => Some(DeliveryState::Enqueued),
            _ => None,
        }
    }
}
