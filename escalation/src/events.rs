//! Escalation event bus
//!
//! Every chain transition is published on a Tokio broadcast channel. The bus
//! is an observability side channel: publishing never fails, and nothing in
//! the engine waits on a subscriber.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::model::{AlertId, Tier, Token};

/// Channel capacity for broadcast
pub const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ChainStarted,
    /// The tier had no eligible caregiver and was passed through.
    TierSkipped { tier: Tier },
    TierDispatched {
        tier: Tier,
        notifications: usize,
        wait_secs: u64,
    },
    /// Second, more urgent tier-zero notice.
    ReminderSent { token: Token, wait_secs: u64 },
    TimerExpired { tier: Tier },
    DeliveryFailed { token: Token, reason: String },
    Resolved { tier: Tier, token: Token },
    Exhausted,
    Failed { reason: String },
    Cancelled,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChainStarted => "chain_started",
            Self::TierSkipped { .. } => "tier_skipped",
            Self::TierDispatched { .. } => "tier_dispatched",
            Self::ReminderSent { .. } => "reminder_sent",
            Self::TimerExpired { .. } => "timer_expired",
            Self::DeliveryFailed { .. } => "delivery_failed",
            Self::Resolved { .. } => "resolved",
            Self::Exhausted => "exhausted",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this event ends the chain.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Resolved { .. } | Self::Exhausted | Self::Failed { .. } | Self::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub alert_id: AlertId,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl EscalationEvent {
    pub fn new(alert_id: AlertId, kind: EventKind) -> Self {
        Self {
            alert_id,
            at: Utc::now(),
            kind,
        }
    }
}

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

pub struct EventBus {
    sender: broadcast::Sender<EscalationEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish to all current subscribers. Having none is fine.
    pub fn publish(&self, alert_id: AlertId, kind: EventKind) {
        let event_type = kind.name();
        match self.sender.send(EscalationEvent::new(alert_id, kind)) {
            Ok(receivers) => debug!(event_type, %alert_id, receivers, "event published"),
            Err(_) => debug!(event_type, %alert_id, "event published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EscalationEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(AlertId::new(), EventKind::ChainStarted);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let alert_id = AlertId::new();
        bus.publish(alert_id, EventKind::ChainStarted);
        bus.publish(alert_id, EventKind::TierSkipped { tier: Tier::Zero });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.alert_id, alert_id);
        assert_eq!(first.kind, EventKind::ChainStarted);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, EventKind::TierSkipped { tier: Tier::Zero });
    }

    #[test]
    fn test_event_serializes_flat() {
        let event = EscalationEvent::new(AlertId::new(), EventKind::TimerExpired { tier: Tier::Two });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "timer_expired");
        assert_eq!(json["tier"], 2);
        assert!(EventKind::Exhausted.is_terminal());
        assert!(!EventKind::ChainStarted.is_terminal());
    }
}
