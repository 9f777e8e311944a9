//! Delivery seam.
//!
//! The engine hands each composed message to a [`Notifier`] on its own task.
//! Delivery is best-effort: a failure is logged and published as an event,
//! and never stops the step, the other recipients, or the armed timer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::events::{EventKind, SharedEventBus};
use crate::message::{Message, Urgency};
use crate::model::Notification;

/// One message for one notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispatch {
    pub notification: Notification,
    pub urgency: Urgency,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("recipient unreachable: {0}")]
    Unreachable(String),

    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Transport name for logging.
    fn name(&self) -> &'static str;

    async fn notify(&self, dispatch: &Dispatch) -> Result<(), DeliveryError>;
}

/// Shared reference to a Notifier
pub type SharedNotifier = Arc<dyn Notifier>;

/// Writes every dispatch to the log instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn notify(&self, dispatch: &Dispatch) -> Result<(), DeliveryError> {
        info!(
            recipient = %dispatch.message.recipient,
            urgency = %dispatch.urgency,
            tier = %dispatch.notification.tier(),
            subject = %dispatch.message.subject,
            link = %dispatch.message.confirm_link,
            "notification dispatched"
        );
        Ok(())
    }
}

/// Deliver on a detached task; failures become a warning and an event.
pub(crate) fn spawn_delivery(notifier: SharedNotifier, events: SharedEventBus, dispatch: Dispatch) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&dispatch).await {
            let alert_id = dispatch.notification.alert_id;
            warn!(
                notifier = notifier.name(),
                %alert_id,
                recipient = %dispatch.message.recipient,
                error = %e,
                "notification delivery failed"
            );
            events.publish(
                alert_id,
                EventKind::DeliveryFailed {
                    token: dispatch.notification.token.clone(),
                    reason: e.to_string(),
                },
            );
        }
    });
}
