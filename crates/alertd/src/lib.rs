//! alertd: caregiver alert daemon
//!
//! Loads the caregiver directory, runs one [`escalation::EscalationEngine`]
//! and relays alerts and confirmations between a JSON-lines channel and the
//! engine.

pub mod config;
pub mod inbound;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use escalation::notifier::SharedNotifier;
use escalation::{EscalationEvent, TracingNotifier};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::{DaemonConfig, NotifierKind};
use crate::webhook::WebhookNotifier;

/// Build the configured delivery transport.
pub fn build_notifier(config: &DaemonConfig) -> Result<SharedNotifier> {
    match config.notifier {
        NotifierKind::Log => Ok(Arc::new(TracingNotifier)),
        NotifierKind::Webhook => {
            let url = config
                .webhook
                .url
                .clone()
                .context("webhook notifier selected without a URL")?;
            let notifier =
                WebhookNotifier::new(url, Duration::from_secs(config.webhook.timeout_secs))
                    .context("Failed to build webhook client")?;
            Ok(Arc::new(notifier))
        }
    }
}

/// Log every escalation event until the bus closes.
pub async fn log_events(mut events: broadcast::Receiver<EscalationEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => info!(
                alert_id = %event.alert_id,
                event = event.kind.name(),
                terminal = event.kind.is_terminal(),
                "escalation event"
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_notifier_by_kind() {
        let mut config = DaemonConfig::from_toml("").unwrap();
        config.notifier = NotifierKind::Log;
        assert_eq!(build_notifier(&config).unwrap().name(), "log");

        config.notifier = NotifierKind::Webhook;
        config.webhook.url = Some("http://127.0.0.1:9/notify".into());
        assert_eq!(build_notifier(&config).unwrap().name(), "webhook");

        config.webhook.url = None;
        assert!(build_notifier(&config).is_err());
    }
}
