//! HTTP webhook delivery.
//!
//! Each dispatch is POSTed as one JSON document. Anything but a 2xx answer
//! is a delivery failure; the engine logs it and carries on.

use std::time::Duration;

use async_trait::async_trait;
use escalation::message::Urgency;
use escalation::notifier::{DeliveryError, Dispatch, Notifier};
use escalation::{AlertId, Token};
use serde::Serialize;
use tracing::debug;

/// Body of one webhook call
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub alert_id: AlertId,
    pub token: &'a Token,
    pub tier: u8,
    pub urgency: Urgency,
    pub recipient: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
    pub confirm_link: &'a str,
}

impl<'a> From<&'a Dispatch> for WebhookPayload<'a> {
    fn from(dispatch: &'a Dispatch) -> Self {
        Self {
            alert_id: dispatch.notification.alert_id,
            token: &dispatch.notification.token,
            tier: dispatch.notification.tier().level(),
            urgency: dispatch.urgency,
            recipient: &dispatch.message.recipient,
            subject: &dispatch.message.subject,
            body: &dispatch.message.body,
            confirm_link: &dispatch.message.confirm_link,
        }
    }
}

pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(&self, dispatch: &Dispatch) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(&self.url)
            .json(&WebhookPayload::from(dispatch))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    DeliveryError::Unreachable(format!("{}: {e}", self.url))
                } else {
                    DeliveryError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Transport(format!("HTTP {status}: {body}")));
        }
        debug!(url = %self.url, %status, recipient = %dispatch.message.recipient, "webhook delivered");
        Ok(())
    }
}
