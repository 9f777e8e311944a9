//! Line-delimited JSON command adapter.
//!
//! ```text
//! {"op":"alert","home":"nears-hub-dev","subject":"stove",...}  → {"status":"escalating","alert_id":...}
//! {"op":"confirm","token":"..."}                               → {"status":"resolved"|"already_resolved"|"not_found","message":...}
//! {"op":"status"}                                              → {"status":"active","alerts":[...]}
//! anything else                                                → {"status":"error","message":...}
//! ```

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use escalation::{AcceptOutcome, Alert, AlertId, EscalationEngine, HomeId, MemoryStore, Token};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

pub const RESOLVED_MESSAGE: &str =
    "Thank you. The alert is confirmed and no other caregiver will be contacted.";
pub const ALREADY_RESOLVED_MESSAGE: &str =
    "This alert has already been taken care of. No further action is needed.";
pub const NOT_FOUND_MESSAGE: &str = "This confirmation link is not valid.";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Alert {
        home: HomeId,
        subject: String,
        location: String,
        state: f64,
        measurable: String,
        #[serde(default)]
        start: Option<DateTime<Utc>>,
    },
    Confirm {
        token: Token,
    },
    Status,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Escalating { alert_id: AlertId },
    Resolved { message: String },
    AlreadyResolved { message: String },
    NotFound { message: String },
    Active { alerts: Vec<AlertId> },
    Error { message: String },
}

impl Response {
    fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

impl From<AcceptOutcome> for Response {
    fn from(outcome: AcceptOutcome) -> Self {
        match outcome {
            AcceptOutcome::Resolved => Self::Resolved {
                message: RESOLVED_MESSAGE.to_string(),
            },
            AcceptOutcome::AlreadyResolved => Self::AlreadyResolved {
                message: ALREADY_RESOLVED_MESSAGE.to_string(),
            },
            AcceptOutcome::NotFound => Self::NotFound {
                message: NOT_FOUND_MESSAGE.to_string(),
            },
        }
    }
}

/// Turns requests into alert records and engine calls.
#[derive(Clone)]
pub struct InboundHandler {
    engine: EscalationEngine,
    store: Arc<MemoryStore>,
}

impl InboundHandler {
    pub fn new(engine: EscalationEngine, store: Arc<MemoryStore>) -> Self {
        Self { engine, store }
    }

    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Alert {
                home,
                subject,
                location,
                state,
                measurable,
                start,
            } => {
                let mut alert = Alert::new(home, subject, location, measurable, state);
                if let Some(start) = start {
                    alert = alert.with_start(start);
                }
                self.raise(alert).await
            }
            Request::Confirm { token } => match self.engine.accept(&token).await {
                Ok(outcome) => {
                    info!(%token, ?outcome, "confirmation handled");
                    outcome.into()
                }
                Err(e) => {
                    warn!(%token, error = %e, "confirmation failed");
                    Response::error(e.to_string())
                }
            },
            Request::Status => Response::Active {
                alerts: self.engine.registry().active_alerts(),
            },
        }
    }

    async fn raise(&self, alert: Alert) -> Response {
        let alert_id = alert.id;
        if let Err(e) = self.store.insert_alert(alert.clone()) {
            return Response::error(e.to_string());
        }
        match self.engine.start_escalation(alert).await {
            Ok(_) => Response::Escalating { alert_id },
            Err(e) => {
                warn!(%alert_id, error = %e, "alert not escalated");
                Response::error(e.to_string())
            }
        }
    }

    pub async fn handle_line(&self, line: &str) -> Response {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!(error = %e, "malformed request");
                Response::error(format!("malformed request: {e}"))
            }
        }
    }

    /// Answer one response line per request line until `reader` hits EOF.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = self.handle_line(&line).await;
            let mut out = serde_json::to_string(&response)?;
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok(())
    }
}
