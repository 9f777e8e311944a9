//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::builder::DEFAULT_MAX_TOKEN_ATTEMPTS;
use crate::events::CHANNEL_CAPACITY;
use crate::retry::RetryPolicy;

/// Configuration for the escalation engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Subtracted from the tier-zero wait time to get the reminder wait.
    /// A tier-zero wait time at or below this value is a configuration error.
    pub reminder_offset_secs: u64,
    /// Retry policy for transient storage failures
    pub retry: RetryPolicy,
    /// Token generation attempts before giving up on a notification
    pub max_token_attempts: u32,
    /// Base of the confirmation link; the token is appended as `?token=`
    pub confirm_base_url: String,
    /// Event bus capacity
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reminder_offset_secs: 20,
            retry: RetryPolicy::default(),
            max_token_attempts: DEFAULT_MAX_TOKEN_ATTEMPTS,
            confirm_base_url: std::env::var("ESCALATION_CONFIRM_URL")
                .unwrap_or_else(|_| "http://localhost:8000/api/confirm".to_string()),
            event_capacity: CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn reminder_offset(&self) -> Duration {
        Duration::from_secs(self.reminder_offset_secs)
    }
}
