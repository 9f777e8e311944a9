//! Notification record builder
//!
//! Creates one uniquely tokened record per (caregiver, alert) dispatch. A
//! token is only kept once the store has both reported it unused and accepted
//! the commit; either kind of collision regenerates and tries again.

use std::sync::Arc;

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::model::{Alert, CaregiverAssignment, Notification, Token};
use crate::store::{SharedNotificationStore, StoreError};

/// Token generation attempts before [`EngineError::TokenSpaceExhausted`].
pub const DEFAULT_MAX_TOKEN_ATTEMPTS: u32 = 8;

type TokenSource = Arc<dyn Fn() -> Token + Send + Sync>;

#[derive(Clone)]
pub struct NotificationBuilder {
    store: SharedNotificationStore,
    generate: TokenSource,
    max_attempts: u32,
}

impl NotificationBuilder {
    pub fn new(store: SharedNotificationStore) -> Self {
        Self {
            store,
            generate: Arc::new(Token::generate),
            max_attempts: DEFAULT_MAX_TOKEN_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Replace the random token source (deterministic tokens in tests).
    pub fn with_token_source<F>(mut self, generate: F) -> Self
    where
        F: Fn() -> Token + Send + Sync + 'static,
    {
        self.generate = Arc::new(generate);
        self
    }

    /// Create and persist a notification for `assignment` about `alert`.
    pub async fn build(
        &self,
        assignment: &CaregiverAssignment,
        alert: &Alert,
    ) -> EngineResult<Notification> {
        for attempt in 1..=self.max_attempts {
            let token = (self.generate)();
            if self.store.token_exists(&token).await? {
                debug!(attempt, alert_id = %alert.id, "token already in use, regenerating");
                continue;
            }

            let notification = Notification::new(assignment.clone(), alert.id, token);
            match self.store.save_notification(&notification).await {
                Ok(()) => return Ok(notification),
                Err(StoreError::DuplicateToken) => {
                    debug!(attempt, alert_id = %alert.id, "token taken at commit, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::TokenSpaceExhausted(self.max_attempts))
    }
}
