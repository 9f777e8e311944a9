//! Storage seams consumed by the engine.
//!
//! The engine never owns a datastore. It reads caregiver assignments and tier
//! policies through [`Directory`] and persists notification records through
//! [`NotificationStore`]. Both are implemented by [`crate::memory::MemoryStore`]
//! and can be backed by any database that offers the same simple queries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{Alert, AlertId, CaregiverAssignment, Notification, Tier, Token};

/// Error type for storage operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backing store could not be reached. Safe to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A notification with the same token was already committed.
    #[error("duplicate notification token")]
    DuplicateToken,

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Whether the operation may succeed if attempted again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Read-only caregiver lookups.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Directory: Send + Sync {
    /// The primary (tier zero) caregiver for the alert's resident, if any.
    async fn lookup_tier_zero(&self, alert: &Alert) -> StoreResult<Option<CaregiverAssignment>>;

    /// Every caregiver assigned at `tier` to the alert's resident. Empty when
    /// none are assigned.
    async fn lookup_tier(&self, alert: &Alert, tier: Tier)
        -> StoreResult<Vec<CaregiverAssignment>>;

    /// How long a tier waits for an acknowledgment before escalating.
    async fn tier_wait_time(&self, tier: Tier) -> StoreResult<Duration>;
}

/// Durable notification and alert-resolution records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Commit a new record. Fails with [`StoreError::DuplicateToken`] when the
    /// token is already taken.
    async fn save_notification(&self, notification: &Notification) -> StoreResult<()>;

    async fn token_exists(&self, token: &Token) -> StoreResult<bool>;

    async fn find_notification_by_token(&self, token: &Token)
        -> StoreResult<Option<Notification>>;

    async fn mark_accepted(&self, notification: &Notification) -> StoreResult<()>;

    async fn mark_alert_resolved(&self, alert_id: AlertId) -> StoreResult<()>;

    async fn is_alert_resolved(&self, alert_id: AlertId) -> StoreResult<bool>;
}

/// Shared reference to a Directory
pub type SharedDirectory = Arc<dyn Directory>;

/// Shared reference to a NotificationStore
pub type SharedNotificationStore = Arc<dyn NotificationStore>;
