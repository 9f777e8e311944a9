//! In-memory caregiver directory and notification store.
//!
//! Seeded from a [`DirectorySeed`] (people, homes, assignments, tier
//! policies), usually loaded from a JSON file. Notifications are never
//! deleted, so token uniqueness is checked against every token ever issued.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{
    Alert, AlertId, AssignmentId, CaregiverAssignment, Home, HomeId, Notification, Person,
    PersonId, Tier, TierPolicy, Token,
};
use crate::store::{Directory, NotificationStore, StoreError, StoreResult};

/// Assignment row as stored: people referenced by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRow {
    pub id: AssignmentId,
    pub elderly: PersonId,
    pub caregiver: PersonId,
    pub tier: Tier,
}

/// Initial directory contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySeed {
    pub persons: Vec<Person>,
    pub homes: Vec<Home>,
    pub assignments: Vec<AssignmentRow>,
    pub tiers: Vec<TierPolicy>,
}

/// Error loading a directory seed
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid directory JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0} references unknown person {1}")]
    UnknownPerson(String, PersonId),

    #[error("elderly person {elderly} is assigned caregiver {caregiver} more than once")]
    DuplicateAssignment {
        elderly: PersonId,
        caregiver: PersonId,
    },
}

impl DirectorySeed {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SeedError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Reject dangling person references and repeated (elderly, caregiver)
    /// pairs.
    pub fn validate(&self) -> Result<(), SeedError> {
        let known = |id: &PersonId| self.persons.iter().any(|p| p.id == *id);
        for home in &self.homes {
            if let Some(elderly) = &home.elderly {
                if !known(elderly) {
                    return Err(SeedError::UnknownPerson(format!("home {}", home.id), *elderly));
                }
            }
        }
        for (i, row) in self.assignments.iter().enumerate() {
            for person in [&row.elderly, &row.caregiver] {
                if !known(person) {
                    return Err(SeedError::UnknownPerson(
                        format!("assignment {}", row.id.0),
                        *person,
                    ));
                }
            }
            let repeated = self.assignments[..i]
                .iter()
                .any(|r| r.elderly == row.elderly && r.caregiver == row.caregiver);
            if repeated {
                return Err(SeedError::DuplicateAssignment {
                    elderly: row.elderly,
                    caregiver: row.caregiver,
                });
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    persons: HashMap<PersonId, Person>,
    homes: HashMap<HomeId, Home>,
    assignments: Vec<AssignmentRow>,
    policies: HashMap<Tier, Duration>,
    alerts: HashMap<AlertId, Alert>,
    notifications: HashMap<Token, Notification>,
}

impl MemoryState {
    fn elderly_for(&self, alert: &Alert) -> Option<PersonId> {
        self.homes.get(&alert.home).and_then(|h| h.elderly)
    }

    fn resolve(&self, row: &AssignmentRow) -> StoreResult<CaregiverAssignment> {
        let person = |id: PersonId| {
            self.persons
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(id.to_string()))
        };
        Ok(CaregiverAssignment {
            id: row.id,
            elderly: person(row.elderly)?,
            caregiver: person(row.caregiver)?,
            tier: row.tier,
        })
    }
}

/// RwLock-guarded in-memory store implementing both storage seams.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    /// Number of upcoming calls that fail with `Unavailable`.
    pending_faults: AtomicU32,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: DirectorySeed) -> Result<Self, SeedError> {
        seed.validate()?;
        let state = MemoryState {
            persons: seed.persons.into_iter().map(|p| (p.id, p)).collect(),
            homes: seed.homes.into_iter().map(|h| (h.id.clone(), h)).collect(),
            assignments: seed.assignments,
            policies: seed
                .tiers
                .into_iter()
                .map(|p| (p.tier, p.wait_time()))
                .collect(),
            ..MemoryState::default()
        };
        Ok(Self {
            state: RwLock::new(state),
            ..Self::default()
        })
    }

    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        Self::from_seed(DirectorySeed::from_path(path)?)
    }

    /// Record an alert created by the inbound side.
    pub fn insert_alert(&self, alert: Alert) -> StoreResult<()> {
        let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
        state.alerts.insert(alert.id, alert);
        Ok(())
    }

    pub fn alert(&self, id: AlertId) -> StoreResult<Option<Alert>> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(state.alerts.get(&id).cloned())
    }

    pub fn set_wait_time(&self, tier: Tier, wait: Duration) -> StoreResult<()> {
        let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
        state.policies.insert(tier, wait);
        Ok(())
    }

    /// Every notification generated for an alert, oldest first.
    pub fn notifications_for_alert(&self, alert_id: AlertId) -> StoreResult<Vec<Notification>> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut found: Vec<Notification> = state
            .notifications
            .values()
            .filter(|n| n.alert_id == alert_id)
            .cloned()
            .collect();
        found.sort_by_key(|n| n.created_at);
        Ok(found)
    }

    /// Make the next `count` store calls fail as if the backend were down.
    pub fn inject_unavailable(&self, count: u32) {
        self.pending_faults.store(count, Ordering::SeqCst);
    }

    /// Number of successful mutating calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_fault(&self) -> StoreResult<()> {
        let tripped = self
            .pending_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StoreError::Unavailable("injected fault".to_string()))
        } else {
            Ok(())
        }
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, MemoryState>> {
        self.check_fault()?;
        self.state.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, MemoryState>> {
        self.check_fault()?;
        self.state.write().map_err(|_| StoreError::LockPoisoned)
    }
}

#[async_trait]
impl Directory for MemoryStore {
    async fn lookup_tier_zero(&self, alert: &Alert) -> StoreResult<Option<CaregiverAssignment>> {
        let state = self.read()?;
        let Some(elderly) = state.elderly_for(alert) else {
            return Ok(None);
        };

        let mut rows: Vec<&AssignmentRow> = state
            .assignments
            .iter()
            .filter(|r| r.elderly == elderly && r.tier == Tier::Zero)
            .collect();
        if rows.len() > 1 {
            warn!(
                %elderly,
                count = rows.len(),
                "multiple tier-zero assignments; preferring self assignment"
            );
        }
        // Self assignment first, then lowest id.
        rows.sort_by_key(|r| (r.caregiver != r.elderly, r.id));
        rows.first().map(|row| state.resolve(row)).transpose()
    }

    async fn lookup_tier(
        &self,
        alert: &Alert,
        tier: Tier,
    ) -> StoreResult<Vec<CaregiverAssignment>> {
        let state = self.read()?;
        let Some(elderly) = state.elderly_for(alert) else {
            return Ok(Vec::new());
        };
        state
            .assignments
            .iter()
            .filter(|r| r.elderly == elderly && r.tier == tier)
            .map(|row| state.resolve(row))
            .collect()
    }

    async fn tier_wait_time(&self, tier: Tier) -> StoreResult<Duration> {
        let state = self.read()?;
        Ok(state
            .policies
            .get(&tier)
            .copied()
            .unwrap_or(Duration::from_secs(TierPolicy::DEFAULT_WAIT_SECS)))
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn save_notification(&self, notification: &Notification) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.notifications.contains_key(&notification.token) {
            return Err(StoreError::DuplicateToken);
        }
        state
            .notifications
            .insert(notification.token.clone(), notification.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn token_exists(&self, token: &Token) -> StoreResult<bool> {
        Ok(self.read()?.notifications.contains_key(token))
    }

    async fn find_notification_by_token(
        &self,
        token: &Token,
    ) -> StoreResult<Option<Notification>> {
        Ok(self.read()?.notifications.get(token).cloned())
    }

    async fn mark_accepted(&self, notification: &Notification) -> StoreResult<()> {
        let mut state = self.write()?;
        let record = state
            .notifications
            .get_mut(&notification.token)
            .ok_or_else(|| StoreError::NotFound(format!("notification {}", notification.token)))?;
        record.accepted = true;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn mark_alert_resolved(&self, alert_id: AlertId) -> StoreResult<()> {
        let mut state = self.write()?;
        let alert = state
            .alerts
            .get_mut(&alert_id)
            .ok_or_else(|| StoreError::NotFound(format!("alert {alert_id}")))?;
        alert.resolved = true;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_alert_resolved(&self, alert_id: AlertId) -> StoreResult<bool> {
        Ok(self
            .read()?
            .alerts
            .get(&alert_id)
            .map(|a| a.resolved)
            .unwrap_or(false))
    }
}
