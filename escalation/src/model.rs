//! Domain records shared by the engine and its storage/delivery collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Identifier of a stored person (elderly resident or caregiver).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(pub u64);

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "person-{}", self.0)
    }
}

/// Identifier of a caregiver assignment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssignmentId(pub u64);

/// Identifier of a monitored home (the hub name reported by the sensors).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HomeId(pub String);

impl HomeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for HomeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a sensor alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(pub Uuid);

impl AlertId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Escalation level. Tier zero is the self/primary association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    Zero,
    One,
    Two,
    Three,
}

/// Rejected tier number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("tier must be between 0 and 3, got {0}")]
pub struct InvalidTier(pub u8);

impl Tier {
    /// All tiers in escalation order.
    pub const ALL: [Tier; 4] = [Tier::Zero, Tier::One, Tier::Two, Tier::Three];

    pub fn level(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        }
    }
}

impl TryFrom<u8> for Tier {
    type Error = InvalidTier;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Self::Zero),
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            3 => Ok(Self::Three),
            other => Err(InvalidTier(other)),
        }
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.level()
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier-{}", self.level())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl Person {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Home {
    pub id: HomeId,
    /// Resident the home's alerts are escalated for. A home without a
    /// resident has no caregivers at any tier.
    pub elderly: Option<PersonId>,
}

/// A caregiver assigned to an elderly person at a given tier, with both
/// people resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaregiverAssignment {
    pub id: AssignmentId,
    pub elderly: Person,
    pub caregiver: Person,
    pub tier: Tier,
}

impl CaregiverAssignment {
    /// Whether the elderly person is their own caregiver.
    pub fn is_self(&self) -> bool {
        self.elderly.id == self.caregiver.id
    }
}

/// Wait time configured for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub tier: Tier,
    pub wait_time_secs: u64,
}

impl TierPolicy {
    /// Wait time applied when a tier has no stored policy.
    pub const DEFAULT_WAIT_SECS: u64 = 600;

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_secs)
    }
}

/// A hazardous condition reported by a home sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    /// Short tag for the device or condition, e.g. `stove`.
    pub subject: String,
    pub start: DateTime<Utc>,
    pub location: String,
    /// Scalar reading reported by the sensor.
    pub state: f64,
    /// What the reading measures, e.g. `anomalous_location_temperature`.
    pub measurable: String,
    pub home: HomeId,
    #[serde(default)]
    pub resolved: bool,
}

impl Alert {
    pub fn new(
        home: HomeId,
        subject: impl Into<String>,
        location: impl Into<String>,
        measurable: impl Into<String>,
        state: f64,
    ) -> Self {
        Self {
            id: AlertId::new(),
            subject: subject.into(),
            start: Utc::now(),
            location: location.into(),
            state,
            measurable: measurable.into(),
            home,
            resolved: false,
        }
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }
}

/// Opaque confirmation token carried in the link sent to a caregiver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// A fresh random token (UUID v4, 32 hex characters).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Correlates one dispatch attempt to one caregiver for one alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub assignment: CaregiverAssignment,
    pub alert_id: AlertId,
    pub token: Token,
    #[serde(default)]
    pub accepted: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(assignment: CaregiverAssignment, alert_id: AlertId, token: Token) -> Self {
        Self {
            assignment,
            alert_id,
            token,
            accepted: false,
            created_at: Utc::now(),
        }
    }

    pub fn tier(&self) -> Tier {
        self.assignment.tier
    }
}
