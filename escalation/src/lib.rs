//! Caregiver Alert Escalation Engine
//!
//! When a home sensor reports a hazard, the engine notifies the resident's
//! caregivers tier by tier until one of them confirms the alert or every
//! tier has timed out.
//!
//! ```text
//! tier 0  primary caregiver   notice, then reminder
//! tier 1  all tier-1 caregivers
//! tier 2  all tier-2 caregivers
//! tier 3  all tier-3 caregivers   ─► exhausted
//! ```
//!
//! # Modules
//!
//! - [`engine`]: the service (`start_escalation`, `accept`, `shutdown`)
//! - [`chain`]: per-alert driver task, handle and status
//! - [`registry`]: live chains keyed by alert
//! - [`step`]: validated tier plan
//! - [`builder`]: uniquely tokened notification records
//! - [`store`]: `Directory` and `NotificationStore` seams
//! - [`memory`]: in-memory store seeded from JSON
//! - [`notifier`], [`message`]: outbound delivery and text
//! - [`events`]: broadcast bus of chain transitions
//! - [`retry`], [`timer`], [`config`], [`error`]

pub mod builder;
pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod memory;
pub mod message;
pub mod model;
pub mod notifier;
pub mod registry;
pub mod retry;
pub mod step;
pub mod store;
pub mod timer;

pub use chain::{AcceptOutcome, ChainHandle, ChainStatus};
pub use config::EngineConfig;
pub use engine::EscalationEngine;
pub use error::{EngineError, EngineResult};
pub use events::{EscalationEvent, EventBus, EventKind};
pub use memory::{DirectorySeed, MemoryStore};
pub use model::{Alert, AlertId, CaregiverAssignment, HomeId, Notification, Tier, Token};
pub use notifier::{DeliveryError, Dispatch, Notifier, TracingNotifier};
pub use store::{Directory, NotificationStore, StoreError};
