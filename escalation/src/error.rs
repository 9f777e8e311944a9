//! Engine error taxonomy.
//!
//! | Error                | Transient | Effect on the chain            |
//! |----------------------|-----------|--------------------------------|
//! | `Configuration`      | no        | chain never starts             |
//! | `Store(Unavailable)` | yes       | retried, then `RetriesExhausted` |
//! | `RetriesExhausted`   | no        | chain fails and deregisters    |
//! | `AlreadyEscalating`  | no        | second start rejected          |
//! | `AlertResolved`      | no        | start rejected                 |
//! | `TokenSpaceExhausted`| no        | chain fails and deregisters    |
//!
//! Not-found tokens and double accepts are outcomes, not errors; see
//! [`crate::chain::AcceptOutcome`].

use thiserror::Error;

use crate::model::AlertId;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Tier policy is unusable (zero wait time, reminder wait not positive).
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: Box<EngineError>,
    },

    #[error("alert {0} is already escalating")]
    AlreadyEscalating(AlertId),

    #[error("alert {0} is already resolved")]
    AlertResolved(AlertId),

    #[error("no unique token found after {0} attempt(s)")]
    TokenSpaceExhausted(u32),
}

impl EngineError {
    /// Whether the failed operation may succeed if attempted again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
