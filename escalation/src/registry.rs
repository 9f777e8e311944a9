//! Chain Registry: every live chain, keyed by alert.
//!
//! The only state shared across chains. A chain is registered before its
//! driver starts and removes itself when it reaches a terminal status.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::chain::ChainHandle;
use crate::error::{EngineError, EngineResult};
use crate::model::AlertId;

#[derive(Default)]
pub struct ChainRegistry {
    chains: RwLock<HashMap<AlertId, ChainHandle>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chain. Fails if the alert already has a live chain.
    pub fn register(&self, handle: ChainHandle) -> EngineResult<()> {
        let mut chains = self.chains.write().unwrap_or_else(PoisonError::into_inner);
        let alert_id = handle.alert_id();
        if chains.contains_key(&alert_id) {
            return Err(EngineError::AlreadyEscalating(alert_id));
        }
        chains.insert(alert_id, handle);
        debug!(%alert_id, active = chains.len(), "chain registered");
        Ok(())
    }

    pub fn remove(&self, alert_id: AlertId) -> Option<ChainHandle> {
        let mut chains = self.chains.write().unwrap_or_else(PoisonError::into_inner);
        let removed = chains.remove(&alert_id);
        if removed.is_some() {
            debug!(%alert_id, active = chains.len(), "chain deregistered");
        }
        removed
    }

    pub fn get(&self, alert_id: AlertId) -> Option<ChainHandle> {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&alert_id)
            .cloned()
    }

    pub fn contains(&self, alert_id: AlertId) -> bool {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&alert_id)
    }

    pub fn active_alerts(&self) -> Vec<AlertId> {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Snapshot of every live chain's handle.
    pub fn handles(&self) -> Vec<ChainHandle> {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.chains.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.active_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_get_remove() {
        let registry = ChainRegistry::new();
        let alert_id = AlertId::new();
        registry.register(ChainHandle::detached(alert_id)).unwrap();

        assert_eq!(registry.active_count(), 1);
        assert!(registry.contains(alert_id));
        assert_eq!(registry.get(alert_id).unwrap().alert_id(), alert_id);
        assert_eq!(registry.active_alerts(), vec![alert_id]);

        assert!(registry.remove(alert_id).is_some());
        assert!(registry.remove(alert_id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_alert_rejected() {
        let registry = ChainRegistry::new();
        let alert_id = AlertId::new();
        registry.register(ChainHandle::detached(alert_id)).unwrap();

        let err = registry.register(ChainHandle::detached(alert_id)).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyEscalating(id) if id == alert_id));
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = std::sync::Arc::new(ChainRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        registry.register(ChainHandle::detached(AlertId::new())).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(registry.active_count(), 200);
        assert_eq!(registry.handles().len(), 200);
    }
}
