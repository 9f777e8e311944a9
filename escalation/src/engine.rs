//! Escalation engine service.
//!
//! One engine per process, constructed with its collaborators and passed to
//! whoever needs it. It owns the chain registry and the event bus.
//!
//! ```text
//! start_escalation(alert)                 accept(token)
//!   │ resolve StepPlan                      │ token ─► Notification (store)
//!   │ register ChainHandle                  │ Notification ─► alert id
//!   └► spawn ChainDriver ◄──── Accept ──────┘ alert id ─► ChainHandle (registry)
//! ```

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::builder::NotificationBuilder;
use crate::chain::{AcceptOutcome, ChainDriver, ChainHandle};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{EscalationEvent, EventBus, SharedEventBus};
use crate::message::MessageComposer;
use crate::model::{Alert, Token};
use crate::notifier::SharedNotifier;
use crate::registry::ChainRegistry;
use crate::step::StepPlan;
use crate::store::{SharedDirectory, SharedNotificationStore};

/// Everything a chain driver needs from the engine.
pub(crate) struct EngineShared {
    pub(crate) directory: SharedDirectory,
    pub(crate) store: SharedNotificationStore,
    pub(crate) notifier: SharedNotifier,
    pub(crate) builder: NotificationBuilder,
    pub(crate) composer: MessageComposer,
    pub(crate) registry: ChainRegistry,
    pub(crate) events: SharedEventBus,
    pub(crate) config: EngineConfig,
}

#[derive(Clone)]
pub struct EscalationEngine {
    shared: Arc<EngineShared>,
}

impl EscalationEngine {
    pub fn new(
        directory: SharedDirectory,
        store: SharedNotificationStore,
        notifier: SharedNotifier,
        config: EngineConfig,
    ) -> Self {
        let builder =
            NotificationBuilder::new(Arc::clone(&store)).with_max_attempts(config.max_token_attempts);
        Self::assemble(directory, store, notifier, config, builder)
    }

    /// Replace the token generator. Call before starting any escalation:
    /// the returned engine has its own registry and event bus.
    pub fn with_token_source<F>(self, generate: F) -> Self
    where
        F: Fn() -> Token + Send + Sync + 'static,
    {
        let shared = &self.shared;
        Self::assemble(
            Arc::clone(&shared.directory),
            Arc::clone(&shared.store),
            Arc::clone(&shared.notifier),
            shared.config.clone(),
            shared.builder.clone().with_token_source(generate),
        )
    }

    fn assemble(
        directory: SharedDirectory,
        store: SharedNotificationStore,
        notifier: SharedNotifier,
        config: EngineConfig,
        builder: NotificationBuilder,
    ) -> Self {
        let shared = EngineShared {
            directory,
            store,
            notifier,
            builder,
            composer: MessageComposer::new(config.confirm_base_url.clone()),
            registry: ChainRegistry::new(),
            events: EventBus::with_capacity(config.event_capacity).shared(),
            config,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.shared.registry
    }

    pub fn events(&self) -> SharedEventBus {
        Arc::clone(&self.shared.events)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EscalationEvent> {
        self.shared.events.subscribe()
    }

    /// Validate tier policy, register a chain for `alert` and start it.
    ///
    /// Fails without side effects when the alert is resolved, already
    /// escalating, or the tier policy is unusable.
    pub async fn start_escalation(&self, alert: Alert) -> EngineResult<ChainHandle> {
        let alert_id = alert.id;
        if self.shared.registry.contains(alert_id) {
            return Err(EngineError::AlreadyEscalating(alert_id));
        }

        let shared = &*self.shared;
        let store = &*shared.store;
        let resolved = alert.resolved
            || shared
                .config
                .retry
                .run("is_alert_resolved", move || store.is_alert_resolved(alert_id))
                .await?;
        if resolved {
            return Err(EngineError::AlertResolved(alert_id));
        }

        let plan = StepPlan::resolve(
            &*shared.directory,
            shared.config.reminder_offset(),
            &shared.config.retry,
        )
        .await
        .inspect_err(|e| warn!(%alert_id, error = %e, "escalation not started"))?;

        let (driver, handle) = ChainDriver::new(alert, plan, Arc::clone(&self.shared));
        shared.registry.register(handle.clone())?;
        tokio::spawn(driver.run());
        Ok(handle)
    }

    /// Resolve a confirmation token and stop the escalation it belongs to.
    pub async fn accept(&self, token: &Token) -> EngineResult<AcceptOutcome> {
        let shared = &*self.shared;
        let store = &*shared.store;
        let found = shared
            .config
            .retry
            .run("find_notification_by_token", move || {
                store.find_notification_by_token(token)
            })
            .await?;

        let Some(notification) = found else {
            info!(%token, "confirmation for unknown token");
            return Ok(AcceptOutcome::NotFound);
        };
        let alert_id = notification.alert_id;
        let resolved = shared
            .config
            .retry
            .run("is_alert_resolved", move || store.is_alert_resolved(alert_id))
            .await?;
        if resolved {
            info!(%alert_id, %token, "alert already resolved");
            return Ok(AcceptOutcome::AlreadyResolved);
        }
        let Some(handle) = shared.registry.get(alert_id) else {
            info!(%alert_id, %token, "no live escalation for alert");
            return Ok(AcceptOutcome::AlreadyResolved);
        };

        handle.accept(notification).await
    }

    /// Cancel every live chain without resolving its alert, and wait for
    /// the drivers to stop.
    pub async fn shutdown(&self) {
        let handles = self.shared.registry.handles();
        if !handles.is_empty() {
            info!(active = handles.len(), "cancelling live escalations");
        }
        for handle in &handles {
            handle.cancel();
        }
        for handle in &handles {
            handle.wait_terminal().await;
        }
    }
}
