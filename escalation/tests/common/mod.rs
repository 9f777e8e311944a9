//! Shared fixtures for the escalation integration suites.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use escalation::memory::AssignmentRow;
use escalation::model::{AssignmentId, Home, Person, PersonId, TierPolicy};
use escalation::notifier::{DeliveryError, Dispatch, Notifier};
use escalation::store::{SharedNotificationStore, StoreResult};
use escalation::{
    Alert, AlertId, ChainHandle, ChainStatus, DirectorySeed, EngineConfig, EscalationEngine,
    EscalationEvent, EventKind, HomeId, MemoryStore, Notification, NotificationStore, StoreError,
    Tier, Token,
};
use tokio::sync::broadcast;

pub const HOME: &str = "nears-hub-dev";
pub const ELDERLY: u64 = 1;

/// Upper bound on virtual time any single wait may take.
const PATIENCE: Duration = Duration::from_secs(24 * 3600);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Records every dispatch; recipients in `failing` get a delivery error.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Dispatch>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingNotifier {
    pub fn fail_for(&self, email: &str) {
        self.failing.lock().unwrap().insert(email.to_string());
    }

    pub fn dispatches(&self) -> Vec<Dispatch> {
        self.sent.lock().unwrap().clone()
    }

    pub fn recipients(&self) -> Vec<String> {
        self.dispatches()
            .into_iter()
            .map(|d| d.message.recipient)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn notify(&self, dispatch: &Dispatch) -> Result<(), DeliveryError> {
        if self.failing.lock().unwrap().contains(&dispatch.message.recipient) {
            return Err(DeliveryError::Unreachable(dispatch.message.recipient.clone()));
        }
        self.sent.lock().unwrap().push(dispatch.clone());
        Ok(())
    }
}

/// `MemoryStore` whose `mark_alert_resolved` fails while `down` is set.
pub struct ResolveOutage {
    inner: Arc<MemoryStore>,
    down: AtomicBool,
}

impl ResolveOutage {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(true),
        }
    }

    pub fn restore(&self) {
        self.down.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationStore for ResolveOutage {
    async fn save_notification(&self, notification: &Notification) -> StoreResult<()> {
        self.inner.save_notification(notification).await
    }

    async fn token_exists(&self, token: &Token) -> StoreResult<bool> {
        self.inner.token_exists(token).await
    }

    async fn find_notification_by_token(&self, token: &Token) -> StoreResult<Option<Notification>> {
        self.inner.find_notification_by_token(token).await
    }

    async fn mark_accepted(&self, notification: &Notification) -> StoreResult<()> {
        self.inner.mark_accepted(notification).await
    }

    async fn mark_alert_resolved(&self, alert_id: AlertId) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("alerts table offline".to_string()));
        }
        self.inner.mark_alert_resolved(alert_id).await
    }

    async fn is_alert_resolved(&self, alert_id: AlertId) -> StoreResult<bool> {
        self.inner.is_alert_resolved(alert_id).await
    }
}

fn person(id: u64, first_name: &str) -> Person {
    Person {
        id: PersonId(id),
        first_name: first_name.to_string(),
        last_name: "Doe".to_string(),
        email: format!("{}@example.com", first_name.to_lowercase()),
    }
}

pub fn email(id: u64) -> String {
    format!("{}@example.com", name(id).to_lowercase())
}

fn name(id: u64) -> &'static str {
    match id {
        1 => "John",
        2 => "Jane",
        3 => "Bob",
        4 => "Alice",
        5 => "Carol",
        6 => "Dave",
        _ => "Nobody",
    }
}

/// Directory for one resident (person 1) with caregivers 2..=6.
///
/// `tier_zero` adds the resident's self assignment; `tiers[i]` lists the
/// caregiver ids assigned at tier `i + 1`. Tier zero waits 30s, tiers 1-3
/// wait 60s.
pub fn seed(tier_zero: bool, tiers: [&[u64]; 3]) -> DirectorySeed {
    let persons = (1..=6).map(|id| person(id, name(id))).collect();
    let mut assignments = Vec::new();
    let mut next_id = 1;
    let mut assign = |caregiver: u64, tier: Tier| {
        assignments.push(AssignmentRow {
            id: AssignmentId(next_id),
            elderly: PersonId(ELDERLY),
            caregiver: PersonId(caregiver),
            tier,
        });
        next_id += 1;
    };
    if tier_zero {
        assign(ELDERLY, Tier::Zero);
    }
    for (caregivers, tier) in tiers.iter().zip([Tier::One, Tier::Two, Tier::Three]) {
        for caregiver in caregivers.iter() {
            assign(*caregiver, tier);
        }
    }

    DirectorySeed {
        persons,
        homes: vec![Home {
            id: HomeId::new(HOME),
            elderly: Some(PersonId(ELDERLY)),
        }],
        assignments,
        tiers: vec![
            TierPolicy {
                tier: Tier::Zero,
                wait_time_secs: 30,
            },
            TierPolicy {
                tier: Tier::One,
                wait_time_secs: 60,
            },
            TierPolicy {
                tier: Tier::Two,
                wait_time_secs: 60,
            },
            TierPolicy {
                tier: Tier::Three,
                wait_time_secs: 60,
            },
        ],
    }
}

pub struct Harness {
    pub engine: EscalationEngine,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub events: broadcast::Receiver<EscalationEvent>,
}

impl Harness {
    pub fn new(seed: DirectorySeed) -> Self {
        Self::with_engine(seed, |engine| engine)
    }

    /// Build a harness, letting the caller adjust the engine before any
    /// subscriber is attached.
    pub fn with_engine(
        seed: DirectorySeed,
        adjust: impl FnOnce(EscalationEngine) -> EscalationEngine,
    ) -> Self {
        Self::build(seed, |store| store as SharedNotificationStore, adjust)
    }

    /// Harness whose notification store cannot resolve alerts until the
    /// returned handle is restored.
    pub fn with_resolve_outage(seed: DirectorySeed) -> (Self, Arc<ResolveOutage>) {
        let mut outage = None;
        let harness = Self::build(
            seed,
            |store| {
                let wrapped = Arc::new(ResolveOutage::new(store));
                outage = Some(wrapped.clone());
                wrapped as SharedNotificationStore
            },
            |engine| engine,
        );
        (harness, outage.unwrap())
    }

    fn build(
        seed: DirectorySeed,
        wrap: impl FnOnce(Arc<MemoryStore>) -> SharedNotificationStore,
        adjust: impl FnOnce(EscalationEngine) -> EscalationEngine,
    ) -> Self {
        init_tracing();
        let store = Arc::new(MemoryStore::from_seed(seed).unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let config = EngineConfig {
            confirm_base_url: "http://care.test/api/confirm".to_string(),
            ..EngineConfig::default()
        };
        let engine = adjust(EscalationEngine::new(
            store.clone(),
            wrap(store.clone()),
            notifier.clone(),
            config,
        ));
        let events = engine.subscribe();
        Self {
            engine,
            store,
            notifier,
            events,
        }
    }

    pub fn alert(&self) -> Alert {
        let alert = Alert::new(
            HomeId::new(HOME),
            "stove",
            "kitchen",
            "anomalous_location_temperature",
            29.22,
        );
        self.store.insert_alert(alert.clone()).unwrap();
        alert
    }

    /// Create an alert and start escalating it.
    pub async fn raise(&self) -> (Alert, ChainHandle) {
        let alert = self.alert();
        let handle = self.engine.start_escalation(alert.clone()).await.unwrap();
        (alert, handle)
    }

    pub fn notifications(&self, alert: &Alert) -> Vec<Notification> {
        self.store.notifications_for_alert(alert.id).unwrap()
    }

    pub fn notifications_at(&self, alert: &Alert, tier: Tier) -> Vec<Notification> {
        self.notifications(alert)
            .into_iter()
            .filter(|n| n.tier() == tier)
            .collect()
    }

    /// Wait (in virtual time) for the first event matching `pred`.
    pub async fn expect_event(&mut self, pred: impl Fn(&EventKind) -> bool) -> EscalationEvent {
        let events = &mut self.events;
        tokio::time::timeout(PATIENCE, async {
            loop {
                match events.recv().await {
                    Ok(event) if pred(&event.kind) => return event,
                    Ok(_) => continue,
                    Err(e) => panic!("event stream ended: {e}"),
                }
            }
        })
        .await
        .expect("expected event never arrived")
    }

    /// Every event published so far that has not been received yet.
    pub fn drain_events(&mut self) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }
}

pub async fn wait_terminal(handle: &ChainHandle) -> ChainStatus {
    tokio::time::timeout(PATIENCE, handle.wait_terminal())
        .await
        .expect("chain never finished")
}

/// Let spawned deliveries run without advancing past any step timer.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
