//! Escalation chain: the per-alert state machine.
//!
//! Each chain runs as one driver task that owns all chain state. Timer
//! expiries and accept requests arrive as commands on the same channel, so
//! an accept racing a timeout is serialized: exactly one of them wins.
//!
//! ```text
//! Starting ─► Running{0}: notice ─timer─► reminder ─timer─┐
//!                                                          ▼
//!             Running{1} ─timer─► Running{2} ─timer─► Running{3} ─timer─► Exhausted
//!
//! any Running ── Accept ──► Resolved{tier}
//!             ── store failure after retries ──► Failed
//!             ── Shutdown ──► Cancelled
//! ```
//!
//! Every armed timer carries the chain's generation number. Cancelling or
//! re-arming bumps the generation, so an expiry that was already queued when
//! the timer was cancelled is recognised as stale and dropped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::engine::EngineShared;
use crate::error::{EngineError, EngineResult};
use crate::events::EventKind;
use crate::message::Urgency;
use crate::model::{Alert, AlertId, CaregiverAssignment, Notification, Tier};
use crate::notifier::{spawn_delivery, Dispatch};
use crate::step::{Step, StepKind, StepPlan};
use crate::timer::ArmedTimer;

/// Result of accepting a notification token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptOutcome {
    /// This accept stopped the escalation.
    Resolved,
    /// The alert was already resolved, or its chain is no longer live.
    AlreadyResolved,
    /// No notification carries the token.
    NotFound,
}

/// Lifecycle of a chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChainStatus {
    Starting,
    Running { tier: Tier },
    Resolved { tier: Tier },
    Exhausted,
    Failed { reason: String },
    Cancelled,
}

impl ChainStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Starting | Self::Running { .. })
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running { tier } => write!(f, "running ({tier})"),
            Self::Resolved { tier } => write!(f, "resolved ({tier})"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug)]
pub(crate) enum ChainCommand {
    TimerFired {
        generation: u64,
    },
    Accept {
        notification: Notification,
        reply: oneshot::Sender<EngineResult<AcceptOutcome>>,
    },
    Shutdown,
}

/// Cloneable handle to a live (or finished) chain.
#[derive(Debug, Clone)]
pub struct ChainHandle {
    alert_id: AlertId,
    commands: mpsc::UnboundedSender<ChainCommand>,
    status: watch::Receiver<ChainStatus>,
}

impl ChainHandle {
    pub fn alert_id(&self) -> AlertId {
        self.alert_id
    }

    pub fn status(&self) -> ChainStatus {
        self.status.borrow().clone()
    }

    pub fn is_live(&self) -> bool {
        !self.status.borrow().is_terminal()
    }

    /// Wait until the chain reaches a terminal status and return it.
    pub async fn wait_terminal(&self) -> ChainStatus {
        let mut status = self.status.clone();
        loop {
            {
                let current = status.borrow_and_update();
                if current.is_terminal() {
                    return current.clone();
                }
            }
            if status.changed().await.is_err() {
                return status.borrow().clone();
            }
        }
    }

    /// Ask the driver to stop without resolving the alert.
    pub fn cancel(&self) {
        if self.commands.send(ChainCommand::Shutdown).is_err() {
            debug!(alert_id = %self.alert_id, "cancel sent to finished chain");
        }
    }

    /// Hand an accept to the driver. A driver that has already finished
    /// answers `AlreadyResolved`.
    pub(crate) async fn accept(&self, notification: Notification) -> EngineResult<AcceptOutcome> {
        let (reply, response) = oneshot::channel();
        let command = ChainCommand::Accept {
            notification,
            reply,
        };
        if self.commands.send(command).is_err() {
            return Ok(AcceptOutcome::AlreadyResolved);
        }
        response.await.unwrap_or(Ok(AcceptOutcome::AlreadyResolved))
    }

    /// Handle whose driver is already gone.
    #[cfg(test)]
    pub(crate) fn detached(alert_id: AlertId) -> Self {
        let (commands, _) = mpsc::unbounded_channel();
        let (_, status) = watch::channel(ChainStatus::Starting);
        Self {
            alert_id,
            commands,
            status,
        }
    }
}

/// What the armed timer means when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Tier-zero first notice is out.
    Notice,
    /// Tier-zero reminder is out.
    Reminder,
    /// A tier 1-3 fan-out is out.
    Tier,
}

pub(crate) struct ChainDriver {
    alert: Alert,
    plan: StepPlan,
    shared: Arc<EngineShared>,
    commands: mpsc::UnboundedSender<ChainCommand>,
    inbox: mpsc::UnboundedReceiver<ChainCommand>,
    status: watch::Sender<ChainStatus>,
    position: usize,
    phase: Phase,
    primary: Option<CaregiverAssignment>,
    timer: Option<ArmedTimer>,
    generation: u64,
    notifications: Vec<Notification>,
}

impl ChainDriver {
    pub(crate) fn new(alert: Alert, plan: StepPlan, shared: Arc<EngineShared>) -> (Self, ChainHandle) {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(ChainStatus::Starting);
        let handle = ChainHandle {
            alert_id: alert.id,
            commands: commands.clone(),
            status: status_rx,
        };
        let driver = Self {
            alert,
            plan,
            shared,
            commands,
            inbox,
            status,
            position: 0,
            phase: Phase::Idle,
            primary: None,
            timer: None,
            generation: 0,
            notifications: Vec::new(),
        };
        (driver, handle)
    }

    /// Drive the chain until it reaches a terminal status.
    pub(crate) async fn run(mut self) {
        let alert_id = self.alert.id;
        info!(%alert_id, subject = %self.alert.subject, home = %self.alert.home, "escalation started");
        self.shared.events.publish(alert_id, EventKind::ChainStarted);

        if let Err(e) = self.advance_from(0).await {
            self.fail(&e);
        }

        while !self.is_finished() {
            let Some(command) = self.inbox.recv().await else {
                break;
            };
            match command {
                ChainCommand::TimerFired { generation } => {
                    if self.timer.as_ref().map(ArmedTimer::generation) != Some(generation) {
                        debug!(%alert_id, generation, current = self.generation, "stale timer expiry dropped");
                        continue;
                    }
                    if let Err(e) = self.on_timer().await {
                        self.fail(&e);
                    }
                }
                ChainCommand::Accept {
                    notification,
                    reply,
                } => {
                    let outcome = self.on_accept(notification).await;
                    if let Err(e) = &outcome {
                        warn!(%alert_id, error = %e, "acceptance not recorded, escalation continues");
                    }
                    let _ = reply.send(outcome);
                }
                ChainCommand::Shutdown => {
                    info!(%alert_id, "escalation cancelled");
                    self.finish(ChainStatus::Cancelled, EventKind::Cancelled);
                }
            }
        }

        let final_status = self.status.borrow().clone();
        debug!(
            %alert_id,
            status = %final_status,
            notifications = self.notifications.len(),
            "chain driver stopped"
        );
    }

    fn is_finished(&self) -> bool {
        self.status.borrow().is_terminal()
    }

    /// Run steps from `index` on until one dispatches; exhaust if none does.
    async fn advance_from(&mut self, mut index: usize) -> EngineResult<()> {
        while let Some(step) = self.plan.get(index).copied() {
            self.position = index;
            let dispatched = match step.kind {
                StepKind::TierZero { .. } => self.run_tier_zero(step).await?,
                StepKind::Generic => self.run_generic(step).await?,
            };
            if dispatched {
                return Ok(());
            }
            info!(alert_id = %self.alert.id, tier = %step.tier, "no caregiver at tier, passing through");
            self.shared
                .events
                .publish(self.alert.id, EventKind::TierSkipped { tier: step.tier });
            index += 1;
        }

        info!(alert_id = %self.alert.id, "every tier timed out, escalation exhausted");
        self.finish(ChainStatus::Exhausted, EventKind::Exhausted);
        Ok(())
    }

    async fn run_tier_zero(&mut self, step: Step) -> EngineResult<bool> {
        let primary = {
            let directory = &*self.shared.directory;
            let alert = &self.alert;
            self.shared
                .config
                .retry
                .run("lookup_tier_zero", move || directory.lookup_tier_zero(alert))
                .await?
        };
        let Some(primary) = primary else {
            return Ok(false);
        };

        let notification = self.build_notification(&primary).await?;
        self.dispatch(notification, Urgency::Notice);
        self.primary = Some(primary);
        self.enter(step, Phase::Notice, 1);
        Ok(true)
    }

    async fn run_generic(&mut self, step: Step) -> EngineResult<bool> {
        let assignments = {
            let directory = &*self.shared.directory;
            let alert = &self.alert;
            let tier = step.tier;
            self.shared
                .config
                .retry
                .run("lookup_tier", move || directory.lookup_tier(alert, tier))
                .await?
        };
        if assignments.is_empty() {
            return Ok(false);
        }

        for assignment in &assignments {
            let notification = self.build_notification(assignment).await?;
            self.dispatch(notification, Urgency::AssistanceRequest);
        }
        self.enter(step, Phase::Tier, assignments.len());
        Ok(true)
    }

    /// Arm the step's timer and publish the dispatch.
    fn enter(&mut self, step: Step, phase: Phase, notifications: usize) {
        self.phase = phase;
        self.arm(step.wait_time);
        self.status.send_replace(ChainStatus::Running { tier: step.tier });
        info!(
            alert_id = %self.alert.id,
            tier = %step.tier,
            notifications,
            wait_secs = step.wait_time.as_secs(),
            "tier notified"
        );
        self.shared.events.publish(
            self.alert.id,
            EventKind::TierDispatched {
                tier: step.tier,
                notifications,
                wait_secs: step.wait_time.as_secs(),
            },
        );
    }

    async fn on_timer(&mut self) -> EngineResult<()> {
        // The timer fired; nothing left to cancel.
        self.timer = None;
        let Some(step) = self.plan.get(self.position).copied() else {
            return Ok(());
        };
        info!(alert_id = %self.alert.id, tier = %step.tier, "timer expired");
        self.shared
            .events
            .publish(self.alert.id, EventKind::TimerExpired { tier: step.tier });

        match (self.phase, step.kind, self.primary.clone()) {
            (Phase::Notice, StepKind::TierZero { reminder_wait }, Some(primary)) => {
                self.send_reminder(&primary, reminder_wait).await
            }
            _ => self.advance_from(self.position + 1).await,
        }
    }

    async fn send_reminder(
        &mut self,
        primary: &CaregiverAssignment,
        reminder_wait: Duration,
    ) -> EngineResult<()> {
        let notification = self.build_notification(primary).await?;
        let token = notification.token.clone();
        self.dispatch(notification, Urgency::Reminder);
        self.phase = Phase::Reminder;
        self.arm(reminder_wait);
        info!(
            alert_id = %self.alert.id,
            recipient = %primary.caregiver.email,
            wait_secs = reminder_wait.as_secs(),
            "reminder sent"
        );
        self.shared.events.publish(
            self.alert.id,
            EventKind::ReminderSent {
                token,
                wait_secs: reminder_wait.as_secs(),
            },
        );
        Ok(())
    }

    /// Record the acceptance, then stop. The alert's resolved flag is
    /// written first; until it lands the armed timer stays live and the
    /// caller gets the error.
    async fn on_accept(&mut self, notification: Notification) -> EngineResult<AcceptOutcome> {
        let shared = Arc::clone(&self.shared);
        let store = &*shared.store;
        let retry = &shared.config.retry;
        let alert_id = self.alert.id;
        retry
            .run("mark_alert_resolved", move || store.mark_alert_resolved(alert_id))
            .await?;
        self.cancel_timer();

        let accepted = &notification;
        if let Err(e) = retry
            .run("mark_accepted", move || store.mark_accepted(accepted))
            .await
        {
            warn!(
                %alert_id,
                token = %notification.token,
                error = %e,
                "alert resolved but notification not marked accepted"
            );
        }
        self.alert.resolved = true;

        let tier = notification.tier();
        info!(
            alert_id = %self.alert.id,
            %tier,
            caregiver = %notification.assignment.caregiver.email,
            "alert accepted, escalation resolved"
        );
        self.finish(
            ChainStatus::Resolved { tier },
            EventKind::Resolved {
                tier,
                token: notification.token,
            },
        );
        Ok(AcceptOutcome::Resolved)
    }

    async fn build_notification(&self, assignment: &CaregiverAssignment) -> EngineResult<Notification> {
        let builder = &self.shared.builder;
        let alert = &self.alert;
        self.shared
            .config
            .retry
            .run("build_notification", move || builder.build(assignment, alert))
            .await
    }

    /// Compose and hand off one message. Never waits on delivery.
    fn dispatch(&mut self, notification: Notification, urgency: Urgency) {
        let message = self.shared.composer.compose(&notification, &self.alert, urgency);
        debug!(
            alert_id = %self.alert.id,
            recipient = %message.recipient,
            %urgency,
            "dispatching notification"
        );
        spawn_delivery(
            Arc::clone(&self.shared.notifier),
            Arc::clone(&self.shared.events),
            Dispatch {
                notification: notification.clone(),
                urgency,
                message,
            },
        );
        self.notifications.push(notification);
    }

    fn arm(&mut self, delay: Duration) {
        self.cancel_timer();
        let generation = self.generation;
        let commands = self.commands.clone();
        self.timer = Some(ArmedTimer::arm(generation, delay, move || {
            let _ = commands.send(ChainCommand::TimerFired { generation });
        }));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.generation += 1;
    }

    fn fail(&mut self, err: &EngineError) {
        error!(alert_id = %self.alert.id, error = %err, "escalation failed");
        let reason = err.to_string();
        self.finish(
            ChainStatus::Failed {
                reason: reason.clone(),
            },
            EventKind::Failed { reason },
        );
    }

    /// Stop the chain: cancel the timer, deregister, then publish.
    fn finish(&mut self, status: ChainStatus, event: EventKind) {
        self.cancel_timer();
        self.phase = Phase::Idle;
        self.shared.registry.remove(self.alert.id);
        self.shared.events.publish(self.alert.id, event);
        self.status.send_replace(status);
    }
}
