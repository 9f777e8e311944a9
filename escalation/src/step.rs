//! Step plan: the fixed tier sequence of a chain.
//!
//! ```text
//! tier 0 (TierZero)  notice ──wait──► reminder ──reminder wait──┐
//!                                                                ▼
//! tier 1 (Generic)   fan out ──wait──► tier 2 ──wait──► tier 3 ──wait──► exhausted
//! ```
//!
//! A plan is resolved once per chain, before the chain starts, so a bad tier
//! policy stops the escalation up front instead of midway.

use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::model::Tier;
use crate::retry::RetryPolicy;
use crate::store::Directory;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Single primary caregiver, notice then reminder.
    TierZero { reminder_wait: Duration },
    /// Every caregiver assigned at the tier.
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub tier: Tier,
    pub wait_time: Duration,
    pub kind: StepKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPlan {
    steps: Vec<Step>,
}

impl StepPlan {
    /// Build and validate a plan from per-tier wait times.
    pub fn from_wait_times(
        wait_times: &[(Tier, Duration)],
        reminder_offset: Duration,
    ) -> EngineResult<Self> {
        let mut steps = Vec::with_capacity(Tier::ALL.len());
        for tier in Tier::ALL {
            let wait_time = wait_times
                .iter()
                .find(|(t, _)| *t == tier)
                .map(|(_, w)| *w)
                .ok_or_else(|| EngineError::Configuration(format!("no wait time for {tier}")))?;
            if wait_time.is_zero() {
                return Err(EngineError::Configuration(format!(
                    "{tier} wait time must be positive"
                )));
            }

            let kind = if tier == Tier::Zero {
                if wait_time <= reminder_offset {
                    return Err(EngineError::Configuration(format!(
                        "{tier} wait time ({}s) must exceed the reminder offset ({}s)",
                        wait_time.as_secs_f64(),
                        reminder_offset.as_secs_f64()
                    )));
                }
                StepKind::TierZero {
                    reminder_wait: wait_time - reminder_offset,
                }
            } else {
                StepKind::Generic
            };
            steps.push(Step {
                tier,
                wait_time,
                kind,
            });
        }
        Ok(Self { steps })
    }

    /// Fetch every tier's wait time from the directory and validate.
    pub async fn resolve(
        directory: &dyn Directory,
        reminder_offset: Duration,
        retry: &RetryPolicy,
    ) -> EngineResult<Self> {
        let mut wait_times = Vec::with_capacity(Tier::ALL.len());
        for tier in Tier::ALL {
            let wait = retry
                .run("tier_wait_time", move || directory.tier_wait_time(tier))
                .await?;
            wait_times.push((tier, wait));
        }
        Self::from_wait_times(&wait_times, reminder_offset)
    }

    pub fn get(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MockDirectory, StoreError};

    fn secs(tier: Tier, s: u64) -> (Tier, Duration) {
        (tier, Duration::from_secs(s))
    }

    fn uniform(tier_zero: u64, rest: u64) -> Vec<(Tier, Duration)> {
        vec![
            secs(Tier::Zero, tier_zero),
            secs(Tier::One, rest),
            secs(Tier::Two, rest),
            secs(Tier::Three, rest),
        ]
    }

    #[test]
    fn test_plan_order_and_kinds() {
        let plan = StepPlan::from_wait_times(&uniform(30, 600), Duration::from_secs(20)).unwrap();
        let tiers: Vec<Tier> = (0..).map_while(|i| plan.get(i)).map(|s| s.tier).collect();
        assert_eq!(tiers, Tier::ALL.to_vec());
        assert_eq!(
            plan.get(0).unwrap().kind,
            StepKind::TierZero {
                reminder_wait: Duration::from_secs(10)
            }
        );
        assert!((1..4).all(|i| plan.get(i).unwrap().kind == StepKind::Generic));
    }

    #[test]
    fn test_tier_zero_must_exceed_offset() {
        let err = StepPlan::from_wait_times(&uniform(20, 600), Duration::from_secs(20)).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert!(StepPlan::from_wait_times(&uniform(21, 600), Duration::from_secs(20)).is_ok());
    }

    #[test]
    fn test_zero_wait_rejected() {
        let err = StepPlan::from_wait_times(&uniform(30, 0), Duration::from_secs(20)).unwrap_err();
        assert!(err.to_string().contains("tier-1 wait time must be positive"));
    }

    #[test]
    fn test_missing_tier_rejected() {
        let waits = vec![secs(Tier::Zero, 30), secs(Tier::One, 60)];
        assert!(StepPlan::from_wait_times(&waits, Duration::from_secs(20)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_retries_transient_lookup() {
        let mut directory = MockDirectory::new();
        let mut failed_once = false;
        directory.expect_tier_wait_time().returning(move |tier| {
            if tier == Tier::Two && !failed_once {
                failed_once = true;
                return Err(StoreError::Unavailable("blip".into()));
            }
            Ok(Duration::from_secs(if tier == Tier::Zero { 30 } else { 60 }))
        });

        let plan = StepPlan::resolve(&directory, Duration::from_secs(20), &RetryPolicy::default())
            .await
            .unwrap();
        assert!(plan.get(3).is_some() && plan.get(4).is_none());
        assert_eq!(plan.get(2).unwrap().wait_time, Duration::from_secs(60));
    }
}
