//! Reconciliation loop.
//!
//! One periodic task sweeps every ledger: lapsed tags are cleared through
//! the same routine as lazy expiry, still-running timers produce at most one
//! countdown message per participant, and cooldown entries that lapsed or
//! belong to departed participants are evicted.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::ability::AbilityKind;
use crate::entity::EntityId;
use crate::observability::metrics::{self, UntagReason};
use crate::policy::PolicySnapshot;

use super::combat::CombatEngine;
use super::status::{CountdownStatus, ceil_seconds};

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Participants looked at
    pub scanned: usize,
    /// Tags cleared because they lapsed
    pub expired_tags: usize,
    /// Countdown messages sent
    pub countdowns: usize,
    /// Cooldown entries evicted
    pub evicted_cooldowns: usize,
}

impl CombatEngine {
    /// Runs one reconciliation sweep.
    pub fn reconcile_once(&self) -> SweepReport {
        let started = Instant::now();
        let now = self.now();
        let policy = self.policy.load();
        let mut report = SweepReport::default();

        let mut subjects: BTreeSet<EntityId> = self.tags.subjects().into_iter().collect();
        for kind in AbilityKind::ALL {
            subjects.extend(self.ledger(kind).subjects());
        }
        report.scanned = subjects.len();

        for subject in subjects {
            if self.expire_tag(subject, now, UntagReason::Sweep) {
                report.expired_tags += 1;
                continue;
            }
            if self.send_countdown(&policy, subject, now) {
                report.countdowns += 1;
            }
        }

        for kind in AbilityKind::ALL {
            report.evicted_cooldowns += self
                .ledger(kind)
                .sweep(now, |id| self.directory.is_online(id));
        }

        metrics::set_active_tags(self.tags.len());
        metrics::record_reconcile(started.elapsed());
        trace!(?report, "reconcile sweep");
        report
    }

    /// Starts the background sweep on the current tokio runtime.
    ///
    /// The period follows the policy: a reload that changes
    /// `reconcile.interval` takes effect after the next tick. The task ends
    /// on [`shutdown`](CombatEngine::shutdown).
    pub fn start_reconcile_task(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut period = tick_period(&engine.policy.load());
            let mut interval = new_interval(period);
            loop {
                tokio::select! {
                    () = engine.cancel.cancelled() => {
                        debug!("reconcile task cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        engine.reconcile_once();
                        let next = tick_period(&engine.policy.load());
                        if next != period {
                            debug!(?period, ?next, "reconcile interval changed");
                            period = next;
                            interval = new_interval(period);
                            interval.reset();
                        }
                    }
                }
            }
        })
    }

    fn send_countdown(&self, policy: &PolicySnapshot, subject: EntityId, now: i64) -> bool {
        let Some(entity) = self.reachable(policy, subject) else {
            return false;
        };

        let combat = self
            .tags
            .get(subject)
            .filter(|t| t.is_live(now))
            .map(|t| ceil_seconds(t.expires_at, now));
        let [pearl, trident] = AbilityKind::ALL.map(|kind| {
            self.ledger(kind)
                .get(subject)
                .filter(|exp| now <= *exp)
                .map(|exp| ceil_seconds(exp, now))
        });

        let Some(status) = CountdownStatus::resolve(combat, pearl, trident) else {
            return false;
        };
        self.notify(subject, status.key(), status.params(&entity.name));
        true
    }
}

fn tick_period(policy: &PolicySnapshot) -> Duration {
    policy
        .config()
        .reconcile
        .interval
        .max(Duration::from_millis(1))
}

fn new_interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
