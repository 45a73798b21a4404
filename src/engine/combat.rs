//! Combat engine orchestration.
//!
//! The `CombatEngine` owns the tag table, both cooldown ledgers and the
//! per-subject task registry, and is the only thing that mutates them.
//! Operations never fail: unknown participants, excluded zones and missing
//! state all resolve to a no-op or a default answer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ability::AbilityKind;
use crate::clock::Clock;
use crate::entity::{Directory, EntityId, EntityRef};
use crate::error::ConfigError;
use crate::notify::{MessageKey, Notifier, Params, Throttle, params};
use crate::observability::metrics::{self, UntagReason};
use crate::policy::{PolicyConfig, PolicyHandle, PolicySnapshot, PolicySource, Validator};

use super::ledger::CooldownLedger;
use super::status::ceil_seconds;
use super::tags::{TagEntry, TagTable, TagUpdate};
use super::tasks::{SubjectTasks, TaskSlot};

/// Combat state and cooldown engine.
///
/// Shared as `Arc<CombatEngine>` between event producers and the
/// reconciliation task. Every method takes `&self`.
pub struct CombatEngine {
    pub(super) policy: PolicyHandle,
    pub(super) source: Arc<dyn PolicySource>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) directory: Arc<dyn Directory>,
    pub(super) throttle: Arc<Throttle>,
    pub(super) tags: TagTable,
    pub(super) cooldowns: [CooldownLedger; 2],
    pub(super) tasks: SubjectTasks,
    pub(super) cancel: CancellationToken,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for CombatEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombatEngine")
            .field("tagged", &self.tags.len())
            .field("pearl_cooldowns", &self.cooldowns[0].len())
            .field("trident_cooldowns", &self.cooldowns[1].len())
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl CombatEngine {
    /// Builds an engine from the policy `source` produces right now.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails or its policy does not validate.
    pub fn new(
        source: Arc<dyn PolicySource>,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let snapshot = checked_snapshot(source.policy_snapshot()?)?;
        let cancel = CancellationToken::new();
        let throttle = Arc::new(Throttle::new(
            notifier,
            Arc::clone(&clock),
            snapshot.throttle_ms(),
            cancel.child_token(),
        ));
        Ok(Self {
            policy: PolicyHandle::new(snapshot),
            source,
            clock,
            directory,
            throttle,
            tags: TagTable::new(),
            cooldowns: [CooldownLedger::new(), CooldownLedger::new()],
            tasks: SubjectTasks::new(cancel.child_token()),
            cancel,
            shut_down: AtomicBool::new(false),
        })
    }

    // ------------------------------------------------------------------------
    // Combat tags
    // ------------------------------------------------------------------------

    /// Tags `subject` as fighting `attacker`.
    ///
    /// Ignored when either side is unknown, the subject is tag-exempt or in
    /// an excluded zone. Against the same attacker the tag only ever moves
    /// forward; a different attacker takes over the link.
    pub fn tag(&self, subject: EntityId, attacker: EntityId) {
        if subject == attacker {
            return;
        }
        let policy = self.policy.load();
        let Some(entity) = self.directory.resolve(subject) else {
            return;
        };
        if self.directory.resolve(attacker).is_none()
            || entity.tag_exempt
            || policy.is_zone_blacklisted(&entity.zone)
        {
            return;
        }

        let expires_at = self.now().saturating_add(policy.tag_duration_ms());
        if self
            .tags
            .get(subject)
            .is_some_and(|t| t.opponent == attacker && expires_at <= t.expires_at)
        {
            return;
        }

        if policy.config().combat.disable_flight
            && entity.flying
            && self.directory.cancel_flight(subject)
        {
            self.notify(
                subject,
                MessageKey::CombatFlyDisabled,
                params([("player", entity.name.clone())]),
            );
        }

        match self.tags.propose(subject, attacker, expires_at) {
            TagUpdate::Unchanged => {}
            update => {
                debug!(%subject, %attacker, ?update, expires_at, "tagged");
                metrics::record_tag();
                metrics::set_active_tags(self.tags.len());
            }
        }
    }

    /// Clears the subject's tag and tells it combat is over.
    ///
    /// The message is only sent while the subject is online and outside
    /// excluded zones. No-op if the subject is not tagged.
    pub fn untag(&self, subject: EntityId) {
        if self.tags.remove(subject).is_some() {
            self.after_untag(subject, true, UntagReason::Explicit);
        }
    }

    /// Clears the subject's tag without any message.
    pub fn untag_silently(&self, subject: EntityId) {
        if self.tags.remove(subject).is_some() {
            self.after_untag(subject, false, UntagReason::Silent);
        }
    }

    /// Whether the subject is tagged right now. A lapsed tag is cleared
    /// exactly as the reconciliation sweep would clear it.
    pub fn is_in_combat(&self, subject: EntityId) -> bool {
        if self.is_zone_excluded(subject) {
            return false;
        }
        let now = self.now();
        match self.tags.get(subject) {
            Some(tag) if tag.is_live(now) => true,
            Some(_) => {
                self.expire_tag(subject, now, UntagReason::Lazy);
                false
            }
            None => false,
        }
    }

    /// Whole seconds of combat left, rounded up; 0 when not tagged.
    #[must_use]
    pub fn remaining_combat_seconds(&self, subject: EntityId) -> u64 {
        if self.is_zone_excluded(subject) {
            return 0;
        }
        self.tags
            .get(subject)
            .map_or(0, |t| ceil_seconds(t.expires_at, self.now()))
    }

    /// The subject's current opponent, if it is tagged.
    pub fn get_opponent(&self, subject: EntityId) -> Option<EntityId> {
        if !self.is_in_combat(subject) {
            return None;
        }
        self.tags.get(subject).map(|t| t.opponent)
    }

    /// Tags `a` against `b` and `b` against `a`.
    ///
    /// The two directions are separate updates; a reader in between can see
    /// only one side tagged. Both participants must be online and outside
    /// excluded zones.
    pub fn update_mutual_combat(&self, a: EntityId, b: EntityId) {
        let policy = self.policy.load();
        let eligible = |id| {
            self.directory
                .resolve(id)
                .is_some_and(|e| e.online && !policy.is_zone_blacklisted(&e.zone))
        };
        if a == b || !eligible(a) || !eligible(b) {
            return;
        }
        self.tag(a, b);
        self.tag(b, a);
    }

    /// Extends the subject's tag by a full tag duration from now when one
    /// of its projectiles lands, if the ability's policy asks for it.
    ///
    /// Never shortens and never creates a tag.
    pub fn refresh_combat_on_ability_land(&self, subject: EntityId, kind: AbilityKind) {
        let policy = self.policy.load();
        if !policy.ability(kind).refresh_combat_on_land || !self.is_in_combat(subject) {
            return;
        }
        let expires_at = self.now().saturating_add(policy.tag_duration_ms());
        if self.tags.extend(subject, expires_at) {
            debug!(%subject, %kind, expires_at, "combat refreshed on landing");
        }
    }

    /// Whether the subject must be kept out of flight. Sends
    /// `combat_fly_disabled` every time it answers `true`.
    pub fn should_suppress_flight(&self, subject: EntityId) -> bool {
        if !self.policy.load().config().combat.disable_flight || !self.is_in_combat(subject) {
            return false;
        }
        let name = self.display_name(subject);
        self.notify(
            subject,
            MessageKey::CombatFlyDisabled,
            params([("player", name)]),
        );
        true
    }

    /// Whether the subject stands in a zone the engine ignores.
    #[must_use]
    pub fn is_zone_excluded(&self, subject: EntityId) -> bool {
        self.directory
            .resolve(subject)
            .is_some_and(|e| self.policy.load().is_zone_blacklisted(&e.zone))
    }

    /// Whether `victim` is already fighting someone other than `attacker`.
    pub fn is_victim_protected_from_third_party(
        &self,
        victim: EntityId,
        attacker: EntityId,
    ) -> bool {
        self.get_opponent(victim).is_some_and(|o| o != attacker)
    }

    /// Whether `attacker` is already fighting someone other than `victim`.
    pub fn is_attacker_locked_to_other(&self, attacker: EntityId, victim: EntityId) -> bool {
        self.get_opponent(attacker).is_some_and(|o| o != victim)
    }

    // ------------------------------------------------------------------------
    // Cooldowns
    // ------------------------------------------------------------------------

    /// Starts the `kind` cooldown for the subject, if policy applies it here.
    pub fn set_cooldown(&self, subject: EntityId, kind: AbilityKind) {
        let policy = self.policy.load();
        if !self.cooldown_applies(&policy, subject, kind) {
            return;
        }
        let expires_at = self.now().saturating_add(policy.cooldown_ms(kind));
        self.ledger(kind).set(subject, expires_at);
        metrics::record_cooldown(kind);
        debug!(%subject, %kind, expires_at, "cooldown started");
    }

    /// Whether the `kind` cooldown is running and enforced for the subject.
    pub fn is_on_cooldown(&self, subject: EntityId, kind: AbilityKind) -> bool {
        let policy = self.policy.load();
        if !self.cooldown_applies(&policy, subject, kind) {
            return false;
        }
        self.ledger(kind).is_active(subject, self.now())
    }

    /// Whole seconds of `kind` cooldown left, rounded up.
    #[must_use]
    pub fn remaining_cooldown_seconds(&self, subject: EntityId, kind: AbilityKind) -> u64 {
        if self.is_zone_excluded(subject) {
            return 0;
        }
        self.ledger(kind)
            .get(subject)
            .map_or(0, |exp| ceil_seconds(exp, self.now()))
    }

    /// Whether `kind` is banned outright where the subject stands.
    #[must_use]
    pub fn is_ability_banned(&self, subject: EntityId, kind: AbilityKind) -> bool {
        let policy = self.policy.load();
        self.directory.resolve(subject).is_some_and(|e| {
            !policy.is_zone_blacklisted(&e.zone) && policy.is_ability_banned_in(kind, &e.zone)
        })
    }

    /// Schedules a `<kind>_ready` message for when the subject's current
    /// cooldown lapses, replacing any earlier schedule for that ability.
    ///
    /// Does nothing without a running cooldown or outside a tokio runtime.
    pub fn start_cooldown_ready(self: &Arc<Self>, subject: EntityId, kind: AbilityKind) {
        let Some(expires_at) = self.ledger(kind).get(subject) else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if self.is_shut_down() {
            return;
        }

        let slot = TaskSlot::CooldownReady(kind);
        let ticket = self.tasks.replace(subject, slot);
        let engine = Arc::clone(self);
        let wait = Duration::from_millis((expires_at - self.now()).max(0).unsigned_abs() + 1);

        handle.spawn(async move {
            tokio::select! {
                biased;
                () = ticket.token.cancelled() => {}
                () = tokio::time::sleep(wait) => {
                    engine.tasks.finish(subject, slot, ticket.generation);
                    engine.announce_ready(subject, kind);
                }
            }
        });
    }

    // ------------------------------------------------------------------------
    // Policy & lifecycle
    // ------------------------------------------------------------------------

    /// The policy in effect right now.
    #[must_use]
    pub fn policy(&self) -> Arc<PolicySnapshot> {
        self.policy.load()
    }

    /// Re-reads the policy source and swaps the new policy in.
    ///
    /// Existing tags and cooldowns are kept as they are.
    ///
    /// # Errors
    ///
    /// Returns the source or validation error; the previous policy stays.
    pub fn reload_policy(&self) -> Result<(), ConfigError> {
        let result = self
            .source
            .policy_snapshot()
            .and_then(|config| self.apply_policy(config));
        metrics::record_reload(result.is_ok());
        if let Err(e) = &result {
            warn!(error = %e, "policy reload failed, keeping previous policy");
        }
        result
    }

    /// Validates `config` and swaps it in.
    ///
    /// # Errors
    ///
    /// Returns a validation error; the previous policy stays.
    pub fn apply_policy(&self, config: PolicyConfig) -> Result<(), ConfigError> {
        let snapshot = checked_snapshot(config)?;
        self.throttle.set_window(snapshot.throttle_ms());
        let previous = self.policy.swap(snapshot);
        info!(
            tag_ms = self.policy.load().tag_duration_ms(),
            previous_tag_ms = previous.tag_duration_ms(),
            "policy applied"
        );
        Ok(())
    }

    /// Stops the reconciliation task and every per-subject task, then
    /// clears all state. Safe to call more than once.
    pub fn shutdown(&self) {
        let first = !self.shut_down.swap(true, Ordering::SeqCst);
        self.cancel.cancel();
        self.tasks.cancel_all();
        self.tags.clear();
        for ledger in &self.cooldowns {
            ledger.clear();
        }
        self.throttle.clear();
        metrics::set_active_tags(0);
        if first {
            info!("combat engine shut down");
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Raw tag entry, without lazy expiry.
    #[must_use]
    pub fn tag_entry(&self, subject: EntityId) -> Option<TagEntry> {
        self.tags.get(subject)
    }

    /// Raw cooldown expiry, without gating or lazy expiry.
    #[must_use]
    pub fn cooldown_expiry(&self, subject: EntityId, kind: AbilityKind) -> Option<i64> {
        self.ledger(kind).get(subject)
    }

    /// Number of tag entries, including lapsed ones not yet swept.
    #[must_use]
    pub fn tagged_count(&self) -> usize {
        self.tags.len()
    }

    /// Whether a per-subject task is registered for `slot`.
    #[must_use]
    pub fn has_task(&self, subject: EntityId, slot: TaskSlot) -> bool {
        self.tasks.is_scheduled(subject, slot)
    }

    /// Number of registered per-subject tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// The participant directory this engine consults.
    #[must_use]
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    /// Current time on the engine's clock.
    #[must_use]
    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Sends a message through the engine's throttle.
    pub fn notify(&self, recipient: EntityId, key: MessageKey, params: Params) {
        self.throttle.send(recipient, key, params);
    }

    /// Drops throttle state for a departing participant.
    pub fn forget_recipient(&self, recipient: EntityId) {
        self.throttle.forget(recipient);
    }

    /// Display name for params, `Unknown` if the participant cannot be resolved.
    #[must_use]
    pub fn display_name(&self, id: EntityId) -> String {
        self.directory
            .resolve(id)
            .map_or_else(|| "Unknown".to_string(), |e| e.name)
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    pub(super) const fn ledger(&self, kind: AbilityKind) -> &CooldownLedger {
        &self.cooldowns[kind as usize]
    }

    /// Clears a lapsed tag. Shared by the read path and the sweep.
    pub(super) fn expire_tag(&self, subject: EntityId, now: i64, reason: UntagReason) -> bool {
        if self.tags.remove_if_expired(subject, now).is_some() {
            self.after_untag(subject, true, reason);
            true
        } else {
            false
        }
    }

    fn after_untag(&self, subject: EntityId, announce: bool, reason: UntagReason) {
        let policy = self.policy.load();
        for kind in AbilityKind::ALL {
            if policy.ability(kind).in_combat_only {
                self.tasks.cancel(subject, TaskSlot::CooldownReady(kind));
            }
        }
        metrics::record_untag(reason);
        metrics::set_active_tags(self.tags.len());
        debug!(%subject, ?reason, "untagged");

        if !announce {
            return;
        }
        if let Some(entity) = self.reachable(&policy, subject) {
            self.notify(
                subject,
                MessageKey::CombatExpired,
                params([("player", entity.name)]),
            );
        }
    }

    /// Resolves a participant that is online and outside excluded zones.
    pub(super) fn reachable(&self, policy: &PolicySnapshot, subject: EntityId) -> Option<EntityRef> {
        self.directory
            .resolve(subject)
            .filter(|e| e.online && !policy.is_zone_blacklisted(&e.zone))
    }

    fn cooldown_applies(&self, policy: &PolicySnapshot, subject: EntityId, kind: AbilityKind) -> bool {
        let Some(entity) = self.directory.resolve(subject) else {
            return false;
        };
        if policy.is_zone_blacklisted(&entity.zone) || !policy.cooldown_active_in(kind, &entity.zone)
        {
            return false;
        }
        !policy.ability(kind).in_combat_only || self.is_in_combat(subject)
    }

    fn announce_ready(&self, subject: EntityId, kind: AbilityKind) {
        let now = self.now();
        let ledger = self.ledger(kind);
        if ledger.get(subject).is_some_and(|exp| now <= exp) {
            return;
        }
        ledger.expire(subject, now);
        if let Some(entity) = self.reachable(&self.policy.load(), subject) {
            self.notify(
                subject,
                MessageKey::Ready(kind),
                params([("player", entity.name)]),
            );
        }
    }
}

fn checked_snapshot(config: PolicyConfig) -> Result<PolicySnapshot, ConfigError> {
    let result = Validator::new().validate(&config);
    if result.has_errors() {
        return Err(ConfigError::ValidationError {
            path: "<policy source>".to_string(),
            errors: result.errors,
        });
    }
    Ok(PolicySnapshot::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::entity::InMemoryDirectory;
    use crate::notify::RecordingNotifier;
    use crate::policy::StaticPolicySource;

    const START: i64 = 1_000_000;

    struct Harness {
        engine: Arc<CombatEngine>,
        clock: Arc<ManualClock>,
        directory: Arc<InMemoryDirectory>,
        recorder: Arc<RecordingNotifier>,
    }

    impl Harness {
        fn new(config: PolicyConfig) -> Self {
            let clock = Arc::new(ManualClock::new(START));
            let directory = Arc::new(InMemoryDirectory::new());
            let recorder = Arc::new(RecordingNotifier::new());
            let engine = CombatEngine::new(
                Arc::new(StaticPolicySource::new(config)),
                Arc::clone(&directory) as Arc<dyn Directory>,
                Arc::clone(&recorder) as Arc<dyn Notifier>,
                Arc::clone(&clock) as Arc<dyn Clock>,
            )
            .unwrap();
            Self {
                engine: Arc::new(engine),
                clock,
                directory,
                recorder,
            }
        }

        fn join(&self, name: &str, zone: &str) -> EntityId {
            let id = EntityId::random();
            self.directory.upsert(EntityRef {
                id,
                name: name.to_string(),
                zone: zone.to_string(),
                online: true,
                flying: false,
                tag_exempt: false,
            });
            id
        }

        fn advance(&self, millis: i64) {
            self.clock.advance(millis);
        }
    }

    fn default_harness() -> Harness {
        Harness::new(PolicyConfig::default())
    }

    #[test]
    fn test_tag_sets_link_and_expiry() {
        let h = default_harness();
        let (p, q) = (h.join("p", "world"), h.join("q", "world"));
        h.engine.tag(p, q);
        let entry = h.engine.tag_entry(p).unwrap();
        assert_eq!(entry.opponent, q);
        assert_eq!(entry.expires_at, START + 20_000);
        assert!(h.engine.is_in_combat(p));
        assert!(!h.engine.is_in_combat(q));
    }

    #[test]
    fn test_tag_twenty_second_walkthrough() {
        let h = default_harness();
        let (p, q) = (h.join("p", "world"), h.join("q", "world"));
        h.engine.tag(p, q);
        assert_eq!(h.engine.remaining_combat_seconds(p), 20);

        h.advance(15_000);
        h.engine.tag(p, q);
        assert_eq!(h.engine.remaining_combat_seconds(p), 20);

        h.advance(6_000);
        assert!(h.engine.is_in_combat(p));
        assert_eq!(h.engine.remaining_combat_seconds(p), 14);
    }

    #[test]
    fn test_same_attacker_never_shortens() {
        let h = default_harness();
        let (p, q) = (h.join("p", "world"), h.join("q", "world"));
        h.engine.tag(p, q);
        h.engine
            .apply_policy({
                let mut c = PolicyConfig::default();
                c.combat.duration = Duration::from_secs(5);
                c
            })
            .unwrap();
        h.engine.tag(p, q);
        assert_eq!(h.engine.tag_entry(p).unwrap().expires_at, START + 20_000);
    }

    #[test]
    fn test_tag_ignores_unknown_exempt_and_excluded() {
        let mut config = PolicyConfig::default();
        config.zones.blacklisted.insert("creative".into());
        let h = Harness::new(config);

        let q = h.join("q", "world");
        h.engine.tag(EntityId::random(), q);

        let p = h.join("p", "world");
        h.engine.tag(p, EntityId::random());
        h.engine.tag(p, p);

        let builder = h.join("builder", "creative");
        h.engine.tag(builder, q);

        let admin = h.join("admin", "world");
        let mut admin_ref = h.directory.resolve(admin).unwrap();
        admin_ref.tag_exempt = true;
        h.directory.upsert(admin_ref);
        h.engine.tag(admin, q);

        assert_eq!(h.engine.tagged_count(), 0);
    }

    #[test]
    fn test_tag_cancels_flight_and_notifies() {
        let h = default_harness();
        let (p, q) = (h.join("p", "world"), h.join("q", "world"));
        let mut flying = h.directory.resolve(p).unwrap();
        flying.flying = true;
        h.directory.upsert(flying);

        h.engine.tag(p, q);
        assert!(!h.directory.resolve(p).unwrap().flying);
        assert_eq!(h.recorder.count(p, MessageKey::CombatFlyDisabled), 1);
    }

    #[test]
    fn test_untag_notifies_only_online() {
        let h = default_harness();
        let (p, q) = (h.join("p", "world"), h.join("q", "world"));
        h.engine.update_mutual_combat(p, q);

        h.engine.untag(p);
        assert_eq!(h.recorder.count(p, MessageKey::CombatExpired), 1);
        assert!(h.engine.tag_entry(p).is_none());

        h.directory.set_offline(q);
        h.engine.untag(q);
        assert_eq!(h.recorder.count(q, MessageKey::CombatExpired), 0);
        assert!(h.engine.tag_entry(q).is_none());

        h.engine.untag(p);
        assert_eq!(h.recorder.count(p, MessageKey::CombatExpired), 1);
    }

    #[test]
    fn test_untag_silently_sends_nothing() {
        let h = default_harness();
        let (p, q) = (h.join("p", "world"), h.join("q", "world"));
        h.engine.tag(p, q);
        h.engine.untag_silently(p);
        assert!(h.engine.tag_entry(p).is_none());
        assert!(h.recorder.sent().is_empty());
    }

    #[test]
    fn test_lazy_expiry_clears_tag_and_link() {
        let h = default_harness();
        let (p, q) = (h.join("p", "world"), h.join("q", "world"));
        h.engine.tag(p, q);
        h.advance(20_000);
        assert!(h.engine.is_in_combat(p));
        h.advance(1);
        assert!(!h.engine.is_in_combat(p));
        assert!(h.engine.tag_entry(p).is_none());
        assert!(h.engine.get_opponent(p).is_none());
        assert_eq!(h.recorder.count(p, MessageKey::CombatExpired), 1);
    }

    #[test]
    fn test_get_opponent() {
        let h = default_harness();
        let (p, q) = (h.join("p", "world"), h.join("q", "world"));
        assert!(h.engine.get_opponent(p).is_none());
        h.engine.tag(p, q);
        assert_eq!(h.engine.get_opponent(p), Some(q));
    }

    #[test]
    fn test_mutual_combat_requires_both_online() {
        let h = default_harness();
        let (a, b) = (h.join("a", "world"), h.join("b", "world"));
        h.directory.set_offline(b);
        h.engine.update_mutual_combat(a, b);
        assert_eq!(h.engine.tagged_count(), 0);

        let c = h.join("c", "world");
        h.engine.update_mutual_combat(a, c);
        assert_eq!(h.engine.get_opponent(a), Some(c));
        assert_eq!(h.engine.get_opponent(c), Some(a));
    }

    #[test]
    fn test_third_party_and_lock_predicates() {
        let h = default_harness();
        let (a, b, c) = (h.join("a", "world"), h.join("b", "world"), h.join("c", "world"));
        h.engine.update_mutual_combat(a, b);

        assert!(h.engine.is_victim_protected_from_third_party(a, c));
        assert!(!h.engine.is_victim_protected_from_third_party(a, b));
        assert!(!h.engine.is_victim_protected_from_third_party(c, a));

        assert!(h.engine.is_attacker_locked_to_other(a, c));
        assert!(!h.engine.is_attacker_locked_to_other(a, b));
        assert!(!h.engine.is_attacker_locked_to_other(c, a));
    }

    #[test]
    fn test_combat_only_cooldown_skipped_outside_combat() {
        let h = default_harness();
        let s = h.join("s", "world");
        h.engine.set_cooldown(s, AbilityKind::Pearl);
        assert!(!h.engine.is_on_cooldown(s, AbilityKind::Pearl));
        assert!(h.engine.cooldown_expiry(s, AbilityKind::Pearl).is_none());
    }

    #[test]
    fn test_cooldown_in_combat() {
        let h = default_harness();
        let (s, o) = (h.join("s", "world"), h.join("o", "world"));
        h.engine.tag(s, o);
        h.engine.set_cooldown(s, AbilityKind::Pearl);
        assert!(h.engine.is_on_cooldown(s, AbilityKind::Pearl));
        assert!(!h.engine.is_on_cooldown(s, AbilityKind::Trident));
        assert_eq!(h.engine.remaining_cooldown_seconds(s, AbilityKind::Pearl), 10);

        h.advance(9_500);
        assert_eq!(h.engine.remaining_cooldown_seconds(s, AbilityKind::Pearl), 1);
        h.advance(501);
        assert!(!h.engine.is_on_cooldown(s, AbilityKind::Pearl));
        assert!(h.engine.cooldown_expiry(s, AbilityKind::Pearl).is_none());
    }

    #[test]
    fn test_cooldown_independent_of_tag_and_other_kind() {
        let mut config = PolicyConfig::default();
        config.abilities.trident.in_combat_only = false;
        let h = Harness::new(config);
        let (s, o) = (h.join("s", "world"), h.join("o", "world"));
        h.engine.tag(s, o);
        let tag_before = h.engine.tag_entry(s);

        h.engine.set_cooldown(s, AbilityKind::Trident);
        assert_eq!(h.engine.tag_entry(s), tag_before);
        assert!(h.engine.cooldown_expiry(s, AbilityKind::Pearl).is_none());

        h.engine.untag_silently(s);
        assert!(h.engine.is_on_cooldown(s, AbilityKind::Trident));
    }

    #[test]
    fn test_zone_override_disables_cooldown() {
        let mut config = PolicyConfig::default();
        config.abilities.pearl.in_combat_only = false;
        config.abilities.pearl.zones.insert("arena".into(), false);
        let h = Harness::new(config);
        let s = h.join("s", "arena");
        h.engine.set_cooldown(s, AbilityKind::Pearl);
        assert!(!h.engine.is_on_cooldown(s, AbilityKind::Pearl));
    }

    #[test]
    fn test_refresh_on_land_requires_policy_and_combat() {
        let mut config = PolicyConfig::default();
        config.abilities.pearl.refresh_combat_on_land = true;
        let h = Harness::new(config);
        let (s, o) = (h.join("s", "world"), h.join("o", "world"));

        h.engine.refresh_combat_on_ability_land(s, AbilityKind::Pearl);
        assert!(h.engine.tag_entry(s).is_none());

        h.engine.tag(s, o);
        h.advance(5_000);
        h.engine.refresh_combat_on_ability_land(s, AbilityKind::Trident);
        assert_eq!(h.engine.tag_entry(s).unwrap().expires_at, START + 20_000);

        h.engine.refresh_combat_on_ability_land(s, AbilityKind::Pearl);
        assert_eq!(h.engine.tag_entry(s).unwrap().expires_at, START + 25_000);
        assert_eq!(h.engine.get_opponent(s), Some(o));
    }

    #[test]
    fn test_suppress_flight_notifies_each_time() {
        let h = default_harness();
        let (s, o) = (h.join("s", "world"), h.join("o", "world"));
        assert!(!h.engine.should_suppress_flight(s));

        h.engine.tag(s, o);
        assert!(h.engine.should_suppress_flight(s));
        h.advance(1_000);
        assert!(h.engine.should_suppress_flight(s));
        assert_eq!(h.recorder.count(s, MessageKey::CombatFlyDisabled), 2);
    }

    #[test]
    fn test_suppress_flight_respects_policy() {
        let mut config = PolicyConfig::default();
        config.combat.disable_flight = false;
        let h = Harness::new(config);
        let (s, o) = (h.join("s", "world"), h.join("o", "world"));
        h.engine.tag(s, o);
        assert!(!h.engine.should_suppress_flight(s));
    }

    #[test]
    fn test_ability_ban() {
        let mut config = PolicyConfig::default();
        config.abilities.trident.banned_zones.insert("lobby".into(), true);
        let h = Harness::new(config);
        let s = h.join("s", "lobby");
        assert!(h.engine.is_ability_banned(s, AbilityKind::Trident));
        assert!(!h.engine.is_ability_banned(s, AbilityKind::Pearl));
        assert!(!h.engine.is_ability_banned(EntityId::random(), AbilityKind::Trident));
    }

    #[test]
    fn test_reload_keeps_ledgers() {
        let h = default_harness();
        let (s, o) = (h.join("s", "world"), h.join("o", "world"));
        h.engine.tag(s, o);

        let mut next = PolicyConfig::default();
        next.combat.duration = Duration::from_secs(60);
        h.engine.apply_policy(next).unwrap();

        assert_eq!(h.engine.tag_entry(s).unwrap().expires_at, START + 20_000);
        assert_eq!(h.engine.policy().tag_duration_ms(), 60_000);
    }

    #[test]
    fn test_invalid_policy_rejected_and_previous_kept() {
        let h = default_harness();
        let mut bad = PolicyConfig::default();
        bad.combat.duration = Duration::ZERO;
        assert!(h.engine.apply_policy(bad).is_err());
        assert_eq!(h.engine.policy().tag_duration_ms(), 20_000);
    }

    #[test]
    fn test_reload_from_static_source() {
        let h = default_harness();
        assert!(h.engine.reload_policy().is_ok());
    }

    #[test]
    fn test_shutdown_clears_and_is_idempotent() {
        let mut config = PolicyConfig::default();
        config.abilities.pearl.in_combat_only = false;
        let h = Harness::new(config);
        let (s, o) = (h.join("s", "world"), h.join("o", "world"));
        h.engine.update_mutual_combat(s, o);
        h.engine.set_cooldown(s, AbilityKind::Pearl);

        h.engine.shutdown();
        h.engine.shutdown();

        assert!(h.engine.is_shut_down());
        assert_eq!(h.engine.tagged_count(), 0);
        assert!(h.engine.cooldown_expiry(s, AbilityKind::Pearl).is_none());
        assert_eq!(h.engine.task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_ready_fires_after_expiry() {
        let mut config = PolicyConfig::default();
        config.abilities.pearl.in_combat_only = false;
        let h = Harness::new(config);
        let s = h.join("s", "world");

        h.engine.set_cooldown(s, AbilityKind::Pearl);
        h.engine.start_cooldown_ready(s, AbilityKind::Pearl);
        assert!(h.engine.has_task(s, TaskSlot::CooldownReady(AbilityKind::Pearl)));

        h.advance(10_001);
        tokio::time::sleep(Duration::from_millis(10_002)).await;

        assert_eq!(h.recorder.count(s, MessageKey::Ready(AbilityKind::Pearl)), 1);
        assert_eq!(h.engine.task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarting_ready_task_cancels_previous() {
        let mut config = PolicyConfig::default();
        config.abilities.pearl.in_combat_only = false;
        let h = Harness::new(config);
        let s = h.join("s", "world");

        h.engine.set_cooldown(s, AbilityKind::Pearl);
        h.engine.start_cooldown_ready(s, AbilityKind::Pearl);
        h.advance(5_000);
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        h.engine.set_cooldown(s, AbilityKind::Pearl);
        h.engine.start_cooldown_ready(s, AbilityKind::Pearl);
        assert_eq!(h.engine.task_count(), 1);

        // The first schedule would have fired here.
        h.advance(5_001);
        tokio::time::sleep(Duration::from_millis(5_002)).await;
        assert_eq!(h.recorder.count(s, MessageKey::Ready(AbilityKind::Pearl)), 0);

        h.advance(5_000);
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(h.recorder.count(s, MessageKey::Ready(AbilityKind::Pearl)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_untag_cancels_combat_only_ready_task() {
        let h = default_harness();
        let (s, o) = (h.join("s", "world"), h.join("o", "world"));
        h.engine.tag(s, o);
        h.engine.set_cooldown(s, AbilityKind::Trident);
        h.engine.start_cooldown_ready(s, AbilityKind::Trident);
        assert_eq!(h.engine.task_count(), 1);

        h.engine.untag_silently(s);
        assert_eq!(h.engine.task_count(), 0);

        h.advance(11_000);
        tokio::time::sleep(Duration::from_millis(11_000)).await;
        assert_eq!(h.recorder.count(s, MessageKey::Ready(AbilityKind::Trident)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_deferred_notification() {
        let h = default_harness();
        let (s, o) = (h.join("s", "world"), h.join("o", "world"));
        h.engine.tag(s, o);
        assert!(h.engine.should_suppress_flight(s));
        h.advance(100);
        assert!(h.engine.should_suppress_flight(s));
        assert_eq!(h.recorder.count(s, MessageKey::CombatFlyDisabled), 1);

        h.engine.shutdown();
        h.advance(2_000);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(h.recorder.count(s, MessageKey::CombatFlyDisabled), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_silences_pending_ready_task() {
        let mut config = PolicyConfig::default();
        config.abilities.pearl.in_combat_only = false;
        let h = Harness::new(config);
        let s = h.join("s", "world");
        h.engine.set_cooldown(s, AbilityKind::Pearl);
        h.engine.start_cooldown_ready(s, AbilityKind::Pearl);

        h.engine.shutdown();
        h.advance(11_000);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(h.recorder.sent().is_empty());
        assert_eq!(h.engine.task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticket_registered_after_shutdown_is_cancelled() {
        let h = default_harness();
        h.engine.shutdown();
        let ticket = h
            .engine
            .tasks
            .replace(EntityId::random(), TaskSlot::CooldownReady(AbilityKind::Pearl));
        assert!(ticket.token.is_cancelled());
    }
}
