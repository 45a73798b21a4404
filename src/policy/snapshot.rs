//! Derived, read-only policy view and its atomic swap handle.
//!
//! A [`PolicySnapshot`] is computed once per load from a [`PolicyConfig`];
//! durations are pre-converted to milliseconds and per-zone maps are ready
//! for lookup. [`PolicyHandle`] publishes snapshots by swapping an `Arc`,
//! so a reader either sees the old snapshot or the new one, never a mix.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::ability::AbilityKind;

use super::schema::{AbilityPolicy, PolicyConfig};

/// Read-only policy view consumed by the engine.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    config: PolicyConfig,
    tag_duration_ms: i64,
    throttle_ms: i64,
    cooldown_ms: [i64; 2],
}

impl PolicySnapshot {
    /// Derives a snapshot from a validated configuration.
    #[must_use]
    pub fn new(config: PolicyConfig) -> Self {
        let tag_duration_ms = millis(config.combat.duration);
        let throttle_ms = millis(config.notifications.throttle);
        let cooldown_ms = AbilityKind::ALL.map(|k| millis(config.abilities.get(k).duration));
        Self {
            config,
            tag_duration_ms,
            throttle_ms,
            cooldown_ms,
        }
    }

    /// The configuration this snapshot was derived from.
    #[must_use]
    pub const fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Combat tag duration in milliseconds.
    #[must_use]
    pub const fn tag_duration_ms(&self) -> i64 {
        self.tag_duration_ms
    }

    /// Notification throttle window in milliseconds.
    #[must_use]
    pub const fn throttle_ms(&self) -> i64 {
        self.throttle_ms
    }

    /// Cooldown duration for `kind` in milliseconds.
    #[must_use]
    pub const fn cooldown_ms(&self, kind: AbilityKind) -> i64 {
        self.cooldown_ms[kind as usize]
    }

    /// Ability policy for `kind`.
    #[must_use]
    pub const fn ability(&self, kind: AbilityKind) -> &AbilityPolicy {
        self.config.abilities.get(kind)
    }

    /// Whether the engine ignores `zone` entirely.
    #[must_use]
    pub fn is_zone_blacklisted(&self, zone: &str) -> bool {
        self.config.zones.blacklisted.contains(zone)
    }

    /// Whether the cooldown for `kind` applies in `zone`.
    ///
    /// An explicit `false` zone override disables it even when globally enabled.
    #[must_use]
    pub fn cooldown_active_in(&self, kind: AbilityKind, zone: &str) -> bool {
        let ability = self.ability(kind);
        ability.enabled && ability.zones.get(zone).copied().unwrap_or(true)
    }

    /// Whether `kind` is forbidden outright in `zone`.
    #[must_use]
    pub fn is_ability_banned_in(&self, kind: AbilityKind, zone: &str) -> bool {
        self.ability(kind)
            .banned_zones
            .get(zone)
            .copied()
            .unwrap_or(false)
    }
}

fn millis(duration: std::time::Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Shared handle to the current [`PolicySnapshot`].
///
/// Reads are lock-free; a reload publishes a whole new snapshot.
#[derive(Debug)]
pub struct PolicyHandle {
    current: ArcSwap<PolicySnapshot>,
}

impl PolicyHandle {
    /// Creates a handle publishing `snapshot`.
    #[must_use]
    pub fn new(snapshot: PolicySnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    /// Returns the snapshot in effect right now.
    ///
    /// The returned `Arc` stays valid across later swaps.
    #[must_use]
    pub fn load(&self) -> Arc<PolicySnapshot> {
        self.current.load_full()
    }

    /// Publishes a new snapshot, returning the previous one.
    pub fn swap(&self, snapshot: PolicySnapshot) -> Arc<PolicySnapshot> {
        self.current.swap(Arc::new(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> PolicyConfig {
        let mut config = PolicyConfig::default();
        config.combat.duration = Duration::from_secs(15);
        config.abilities.pearl.zones.insert("arena".into(), false);
        config.abilities.trident.banned_zones.insert("lobby".into(), true);
        config.zones.blacklisted.insert("creative".into());
        config
    }

    #[test]
    fn test_durations_in_millis() {
        let snap = PolicySnapshot::new(config());
        assert_eq!(snap.tag_duration_ms(), 15_000);
        assert_eq!(snap.cooldown_ms(AbilityKind::Pearl), 10_000);
        assert_eq!(snap.cooldown_ms(AbilityKind::Trident), 10_000);
        assert_eq!(snap.throttle_ms(), 1_000);
    }

    #[test]
    fn test_zone_override_disables_cooldown() {
        let snap = PolicySnapshot::new(config());
        assert!(!snap.cooldown_active_in(AbilityKind::Pearl, "arena"));
        assert!(snap.cooldown_active_in(AbilityKind::Pearl, "world"));
        assert!(snap.cooldown_active_in(AbilityKind::Trident, "arena"));
    }

    #[test]
    fn test_global_disable_wins_over_missing_zone() {
        let mut cfg = config();
        cfg.abilities.trident.enabled = false;
        cfg.abilities.trident.zones.insert("arena".into(), true);
        let snap = PolicySnapshot::new(cfg);
        assert!(!snap.cooldown_active_in(AbilityKind::Trident, "arena"));
    }

    #[test]
    fn test_banned_and_blacklisted_zones() {
        let snap = PolicySnapshot::new(config());
        assert!(snap.is_ability_banned_in(AbilityKind::Trident, "lobby"));
        assert!(!snap.is_ability_banned_in(AbilityKind::Pearl, "lobby"));
        assert!(snap.is_zone_blacklisted("creative"));
        assert!(!snap.is_zone_blacklisted("world"));
    }

    #[test]
    fn test_swap_keeps_old_readers_valid() {
        let handle = PolicyHandle::new(PolicySnapshot::new(config()));
        let before = handle.load();

        let mut next = config();
        next.combat.duration = Duration::from_secs(40);
        let previous = handle.swap(PolicySnapshot::new(next));

        assert_eq!(before.tag_duration_ms(), 15_000);
        assert_eq!(previous.tag_duration_ms(), 15_000);
        assert_eq!(handle.load().tag_duration_ms(), 40_000);
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let handle = Arc::new(PolicyHandle::new(PolicySnapshot::new(config())));

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let handle = Arc::clone(&handle);
                scope.spawn(move || {
                    for _ in 0..1_000 {
                        let snap = handle.load();
                        // duration and throttle always move together
                        assert_eq!(snap.throttle_ms() * 15, snap.tag_duration_ms());
                    }
                });
            }
            for secs in 1..200u64 {
                let mut next = config();
                next.combat.duration = Duration::from_secs(secs * 15);
                next.notifications.throttle = Duration::from_secs(secs);
                handle.swap(PolicySnapshot::new(next));
            }
        });

        assert_eq!(handle.load().tag_duration_ms(), 199 * 15_000);
    }
}
