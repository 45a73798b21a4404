//! Expiry ledger for one ability cooldown.

use dashmap::DashMap;

use crate::entity::EntityId;

/// Concurrent map from participant to absolute cooldown expiry (ms).
///
/// An entry is live while `now <= expires_at`. Reads past expiry remove
/// the entry, but only if it has not been renewed in the meantime.
#[derive(Debug, Default)]
pub struct CooldownLedger {
    entries: DashMap<EntityId, i64>,
}

impl CooldownLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts or restarts the cooldown for `subject`.
    pub fn set(&self, subject: EntityId, expires_at: i64) {
        self.entries.insert(subject, expires_at);
    }

    /// Raw expiry, without lazy clearing.
    #[must_use]
    pub fn get(&self, subject: EntityId) -> Option<i64> {
        self.entries.get(&subject).map(|e| *e)
    }

    /// Whether the cooldown is live at `now`; clears it if it has lapsed.
    pub fn is_active(&self, subject: EntityId, now: i64) -> bool {
        match self.get(subject) {
            Some(expires_at) if now <= expires_at => true,
            Some(_) => {
                self.expire(subject, now);
                false
            }
            None => false,
        }
    }

    /// Removes the entry if it has lapsed at `now`. Returns `true` if removed.
    pub fn expire(&self, subject: EntityId, now: i64) -> bool {
        self.entries
            .remove_if(&subject, |_, expires_at| now > *expires_at)
            .is_some()
    }

    /// Removes the entry unconditionally.
    pub fn remove(&self, subject: EntityId) -> Option<i64> {
        self.entries.remove(&subject).map(|(_, exp)| exp)
    }

    /// Evicts every entry that has lapsed or whose subject is not reachable.
    ///
    /// `reachable` is evaluated without holding any shard lock.
    pub fn sweep(&self, now: i64, reachable: impl Fn(EntityId) -> bool) -> usize {
        let mut evicted = 0;
        for subject in self.subjects() {
            let keep = reachable(subject);
            if self
                .entries
                .remove_if(&subject, |_, expires_at| !keep || now > *expires_at)
                .is_some()
            {
                evicted += 1;
            }
        }
        evicted
    }

    /// Point-in-time copy of the key set.
    #[must_use]
    pub fn subjects(&self) -> Vec<EntityId> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    /// Number of entries, live or not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}
