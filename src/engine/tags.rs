//! Combat tag table.
//!
//! The tag expiry and the opponent link live in one entry, so a subject
//! either has both or neither. Every update to an entry runs under that
//! entry's shard lock.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::entity::EntityId;

/// A subject's current tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagEntry {
    /// Who the subject is fighting
    pub opponent: EntityId,
    /// Absolute expiry in milliseconds
    pub expires_at: i64,
}

impl TagEntry {
    /// Whether the tag is still live at `now`.
    #[must_use]
    pub const fn is_live(&self, now: i64) -> bool {
        now <= self.expires_at
    }
}

/// What [`TagTable::propose`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagUpdate {
    /// No previous tag
    Created,
    /// Same opponent, later expiry
    Extended,
    /// Different opponent; link and expiry replaced
    Retargeted,
    /// Same opponent, expiry not later; nothing written
    Unchanged,
}

/// Concurrent subject → tag map.
#[derive(Debug, Default)]
pub struct TagTable {
    entries: DashMap<EntityId, TagEntry>,
}

impl TagTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags `subject` against `opponent` until `expires_at`.
    ///
    /// Against the same opponent the expiry only moves forward; a new
    /// opponent always takes over the link. Concurrent proposals for one
    /// subject and opponent leave the maximum expiry in place.
    pub fn propose(&self, subject: EntityId, opponent: EntityId, expires_at: i64) -> TagUpdate {
        match self.entries.entry(subject) {
            Entry::Vacant(v) => {
                v.insert(TagEntry {
                    opponent,
                    expires_at,
                });
                TagUpdate::Created
            }
            Entry::Occupied(mut o) => {
                let current = o.get_mut();
                if current.opponent != opponent {
                    *current = TagEntry {
                        opponent,
                        expires_at,
                    };
                    TagUpdate::Retargeted
                } else if expires_at > current.expires_at {
                    current.expires_at = expires_at;
                    TagUpdate::Extended
                } else {
                    TagUpdate::Unchanged
                }
            }
        }
    }

    /// Moves an existing tag's expiry forward to `expires_at`.
    ///
    /// Returns `false` if there is no tag or it already expires later.
    pub fn extend(&self, subject: EntityId, expires_at: i64) -> bool {
        self.entries.get_mut(&subject).is_some_and(|mut entry| {
            if expires_at > entry.expires_at {
                entry.expires_at = expires_at;
                true
            } else {
                false
            }
        })
    }

    /// Current entry, without lazy clearing.
    #[must_use]
    pub fn get(&self, subject: EntityId) -> Option<TagEntry> {
        self.entries.get(&subject).map(|e| *e)
    }

    /// Removes the tag unconditionally.
    pub fn remove(&self, subject: EntityId) -> Option<TagEntry> {
        self.entries.remove(&subject).map(|(_, e)| e)
    }

    /// Removes the tag only if it has lapsed at `now`.
    ///
    /// A tag refreshed between the caller's read and this call survives.
    pub fn remove_if_expired(&self, subject: EntityId, now: i64) -> Option<TagEntry> {
        self.entries
            .remove_if(&subject, |_, e| !e.is_live(now))
            .map(|(_, e)| e)
    }

    /// Point-in-time copy of the key set.
    #[must_use]
    pub fn subjects(&self) -> Vec<EntityId> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    /// Number of tagged subjects, including lapsed entries not yet cleared.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nobody is tagged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every tag.
    pub fn clear(&self) {
        self.entries.clear();
    }
}
