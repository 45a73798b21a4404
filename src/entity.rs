//! Participant identity and the directory collaborator.
//!
//! The engine never owns participant data. It keys every ledger by
//! [`EntityId`] and asks a [`Directory`] for liveness, display name,
//! zone, and the tag-bypass predicate when it needs them.

use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of a participant.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Generates a fresh random identity.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EntityId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Resolved view of a participant at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Participant identity
    pub id: EntityId,
    /// Display name used in notification params
    pub name: String,
    /// Zone the participant is currently in
    pub zone: String,
    /// Whether the participant is connected
    #[serde(default = "default_true")]
    pub online: bool,
    /// Whether the participant is currently flying
    #[serde(default)]
    pub flying: bool,
    /// Authorization predicate: participant may never be tagged
    #[serde(default)]
    pub tag_exempt: bool,
}

const fn default_true() -> bool {
    true
}

/// Liveness and identity resolution, supplied by the host.
pub trait Directory: Send + Sync {
    /// Resolves a participant, or `None` if it is unknown.
    fn resolve(&self, id: EntityId) -> Option<EntityRef>;

    /// Returns whether the participant is connected.
    fn is_online(&self, id: EntityId) -> bool {
        self.resolve(id).is_some_and(|e| e.online)
    }

    /// Forces the participant out of flight. Returns `true` if it was flying.
    fn cancel_flight(&self, id: EntityId) -> bool;
}

/// Concurrent in-process [`Directory`] used by the binary and tests.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    entities: DashMap<EntityId, EntityRef>,
}

impl InMemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a participant.
    pub fn upsert(&self, entity: EntityRef) {
        self.entities.insert(entity.id, entity);
    }

    /// Marks a participant offline without forgetting it.
    pub fn set_offline(&self, id: EntityId) {
        if let Some(mut entry) = self.entities.get_mut(&id) {
            entry.online = false;
        }
    }

    /// Marks a known participant online again.
    pub fn set_online(&self, id: EntityId) {
        if let Some(mut entry) = self.entities.get_mut(&id) {
            entry.online = true;
        }
    }

    /// Records whether a participant is flying.
    pub fn set_flying(&self, id: EntityId, flying: bool) {
        if let Some(mut entry) = self.entities.get_mut(&id) {
            entry.flying = flying;
        }
    }

    /// Removes a participant entirely.
    pub fn remove(&self, id: EntityId) -> Option<EntityRef> {
        self.entities.remove(&id).map(|(_, e)| e)
    }

    /// Number of known participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if no participants are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl Directory for InMemoryDirectory {
    fn resolve(&self, id: EntityId) -> Option<EntityRef> {
        self.entities.get(&id).map(|e| e.value().clone())
    }

    fn cancel_flight(&self, id: EntityId) -> bool {
        self.entities.get_mut(&id).is_some_and(|mut e| {
            let was_flying = e.flying;
            e.flying = false;
            was_flying
        })
    }
}
