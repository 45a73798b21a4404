//! Per-subject scheduled tasks.
//!
//! Each `(subject, slot)` holds at most one live cancellation token.
//! Starting a task for an occupied slot swaps the token in one map
//! operation and cancels the one it displaced. Every token is a child of
//! the registry's parent token, so cancelling the parent stops all tasks,
//! including ones registered after the parent was cancelled.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::ability::AbilityKind;
use crate::entity::EntityId;

/// Kind of per-subject task.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum TaskSlot {
    /// Announces that an ability's cooldown has lapsed
    CooldownReady(AbilityKind),
}

#[derive(Debug)]
struct Registered {
    generation: u64,
    token: CancellationToken,
}

/// Handle given to a newly registered task.
#[derive(Debug, Clone)]
pub struct TaskTicket {
    /// Identifies this registration for [`SubjectTasks::finish`]
    pub generation: u64,
    /// Cancelled when the slot is replaced, cleared, or shut down
    pub token: CancellationToken,
}

/// Registry of cancellable per-subject tasks.
#[derive(Debug)]
pub struct SubjectTasks {
    slots: DashMap<(EntityId, TaskSlot), Registered>,
    next_generation: AtomicU64,
    parent: CancellationToken,
}

impl SubjectTasks {
    /// Creates an empty registry whose tasks all stop when `parent` is cancelled.
    #[must_use]
    pub fn new(parent: CancellationToken) -> Self {
        Self {
            slots: DashMap::new(),
            next_generation: AtomicU64::new(0),
            parent,
        }
    }

    /// Registers a new task for `slot`, cancelling whatever held it before.
    pub fn replace(&self, subject: EntityId, slot: TaskSlot) -> TaskTicket {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.parent.child_token();
        let previous = self.slots.insert(
            (subject, slot),
            Registered {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        TaskTicket { generation, token }
    }

    /// Releases a slot from inside its own task, unless it was replaced.
    pub fn finish(&self, subject: EntityId, slot: TaskSlot, generation: u64) {
        self.slots
            .remove_if(&(subject, slot), |_, r| r.generation == generation);
    }

    /// Cancels and releases one slot. Cancelling an empty slot is a no-op.
    pub fn cancel(&self, subject: EntityId, slot: TaskSlot) {
        if let Some((_, r)) = self.slots.remove(&(subject, slot)) {
            r.token.cancel();
        }
    }

    /// Cancels every slot.
    pub fn cancel_all(&self) {
        self.slots.retain(|_, r| {
            r.token.cancel();
            false
        });
    }

    /// Whether `slot` currently holds a task.
    #[must_use]
    pub fn is_scheduled(&self, subject: EntityId, slot: TaskSlot) -> bool {
        self.slots.contains_key(&(subject, slot))
    }

    /// Number of registered tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no tasks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
