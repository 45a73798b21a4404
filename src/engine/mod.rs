//! Combat state and cooldown engine.
//!
//! - [`TagTable`]: who is fighting whom, and until when
//! - [`CooldownLedger`]: one per [`AbilityKind`](crate::ability::AbilityKind)
//! - [`SubjectTasks`]: cancellable per-participant timers
//! - [`CombatEngine`]: the public contract over all of the above, plus the
//!   reconciliation sweep

pub mod combat;
pub mod ledger;
pub mod reconcile;
pub mod status;
pub mod tags;
pub mod tasks;

pub use combat::CombatEngine;
pub use ledger::CooldownLedger;
pub use reconcile::SweepReport;
pub use status::CountdownStatus;
pub use tags::{TagEntry, TagTable, TagUpdate};
pub use tasks::{SubjectTasks, TaskSlot};
