//! Host event adapter.
//!
//! Hosts describe what happened as [`AdapterEvent`]s; the [`EventRouter`]
//! applies the combat rules through the engine and answers with an
//! [`Outcome`] the host acts on (cancel the action, kill a logger, credit a
//! kill).

pub mod router;
pub mod rules;

use serde::{Deserialize, Serialize};

use crate::ability::AbilityKind;
use crate::entity::{EntityId, EntityRef};

pub use router::EventRouter;

/// Host-side identifier of an in-flight projectile.
pub type ProjectileId = u64;

/// Something that happened on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdapterEvent {
    /// A participant appeared or its state changed
    Presence { entity: EntityRef },
    /// A participant is gone for good
    Leave { subject: EntityId },
    /// `victim` took damage, from `attacker` if another participant caused it
    Damage {
        victim: EntityId,
        #[serde(default)]
        attacker: Option<EntityId>,
    },
    /// A cooldown-tracked ability was used
    ///
    /// Without a `projectile` the use counts as landed right away, as with
    /// a riptide launch.
    AbilityUse {
        subject: EntityId,
        ability: AbilityKind,
        #[serde(default)]
        projectile: Option<ProjectileId>,
    },
    /// A projectile launched by an ability hit something
    ProjectileLand { projectile: ProjectileId },
    /// A participant tried to start or stop flying
    FlightToggle { subject: EntityId, flying: bool },
    /// A participant ran a command
    Command { subject: EntityId, command: String },
    /// A participant tried to use an item
    ItemUse { subject: EntityId, item: String },
    /// A participant disconnected; `kicked` when an operator removed them
    Disconnect {
        subject: EntityId,
        #[serde(default)]
        kicked: bool,
    },
    /// A participant died
    Death {
        victim: EntityId,
        #[serde(default)]
        killer: Option<EntityId>,
    },
    /// A participant connected
    Join { subject: EntityId },
    /// Re-read the policy
    Reload,
}

impl AdapterEvent {
    /// Stable name of the event type, for metrics and logs.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Presence { .. } => "presence",
            Self::Leave { .. } => "leave",
            Self::Damage { .. } => "damage",
            Self::AbilityUse { .. } => "ability_use",
            Self::ProjectileLand { .. } => "projectile_land",
            Self::FlightToggle { .. } => "flight_toggle",
            Self::Command { .. } => "command",
            Self::ItemUse { .. } => "item_use",
            Self::Disconnect { .. } => "disconnect",
            Self::Death { .. } => "death",
            Self::Join { .. } => "join",
            Self::Reload => "reload",
        }
    }
}

/// Why an action was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The victim is already fighting someone else
    ThirdParty,
    /// The attacker is already fighting someone else
    AttackerLocked,
    /// The ability is banned in this zone
    AbilityBanned,
    /// The ability is cooling down
    AbilityCooldown,
    /// Flight is disabled during combat
    FlightDisabled,
    /// The command is not allowed during combat
    CommandBlocked,
    /// The item is not allowed during combat
    ItemBlocked,
}

impl RejectReason {
    /// Stable label for metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ThirdParty => "third_party",
            Self::AttackerLocked => "attacker_locked",
            Self::AbilityBanned => "ability_banned",
            Self::AbilityCooldown => "ability_cooldown",
            Self::FlightDisabled => "flight_disabled",
            Self::CommandBlocked => "command_blocked",
            Self::ItemBlocked => "item_blocked",
        }
    }
}

/// What the host should do about an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Outcome {
    /// Let it happen
    Allowed,
    /// Cancel the action
    Cancelled { reason: RejectReason },
    /// The participant logged out during combat and forfeits
    Punish {
        subject: EntityId,
        #[serde(default)]
        opponent: Option<EntityId>,
    },
    /// A participant died; credit `killer` if there is one
    KillCredit {
        victim: EntityId,
        #[serde(default)]
        killer: Option<EntityId>,
    },
}
