//! Outgoing notifications.
//!
//! The engine never renders text. It hands a [`MessageKey`] and a parameter
//! map to a [`Notifier`] through the [`Throttle`], and the host turns that
//! into whatever its participants actually see.

pub mod sink;
pub mod throttle;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::ability::AbilityKind;
use crate::entity::EntityId;
use crate::error::NotifyError;

pub use sink::{JsonlSink, Notification, OutputRecord, RecordingNotifier};
pub use throttle::Throttle;

/// Named placeholders passed alongside a message key.
pub type Params = BTreeMap<&'static str, String>;

/// Stable identifier of a message the host knows how to render.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageKey {
    CombatExpired,
    CombatCountdown,
    CombatPearlCountdown,
    CombatTridentCountdown,
    CombatPearlTridentCountdown,
    PearlOnlyCountdown,
    TridentOnlyCountdown,
    PearlTridentCountdown,
    CombatFlyDisabled,
    ThirdPartyDamageBlocked,
    CombatLockedCannotAttackOthers,
    /// Ability refused because its cooldown is running
    Cooldown(AbilityKind),
    /// Ability refused because the zone bans it
    Banned(AbilityKind),
    /// Cooldown lapsed and the ability is usable again
    Ready(AbilityKind),
    CommandBlockedInCombat,
    ItemUseBlockedInCombat,
    PlayerDiedCombatLogout,
}

impl MessageKey {
    /// The wire name of this key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CombatExpired => "combat_expired",
            Self::CombatCountdown => "combat_countdown",
            Self::CombatPearlCountdown => "combat_pearl_countdown",
            Self::CombatTridentCountdown => "combat_trident_countdown",
            Self::CombatPearlTridentCountdown => "combat_pearl_trident_countdown",
            Self::PearlOnlyCountdown => "pearl_only_countdown",
            Self::TridentOnlyCountdown => "trident_only_countdown",
            Self::PearlTridentCountdown => "pearl_trident_countdown",
            Self::CombatFlyDisabled => "combat_fly_disabled",
            Self::ThirdPartyDamageBlocked => "third_party_damage_blocked",
            Self::CombatLockedCannotAttackOthers => "combat_locked_cannot_attack_others",
            Self::Cooldown(AbilityKind::Pearl) => "pearl_cooldown",
            Self::Cooldown(AbilityKind::Trident) => "trident_cooldown",
            Self::Banned(AbilityKind::Pearl) => "pearl_banned",
            Self::Banned(AbilityKind::Trident) => "trident_banned",
            Self::Ready(AbilityKind::Pearl) => "pearl_ready",
            Self::Ready(AbilityKind::Trident) => "trident_ready",
            Self::CommandBlockedInCombat => "command_blocked_in_combat",
            Self::ItemUseBlockedInCombat => "item_use_blocked_in_combat",
            Self::PlayerDiedCombatLogout => "player_died_combat_logout",
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Delivers rendered-by-host messages to participants.
///
/// Implementations must not block for long; the engine calls this outside
/// any ledger lock but still on the caller's thread.
pub trait Notifier: Send + Sync {
    /// Sends one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message could not be delivered. The throttle
    /// logs it and moves on.
    fn notify(&self, recipient: EntityId, key: MessageKey, params: &Params)
    -> Result<(), NotifyError>;
}

/// Builds a [`Params`] map from `(name, value)` pairs.
#[must_use]
pub fn params<const N: usize>(pairs: [(&'static str, String); N]) -> Params {
    pairs.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ability_keys_embed_kind_name() {
        for kind in AbilityKind::ALL {
            assert_eq!(MessageKey::Cooldown(kind).as_str(), format!("{kind}_cooldown"));
            assert_eq!(MessageKey::Banned(kind).as_str(), format!("{kind}_banned"));
            assert_eq!(MessageKey::Ready(kind).as_str(), format!("{kind}_ready"));
        }
    }

    #[test]
    fn test_key_serializes_as_string() {
        let json = serde_json::to_string(&MessageKey::CombatPearlTridentCountdown).unwrap();
        assert_eq!(json, "\"combat_pearl_trident_countdown\"");
    }

    #[test]
    fn test_params_builder() {
        let p = params([("player", "alice".to_string()), ("time", "3".to_string())]);
        assert_eq!(p.get("player").map(String::as_str), Some("alice"));
        assert_eq!(p.len(), 2);
    }
}
