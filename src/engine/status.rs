//! Periodic countdown status.
//!
//! Each reconciliation tick reduces a subject's three timers to exactly one
//! [`CountdownStatus`], or to nothing when none is running.

use crate::notify::{MessageKey, Params};

/// Which timers are running for a subject, with seconds left on each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStatus {
    Combat { combat: u64 },
    CombatPearl { combat: u64, pearl: u64 },
    CombatTrident { combat: u64, trident: u64 },
    CombatPearlTrident { combat: u64, pearl: u64, trident: u64 },
    PearlOnly { pearl: u64 },
    TridentOnly { trident: u64 },
    PearlTrident { pearl: u64, trident: u64 },
}

impl CountdownStatus {
    /// Picks the variant for the running timers (`Some` = running).
    ///
    /// A lone timer showing zero seconds yields no status.
    #[must_use]
    pub const fn resolve(
        combat: Option<u64>,
        pearl: Option<u64>,
        trident: Option<u64>,
    ) -> Option<Self> {
        match (combat, pearl, trident) {
            (Some(combat), Some(pearl), Some(trident)) => Some(Self::CombatPearlTrident {
                combat,
                pearl,
                trident,
            }),
            (Some(combat), Some(pearl), None) => Some(Self::CombatPearl { combat, pearl }),
            (Some(combat), None, Some(trident)) => Some(Self::CombatTrident { combat, trident }),
            (Some(combat), None, None) if combat > 0 => Some(Self::Combat { combat }),
            (None, Some(pearl), Some(trident)) => Some(Self::PearlTrident { pearl, trident }),
            (None, Some(pearl), None) if pearl > 0 => Some(Self::PearlOnly { pearl }),
            (None, None, Some(trident)) if trident > 0 => Some(Self::TridentOnly { trident }),
            _ => None,
        }
    }

    /// Message key for this variant.
    #[must_use]
    pub const fn key(&self) -> MessageKey {
        match self {
            Self::Combat { .. } => MessageKey::CombatCountdown,
            Self::CombatPearl { .. } => MessageKey::CombatPearlCountdown,
            Self::CombatTrident { .. } => MessageKey::CombatTridentCountdown,
            Self::CombatPearlTrident { .. } => MessageKey::CombatPearlTridentCountdown,
            Self::PearlOnly { .. } => MessageKey::PearlOnlyCountdown,
            Self::TridentOnly { .. } => MessageKey::TridentOnlyCountdown,
            Self::PearlTrident { .. } => MessageKey::PearlTridentCountdown,
        }
    }

    /// Placeholder values; single-timer variants also carry `time`.
    #[must_use]
    pub fn params(&self, player: &str) -> Params {
        let mut params = Params::new();
        params.insert("player", player.to_string());
        match *self {
            Self::Combat { combat } => {
                params.insert("combat_time", combat.to_string());
                params.insert("time", combat.to_string());
            }
            Self::CombatPearl { combat, pearl } => {
                params.insert("combat_time", combat.to_string());
                params.insert("pearl_time", pearl.to_string());
            }
            Self::CombatTrident { combat, trident } => {
                params.insert("combat_time", combat.to_string());
                params.insert("trident_time", trident.to_string());
            }
            Self::CombatPearlTrident {
                combat,
                pearl,
                trident,
            } => {
                params.insert("combat_time", combat.to_string());
                params.insert("pearl_time", pearl.to_string());
                params.insert("trident_time", trident.to_string());
            }
            Self::PearlOnly { pearl } => {
                params.insert("time", pearl.to_string());
            }
            Self::TridentOnly { trident } => {
                params.insert("time", trident.to_string());
            }
            Self::PearlTrident { pearl, trident } => {
                params.insert("pearl_time", pearl.to_string());
                params.insert("trident_time", trident.to_string());
            }
        }
        params
    }
}

/// Whole seconds left until `expires_at`, rounded up; 0 once reached.
#[must_use]
pub const fn ceil_seconds(expires_at: i64, now: i64) -> u64 {
    let diff = expires_at.saturating_sub(now);
    if diff <= 0 {
        0
    } else {
        diff.unsigned_abs().div_ceil(1000)
    }
}
