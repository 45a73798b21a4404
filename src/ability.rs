//! Ability kinds that carry their own cooldown ledger.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A cooldown-tracked ability.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbilityKind {
    /// Thrown teleport projectile
    Pearl,
    /// Thrown or riptide-launched trident
    Trident,
}

impl AbilityKind {
    /// Every ability kind, in ledger order.
    pub const ALL: [Self; 2] = [Self::Pearl, Self::Trident];

    /// Stable lowercase name used in policy keys and message keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pearl => "pearl",
            Self::Trident => "trident",
        }
    }
}

impl fmt::Display for AbilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AbilityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pearl" => Ok(Self::Pearl),
            "trident" => Ok(Self::Trident),
            other => Err(format!("unknown ability '{other}'")),
        }
    }
}
