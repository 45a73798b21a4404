//! Policy file schema.
//!
//! These types are deserialized from YAML. Every field has a default so a
//! minimal file (or an empty mapping) yields a working policy.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ability::AbilityKind;

// ============================================================================
// Root
// ============================================================================

/// Root policy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PolicyConfig {
    /// Combat tag behavior
    pub combat: CombatPolicy,

    /// Per-ability cooldown policy
    pub abilities: AbilitiesPolicy,

    /// Zone exclusions
    pub zones: ZonePolicy,

    /// Outgoing message throttling
    pub notifications: NotificationPolicy,

    /// Reconciliation loop settings
    pub reconcile: ReconcilePolicy,

    /// Keys not recognized by this schema, reported as warnings
    #[serde(flatten, skip_serializing)]
    pub unknown: BTreeMap<String, serde_yaml::Value>,
}

// ============================================================================
// Combat
// ============================================================================

/// Combat tag behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CombatPolicy {
    /// How long a tag lasts after the latest hit
    #[serde(with = "human_duration")]
    pub duration: Duration,

    /// Force tagged participants out of flight and refuse new flight
    pub disable_flight: bool,

    /// Kicks by an operator do not count as combat logout
    pub exempt_admin_kick: bool,

    /// Whether `blocked_commands` or `allowed_commands` is authoritative
    pub command_block_mode: CommandBlockMode,

    /// Commands refused while tagged (blacklist mode). Trailing `*` matches a prefix.
    pub blocked_commands: Vec<String>,

    /// The only commands accepted while tagged (whitelist mode). Trailing `*` matches a prefix.
    pub allowed_commands: Vec<String>,

    /// Item use restrictions while tagged
    pub item_restrictions: ItemRestrictions,
}

impl Default for CombatPolicy {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(20),
            disable_flight: true,
            exempt_admin_kick: true,
            command_block_mode: CommandBlockMode::Whitelist,
            blocked_commands: Vec::new(),
            allowed_commands: Vec::new(),
            item_restrictions: ItemRestrictions::default(),
        }
    }
}

/// Command filtering mode while tagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandBlockMode {
    /// Everything not in `allowed_commands` is refused
    #[default]
    Whitelist,
    /// Only `blocked_commands` are refused
    Blacklist,
}

/// Item use restrictions while tagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ItemRestrictions {
    /// Master switch
    pub enabled: bool,

    /// Item identifiers; matched case-insensitively, exact or substring
    pub disabled_items: Vec<String>,
}

impl Default for ItemRestrictions {
    fn default() -> Self {
        Self {
            enabled: true,
            disabled_items: Vec::new(),
        }
    }
}

// ============================================================================
// Abilities
// ============================================================================

/// Cooldown policy for every ability kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct AbilitiesPolicy {
    /// Ender-pearl style teleport projectile
    pub pearl: AbilityPolicy,

    /// Trident throws and riptide launches
    pub trident: AbilityPolicy,
}

impl AbilitiesPolicy {
    /// Returns the policy for one ability kind.
    #[must_use]
    pub const fn get(&self, kind: AbilityKind) -> &AbilityPolicy {
        match kind {
            AbilityKind::Pearl => &self.pearl,
            AbilityKind::Trident => &self.trident,
        }
    }
}

/// Cooldown policy for a single ability kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct AbilityPolicy {
    /// Global switch for this cooldown
    pub enabled: bool,

    /// Cooldown length
    #[serde(with = "human_duration")]
    pub duration: Duration,

    /// Only set and enforce the cooldown while the user is tagged
    pub in_combat_only: bool,

    /// A landed projectile extends the thrower's tag
    pub refresh_combat_on_land: bool,

    /// Per-zone override; `false` disables the cooldown in that zone
    pub zones: BTreeMap<String, bool>,

    /// Per-zone ban; `true` forbids the ability in that zone
    pub banned_zones: BTreeMap<String, bool>,
}

impl Default for AbilityPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            duration: Duration::from_secs(10),
            in_combat_only: true,
            refresh_combat_on_land: false,
            zones: BTreeMap::new(),
            banned_zones: BTreeMap::new(),
        }
    }
}

// ============================================================================
// Zones / Notifications / Reconcile
// ============================================================================

/// Zone exclusions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ZonePolicy {
    /// Zones where the engine does nothing at all
    pub blacklisted: BTreeSet<String>,
}

/// Outgoing message throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct NotificationPolicy {
    /// Minimum spacing between two identical messages to one recipient
    #[serde(with = "human_duration")]
    pub throttle: Duration,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            throttle: Duration::from_secs(1),
        }
    }
}

/// Reconciliation loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ReconcilePolicy {
    /// Period between sweeps
    #[serde(with = "human_duration")]
    pub interval: Duration,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

// ============================================================================
// Duration (de)serialization
// ============================================================================

/// Human-readable durations (`20s`, `1500ms`, `1m 30s`), bare integers are seconds.
mod human_duration {
    use super::{Deserialize, Deserializer, Duration, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => {
                humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_mapping_uses_defaults() {
        let config: PolicyConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.combat.duration, Duration::from_secs(20));
        assert!(config.combat.disable_flight);
        assert_eq!(config.abilities.pearl.duration, Duration::from_secs(10));
        assert!(config.abilities.trident.in_combat_only);
        assert_eq!(config.notifications.throttle, Duration::from_secs(1));
        assert_eq!(config.reconcile.interval, Duration::from_secs(1));
        assert!(config.unknown.is_empty());
    }

    #[test]
    fn test_parse_full_policy() {
        let yaml = r"
combat:
  duration: 15s
  disable_flight: false
  command_block_mode: blacklist
  blocked_commands: [spawn, 'home*']
abilities:
  pearl:
    duration: 1500ms
    refresh_combat_on_land: true
    zones:
      arena: false
  trident:
    enabled: false
    banned_zones:
      lobby: true
zones:
  blacklisted: [creative]
";
        let config: PolicyConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.combat.duration, Duration::from_secs(15));
        assert!(!config.combat.disable_flight);
        assert_eq!(config.combat.command_block_mode, CommandBlockMode::Blacklist);
        assert_eq!(config.abilities.pearl.duration, Duration::from_millis(1500));
        assert!(config.abilities.pearl.refresh_combat_on_land);
        assert_eq!(config.abilities.pearl.zones.get("arena"), Some(&false));
        assert!(!config.abilities.trident.enabled);
        assert!(config.zones.blacklisted.contains("creative"));
    }

    #[test]
    fn test_bare_integer_duration_is_seconds() {
        let config: PolicyConfig = serde_yaml::from_str("combat:\n  duration: 30\n").unwrap();
        assert_eq!(config.combat.duration, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let result: Result<PolicyConfig, _> = serde_yaml::from_str("combat:\n  duration: soon\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_top_level_keys_captured() {
        let config: PolicyConfig = serde_yaml::from_str("combt:\n  duration: 5s\n").unwrap();
        assert!(config.unknown.contains_key("combt"));
    }

    #[test]
    fn test_abilities_get() {
        let mut abilities = AbilitiesPolicy::default();
        abilities.trident.enabled = false;
        assert!(abilities.get(AbilityKind::Pearl).enabled);
        assert!(!abilities.get(AbilityKind::Trident).enabled);
    }

    #[test]
    fn test_duration_serializes_human_readable() {
        let yaml = serde_yaml::to_string(&CombatPolicy::default()).unwrap();
        assert!(yaml.contains("duration: 20s"));
    }
}
