//! Policy validation
//!
//! Runs on the fully deserialized [`PolicyConfig`]. Collects every issue
//! rather than stopping at the first, so an operator sees all problems in
//! one pass.

use std::time::Duration;

use crate::ability::AbilityKind;
use crate::error::{Severity, ValidationIssue};

use super::schema::{CommandBlockMode, PolicyConfig};

/// Top-level keys understood by the schema, used for typo suggestions.
const KNOWN_SECTIONS: [&str; 5] = ["combat", "abilities", "zones", "notifications", "reconcile"];

/// Longest reconcile interval accepted; countdowns would be useless beyond it.
const MAX_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Result of policy validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Issues that prevent loading.
    pub errors: Vec<ValidationIssue>,

    /// Informational issues.
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Policy validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a policy and returns every issue found.
    pub fn validate(&mut self, config: &PolicyConfig) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_unknown_sections(config);
        self.validate_combat(config);
        for kind in AbilityKind::ALL {
            self.validate_ability(config, kind);
        }
        self.validate_timing(config);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    fn validate_unknown_sections(&mut self, config: &PolicyConfig) {
        for key in config.unknown.keys() {
            let message = suggest_section(key).map_or_else(
                || format!("Unknown section '{key}' is ignored"),
                |s| format!("Unknown section '{key}' is ignored (did you mean '{s}'?)"),
            );
            self.add_warning(key, &message);
        }
    }

    fn validate_combat(&mut self, config: &PolicyConfig) {
        let combat = &config.combat;

        if combat.duration.is_zero() {
            self.add_error("combat.duration", "Combat duration must be greater than zero");
        } else if combat.duration < Duration::from_secs(1) {
            self.add_warning(
                "combat.duration",
                "Combat duration under one second expires before the first countdown",
            );
        }

        let (field, commands) = match combat.command_block_mode {
            CommandBlockMode::Whitelist => ("combat.allowed_commands", &combat.allowed_commands),
            CommandBlockMode::Blacklist => ("combat.blocked_commands", &combat.blocked_commands),
        };
        for (i, cmd) in commands.iter().enumerate() {
            let trimmed = cmd.trim().trim_start_matches('/');
            if trimmed.is_empty() || trimmed == "*" {
                self.add_error(
                    &format!("{field}[{i}]"),
                    "Command pattern must name a command or a prefix",
                );
            }
        }
        if combat.command_block_mode == CommandBlockMode::Whitelist
            && combat.allowed_commands.is_empty()
        {
            self.add_warning(
                "combat.allowed_commands",
                "Whitelist mode with no allowed commands blocks every command in combat",
            );
        }

        if combat.item_restrictions.enabled {
            for (i, item) in combat.item_restrictions.disabled_items.iter().enumerate() {
                if item.trim().is_empty() {
                    self.add_error(
                        &format!("combat.item_restrictions.disabled_items[{i}]"),
                        "Item identifier cannot be empty",
                    );
                }
            }
        }
    }

    fn validate_ability(&mut self, config: &PolicyConfig, kind: AbilityKind) {
        let ability = config.abilities.get(kind);
        let base = format!("abilities.{kind}");

        if ability.enabled && ability.duration.is_zero() {
            self.add_error(
                &format!("{base}.duration"),
                "Cooldown duration must be greater than zero when enabled",
            );
        }

        for zone in ability.zones.keys().chain(ability.banned_zones.keys()) {
            if config.zones.blacklisted.contains(zone) {
                self.add_warning(
                    &format!("{base}.zones.{zone}"),
                    "Zone is blacklisted; this override never applies",
                );
            }
        }
    }

    fn validate_timing(&mut self, config: &PolicyConfig) {
        let interval = config.reconcile.interval;
        if interval.is_zero() {
            self.add_error("reconcile.interval", "Reconcile interval must be greater than zero");
        } else if interval > MAX_RECONCILE_INTERVAL {
            self.add_error("reconcile.interval", "Reconcile interval must be at most 60s");
        }

        if config.notifications.throttle > config.combat.duration {
            self.add_warning(
                "notifications.throttle",
                "Throttle window is longer than the combat duration",
            );
        }
    }

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

/// Suggests a known section for a mistyped key.
///
/// Returns the closest match if its Damerau-Levenshtein distance is at most 3.
#[must_use]
pub fn suggest_section(input: &str) -> Option<&'static str> {
    KNOWN_SECTIONS
        .iter()
        .map(|s| (*s, strsim::damerau_levenshtein(input, s)))
        .filter(|(_, dist)| *dist <= 3)
        .min_by_key(|(_, dist)| *dist)
        .map(|(name, _)| name)
}
