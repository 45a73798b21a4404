//! Command and item restriction matching.

use crate::policy::{CombatPolicy, CommandBlockMode};

/// Reduces raw chat input to the bare, lowercased command name.
///
/// `"/Home set"` becomes `"home"`.
#[must_use]
pub fn normalize_command(raw: &str) -> String {
    raw.split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_start_matches('/')
        .to_lowercase()
}

/// Whether `command` (already normalized) matches `pattern`.
///
/// A trailing `*` turns the pattern into a prefix match.
#[must_use]
pub fn command_matches(command: &str, pattern: &str) -> bool {
    let pattern = pattern.trim().trim_start_matches('/').to_lowercase();
    pattern.strip_suffix('*').map_or_else(
        || command == pattern,
        |prefix| !prefix.is_empty() && command.starts_with(prefix),
    )
}

/// Whether a tagged participant may not run `command` (already normalized).
#[must_use]
pub fn is_command_blocked(policy: &CombatPolicy, command: &str) -> bool {
    match policy.command_block_mode {
        CommandBlockMode::Blacklist => policy
            .blocked_commands
            .iter()
            .any(|p| command_matches(command, p)),
        CommandBlockMode::Whitelist => !policy
            .allowed_commands
            .iter()
            .any(|p| command_matches(command, p)),
    }
}

/// Whether `item` is on the restricted list, by exact name or substring.
#[must_use]
pub fn is_item_disabled(item: &str, disabled: &[String]) -> bool {
    let item = bare_item_id(item).to_ascii_uppercase();
    disabled.iter().any(|d| {
        let d = d.trim().to_ascii_uppercase();
        !d.is_empty() && (item == d || item.contains(&d))
    })
}

/// Human-readable item name: `minecraft:golden_apple` → `Golden Apple`.
#[must_use]
pub fn format_item_name(item: &str) -> String {
    let words: Vec<String> = bare_item_id(item)
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let lower = w.to_lowercase();
            let mut chars = lower.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect();
    if words.is_empty() {
        "Unknown Item".to_string()
    } else {
        words.join(" ")
    }
}

fn bare_item_id(item: &str) -> &str {
    item.rsplit(':').next().unwrap_or(item).trim()
}
