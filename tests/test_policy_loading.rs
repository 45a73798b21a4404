//! Policy files on disk: loading, validation, and live reload.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use combatlock::ability::AbilityKind;
use combatlock::clock::{Clock, ManualClock};
use combatlock::engine::CombatEngine;
use combatlock::entity::{Directory, EntityId, EntityRef, InMemoryDirectory};
use combatlock::error::ConfigError;
use combatlock::notify::{Notifier, RecordingNotifier};
use combatlock::policy::{FilePolicySource, PolicyLoader, PolicySource};

fn write(path: &Path, contents: &str) {
    std::fs::write(path, contents).expect("failed to write policy");
}

fn engine_over(path: &Path) -> (Arc<CombatEngine>, Arc<ManualClock>, Arc<InMemoryDirectory>) {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let directory = Arc::new(InMemoryDirectory::new());
    let engine = CombatEngine::new(
        Arc::new(FilePolicySource::new(path)) as Arc<dyn PolicySource>,
        Arc::clone(&directory) as Arc<dyn Directory>,
        Arc::new(RecordingNotifier::new()) as Arc<dyn Notifier>,
        Arc::clone(&clock) as Arc<dyn Clock>,
    )
    .expect("policy should load");
    (Arc::new(engine), clock, directory)
}

fn join(directory: &InMemoryDirectory, name: &str) -> EntityId {
    let id = EntityId::random();
    directory.upsert(EntityRef {
        id,
        name: name.to_string(),
        zone: "world".to_string(),
        online: true,
        flying: false,
        tag_exempt: false,
    });
    id
}

#[test]
fn fixture_policy_loads_cleanly() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/policy.yaml");
    let result = PolicyLoader::new().strict(true).load(&path).unwrap();
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    assert_eq!(result.config.combat.duration, Duration::from_secs(20));
    assert!(result.config.abilities.pearl.refresh_combat_on_land);
    assert_eq!(
        result.config.abilities.trident.banned_zones.get("lobby"),
        Some(&true)
    );
}

#[test]
fn env_references_resolve_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.yaml");
    write(
        &path,
        "combat:\n  duration: ${COMBATLOCK_TEST_UNSET_DURATION:-45s}\n  allowed_commands: [msg]\n",
    );

    let result = PolicyLoader::new().load(&path).unwrap();
    assert_eq!(result.config.combat.duration, Duration::from_secs(45));
}

#[test]
fn required_env_reference_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.yaml");
    write(
        &path,
        "combat:\n  duration: ${COMBATLOCK_TEST_UNSET_REQUIRED:?set the combat duration}\n",
    );

    let err = PolicyLoader::new().load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::EnvVarNotSet { .. }), "{err}");
}

#[test]
fn oversized_file_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.yaml");
    let padding = "# padding\n".repeat(200_000);
    write(&path, &format!("{padding}combat:\n  duration: 20s\n"));

    let err = PolicyLoader::new().load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "file_size"));
}

#[test]
fn reload_picks_up_edits_and_keeps_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.yaml");
    write(
        &path,
        "combat:\n  duration: 20s\n  allowed_commands: [msg]\nabilities:\n  pearl:\n    in_combat_only: false\n",
    );

    let (engine, _, directory) = engine_over(&path);
    let (p, q) = (join(&directory, "p"), join(&directory, "q"));
    engine.update_mutual_combat(p, q);
    engine.set_cooldown(p, AbilityKind::Pearl);
    assert_eq!(engine.policy().tag_duration_ms(), 20_000);

    write(
        &path,
        "combat:\n  duration: 45s\n  allowed_commands: [msg]\nabilities:\n  pearl:\n    in_combat_only: false\n",
    );
    engine.reload_policy().unwrap();

    assert_eq!(engine.policy().tag_duration_ms(), 45_000);
    assert_eq!(engine.remaining_combat_seconds(p), 20);
    assert!(engine.is_on_cooldown(p, AbilityKind::Pearl));

    engine.tag(p, q);
    assert_eq!(engine.remaining_combat_seconds(p), 45);
}

#[test]
fn failed_reload_keeps_previous_policy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.yaml");
    write(&path, "combat:\n  duration: 30s\n  allowed_commands: [msg]\n");
    let (engine, _, _) = engine_over(&path);

    write(&path, "combat:\n  duration: 0s\n");
    let err = engine.reload_policy().unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError { .. }), "{err}");
    assert_eq!(engine.policy().tag_duration_ms(), 30_000);

    std::fs::remove_file(&path).unwrap();
    let err = engine.reload_policy().unwrap_err();
    assert!(matches!(err, ConfigError::MissingFile { .. }), "{err}");
    assert_eq!(engine.policy().tag_duration_ms(), 30_000);
}

#[test]
fn zone_overrides_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.yaml");
    write(
        &path,
        r"
combat:
  allowed_commands: [msg]
abilities:
  pearl:
    in_combat_only: false
    zones:
      world: false
  trident:
    in_combat_only: false
    banned_zones:
      world: true
",
    );
    let (engine, _, directory) = engine_over(&path);
    let s = join(&directory, "s");

    engine.set_cooldown(s, AbilityKind::Pearl);
    assert!(!engine.is_on_cooldown(s, AbilityKind::Pearl));
    assert!(engine.is_ability_banned(s, AbilityKind::Trident));
    assert!(!engine.is_ability_banned(s, AbilityKind::Pearl));
}
