//! Event routing.
//!
//! The [`EventRouter`] is the single consumer of host events. It keeps the
//! small amount of adapter-side state the engine does not own: who last hit
//! whom, which projectiles belong to which participant, and who logged out
//! mid-fight.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tracing::{debug, info, warn};

use crate::ability::AbilityKind;
use crate::engine::CombatEngine;
use crate::entity::{Directory, EntityId, InMemoryDirectory};
use crate::error::CombatlockError;
use crate::notify::{MessageKey, params};
use crate::observability::metrics;

use super::rules::{format_item_name, is_command_blocked, is_item_disabled, normalize_command};
use super::{AdapterEvent, Outcome, ProjectileId, RejectReason};

/// How long a damage record can still earn kill credit.
pub const LAST_DAMAGE_TTL_MS: i64 = 5 * 60 * 1000;

/// Routes host events into the engine and decides what the host should do.
pub struct EventRouter {
    engine: Arc<CombatEngine>,
    roster: Arc<InMemoryDirectory>,
    last_damage: DashMap<EntityId, (EntityId, i64)>,
    projectiles: DashMap<ProjectileId, (EntityId, AbilityKind)>,
    logged_out: DashSet<EntityId>,
}

impl EventRouter {
    /// Creates a router over `engine`; `roster` must be the directory the
    /// engine resolves participants through.
    #[must_use]
    pub fn new(engine: Arc<CombatEngine>, roster: Arc<InMemoryDirectory>) -> Self {
        Self {
            engine,
            roster,
            last_damage: DashMap::new(),
            projectiles: DashMap::new(),
            logged_out: DashSet::new(),
        }
    }

    /// The engine this router drives.
    #[must_use]
    pub const fn engine(&self) -> &Arc<CombatEngine> {
        &self.engine
    }

    /// Applies one event.
    ///
    /// # Errors
    ///
    /// Only `reload` can fail, when the new policy cannot be read or does
    /// not validate. The previous policy stays in force.
    pub fn handle(&self, event: AdapterEvent) -> Result<Outcome, CombatlockError> {
        metrics::record_event(event.type_name());
        let outcome = match event {
            AdapterEvent::Presence { entity } => {
                self.roster.upsert(entity);
                Outcome::Allowed
            }
            AdapterEvent::Leave { subject } => {
                self.roster.remove(subject);
                self.engine.forget_recipient(subject);
                self.last_damage.remove(&subject);
                self.projectiles.retain(|_, (owner, _)| *owner != subject);
                Outcome::Allowed
            }
            AdapterEvent::Damage { victim, attacker } => self.on_damage(victim, attacker),
            AdapterEvent::AbilityUse {
                subject,
                ability,
                projectile,
            } => self.on_ability_use(subject, ability, projectile),
            AdapterEvent::ProjectileLand { projectile } => {
                self.on_projectile_land(projectile);
                Outcome::Allowed
            }
            AdapterEvent::FlightToggle { subject, flying } => self.on_flight_toggle(subject, flying),
            AdapterEvent::Command { subject, command } => self.on_command(subject, &command),
            AdapterEvent::ItemUse { subject, item } => self.on_item_use(subject, &item),
            AdapterEvent::Disconnect { subject, kicked } => self.on_disconnect(subject, kicked),
            AdapterEvent::Death { victim, killer } => self.on_death(victim, killer),
            AdapterEvent::Join { subject } => {
                self.on_join(subject);
                Outcome::Allowed
            }
            AdapterEvent::Reload => {
                self.engine.reload_policy()?;
                info!("policy reloaded");
                Outcome::Allowed
            }
        };
        if let Outcome::Cancelled { reason } = &outcome {
            metrics::record_rejection(reason.as_str());
        }
        Ok(outcome)
    }

    /// Drops all adapter-side state and shuts the engine down.
    pub fn shutdown(&self) {
        self.last_damage.clear();
        self.projectiles.clear();
        self.logged_out.clear();
        self.engine.shutdown();
    }

    /// Whether the participant is owed a combat-logout notice on next join.
    #[must_use]
    pub fn is_marked_logged_out(&self, subject: EntityId) -> bool {
        self.logged_out.contains(&subject)
    }

    /// Projectiles still waiting to land.
    #[must_use]
    pub fn pending_projectiles(&self) -> usize {
        self.projectiles.len()
    }

    // ------------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------------

    fn on_damage(&self, victim: EntityId, attacker: Option<EntityId>) -> Outcome {
        let Some(attacker) = attacker.filter(|a| *a != victim) else {
            return Outcome::Allowed;
        };

        if self.engine.is_victim_protected_from_third_party(victim, attacker) {
            self.refuse_attack(
                attacker,
                victim,
                victim,
                MessageKey::ThirdPartyDamageBlocked,
            );
            return Outcome::Cancelled {
                reason: RejectReason::ThirdParty,
            };
        }
        if self.engine.is_attacker_locked_to_other(attacker, victim) {
            self.refuse_attack(
                attacker,
                victim,
                attacker,
                MessageKey::CombatLockedCannotAttackOthers,
            );
            return Outcome::Cancelled {
                reason: RejectReason::AttackerLocked,
            };
        }

        let now = self.engine.now();
        self.last_damage.insert(victim, (attacker, now));
        self.last_damage
            .retain(|_, (_, at)| now.saturating_sub(*at) <= LAST_DAMAGE_TTL_MS);
        self.engine.update_mutual_combat(victim, attacker);
        Outcome::Allowed
    }

    /// Tells `attacker` why the hit was refused. `locked` is whichever side
    /// is already fighting someone else.
    fn refuse_attack(&self, attacker: EntityId, victim: EntityId, locked: EntityId, key: MessageKey) {
        let opponent = self
            .engine
            .get_opponent(locked)
            .map_or_else(|| "Unknown".to_string(), |o| self.engine.display_name(o));
        let time = self.engine.remaining_combat_seconds(locked);
        debug!(%attacker, %victim, %key, "attack refused");
        self.engine.notify(
            attacker,
            key,
            params([
                ("attacker", self.engine.display_name(attacker)),
                ("victim", self.engine.display_name(victim)),
                ("opponent", opponent),
                ("time", time.to_string()),
            ]),
        );
    }

    fn on_ability_use(
        &self,
        subject: EntityId,
        kind: AbilityKind,
        projectile: Option<ProjectileId>,
    ) -> Outcome {
        if self.engine.is_ability_banned(subject, kind) {
            self.engine.notify(
                subject,
                MessageKey::Banned(kind),
                params([("player", self.engine.display_name(subject))]),
            );
            return Outcome::Cancelled {
                reason: RejectReason::AbilityBanned,
            };
        }
        if self.engine.is_on_cooldown(subject, kind) {
            let time = self.engine.remaining_cooldown_seconds(subject, kind);
            self.engine.notify(
                subject,
                MessageKey::Cooldown(kind),
                params([
                    ("player", self.engine.display_name(subject)),
                    ("time", time.to_string()),
                ]),
            );
            return Outcome::Cancelled {
                reason: RejectReason::AbilityCooldown,
            };
        }

        self.engine.set_cooldown(subject, kind);
        self.engine.start_cooldown_ready(subject, kind);
        match projectile {
            Some(id) => {
                self.projectiles.insert(id, (subject, kind));
            }
            None => self.engine.refresh_combat_on_ability_land(subject, kind),
        }
        Outcome::Allowed
    }

    fn on_projectile_land(&self, projectile: ProjectileId) {
        let Some((_, (owner, kind))) = self.projectiles.remove(&projectile) else {
            return;
        };
        if self.roster.is_online(owner) {
            self.engine.refresh_combat_on_ability_land(owner, kind);
        }
    }

    fn on_flight_toggle(&self, subject: EntityId, flying: bool) -> Outcome {
        if flying && self.engine.should_suppress_flight(subject) {
            return Outcome::Cancelled {
                reason: RejectReason::FlightDisabled,
            };
        }
        self.roster.set_flying(subject, flying);
        Outcome::Allowed
    }

    fn on_command(&self, subject: EntityId, raw: &str) -> Outcome {
        if !self.engine.is_in_combat(subject) {
            return Outcome::Allowed;
        }
        let command = normalize_command(raw);
        if command.is_empty() || !is_command_blocked(&self.engine.policy().config().combat, &command)
        {
            return Outcome::Allowed;
        }
        let time = self.engine.remaining_combat_seconds(subject);
        self.engine.notify(
            subject,
            MessageKey::CommandBlockedInCombat,
            params([
                ("player", self.engine.display_name(subject)),
                ("command", command),
                ("time", time.to_string()),
            ]),
        );
        Outcome::Cancelled {
            reason: RejectReason::CommandBlocked,
        }
    }

    fn on_item_use(&self, subject: EntityId, item: &str) -> Outcome {
        let policy = self.engine.policy();
        let restrictions = &policy.config().combat.item_restrictions;
        if !restrictions.enabled
            || !self.engine.is_in_combat(subject)
            || !is_item_disabled(item, &restrictions.disabled_items)
        {
            return Outcome::Allowed;
        }
        self.engine.notify(
            subject,
            MessageKey::ItemUseBlockedInCombat,
            params([
                ("player", self.engine.display_name(subject)),
                ("item", format_item_name(item)),
            ]),
        );
        Outcome::Cancelled {
            reason: RejectReason::ItemBlocked,
        }
    }

    fn on_disconnect(&self, subject: EntityId, kicked: bool) -> Outcome {
        self.engine.forget_recipient(subject);

        let outcome = if self.engine.is_in_combat(subject) {
            let opponent = self.engine.get_opponent(subject);
            let excused = kicked && self.engine.policy().config().combat.exempt_admin_kick;
            self.engine.untag_silently(subject);
            if let Some(opponent) = opponent {
                self.engine.untag(opponent);
            }
            if excused {
                debug!(%subject, "kicked during combat, not punished");
                Outcome::Allowed
            } else {
                warn!(%subject, ?opponent, "combat logout");
                self.logged_out.insert(subject);
                Outcome::Punish { subject, opponent }
            }
        } else {
            Outcome::Allowed
        };

        self.roster.set_offline(subject);
        outcome
    }

    fn on_death(&self, victim: EntityId, killer: Option<EntityId>) -> Outcome {
        let now = self.engine.now();
        let last = self.last_damage.remove(&victim).map(|(_, v)| v);

        if let Some(killer) = killer.filter(|k| *k != victim) {
            self.engine.untag(victim);
            self.engine.untag(killer);
            return Outcome::KillCredit {
                victim,
                killer: Some(killer),
            };
        }

        if !self.engine.is_in_combat(victim) {
            return Outcome::KillCredit {
                victim,
                killer: None,
            };
        }

        let opponent = self.engine.get_opponent(victim);
        let credited = opponent
            .filter(|o| self.roster.is_online(*o))
            .or_else(|| {
                last.filter(|(attacker, at)| {
                    *attacker != victim
                        && now.saturating_sub(*at) <= LAST_DAMAGE_TTL_MS
                        && self.roster.is_online(*attacker)
                })
                .map(|(attacker, _)| attacker)
            });

        self.engine.untag(victim);
        if let Some(opponent) = opponent {
            self.engine.untag(opponent);
        }
        Outcome::KillCredit {
            victim,
            killer: credited,
        }
    }

    fn on_join(&self, subject: EntityId) {
        self.roster.set_online(subject);
        self.last_damage.remove(&subject);
        if self.logged_out.remove(&subject).is_some() {
            self.engine.notify(
                subject,
                MessageKey::PlayerDiedCombatLogout,
                params([("player", self.engine.display_name(subject))]),
            );
        }
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("engine", &self.engine)
            .field("last_damage", &self.last_damage.len())
            .field("projectiles", &self.projectiles.len())
            .field("logged_out", &self.logged_out.len())
            .finish_non_exhaustive()
    }
}
