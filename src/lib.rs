//! `combatlock` - combat-tag and ability cooldown engine
//!
//! Tracks which participants are fighting whom, enforces per-ability
//! cooldowns, and decides which interactions a multiplayer host should
//! allow while combat is running. The [`engine::CombatEngine`] is the core;
//! the [`adapter::EventRouter`] maps host events onto it.

pub mod ability;
pub mod adapter;
pub mod cli;
pub mod clock;
pub mod engine;
pub mod entity;
pub mod error;
pub mod notify;
pub mod observability;
pub mod policy;
pub mod transport;
