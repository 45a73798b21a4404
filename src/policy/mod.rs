//! Policy configuration: schema, loading, validation and the live snapshot.
//!
//! A policy is loaded from YAML, validated in full, and published to the
//! engine as an immutable [`PolicySnapshot`] behind a [`PolicyHandle`].

pub mod loader;
pub mod schema;
pub mod snapshot;
pub mod validation;

pub use loader::{
    FilePolicySource, LoadResult, LoadWarning, PolicyLoader, PolicySource, StaticPolicySource,
};
pub use schema::{
    AbilitiesPolicy, AbilityPolicy, CombatPolicy, CommandBlockMode, ItemRestrictions,
    NotificationPolicy, PolicyConfig, ReconcilePolicy, ZonePolicy,
};
pub use snapshot::{PolicyHandle, PolicySnapshot};
pub use validation::{ValidationResult, Validator};
