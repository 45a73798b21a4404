//! Metrics collection.
//!
//! Prometheus-compatible metrics recorded through the `metrics` facade.
//! Every label value comes from a closed set, so cardinality stays bounded
//! no matter how many participants pass through the engine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::ability::AbilityKind;
use crate::error::CombatlockError;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Why a tag was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UntagReason {
    /// Expiry observed on read
    Lazy,
    /// Expiry found by the reconciliation sweep
    Sweep,
    /// Explicit untag with notification
    Explicit,
    /// Explicit untag without notification
    Silent,
}

impl UntagReason {
    const fn as_label(self) -> &'static str {
        match self {
            Self::Lazy => "lazy",
            Self::Sweep => "sweep",
            Self::Explicit => "explicit",
            Self::Silent => "silent",
        }
    }
}

/// Outcome of a notification passing through the throttle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Delivered to the sink
    Sent,
    /// Held back for one throttle window
    Deferred,
    /// Superseded while deferred
    Dropped,
    /// The sink returned an error
    Failed,
}

impl NotificationOutcome {
    const fn as_label(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Deferred => "deferred",
            Self::Dropped => "dropped",
            Self::Failed => "failed",
        }
    }
}

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without
/// an HTTP endpoint.
///
/// # Errors
///
/// Returns `CombatlockError::Io` if the recorder or HTTP listener
/// cannot be installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), CombatlockError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| CombatlockError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!("combatlock_tags_total", "Combat tags applied or extended");
    describe_counter!("combatlock_untags_total", "Combat tags removed, by reason");
    describe_gauge!("combatlock_active_tags", "Participants currently tagged");
    describe_counter!(
        "combatlock_cooldowns_total",
        "Ability cooldowns started, by ability"
    );
    describe_counter!(
        "combatlock_interactions_rejected_total",
        "Interactions refused by the engine, by reason"
    );
    describe_counter!(
        "combatlock_notifications_total",
        "Notifications by throttle outcome"
    );
    describe_counter!("combatlock_reconcile_ticks_total", "Reconciliation sweeps run");
    describe_histogram!(
        "combatlock_reconcile_duration_ms",
        "Reconciliation sweep duration in milliseconds"
    );
    describe_counter!("combatlock_policy_reloads_total", "Policy reloads, by status");
    describe_counter!(
        "combatlock_events_total",
        "Adapter events handled, by event type"
    );
}

/// Records a tag being applied or extended.
pub fn record_tag() {
    counter!("combatlock_tags_total").increment(1);
}

/// Records a tag being removed.
pub fn record_untag(reason: UntagReason) {
    counter!("combatlock_untags_total", "reason" => reason.as_label()).increment(1);
}

/// Sets the number of currently tagged participants.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_tags(count: usize) {
    gauge!("combatlock_active_tags").set(count as f64);
}

/// Records a cooldown being started.
pub fn record_cooldown(kind: AbilityKind) {
    counter!("combatlock_cooldowns_total", "ability" => kind.as_str()).increment(1);
}

/// Records an interaction the engine refused.
///
/// `reason` must be a static label (e.g. `"third_party"`).
pub fn record_rejection(reason: &'static str) {
    counter!("combatlock_interactions_rejected_total", "reason" => reason).increment(1);
}

/// Records a notification outcome.
pub fn record_notification(outcome: NotificationOutcome) {
    counter!("combatlock_notifications_total", "outcome" => outcome.as_label()).increment(1);
}

/// Records one reconciliation sweep.
pub fn record_reconcile(duration: Duration) {
    counter!("combatlock_reconcile_ticks_total").increment(1);
    histogram!("combatlock_reconcile_duration_ms").record(duration.as_secs_f64() * 1000.0);
}

/// Records a policy reload attempt.
pub fn record_reload(success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("combatlock_policy_reloads_total", "status" => status).increment(1);
}

/// Records an adapter event by its type name.
pub fn record_event(event_type: &'static str) {
    counter!("combatlock_events_total", "type" => event_type).increment(1);
}
