//! Per-recipient, per-key notification throttle.
//!
//! A message repeated to the same recipient inside the throttle window is
//! not sent immediately. It is re-checked once after one full window and
//! delivered only if nothing else with the same key went out meanwhile.
//! Cancelling the throttle's token drops every pending deferral.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::clock::Clock;
use crate::entity::EntityId;
use crate::observability::metrics::{NotificationOutcome, record_notification};

use super::{MessageKey, Notifier, Params};

/// Deduplicating front for a [`Notifier`].
pub struct Throttle {
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    window_ms: AtomicI64,
    last_sent: DashMap<(EntityId, MessageKey), i64>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("window_ms", &self.window_ms.load(Ordering::Relaxed))
            .field("tracked", &self.last_sent.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

enum Decision {
    Send,
    Defer,
}

impl Throttle {
    /// Creates a throttle with a window of `window_ms` milliseconds.
    ///
    /// Deferred messages still pending when `cancel` fires are dropped.
    #[must_use]
    pub fn new(
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        window_ms: i64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            notifier,
            clock,
            window_ms: AtomicI64::new(window_ms),
            last_sent: DashMap::new(),
            cancel,
        }
    }

    /// Changes the window; in-flight deferrals keep the window they started with.
    pub fn set_window(&self, window_ms: i64) {
        self.window_ms.store(window_ms, Ordering::Relaxed);
    }

    /// Current window in milliseconds.
    #[must_use]
    pub fn window_ms(&self) -> i64 {
        self.window_ms.load(Ordering::Relaxed)
    }

    /// Sends `key` to `recipient`, or defers it if the same key went out
    /// less than one window ago.
    ///
    /// Deferral needs a tokio runtime; without one the message is dropped.
    pub fn send(self: &Arc<Self>, recipient: EntityId, key: MessageKey, params: Params) {
        let now = self.clock.now_millis();
        match self.claim(recipient, key, now) {
            Decision::Send => self.deliver(recipient, key, &params),
            Decision::Defer => self.defer(recipient, key, params),
        }
    }

    /// Drops all throttle state for `recipient`.
    pub fn forget(&self, recipient: EntityId) {
        self.last_sent.retain(|(id, _), _| *id != recipient);
    }

    /// Drops all throttle state.
    pub fn clear(&self) {
        self.last_sent.clear();
    }

    /// Number of tracked `(recipient, key)` pairs.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.last_sent.len()
    }

    /// Records `now` as the send time if the window has passed.
    ///
    /// The check and the write happen under one entry lock, so two racing
    /// senders cannot both claim the same slot.
    fn claim(&self, recipient: EntityId, key: MessageKey, now: i64) -> Decision {
        let window = self.window_ms();
        let mut entry = self.last_sent.entry((recipient, key)).or_insert(i64::MIN);
        if *entry == i64::MIN || now.saturating_sub(*entry) >= window {
            *entry = now;
            Decision::Send
        } else {
            Decision::Defer
        }
    }

    fn defer(self: &Arc<Self>, recipient: EntityId, key: MessageKey, params: Params) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            trace!(%recipient, %key, "no runtime, dropping throttled notification");
            record_notification(NotificationOutcome::Dropped);
            return;
        };
        if self.cancel.is_cancelled() {
            record_notification(NotificationOutcome::Dropped);
            return;
        }

        record_notification(NotificationOutcome::Deferred);
        let throttle = Arc::clone(self);
        let wait = Duration::from_millis(u64::try_from(self.window_ms()).unwrap_or(0));
        handle.spawn(async move {
            tokio::select! {
                biased;
                () = throttle.cancel.cancelled() => {
                    trace!(%recipient, %key, "throttle cancelled, dropping deferred notification");
                    record_notification(NotificationOutcome::Dropped);
                    return;
                }
                () = tokio::time::sleep(wait) => {}
            }
            let now = throttle.clock.now_millis();
            match throttle.claim(recipient, key, now) {
                Decision::Send => throttle.deliver(recipient, key, &params),
                Decision::Defer => {
                    trace!(%recipient, %key, "superseded while deferred");
                    record_notification(NotificationOutcome::Dropped);
                }
            }
        });
    }

    fn deliver(&self, recipient: EntityId, key: MessageKey, params: &Params) {
        match self.notifier.notify(recipient, key, params) {
            Ok(()) => record_notification(NotificationOutcome::Sent),
            Err(e) => {
                warn!(%recipient, %key, error = %e, "notification failed");
                record_notification(NotificationOutcome::Failed);
            }
        }
    }
}
