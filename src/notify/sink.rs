//! Notification sinks.
//!
//! [`JsonlSink`] serializes every notification and router outcome as one
//! JSON line with a monotonically increasing sequence number.
//! [`RecordingNotifier`] keeps everything in memory for assertions.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::adapter::Outcome;
use crate::entity::EntityId;
use crate::error::NotifyError;

use super::{MessageKey, Notifier, Params};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A delivered notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Who the message is for
    pub recipient: EntityId,
    /// What to render
    pub key: MessageKey,
    /// Placeholder values
    pub params: Params,
}

/// One line of the output stream, tagged with `"type"`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputRecord {
    /// The engine is running.
    Started {
        /// When the engine started
        timestamp: DateTime<Utc>,
        /// Crate version
        version: &'static str,
    },

    /// A message for a participant.
    Notification {
        /// When the message was delivered
        timestamp: DateTime<Utc>,
        /// The message
        #[serde(flatten)]
        notification: Notification,
    },

    /// The router's verdict on one input event.
    Outcome {
        /// When the event was handled
        timestamp: DateTime<Utc>,
        /// One-based line number of the input event
        line: u64,
        /// Verdict
        outcome: Outcome,
    },

    /// An input line could not be handled.
    Error {
        /// When the error happened
        timestamp: DateTime<Utc>,
        /// One-based line number of the input event
        line: u64,
        /// Human-readable error
        message: String,
    },

    /// The engine has stopped.
    Stopped {
        /// When the engine stopped
        timestamp: DateTime<Utc>,
        /// Why it stopped
        reason: String,
    },
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    sequence: u64,
    #[serde(flatten)]
    record: &'a OutputRecord,
}

// ---------------------------------------------------------------------------
// JSONL sink
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL writer.
///
/// Each record is written and flushed as a single line while holding the
/// writer lock, so lines from concurrent producers never interleave.
pub struct JsonlSink {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for JsonlSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlSink")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl JsonlSink {
    /// Creates a sink writing to `writer`.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates a sink writing to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Creates a sink writing to a newly created file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Number of records written so far.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Writes one record, returning any serialization or I/O failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or written.
    pub fn write(&self, record: &OutputRecord) -> Result<(), NotifyError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| NotifyError::SinkFailed("writer lock poisoned".to_string()))?;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let line = serde_json::to_string(&Envelope { sequence, record })?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }

    /// Writes one record, dropping failures.
    pub fn emit(&self, record: &OutputRecord) {
        if let Err(e) = self.write(record) {
            tracing::debug!(error = %e, "dropped output record");
        }
    }
}

impl Notifier for JsonlSink {
    fn notify(
        &self,
        recipient: EntityId,
        key: MessageKey,
        params: &Params,
    ) -> Result<(), NotifyError> {
        self.write(&OutputRecord::Notification {
            timestamp: Utc::now(),
            notification: Notification {
                recipient,
                key,
                params: params.clone(),
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Recording notifier
// ---------------------------------------------------------------------------

/// In-memory [`Notifier`] that records everything it is given.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `notify` call fail without recording.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything recorded so far, in delivery order.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Keys delivered to `recipient`, in delivery order.
    #[must_use]
    pub fn keys_for(&self, recipient: EntityId) -> Vec<MessageKey> {
        self.sent()
            .into_iter()
            .filter(|n| n.recipient == recipient)
            .map(|n| n.key)
            .collect()
    }

    /// How many times `key` was delivered to `recipient`.
    #[must_use]
    pub fn count(&self, recipient: EntityId, key: MessageKey) -> usize {
        self.keys_for(recipient).iter().filter(|k| **k == key).count()
    }

    /// The most recent notification for `recipient`, if any.
    #[must_use]
    pub fn last_for(&self, recipient: EntityId) -> Option<Notification> {
        self.sent().into_iter().rev().find(|n| n.recipient == recipient)
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(
        &self,
        recipient: EntityId,
        key: MessageKey,
        params: &Params,
    ) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Unavailable(recipient.to_string()));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| NotifyError::SinkFailed("recorder lock poisoned".to_string()))?;
        sent.push(Notification {
            recipient,
            key,
            params: params.clone(),
        });
        Ok(())
    }
}
