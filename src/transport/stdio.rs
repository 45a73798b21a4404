//! Line-delimited JSON event reader.

use std::str::FromStr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use super::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_LINE_SIZE, Result};
use crate::adapter::AdapterEvent;
use crate::error::TransportError;

/// Reader limits.
///
/// | Variable | Default |
/// |----------|---------|
/// | `COMBATLOCK_MAX_LINE_SIZE` | 1 MB |
/// | `COMBATLOCK_BUFFER_SIZE` | 64 KB |
#[derive(Debug, Clone, Copy)]
pub struct ReaderConfig {
    /// Maximum accepted line length in bytes, newline excluded.
    pub max_line_size: usize,
    /// Read buffer size in bytes.
    pub buffer_size: usize,
}

impl ReaderConfig {
    /// Loads limits from environment variables with defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_line_size: env_or("COMBATLOCK_MAX_LINE_SIZE", DEFAULT_MAX_LINE_SIZE),
            buffer_size: env_or("COMBATLOCK_BUFFER_SIZE", DEFAULT_BUFFER_SIZE),
        }
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_line_size: DEFAULT_MAX_LINE_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// One non-empty input line.
#[derive(Debug)]
pub enum Inbound {
    /// A decoded event
    Event {
        /// 1-based input line number
        line: u64,
        /// The event
        event: AdapterEvent,
    },
    /// A line that could not be used; reading continues after it
    Rejected {
        /// 1-based input line number
        line: u64,
        /// Why the line was skipped
        error: TransportError,
    },
}

/// Reads [`AdapterEvent`]s from newline-delimited JSON.
///
/// - A last line without `\n` is still read.
/// - Blank lines are skipped but counted.
/// - Lines over the size cap are drained without being buffered and come
///   back as [`Inbound::Rejected`], as do undecodable lines.
pub struct EventReader<R> {
    reader: R,
    config: ReaderConfig,
    line: u64,
}

impl EventReader<BufReader<tokio::io::Stdin>> {
    /// Reads from the process's stdin with limits from the environment.
    #[must_use]
    pub fn stdin() -> Self {
        let config = ReaderConfig::from_env();
        Self::with_config(
            BufReader::with_capacity(config.buffer_size, tokio::io::stdin()),
            config,
        )
    }
}

impl<R: AsyncBufRead + Unpin> EventReader<R> {
    /// Wraps `reader` with default limits.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self::with_config(reader, ReaderConfig::default())
    }

    /// Wraps `reader` with explicit limits.
    #[must_use]
    pub const fn with_config(reader: R, config: ReaderConfig) -> Self {
        Self {
            reader,
            config,
            line: 0,
        }
    }

    /// Number of lines consumed so far.
    #[must_use]
    pub const fn lines_read(&self) -> u64 {
        self.line
    }

    /// Reads the next non-empty line.
    ///
    /// Returns `Ok(None)` at end of input.
    ///
    /// # Errors
    ///
    /// Returns an error only when the underlying reader fails.
    pub async fn next(&mut self) -> Result<Option<Inbound>> {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            buf.clear();
            let Some(size) = self.read_bounded_line(&mut buf).await? else {
                return Ok(None);
            };
            self.line += 1;
            let line = self.line;

            if size > self.config.max_line_size {
                tracing::warn!(line, size, limit = self.config.max_line_size, "line too large, skipping");
                return Ok(Some(Inbound::Rejected {
                    line,
                    error: TransportError::LineTooLarge {
                        size,
                        limit: self.config.max_line_size,
                    },
                }));
            }

            let text = match std::str::from_utf8(&buf) {
                Ok(s) => s.trim(),
                Err(e) => {
                    return Ok(Some(Inbound::Rejected {
                        line,
                        error: TransportError::Malformed(format!("invalid UTF-8: {e}")),
                    }));
                }
            };
            if text.is_empty() {
                continue;
            }

            return Ok(Some(match serde_json::from_str::<AdapterEvent>(text) {
                Ok(event) => Inbound::Event { line, event },
                Err(e) => {
                    tracing::warn!(
                        line,
                        error = %e,
                        input = %sanitize_for_log(text, 200),
                        "undecodable event, skipping"
                    );
                    Inbound::Rejected {
                        line,
                        error: TransportError::Malformed(e.to_string()),
                    }
                }
            }));
        }
    }

    /// Reads one line into `buf`, copying at most `max_line_size + 1` bytes.
    /// Returns the full line length, or `None` at end of input.
    async fn read_bounded_line(&mut self, buf: &mut Vec<u8>) -> Result<Option<usize>> {
        let cap = self.config.max_line_size.saturating_add(1);
        let mut size = 0usize;
        let mut saw_any = false;

        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(saw_any.then_some(size));
            }
            saw_any = true;

            let (chunk, consumed, done) = match available.iter().position(|&b| b == b'\n') {
                Some(pos) => (&available[..pos], pos + 1, true),
                None => (available, available.len(), false),
            };
            let room = cap.saturating_sub(buf.len());
            buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
            size = size.saturating_add(chunk.len());
            self.reader.consume(consumed);

            if done {
                return Ok(Some(size));
            }
        }
    }
}

impl<R> std::fmt::Debug for EventReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReader")
            .field("config", &self.config)
            .field("line", &self.line)
            .finish_non_exhaustive()
    }
}

/// Truncates and strips control characters from untrusted input before logging.
fn sanitize_for_log(input: &str, max_len: usize) -> String {
    input
        .chars()
        .take(max_len)
        .map(|c| {
            if c.is_control() && c != '\t' {
                '\u{FFFD}'
            } else {
                c
            }
        })
        .collect()
}

/// Reads an environment variable, parsing it to type `T`, or returns the default.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(name, value = %v, "invalid env var value, using default");
            default
        }),
        Err(_) => default,
    }
}
