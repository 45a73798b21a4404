//! Inbound event transport.
//!
//! Hosts feed [`AdapterEvent`](crate::adapter::AdapterEvent)s as
//! newline-delimited JSON. The [`EventReader`] handles framing, the line size
//! cap, and decoding; outbound records go through
//! [`JsonlSink`](crate::notify::JsonlSink).

pub mod stdio;

pub use stdio::{EventReader, Inbound, ReaderConfig};

use crate::error::TransportError;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Default maximum line size in bytes (1 MB).
pub const DEFAULT_MAX_LINE_SIZE: usize = 1024 * 1024;

/// Default read buffer size (64 KB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
