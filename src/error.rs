//! Error types for `combatlock`
//!
//! Engine operations never fail: invalid input and missing state are
//! silent no-ops. Errors only surface from the edges of the system:
//! policy loading and reload, notification sinks, and the stdio transport.

use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `combatlock` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Configuration error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Transport error (malformed input stream, oversized line)
    pub const TRANSPORT_ERROR: i32 = 4;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `combatlock` operations.
#[derive(Debug, Error)]
pub enum CombatlockError {
    /// Policy loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Transport layer error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CombatlockError {
    /// Returns the process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => ExitCode::CONFIG_ERROR,
            Self::Transport(_) => ExitCode::TRANSPORT_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Policy loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the policy file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Policy validation failed
    #[error("validation failed for {path}: {}", format_issues(.errors))]
    ValidationError {
        /// Path to the policy file (or `<inline>`)
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Policy file not found or unreadable
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced in the policy file is not set
    #[error("environment variable '{var}' not set ({message})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Message supplied with the `${VAR:?message}` form
        message: String,
    },
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found while checking a policy.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Dotted path to the problematic field (e.g. `abilities.pearl.duration`)
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Prevents the policy from being used
    Error,
    /// Informational, the policy still loads
    Warning,
}

// ============================================================================
// Notification Errors
// ============================================================================

/// Failures reported by a notification sink.
///
/// These never propagate into the engine; the throttle logs and drops them.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The sink could not write the notification
    #[error("notification sink failed: {0}")]
    SinkFailed(String),

    /// The recipient cannot receive messages right now
    #[error("recipient unavailable: {0}")]
    Unavailable(String),

    /// Serialization of the notification failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<std::io::Error> for NotifyError {
    fn from(err: std::io::Error) -> Self {
        Self::SinkFailed(err.to_string())
    }
}

// ============================================================================
// Transport Errors
// ============================================================================

/// Errors reading adapter events from the input stream.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error during transport operations
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Line could not be decoded as an adapter event
    #[error("malformed event: {0}")]
    Malformed(String),

    /// Line exceeds size limit
    #[error("line too large: {size} bytes (limit: {limit})")]
    LineTooLarge {
        /// Actual line size in bytes
        size: usize,
        /// Configured size limit in bytes
        limit: usize,
    },
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `combatlock` operations.
pub type Result<T> = std::result::Result<T, CombatlockError>;

// ============================================================================
// Tests
// ============================================================================
