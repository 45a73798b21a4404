//! Policy loader
//!
//! Loading pipeline:
//! 1. Size check and raw read (UTF-8 BOM stripped)
//! 2. Environment variable expansion on the raw text
//! 3. YAML parsing and deserialization
//! 4. Validation
//! 5. Freeze with `Arc`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::ConfigError;

use super::schema::PolicyConfig;
use super::validation::Validator;

// ============================================================================
// Public API
// ============================================================================

/// Default maximum policy file size (1 MB).
pub const DEFAULT_MAX_POLICY_SIZE: usize = 1024 * 1024;

/// Result of loading a policy file.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated policy.
    pub config: Arc<PolicyConfig>,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning raised while loading a policy.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

/// Policy loader.
#[derive(Debug, Clone)]
pub struct PolicyLoader {
    max_size: usize,
    strict: bool,
}

impl Default for PolicyLoader {
    fn default() -> Self {
        Self {
            max_size: env_or("COMBATLOCK_MAX_POLICY_SIZE", DEFAULT_MAX_POLICY_SIZE),
            strict: false,
        }
    }
}

impl PolicyLoader {
    /// Creates a loader with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Treats validation warnings as errors.
    #[must_use]
    pub const fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Loads a policy file and returns the frozen configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is too large, an
    /// environment reference is unresolvable, YAML parsing fails, or
    /// validation reports errors.
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        let file_size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if file_size > self.max_size {
            return Err(ConfigError::InvalidValue {
                field: "file_size".to_string(),
                value: format!("{file_size} bytes"),
                expected: format!("at most {} bytes", self.max_size),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        self.load_str(&raw, path)
    }

    /// Loads a policy from YAML text. `origin` is used in diagnostics only.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load), minus file access.
    pub fn load_str(&self, raw: &str, origin: &Path) -> Result<LoadResult, ConfigError> {
        let mut warnings = Vec::new();
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);

        let mut env = EnvSubstitution::new(origin);
        let expanded = env.substitute(raw)?;
        warnings.extend(env.warnings);

        let value: serde_yaml::Value =
            serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;

        // An empty document means "all defaults".
        let config: PolicyConfig = if value.is_null() {
            PolicyConfig::default()
        } else {
            serde_yaml::from_value(value).map_err(|e| ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: None,
                message: format!("Failed to deserialize policy: {e}"),
            })?
        };

        let mut result = Validator::new().validate(&config);
        if self.strict {
            result.errors.append(&mut result.warnings);
        }

        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: origin.display().to_string(),
                errors: result.errors,
            });
        }

        warnings.extend(result.warnings.into_iter().map(|issue| LoadWarning {
            message: issue.message,
            location: Some(issue.path),
        }));

        Ok(LoadResult {
            config: Arc::new(config),
            warnings,
        })
    }
}

// ============================================================================
// Policy Sources
// ============================================================================

/// Supplies a fresh policy on startup and on every reload.
pub trait PolicySource: Send + Sync {
    /// Produces the current policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the policy cannot be produced; the caller keeps
    /// its previous policy in that case.
    fn policy_snapshot(&self) -> Result<PolicyConfig, ConfigError>;
}

/// Re-reads a policy file on every call.
#[derive(Debug, Clone)]
pub struct FilePolicySource {
    path: PathBuf,
    loader: PolicyLoader,
}

impl FilePolicySource {
    /// Creates a source reading `path` with default loader options.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loader: PolicyLoader::new(),
        }
    }

    /// Path this source reads from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PolicySource for FilePolicySource {
    fn policy_snapshot(&self) -> Result<PolicyConfig, ConfigError> {
        let result = self.loader.load(&self.path)?;
        for warning in &result.warnings {
            tracing::warn!(
                location = warning.location.as_deref().unwrap_or("<unknown>"),
                "{}",
                warning.message
            );
        }
        Ok(Arc::unwrap_or_clone(result.config))
    }
}

/// Always returns the same policy.
#[derive(Debug, Clone, Default)]
pub struct StaticPolicySource {
    config: PolicyConfig,
}

impl StaticPolicySource {
    /// Creates a source that always yields `config`.
    #[must_use]
    pub const fn new(config: PolicyConfig) -> Self {
        Self { config }
    }
}

impl PolicySource for StaticPolicySource {
    fn policy_snapshot(&self) -> Result<PolicyConfig, ConfigError> {
        Ok(self.config.clone())
    }
}

// ============================================================================
// Environment Variable Substitution
// ============================================================================

/// Pre-parse environment variable substitution on raw YAML text.
///
/// Supports `${VAR}`, `${VAR:-default}`, `${VAR:?message}` and `$$`.
struct EnvSubstitution<'a> {
    origin: &'a Path,
    warnings: Vec<LoadWarning>,
}

impl<'a> EnvSubstitution<'a> {
    const fn new(origin: &'a Path) -> Self {
        Self {
            origin,
            warnings: Vec::new(),
        }
    }

    fn substitute(&mut self, raw: &str) -> Result<String, ConfigError> {
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;

        while let Some(idx) = rest.find('$') {
            out.push_str(&rest[..idx]);
            let tail = &rest[idx + 1..];

            if let Some(after) = tail.strip_prefix('$') {
                out.push('$');
                rest = after;
            } else if let Some(body) = tail.strip_prefix('{') {
                let close = body.find('}').ok_or_else(|| ConfigError::ParseError {
                    path: self.origin.to_path_buf(),
                    line: None,
                    message: format!("Unclosed environment variable reference: ${{{body}"),
                })?;
                out.push_str(&self.expand(&body[..close])?);
                rest = &body[close + 1..];
            } else {
                out.push('$');
                rest = tail;
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    fn expand(&mut self, spec: &str) -> Result<String, ConfigError> {
        let (name, fallback) = match spec.split_once(':') {
            Some((name, op)) => (name, Some(op)),
            None => (spec, None),
        };

        if let Ok(value) = std::env::var(name) {
            return Ok(value);
        }

        match fallback {
            Some(op) if op.starts_with('-') => Ok(op[1..].to_string()),
            Some(op) if op.starts_with('?') => Err(ConfigError::EnvVarNotSet {
                var: name.to_string(),
                message: op[1..].to_string(),
            }),
            _ => {
                self.warnings.push(LoadWarning {
                    message: format!(
                        "Environment variable '{name}' is not set, using empty string"
                    ),
                    location: Some(self.origin.display().to_string()),
                });
                Ok(String::new())
            }
        }
    }
}

/// Reads an environment variable and parses it, falling back to `default`.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ============================================================================
// Tests
// ============================================================================
