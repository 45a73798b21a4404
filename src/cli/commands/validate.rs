//! `validate` command.

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::error::CombatlockError;
use crate::policy::PolicyLoader;

/// Validate policy files without starting the engine.
///
/// Stops at the first file that fails.
///
/// # Errors
///
/// Returns a config error if a file is missing, does not parse, or fails
/// validation (including warnings under `--strict`).
pub fn run(args: &ValidateArgs) -> Result<(), CombatlockError> {
    let loader = PolicyLoader::new().strict(args.strict);

    for path in &args.files {
        tracing::info!(file = %path.display(), "validating policy");
        let result = loader.load(path)?;

        for warning in &result.warnings {
            tracing::warn!(
                location = warning.location.as_deref().unwrap_or("<unknown>"),
                "{}",
                warning.message
            );
        }

        match args.format {
            OutputFormat::Human => {
                println!(
                    "{}: ok ({} warning{})",
                    path.display(),
                    result.warnings.len(),
                    if result.warnings.len() == 1 { "" } else { "s" }
                );
            }
            OutputFormat::Json => {
                let warnings: Vec<&str> =
                    result.warnings.iter().map(|w| w.message.as_str()).collect();
                println!(
                    "{}",
                    serde_json::json!({
                        "file": path.display().to_string(),
                        "valid": true,
                        "warnings": warnings,
                    })
                );
            }
        }
    }

    Ok(())
}
