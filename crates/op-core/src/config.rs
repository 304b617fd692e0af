//! Environment loading and layered settings
//!
//! Environment files are read from the canonical location
//! `/etc/op-dispatch/environment` (or `$OP_DISPATCH_ENV_FILE`, or `.env`).
//! Settings are then layered: built-in defaults, an optional TOML file, and
//! `OP_DISPATCH__SECTION__KEY` environment variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use op_core::config::{load_environment, Settings};
//!
//! load_environment();
//! let settings = Settings::load(None).expect("settings");
//! assert!(settings.dispatch.max_timeout_ms >= settings.dispatch.default_timeout_ms);
//! ```

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Alternative paths to check (in order of priority)
pub const ENV_FILE_PATHS: &[&str] = &[
    "/etc/op-dispatch/environment",
    "/etc/op-dispatch.env",
    ".env",
];

/// Prefix for settings overrides from the environment
pub const ENV_PREFIX: &str = "OP_DISPATCH";

/// Load environment variables from the canonical configuration file.
///
/// Existing variables are never overridden. Returns the path that was
/// loaded, or None if no file was found.
pub fn load_environment() -> Option<String> {
    if let Ok(custom_path) = std::env::var("OP_DISPATCH_ENV_FILE") {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
    }

    for path in ENV_FILE_PATHS {
        if let Some(loaded_path) = try_load_env_file(path) {
            return Some(loaded_path);
        }
    }

    debug!("No environment file found, using existing environment");
    None
}

fn try_load_env_file(path: &str) -> Option<String> {
    let path_obj = Path::new(path);
    if !path_obj.exists() {
        return None;
    }

    match fs::read_to_string(path_obj) {
        Ok(content) => {
            let mut loaded_count = 0;
            let mut skipped_count = 0;

            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }

                if let Some((key, value)) = parse_env_line(line) {
                    if std::env::var(&key).is_err() {
                        std::env::set_var(&key, &value);
                        loaded_count += 1;
                    } else {
                        skipped_count += 1;
                        debug!("Skipped (already set): {}", key);
                    }
                }
            }

            info!(
                "Loaded {} environment variables from {} ({} skipped - already set)",
                loaded_count, path, skipped_count
            );
            Some(path.to_string())
        }
        Err(e) => {
            warn!("Failed to read environment file {}: {}", path, e);
            None
        }
    }
}

/// Parse `KEY=VALUE`, `KEY="VALUE"` or `KEY='VALUE'`
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let mut parts = line.splitn(2, '=');
    let key = parts.next()?.trim();
    let value = parts.next()?.trim();

    if key.is_empty() {
        return None;
    }

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    /// Maximum nesting depth for nested dispatch
    pub max_depth: u32,
    /// Parameters that change how a call runs, not what it does
    pub control_parameters: Vec<String>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            max_timeout_ms: 300_000,
            max_depth: 8,
            control_parameters: vec!["dry_run".to_string(), "timeout_ms".to_string()],
        }
    }
}

/// Audit snapshot settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    pub max_snapshot_bytes: usize,
    pub redact_fields: Vec<String>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            max_snapshot_bytes: 16 * 1024,
            redact_fields: ["password", "token", "secret", "api_key"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// `sqlite::memory:`, `sqlite:///path/to/db.sqlite`, or `memory`
    pub url: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
        }
    }
}

/// Build-gate settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationSettings {
    pub fail_on_warnings: bool,
}

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub audit: AuditSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub validation: ValidationSettings,
}

impl Settings {
    /// Layer defaults, an optional file, then the environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);

        if let Some(path) = file {
            info!("Loading settings from {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        debug!(?settings, "Settings loaded");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_env_line_simple() {
        let (k, v) = parse_env_line("FOO=bar").unwrap();
        assert_eq!(k, "FOO");
        assert_eq!(v, "bar");
    }

    #[test]
    fn test_parse_env_line_quoted() {
        let (_, v) = parse_env_line("FOO=\"bar baz\"").unwrap();
        assert_eq!(v, "bar baz");
        let (_, v) = parse_env_line("FOO='bar'").unwrap();
        assert_eq!(v, "bar");
    }

    #[test]
    fn test_parse_env_line_empty() {
        assert!(parse_env_line("").is_none());
        assert!(parse_env_line("=value").is_none());
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::load(None).unwrap();
        assert!(settings
            .dispatch
            .control_parameters
            .contains(&"dry_run".to_string()));
        assert_eq!(settings.audit.max_snapshot_bytes, 16 * 1024);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[dispatch]\ndefault_timeout_ms = 5000\n\n[validation]\nfail_on_warnings = true"
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.dispatch.default_timeout_ms, 5000);
        assert_eq!(settings.dispatch.max_timeout_ms, 300_000);
        assert!(settings.validation.fail_on_warnings);
    }
}
