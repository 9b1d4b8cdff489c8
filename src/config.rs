//! Global configuration parsing and validation.
//!
//! Every field carries a serde default so the server starts with no config
//! file at all; a TOML file and CLI flags override the defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

fn default_workspace_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_assistant_cli() -> String {
    "claude".into()
}

fn default_permission_mode() -> String {
    "default".into()
}

fn default_http_port() -> u16 {
    8000
}

fn default_cors_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".into(),
        "http://127.0.0.1:5173".into(),
    ]
}

fn default_stop_timeout_seconds() -> u64 {
    5
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct GlobalConfig {
    /// Workspace root used when a client does not supply a `cwd`.
    #[serde(default = "default_workspace_root")]
    pub default_workspace_root: PathBuf,
    /// Assistant CLI binary (e.g. `claude`).
    #[serde(default = "default_assistant_cli")]
    pub assistant_cli: String,
    /// Permission mode passed to the CLI via `--permission-mode`.
    #[serde(default = "default_permission_mode")]
    pub permission_mode: String,
    /// HTTP port the relay listens on.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Origins allowed by the CORS layer; `"*"` allows any origin.
    #[serde(default = "default_cors_allowed_origins")]
    pub cors_allowed_origins: Vec<String>,
    /// Seconds to wait for graceful child exit before force-killing.
    #[serde(default = "default_stop_timeout_seconds")]
    pub stop_timeout_seconds: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_workspace_root: default_workspace_root(),
            assistant_cli: default_assistant_cli(),
            permission_mode: default_permission_mode(),
            http_port: default_http_port(),
            cors_allowed_origins: default_cors_allowed_origins(),
            stop_timeout_seconds: default_stop_timeout_seconds(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, parsed, or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("cannot read {}: {err}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` on parse or validation failure.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field-level constraints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.assistant_cli.trim().is_empty() {
            return Err(AppError::Config("assistant_cli must not be empty".into()));
        }
        if self.permission_mode.trim().is_empty() {
            return Err(AppError::Config("permission_mode must not be empty".into()));
        }
        if self.http_port == 0 {
            return Err(AppError::Config("http_port must be nonzero".into()));
        }
        if self.stop_timeout_seconds == 0 {
            return Err(AppError::Config(
                "stop_timeout_seconds must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
