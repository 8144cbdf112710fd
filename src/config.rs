//! Engine configuration.
//!
//! Values come from defaults, then an optional JSON file, then environment
//! overrides.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const ENV_DB_PATH: &str = "PR_REVIEWER_DB_PATH";
pub const ENV_OP_TIMEOUT_SECS: &str = "PR_REVIEWER_OP_TIMEOUT_SECS";
pub const ENV_CONNECT_ATTEMPTS: &str = "PR_REVIEWER_CONNECT_ATTEMPTS";
pub const ENV_CANDIDATE_SEED: &str = "PR_REVIEWER_CANDIDATE_SEED";

/// Runtime settings for the store and the services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite database file.
    pub database_path: PathBuf,

    /// Deadline for a single top-level operation.
    pub operation_timeout_secs: u64,

    /// Startup connection attempts before giving up.
    pub connect_attempts: u32,

    pub connect_retry_delay_ms: u64,

    /// Seed for the reviewer draw. `None` seeds from entropy.
    pub candidate_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("pr-reviewer.db"),
            operation_timeout_secs: 30,
            connect_attempts: 5,
            connect_retry_delay_ms: 2000,
            candidate_seed: None,
        }
    }
}

impl EngineConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    /// Load a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::validation_field(
                format!("Failed to read config {}: {}", path.display(), e),
                "config_path",
            )
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, AppError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from the process environment.
    pub fn apply_env(&mut self) -> Result<(), AppError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Override fields from `lookup`, which maps a variable name to its value.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DB_PATH) {
            if path.trim().is_empty() {
                return Err(AppError::validation_field(
                    "database path must not be empty",
                    ENV_DB_PATH,
                ));
            }
            self.database_path = PathBuf::from(path);
        }
        if let Some(value) = lookup(ENV_OP_TIMEOUT_SECS) {
            self.operation_timeout_secs = parse_var(ENV_OP_TIMEOUT_SECS, &value)?;
        }
        if let Some(value) = lookup(ENV_CONNECT_ATTEMPTS) {
            self.connect_attempts = parse_var(ENV_CONNECT_ATTEMPTS, &value)?;
        }
        if let Some(value) = lookup(ENV_CANDIDATE_SEED) {
            self.candidate_seed = Some(parse_var(ENV_CANDIDATE_SEED, &value)?);
        }

        if self.operation_timeout_secs == 0 {
            return Err(AppError::validation_field(
                "operation timeout must be at least one second",
                ENV_OP_TIMEOUT_SECS,
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T, AppError> {
    value.trim().parse::<T>().map_err(|_| {
        AppError::validation_field(format!("{} has invalid value '{}'", name, value), name)
    })
}
