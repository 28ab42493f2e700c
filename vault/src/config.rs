//! Bootstrap configuration. This file is plaintext JSON and only names file
//! locations and tunables; keys and passphrases never live in it. The
//! passphrase is read from the environment variable the config names.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Environment variable pointing at the bootstrap config file.
pub const CONFIG_ENV: &str = "ACCOUNT_VAULT_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file unreadable: {0}")]
    Io(String),
    #[error("config parse failed: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// Directory holding the database and settings blobs.
    pub data_dir: PathBuf,
    pub database_file: String,
    pub settings_file: String,
    /// Debounce window for scheduled saves.
    pub save_debounce_ms: u64,
    /// Overrides the machine-id lookup used for the device key.
    pub machine_id_path: Option<PathBuf>,
    /// Name of the environment variable that holds the user passphrase.
    pub passphrase_env: Option<String>,
    /// `env_logger` filter used when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            database_file: "database.dat".to_string(),
            settings_file: "config.dat".to_string(),
            save_debounce_ms: 200,
            machine_id_path: None,
            passphrase_env: None,
            log_filter: None,
        }
    }
}

impl AppConfig {
    /// Parses the JSON config at `path`. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw_json = fs::read_to_string(&path).map_err(|e| ConfigError::Io(format!("{e}")))?;
        let config: AppConfig =
            serde_json::from_str(&raw_json).map_err(|e| ConfigError::Parse(format!("{e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file named by [`CONFIG_ENV`], or the defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_var(CONFIG_ENV)
    }

    fn from_var(var: &str) -> Result<Self, ConfigError> {
        match std::env::var_os(var) {
            Some(path) => Self::load(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, name) in [("database_file", &self.database_file), ("settings_file", &self.settings_file)] {
            if name.is_empty() {
                return Err(ConfigError::Invalid(format!("{field} must not be empty")));
            }
        }
        if self.database_file == self.settings_file {
            return Err(ConfigError::Invalid("database and settings files must differ".to_string()));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(&self.settings_file)
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    /// The passphrase from the configured environment variable, if both the
    /// variable name and its value are present.
    pub fn passphrase(&self) -> Option<String> {
        let var = self.passphrase_env.as_ref()?;
        std::env::var(var).ok().filter(|value| !value.is_empty())
    }
}
