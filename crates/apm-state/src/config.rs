//! Configuration for transaction state.
//!
//! Settings live in `.apm/state.toml`. Discovery searches for that file
//! starting from a directory and walking up to its parents; when nothing is
//! found the defaults apply.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StateError};

/// The agent data directory name.
pub const APM_DIR: &str = ".apm";
/// The config file name within the agent directory.
pub const CONFIG_FILE: &str = "state.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StateConfig {
    /// Where the browser correlation token is read from.
    pub browser_token: BrowserTokenConfig,
    /// Execution context store settings.
    pub store: StoreConfig,
}

/// Browser token settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BrowserTokenConfig {
    /// Name of the agent cookie.
    pub cookie_name: String,
    /// Key preceding `=` inside the cookie value.
    pub token_key: String,
}

impl Default for BrowserTokenConfig {
    fn default() -> Self {
        Self {
            cookie_name: "NRAGENT".to_string(),
            token_key: "tk".to_string(),
        }
    }
}

/// Context store settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Number of thread entries to pre-allocate.
    pub initial_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 64,
        }
    }
}

impl StateConfig {
    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: StateConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| match e {
            StateError::Config(msg) => {
                StateError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Find and load configuration starting from a specific directory.
    ///
    /// Looks for `.apm/state.toml` in the directory and its parents and
    /// returns the config together with the file it came from.
    pub fn find_and_load_from(start: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start.to_path_buf();

        loop {
            let config_path = dir.join(APM_DIR).join(CONFIG_FILE);
            if config_path.exists() {
                let config = Self::from_file(&config_path)?;
                return Ok(Some((config, config_path)));
            }

            if !dir.pop() {
                break;
            }
        }

        Ok(None)
    }

    /// Load configuration from the current directory upwards, or use defaults.
    pub fn load_or_default() -> Self {
        let found = std::env::current_dir()
            .map_err(StateError::from)
            .and_then(|cwd| Self::find_and_load_from(&cwd));

        match found {
            Ok(Some((config, path))) => {
                tracing::info!("Loaded state config from {}", path.display());
                config
            }
            Ok(None) => {
                tracing::debug!("No {}/{} found, using defaults", APM_DIR, CONFIG_FILE);
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Error loading state config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.browser_token.cookie_name.trim().is_empty() {
            return Err(StateError::Config(
                "browser_token.cookie_name must not be empty".to_string(),
            ));
        }
        if self.browser_token.token_key.contains('=') {
            return Err(StateError::Config(
                "browser_token.token_key must not contain '='".to_string(),
            ));
        }
        Ok(())
    }
}
