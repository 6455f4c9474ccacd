use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ShioriError;

const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub history: HistoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub concurrency: usize,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub storage_key: String,
    pub max_items: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "shiori=info".into(),
        }
    }
}

impl AppConfig {
    /// Load config: user file if it exists, otherwise the built-in defaults.
    pub fn load() -> Result<Self, ShioriError> {
        let user_path = Self::config_path();
        let config = if user_path.exists() {
            Self::load_from(&user_path)?
        } else {
            Self::parse(DEFAULT_CONFIG)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load config from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ShioriError> {
        let user_str =
            std::fs::read_to_string(path).map_err(|e| ShioriError::Config(e.to_string()))?;
        Self::parse(&user_str)
    }

    fn parse(s: &str) -> Result<Self, ShioriError> {
        toml::from_str(s).map_err(|e| ShioriError::Config(e.to_string()))
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ShioriError> {
        if self.api.base_url.trim().is_empty() {
            return Err(ShioriError::Config("api.base_url is missing".into()));
        }
        if self.api.concurrency == 0 {
            return Err(ShioriError::Config("api.concurrency must be at least 1".into()));
        }
        if self.history.storage_key.is_empty() {
            return Err(ShioriError::Config("history.storage_key is missing".into()));
        }
        if self.history.max_items == 0 {
            return Err(ShioriError::Config("history.max_items must be at least 1".into()));
        }
        Ok(())
    }

    /// Save current config to the user config file.
    pub fn save(&self) -> Result<(), ShioriError> {
        let path = Self::config_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| ShioriError::Config(e.to_string()))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Path to user config file (XDG on Linux, AppData on Windows).
    pub fn config_path() -> PathBuf {
        Self::project_dirs()
            .map(|d| d.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Path to the database file.
    pub fn db_path() -> PathBuf {
        Self::project_dirs()
            .map(|d| d.data_dir().join("shiori.db"))
            .unwrap_or_else(|| PathBuf::from("shiori.db"))
    }

    /// Ensure the data directory exists and return the DB path.
    pub fn ensure_db_path() -> Result<PathBuf, ShioriError> {
        let path = Self::db_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("", "", "shiori")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).expect("built-in default config is valid TOML")
    }
}
