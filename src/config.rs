// Client configuration - server location, timeouts and quota bootstrap
use crate::quota::{QuotaInitStrategy, OPTIMISTIC_DEFAULT};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const BASE_URL_ENV: &str = "SEDQ_BASE_URL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub quota_init: QuotaInitStrategy,
    pub optimistic_tries: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            quota_init: QuotaInitStrategy::Server,
            optimistic_tries: OPTIMISTIC_DEFAULT,
            download_dir: None,
        }
    }
}

impl ClientConfig {
    /// Load from the config file (defaults if absent), then apply the environment
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            serde_json::from_str(&content)
                .map_err(|e| anyhow!("Invalid config {}: {}", config_path.display(), e))?
        } else {
            debug!("No config at {}, using defaults", config_path.display());
            Self::default()
        };

        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            if !url.trim().is_empty() {
                config.base_url = url.trim().to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<PathBuf> {
        self.validate()?;
        let config_path = Self::config_file_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&self)?;
        fs::write(&config_path, json)?;
        Ok(config_path)
    }

    pub fn config_file_path() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .ok_or_else(|| anyhow!("Could not determine config directory or home directory"))?
            .join("sedq")
            .join("config.json"))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(anyhow!(
                "Server URL must start with http:// or https://, got: {}",
                self.base_url
            ));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("timeout_secs must be greater than zero"));
        }
        if self.optimistic_tries < -1 {
            return Err(anyhow!("optimistic_tries must be -1 or more"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Where reports and maps are written
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Server session cookie kept between runs, scoped to one server URL
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredSession {
    pub base_url: String,
    pub cookie: String,
}

impl StoredSession {
    pub fn file_path() -> Result<PathBuf> {
        Ok(ClientConfig::config_file_path()?.with_file_name("session.json"))
    }

    /// Cookie saved for `base_url`; a session from another server is ignored
    pub fn load(path: &Path, base_url: &str) -> Option<String> {
        let content = fs::read_to_string(path).ok()?;
        let stored: StoredSession = serde_json::from_str(&content).ok()?;
        if stored.base_url != base_url {
            debug!("Saved session belongs to {}, not resuming", stored.base_url);
            return None;
        }
        Some(stored.cookie)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn forget(path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }
}
