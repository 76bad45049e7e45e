//! Configuration Management
//!
//! Handles persistent configuration storage for cloudnet. A missing or
//! unreadable file yields the defaults; endpoints can be pointed at
//! emulators or sovereign clouds.

use crate::azure::{DEFAULT_LOGIN_BASE_URL, DEFAULT_MANAGEMENT_BASE_URL};
use crate::cache::DEFAULT_TTL;
use crate::gcp::DEFAULT_COMPUTE_BASE_URL;
use crate::operation::{OperationPoller, DEFAULT_OPERATION_TIMEOUT, DEFAULT_POLL_INTERVAL};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: DEFAULT_TTL.as_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Long-running operation polling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationConfig {
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            timeout_secs: DEFAULT_OPERATION_TIMEOUT.as_secs(),
        }
    }
}

impl OperationConfig {
    pub fn poller(&self) -> OperationPoller {
        OperationPoller::new(
            Duration::from_secs(self.poll_interval_secs.max(1)),
            Duration::from_secs(self.timeout_secs),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpConfig {
    pub compute_base_url: String,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            compute_base_url: DEFAULT_COMPUTE_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    pub management_base_url: String,
    pub login_base_url: String,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            management_base_url: DEFAULT_MANAGEMENT_BASE_URL.to_string(),
            login_base_url: DEFAULT_LOGIN_BASE_URL.to_string(),
        }
    }
}

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub operation: OperationConfig,
    #[serde(default)]
    pub gcp: GcpConfig,
    #[serde(default)]
    pub azure: AzureConfig,
    /// Provider used when none is given on the command line
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Plaintext credential file used when none is given
    #[serde(default)]
    pub default_credential_file: Option<PathBuf>,
}

impl Config {
    /// Directory holding the config file and the log
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cloudnet"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unparsable config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }
}
