use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tc_core::{CacheError, LoggerConfig, Result};

/// Default application id recorded in wipe markers
pub const DEFAULT_APP_ID: &str = "tokencache";

/// Keyring entry holding the file store encryption key
pub mod keyring_entry {
    pub const SERVICE: &str = "tokencache";
    pub const USER: &str = "tc-store:v1";
}

/// How long a store waits for the cross-process cache lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for cache stores, usually read from `tokencache.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base directory for the file store; platform default when unset
    pub storage_dir: Option<PathBuf>,

    /// Identifies this application in wipe markers
    pub app_id: String,

    pub keyring_service: String,
    pub keyring_user: String,

    pub lock_timeout_ms: u64,

    /// Allow log messages that may contain user identifiers
    pub pii_logging: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            app_id: DEFAULT_APP_ID.to_string(),
            keyring_service: keyring_entry::SERVICE.to_string(),
            keyring_user: keyring_entry::USER.to_string(),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT.as_millis() as u64,
            pii_logging: false,
        }
    }
}

impl StoreConfig {
    /// Read a TOML configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CacheError::storage("read store configuration", e))?;

        let config: Self = toml::from_str(&content).map_err(|e| CacheError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        tracing::debug!("Loaded store configuration from {}", path.display());
        Ok(config)
    }

    /// Platform configuration file location
    pub fn default_path() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("tokencache.toml"))
    }

    /// Get default storage directory for the current platform
    pub fn default_storage_dir() -> Result<PathBuf> {
        Ok(project_dirs()?.data_dir().join("tc-store"))
    }

    /// Configured storage directory, or the platform default
    pub fn resolve_storage_dir(&self) -> Result<PathBuf> {
        match &self.storage_dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::default_storage_dir(),
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn logger_config(&self) -> LoggerConfig {
        LoggerConfig {
            pii_enabled: self.pii_logging,
        }
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "tokencache").ok_or_else(|| {
        CacheError::storage(
            "resolve project directories",
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine home directory",
            ),
        )
    })
}
