use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CustodyError, CustodyResult};
use crate::types::KdfProfile;

/// Largest chunk size accepted from config (64 MiB)
pub const MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Top-level configuration (loaded from vaultkey.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub log: LogConfig,
    pub kdf: KdfConfig,
    pub session: SessionConfig,
    pub files: FilesConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Argon2id profile used for both password and phrase wrapping
    pub profile: KdfProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity before an unlocked vault is locked (default: 600 = 10 minutes)
    pub idle_timeout_secs: u64,
    /// How often the idle watchdog checks the deadline (default: 15)
    pub watchdog_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Plaintext bytes per encrypted chunk (default: 5 MiB)
    pub chunk_size_bytes: u64,
    /// Chunk worker pool size (0 = rayon default)
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one JSON vault record per account
    pub dir: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 600,
            watchdog_interval_secs: 15,
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: 5 * 1024 * 1024,
            workers: 4,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.local/share/vaultkey"),
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs.max(1))
    }
}

impl VaultConfig {
    /// Load from a TOML file, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> CustodyResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CustodyError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CustodyResult<()> {
        if self.files.chunk_size_bytes == 0 {
            return Err(CustodyError::Config("files.chunk_size_bytes must be > 0".into()));
        }
        if self.files.chunk_size_bytes > MAX_CHUNK_SIZE {
            return Err(CustodyError::Config(format!(
                "files.chunk_size_bytes must be <= {MAX_CHUNK_SIZE}"
            )));
        }
        if self.session.idle_timeout_secs == 0 {
            return Err(CustodyError::Config("session.idle_timeout_secs must be > 0".into()));
        }
        Ok(())
    }
}

/// Expand a leading `~/` using $HOME.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}
