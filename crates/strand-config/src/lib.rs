//! # strand-config
//!
//! Configuration management for strand.
//!
//! Loads configuration from:
//! 1. `~/.strand/config.toml` (global)
//! 2. `.strand/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;
pub mod testing;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Global config instance
static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::load().unwrap_or_default()));

/// Get global config (read-only)
pub fn config() -> std::sync::RwLockReadGuard<'static, Config> {
    CONFIG.read().unwrap()
}

/// Reload config from disk
pub fn reload() -> Result<(), ConfigError> {
    let new_config = Config::load()?;
    *CONFIG.write().unwrap() = new_config;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub drives: Vec<DriveEntry>,
    pub copy: CopyConfig,
    pub daemon: DaemonConfig,
    pub watch: WatchConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Load global config (~/.strand/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                let contents = std::fs::read_to_string(&global_path)?;
                config = toml::from_str(&contents)?;
            }
        }

        // 2. Load project config (.strand/config.toml) - overrides global
        let project_path = Path::new(".strand/config.toml");
        if project_path.exists() {
            debug!("Loading project config from {:?}", project_path);
            let contents = std::fs::read_to_string(project_path)?;
            let project_config: Config = toml::from_str(&contents)?;
            config.merge(project_config);
        }

        // 3. Apply environment variable overrides
        config.apply_env_overrides();

        Ok(config)
    }

    /// Global config path: ~/.strand/config.toml (`STRAND_HOME` overrides the directory)
    pub fn global_config_path() -> Option<PathBuf> {
        if let Ok(home) = std::env::var("STRAND_HOME") {
            return Some(PathBuf::from(home).join("config.toml"));
        }
        dirs::home_dir().map(|h| h.join(".strand/config.toml"))
    }

    /// Merge another config (project overrides)
    fn merge(&mut self, other: Config) {
        // Only merge non-default values (simplified: just replace)
        // A more sophisticated merge would check each field
        if !other.drives.is_empty() {
            self.drives = other.drives;
        }
        if other.daemon.socket != DaemonConfig::default().socket {
            self.daemon.socket = other.daemon.socket;
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(socket) = std::env::var("STRAND_SOCKET") {
            self.daemon.socket = PathBuf::from(socket);
        }
        if let Ok(n) = std::env::var("STRAND_FILE_CONCURRENCY") {
            if let Ok(n) = n.parse() {
                self.copy.file_concurrency = n;
            }
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap()
    }
}

/// One managed drive: a uuid-addressed root anchored at an absolute path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveEntry {
    /// Stable drive identifier
    pub uuid: Uuid,
    /// Absolute path of the drive root directory
    pub path: PathBuf,
    /// Optional human-readable label
    pub label: Option<String>,
}

/// Copy engine limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyConfig {
    /// Maximum simultaneous file transfers per task
    pub file_concurrency: usize,
    /// Maximum simultaneous directory reads per task
    pub dir_concurrency: usize,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            file_concurrency: 4,
            dir_concurrency: 2,
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket path
    pub socket: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from("/run/strand/strandd.sock"),
        }
    }
}

/// Filesystem watch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Enable live re-scans driven by filesystem events
    pub enabled: bool,
    /// Debounce window in milliseconds (coalesces rapid writes)
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 100,
        }
    }
}
