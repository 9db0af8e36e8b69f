//! Configuration file support for ossdock.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (OSSDOCK_*)
//! 3. Local config file (./ossdock.toml)
//! 4. Global config file (~/.config/ossdock/config.toml)
//!
//! `--config PATH` replaces 3 and 4 with a single file.

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "ossdock.toml";

/// Directory for exports and the sync file when none is configured.
pub const DEFAULT_DATA_DIR: &str = "data";

/// Continuation file for incremental sync.
pub const DEFAULT_SYNC_FILE: &str = "SYNC.CSV";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub port: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// Serial read timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Where downloaded data goes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for exports and the sync file.
    pub data_dir: Option<PathBuf>,
    /// Sync file name, relative to `data_dir`.
    pub sync_file: Option<String>,
}

/// Bulk transfer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferSettings {
    /// Give up after this long without a byte from the device.
    pub idle_timeout_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Transfer settings.
    #[serde(default)]
    pub transfer: TransferSettings,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .map_err(|e| warn!("Failed to parse config file {}: {}", path.display(), e))
                .ok(),
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ossdock").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Only values set in `other` win.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        if other.connection.timeout_ms.is_some() {
            self.connection.timeout_ms = other.connection.timeout_ms;
        }

        if other.storage.data_dir.is_some() {
            self.storage.data_dir = other.storage.data_dir;
        }
        if other.storage.sync_file.is_some() {
            self.storage.sync_file = other.storage.sync_file;
        }

        if other.transfer.idle_timeout_ms.is_some() {
            self.transfer.idle_timeout_ms = other.transfer.idle_timeout_ms;
        }
    }

    /// Directory exports and the sync file are written to.
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    /// Path of the sync continuation file.
    pub fn sync_path(&self) -> PathBuf {
        self.data_dir().join(
            self.storage
                .sync_file
                .as_deref()
                .unwrap_or(DEFAULT_SYNC_FILE),
        )
    }

    /// Configured serial read timeout.
    pub fn serial_timeout(&self) -> Option<Duration> {
        self.connection
            .timeout_ms
            .map(Duration::from_millis)
    }

    /// Configured bulk transfer idle timeout.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.transfer
            .idle_timeout_ms
            .map(Duration::from_millis)
    }
}
