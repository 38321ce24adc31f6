//! Configuration file support for swordota.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (only `SWORDOTA_PORT`)
//! 3. Local config file (./swordota.toml)
//! 4. Global config file (~/.config/swordota/config.toml)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use swordota::{CipherKey, OtaConfig};
use swordota::cipher::KEY_SIZE;

/// Local configuration file name.
pub const LOCAL_CONFIG: &str = "swordota.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
}

/// Transfer protocol configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Acknowledgment timeout in milliseconds.
    pub ack_timeout_ms: Option<u64>,
    /// Attempts per frame, including the first one.
    pub max_attempts: Option<u32>,
    /// Pause before resending a rejected frame, in milliseconds.
    pub retry_delay_ms: Option<u64>,
}

/// Cipher configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CipherConfig {
    /// File holding a raw 16-byte AES key.
    pub key_file: Option<PathBuf>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Protocol settings.
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// Cipher settings.
    #[serde(default)]
    pub cipher: CipherConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
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
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "swordota").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.protocol.ack_timeout_ms.is_some() {
            self.protocol.ack_timeout_ms = other.protocol.ack_timeout_ms;
        }
        if other.protocol.max_attempts.is_some() {
            self.protocol.max_attempts = other.protocol.max_attempts;
        }
        if other.protocol.retry_delay_ms.is_some() {
            self.protocol.retry_delay_ms = other.protocol.retry_delay_ms;
        }
        if other.cipher.key_file.is_some() {
            self.cipher.key_file = other.cipher.key_file;
        }
    }

    /// Transfer options with the file values applied over the defaults.
    pub fn ota_config(&self) -> OtaConfig {
        let mut ota = OtaConfig::default();
        if let Some(ms) = self.protocol.ack_timeout_ms {
            ota.ack_timeout = Duration::from_millis(ms);
        }
        if let Some(attempts) = self.protocol.max_attempts {
            ota.max_attempts = attempts;
        }
        if let Some(ms) = self.protocol.retry_delay_ms {
            ota.retry_delay = Duration::from_millis(ms);
        }
        ota
    }

    /// Key named by `[cipher] key_file`, or the development key.
    pub fn cipher_key(&self) -> Result<CipherKey> {
        let Some(path) = &self.cipher.key_file else {
            return Ok(CipherKey::default());
        };

        let raw = fs::read(path)
            .with_context(|| format!("Failed to read key file {}", path.display()))?;
        if raw.len() != KEY_SIZE {
            bail!(
                "Key file {} holds {} bytes, expected {KEY_SIZE}",
                path.display(),
                raw.len()
            );
        }
        debug!("Using key from {}", path.display());
        Ok(CipherKey::from_bytes(&raw)?)
    }
}
