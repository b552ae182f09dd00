//! Configuration loading.
//!
//! Configuration lives in a TOML file; every key is optional and falls back
//! to the defaults below.
//!
//! ```toml
//! [streaming]
//! port_floor = 40000
//! request_timeout_ms = 5000
//!
//! [device]
//! keep_alive = true
//!
//! [logging]
//! log_dir = "logs"
//! retention_days = 7
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use serde::Deserialize;

use crate::error::{Result, TunerError};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DriConfig {
    pub streaming: StreamingConfig,
    pub device: DeviceConfig,
    pub logging: LoggingConfig,
}

/// RTSP/RTP settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamingConfig {
    /// First (even) RTP port tried for the local port pair.
    pub port_floor: u16,
    /// Last RTP port tried.
    pub port_ceiling: u16,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Sent as `User-Agent` on every RTSP request.
    pub user_agent: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            port_floor: 40000,
            port_ceiling: 65534,
            connect_timeout_ms: 5000,
            request_timeout_ms: 5000,
            user_agent: format!("dri-tuner/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl StreamingConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Device control settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Keep the control connection alive between calls. Always off for Ceton
    /// devices.
    pub keep_alive: bool,
    /// Speed argument passed with the transport Play command.
    pub play_speed: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            keep_alive: true,
            play_speed: "1".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub retention_days: u64,
    pub level: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            retention_days: 7,
            level: None,
        }
    }
}

impl DriConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TunerError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml(&contents)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: DriConfig =
            toml::from_str(contents).map_err(|e| TunerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.streaming;
        if s.port_floor % 2 != 0 {
            return Err(TunerError::Config(format!(
                "port_floor {} must be even",
                s.port_floor
            )));
        }
        if s.port_floor > s.port_ceiling {
            return Err(TunerError::Config(format!(
                "port_floor {} is above port_ceiling {}",
                s.port_floor, s.port_ceiling
            )));
        }
        if s.connect_timeout_ms == 0 || s.request_timeout_ms == 0 {
            return Err(TunerError::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }
}
