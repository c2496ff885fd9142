//! Session configuration
//!
//! Loaded from a TOML file. Missing files and missing keys fall back to
//! defaults; values that are present are validated before a session is built.
//!
//! ```toml
//! notice_capacity = 64
//!
//! [tracker]
//! axis_deadzone = 0.05
//! pressure_deadzone = 0.05
//!
//! [reconnect]
//! max_attempts = 5
//! initial_backoff_ms = 100
//!
//! [device]
//! path = "/dev/hidraw0"
//! ```

use crate::controller::calibration::CalibrationSettings;
use crate::controller::device_session::ReconnectSettings;
use crate::controller::profile::DeviceProfile;
use crate::controller::state_tracker::TrackerSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CONFIG_DIR: &str = "sixaxis";
const CONFIG_FILE: &str = "config.toml";

// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Where reports come from and how to read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// hidraw node of the paired controller
    pub path: PathBuf,
    pub profile: DeviceProfile,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/hidraw0"),
            profile: DeviceProfile::sixaxis(),
        }
    }
}

/// Everything a [`DeviceSession`](crate::controller::device_session::DeviceSession) needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Buffered per-frame notices before new ones are dropped
    pub notice_capacity: usize,
    pub tracker: TrackerSettings,
    pub reconnect: ReconnectSettings,
    pub calibration: Option<CalibrationSettings>,
    pub device: DeviceConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            notice_capacity: 64,
            tracker: TrackerSettings::default(),
            reconnect: ReconnectSettings::default(),
            calibration: None,
            device: DeviceConfig::default(),
        }
    }
}

impl SessionConfig {
    /// `<config dir>/sixaxis/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Loads from the default path, or returns defaults if there is none.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load_from(path),
            None => {
                debug!("No config directory on this platform, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Loads and validates a config file. A missing file yields the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(io_err)?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notice_capacity == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "notice_capacity must be at least 1".to_string(),
            ));
        }
        self.tracker.validate()?;
        self.reconnect.validate()?;
        if let Some(calibration) = &self.calibration {
            calibration.validate()?;
        }
        self.device.profile.validate()
    }
}
