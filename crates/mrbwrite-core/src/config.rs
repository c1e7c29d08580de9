//! Flash settings
//!
//! Connection parameters plus the tunables of the handshake and upload
//! phases. Settings can be stored as JSON; the default location is
//! `<config dir>/mrbwrite/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS, DRAIN_WINDOW_MS, PROBE_TIMEOUT_MS};

/// Errors while loading or validating settings
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The settings file could not be read
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The settings file could not be written
    #[error("Failed to write config {}: {source}", path.display())]
    Write {
        /// File or directory path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON for these settings
    #[error("Invalid config {}: {source}", path.display())]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// A setting value is out of range
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Default response timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl ConnectionConfig {
    /// Configuration for `port_name` at the default baud rate
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Default response timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// How the firmware version reply is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionCheck {
    /// Do not send `version`
    Skip,
    /// Send `version` and log the reply; never blocks progress
    #[default]
    Report,
    /// Retry `version` until the reply names the expected bytecode version
    Require,
}

/// What to do when `write <N>` is not acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckPolicy {
    /// Abort before streaming the payload
    #[default]
    Strict,
    /// Log a warning and stream the payload anyway
    Lenient,
}

/// Handshake tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeSettings {
    /// Timeout of each banner probe in milliseconds
    pub probe_timeout_ms: u64,
    /// Give up after this many probes (unbounded if unset)
    pub max_probe_attempts: Option<u32>,
    /// Give up once the handshake has run this long (unbounded if unset)
    pub deadline_ms: Option<u64>,
    /// Version query behaviour
    pub version_check: VersionCheck,
    /// Quiet window used to drain late probe replies, 0 disables the drain
    pub drain_window_ms: u64,
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            probe_timeout_ms: PROBE_TIMEOUT_MS,
            max_probe_attempts: None,
            deadline_ms: None,
            version_check: VersionCheck::Report,
            drain_window_ms: DRAIN_WINDOW_MS,
        }
    }
}

impl HandshakeSettings {
    /// Timeout of each banner probe
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Overall handshake deadline, if any
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    /// Drain window
    pub fn drain_window(&self) -> Duration {
        Duration::from_millis(self.drain_window_ms)
    }
}

/// Upload tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Timeout of each acknowledgement in milliseconds
    pub ack_timeout_ms: u64,
    /// Behaviour when `write <N>` is not acknowledged
    pub ack_policy: AckPolicy,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            ack_timeout_ms: DEFAULT_TIMEOUT_MS,
            ack_policy: AckPolicy::Strict,
        }
    }
}

impl UploadSettings {
    /// Timeout of each acknowledgement
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

/// Everything a flashing session needs besides the image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashSettings {
    /// Serial connection
    pub connection: ConnectionConfig,
    /// Handshake phase
    pub handshake: HandshakeSettings,
    /// Upload phase
    pub upload: UploadSettings,
}

impl FlashSettings {
    /// Set the port name
    pub fn with_port(mut self, port_name: impl Into<String>) -> Self {
        self.connection.port_name = port_name.into();
        self
    }

    /// Set the baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.connection.baud_rate = baud_rate;
        self
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mrbwrite").join("config.json"))
    }

    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from `path` if given, else from the default location if that
    /// file exists, else fall back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(default) if default.is_file() => Self::load(&default),
            _ => Ok(Self::default()),
        }
    }

    /// Save settings as pretty-printed JSON
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check the settings are usable for a session
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.port_name.trim().is_empty() {
            return Err(ConfigError::Invalid("no serial port selected".to_string()));
        }
        if self.connection.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud rate must be positive".to_string()));
        }
        if self.connection.timeout_ms == 0
            || self.handshake.probe_timeout_ms == 0
            || self.upload.ack_timeout_ms == 0
        {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_string()));
        }
        if self.handshake.max_probe_attempts == Some(0) {
            return Err(ConfigError::Invalid(
                "max probe attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let settings = FlashSettings::default();
        assert_eq!(settings.connection.baud_rate, 19200);
        assert_eq!(settings.handshake.probe_timeout(), Duration::from_millis(5000));
        assert_eq!(settings.upload.ack_timeout(), Duration::from_millis(1000));
        assert_eq!(settings.upload.ack_policy, AckPolicy::Strict);
        assert_eq!(settings.handshake.version_check, VersionCheck::Report);
        assert_eq!(settings.handshake.max_probe_attempts, None);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{
            "connection": { "port_name": "/dev/ttyUSB0", "baud_rate": 115200 },
            "upload": { "ack_policy": "lenient" },
            "handshake": { "version_check": "skip", "max_probe_attempts": 10 }
        }"#;
        let settings: FlashSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.connection.port_name, "/dev/ttyUSB0");
        assert_eq!(settings.connection.baud_rate, 115200);
        assert_eq!(settings.connection.timeout_ms, 1000);
        assert_eq!(settings.upload.ack_policy, AckPolicy::Lenient);
        assert_eq!(settings.upload.ack_timeout_ms, 1000);
        assert_eq!(settings.handshake.version_check, VersionCheck::Skip);
        assert_eq!(settings.handshake.max_probe_attempts, Some(10));
        assert_eq!(settings.handshake.probe_timeout_ms, 5000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let settings = FlashSettings::default()
            .with_port("COM3")
            .with_baud_rate(115200);
        settings.save(&path).unwrap();
        assert_eq!(FlashSettings::load(&path).unwrap(), settings);
        assert_eq!(FlashSettings::load_or_default(Some(&path)).unwrap(), settings);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            FlashSettings::load(&missing),
            Err(ConfigError::Read { .. })
        ));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            FlashSettings::load(&broken),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_validate() {
        assert!(FlashSettings::default().validate().is_err());
        let ok = FlashSettings::default().with_port("/dev/ttyUSB0");
        assert!(ok.validate().is_ok());
        assert!(ok.clone().with_baud_rate(0).validate().is_err());

        let mut zero_attempts = ok.clone();
        zero_attempts.handshake.max_probe_attempts = Some(0);
        assert!(zero_attempts.validate().is_err());

        let mut zero_timeout = ok;
        zero_timeout.upload.ack_timeout_ms = 0;
        assert!(zero_timeout.validate().is_err());
    }
}
