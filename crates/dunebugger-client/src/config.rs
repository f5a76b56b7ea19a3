//! Client configuration.
//!
//! Values are layered, later sources winning:
//! 1. Built-in defaults
//! 2. `config.toml` (`$XDG_CONFIG_HOME/dunebugger/config.toml` or an explicit path)
//! 3. Environment: `DUNEBUGGER_BUS_URL`, `DUNEBUGGER_DEVICES`
//! 4. Command line flags, applied by the binary
//!
//! ```toml
//! bus_url = "wss://example.webpubsub.azure.com/client/hubs/dunebugger?access_token=..."
//! devices = "shop-a,shop-b"      # or ["shop-a", "shop-b"]
//! heartbeat_timeout_ms = 10000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use dunebugger_core::DeviceList;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::session::SessionConfig;
use crate::transport::ReconnectPolicy;

/// Environment variable overriding the bus URL.
pub const ENV_BUS_URL: &str = "DUNEBUGGER_BUS_URL";

/// Environment variable overriding the device list (comma separated).
pub const ENV_DEVICES: &str = "DUNEBUGGER_DEVICES";

/// Device list as written in the file: a comma separated string or an array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum DevicesSetting {
    Joined(String),
    List(Vec<String>),
}

impl Default for DevicesSetting {
    fn default() -> Self {
        DevicesSetting::List(Vec::new())
    }
}

impl DevicesSetting {
    fn to_list(&self) -> DeviceList {
        match self {
            DevicesSetting::Joined(joined) => DeviceList::parse(joined),
            DevicesSetting::List(names) => DeviceList::from_names(names),
        }
    }
}

/// Settings for a dashboard client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Client access URL of the Web PubSub hub.
    pub bus_url: Option<String>,

    /// Device groups this user may watch.
    devices: DevicesSetting,

    /// How long a device may stay silent before it is shown offline.
    pub heartbeat_timeout_ms: u64,

    /// Period of the heartbeat countdown.
    pub tick_interval_ms: u64,

    /// Initial delay before retrying a failed connection.
    pub retry_initial_delay_ms: u64,

    /// Maximum delay between connection attempts.
    pub retry_max_delay_ms: u64,

    /// Backoff multiplier between connection attempts.
    pub retry_multiplier: f64,

    /// Log entries kept by the dashboard state.
    pub log_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bus_url: None,
            devices: DevicesSetting::default(),
            heartbeat_timeout_ms: 10_000,
            tick_interval_ms: 1_000,
            retry_initial_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            retry_multiplier: 2.0,
            log_capacity: dunebugger_core::DEFAULT_LOG_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Default location of the config file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("dunebugger").join("config.toml"))
    }

    /// Loads the config file and applies environment overrides.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used if present and defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        Ok(config.with_env(|key| std::env::var(key).ok()))
    }

    /// Reads a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| ClientError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ClientError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Applies overrides from `lookup`, normally the process environment.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BUS_URL).filter(|v| !v.trim().is_empty()) {
            self.bus_url = Some(url.trim().to_string());
        }
        if let Some(devices) = lookup(ENV_DEVICES).filter(|v| !v.trim().is_empty()) {
            self.devices = DevicesSetting::Joined(devices);
        }
        self
    }

    pub fn set_bus_url(&mut self, url: impl Into<String>) {
        self.bus_url = Some(url.into());
    }

    /// Replaces the device list with a comma separated string.
    pub fn set_devices(&mut self, devices: &str) {
        self.devices = DevicesSetting::Joined(devices.to_string());
    }

    pub fn devices(&self) -> DeviceList {
        self.devices.to_list()
    }

    /// Checks that the config can drive a session.
    pub fn validate(&self) -> Result<()> {
        match self.bus_url.as_deref().map(str::trim) {
            None | Some("") => {
                return Err(ClientError::Config(format!(
                    "bus_url is required (config file or {ENV_BUS_URL})"
                )))
            }
            Some(url) if !(url.starts_with("ws://") || url.starts_with("wss://")) => {
                return Err(ClientError::Config(format!(
                    "bus_url must be a ws:// or wss:// url, got {url}"
                )))
            }
            Some(_) => {}
        }

        if self.devices().is_empty() {
            return Err(ClientError::Config(format!(
                "at least one device is required (config file or {ENV_DEVICES})"
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(ClientError::Config(
                "tick_interval_ms must be positive".to_string(),
            ));
        }
        if self.heartbeat_timeout_ms == 0 {
            return Err(ClientError::Config(
                "heartbeat_timeout_ms must be positive".to_string(),
            ));
        }
        if !(self.retry_multiplier.is_finite() && self.retry_multiplier >= 1.0) {
            return Err(ClientError::Config(
                "retry_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.retry_initial_delay_ms > self.retry_max_delay_ms {
            return Err(ClientError::Config(
                "retry_initial_delay_ms must not exceed retry_max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout_ms),
            tick_interval: Duration::from_millis(self.tick_interval_ms),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            multiplier: self.retry_multiplier,
        }
    }
}
