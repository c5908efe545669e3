//! Driver settings and persisted device records.

use crate::error::{CambridgeError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// File name of the device list inside the configuration directory
pub const CONFIG_FILE_NAME: &str = "config.json";

const DEFAULT_PORT: u16 = 9090;
const DEFAULT_TIMEOUT_SECS: u64 = 5;
const UNKNOWN_MODEL: &str = "Unknown";

/// Configuration shared by the setup flow and the runtime
pub type SharedConfig = Arc<RwLock<CambridgeConfig>>;

/// Process settings read from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct DriverSettings {
    /// Directory holding `config.json` (`UC_CONFIG_HOME`)
    pub config_home: PathBuf,

    /// Interface the integration API listens on (`UC_INTEGRATION_INTERFACE`)
    pub interface: String,

    /// Port the integration API listens on (`UC_INTEGRATION_HTTP_PORT`)
    pub port: u16,
}

impl DriverSettings {
    /// Load settings from environment variables
    pub fn from_env() -> Result<Self> {
        let port = match env::var("UC_INTEGRATION_HTTP_PORT") {
            Ok(value) => value.parse().map_err(|_| {
                CambridgeError::Config(format!("invalid UC_INTEGRATION_HTTP_PORT: {}", value))
            })?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            config_home: PathBuf::from(env::var("UC_CONFIG_HOME").unwrap_or_else(|_| "./".to_string())),
            interface: env::var("UC_INTEGRATION_INTERFACE").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
        })
    }

    /// Path of the device list file
    pub fn config_file(&self) -> PathBuf {
        self.config_home.join(CONFIG_FILE_NAME)
    }

    /// Address the integration API binds to
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.interface, self.port)
    }
}

/// One configured receiver
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub device_id: String,
    pub name: String,
    pub ip_address: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_model() -> String {
    UNKNOWN_MODEL.to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl DeviceConfig {
    /// Create a record for `ip_address`, deriving its id from the address
    pub fn new(ip_address: impl Into<String>, name: impl Into<String>) -> Self {
        let ip_address = ip_address.into();
        Self {
            device_id: Self::device_id_for(&ip_address),
            name: name.into(),
            ip_address,
            model: default_model(),
            enabled: true,
            timeout: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Device id for an address. Re-adding an address yields the same id.
    pub fn device_id_for(ip_address: &str) -> String {
        format!("cambridge_{}", ip_address.trim().replace('.', "_"))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        self.model = if model.trim().is_empty() {
            default_model()
        } else {
            model
        };
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// On-disk layout of `config.json`
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    devices: Vec<DeviceConfig>,
}

/// Persisted device list
#[derive(Debug, Default)]
pub struct CambridgeConfig {
    path: Option<PathBuf>,
    devices: Vec<DeviceConfig>,
}

impl CambridgeConfig {
    /// Load the device list from `path`. A missing file is an empty configuration.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let devices = read_devices(&path)?;
        tracing::debug!("Loaded {} device(s) from {}", devices.len(), path.display());
        Ok(Self {
            path: Some(path),
            devices,
        })
    }

    /// Configuration that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }

    /// Re-read the device list, keeping the current one if the file is unreadable
    pub fn reload_from_disk(&mut self) {
        let Some(path) = &self.path else {
            return;
        };
        match read_devices(path) {
            Ok(devices) => self.devices = devices,
            Err(e) => tracing::error!("Failed to reload configuration from {}: {}", path.display(), e),
        }
    }

    /// Write the device list back to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = ConfigFile {
            devices: self.devices.clone(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        !self.devices.is_empty()
    }

    pub fn get_all_devices(&self) -> &[DeviceConfig] {
        &self.devices
    }

    pub fn get_enabled_devices(&self) -> Vec<DeviceConfig> {
        self.devices.iter().filter(|d| d.enabled).cloned().collect()
    }

    pub fn get_device(&self, device_id: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    /// Add a device, replacing any record with the same id, and persist
    pub fn add_device(&mut self, device: DeviceConfig) -> Result<()> {
        self.devices.retain(|d| d.device_id != device.device_id);
        self.devices.push(device);
        self.save()
    }

    /// Remove a device and persist. Returns whether a record was removed.
    pub fn remove_device(&mut self, device_id: &str) -> Result<bool> {
        let before = self.devices.len();
        self.devices.retain(|d| d.device_id != device_id);
        let removed = self.devices.len() != before;
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// One-line description for logs
    pub fn summary(&self) -> String {
        let enabled = self.devices.iter().filter(|d| d.enabled).count();
        let names: Vec<String> = self
            .devices
            .iter()
            .map(|d| format!("{} ({})", d.name, d.ip_address))
            .collect();
        format!(
            "{} device(s), {} enabled: {}",
            self.devices.len(),
            enabled,
            names.join(", ")
        )
    }
}

fn read_devices(path: &Path) -> Result<Vec<DeviceConfig>> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            let file: ConfigFile = serde_json::from_str(&text)?;
            Ok(file.devices)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}
