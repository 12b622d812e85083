use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

/// Slots carved out of the message pool when none is configured.
pub const DEFAULT_POOL_CAPACITY: usize = 10_000;
/// Largest pool a device will carve out.
pub const MAX_POOL_CAPACITY: usize = 1 << 20;
/// Device name used in logs when none is configured.
pub const DEFAULT_DEVICE_NAME: &str = "can0";

/// Device start-up configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// Name used in log lines.
    pub name: String,
    /// Number of message slots. Fixed for the lifetime of the device.
    pub pool_capacity: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_DEVICE_NAME.to_string(),
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl DeviceConfig {
    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| DriverError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
            .map_err(|e| DriverError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_json_str(text: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_capacity == 0 {
            return Err(DriverError::Config(
                "pool_capacity must be greater than zero".to_string(),
            ));
        }
        if self.pool_capacity > MAX_POOL_CAPACITY {
            return Err(DriverError::Config(format!(
                "pool_capacity {} exceeds the maximum of {MAX_POOL_CAPACITY}",
                self.pool_capacity
            )));
        }
        if self.name.trim().is_empty() {
            return Err(DriverError::Config("name must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.pool_capacity, 10_000);
        assert_eq!(config.name, "can0");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = DeviceConfig::from_json_str(r#"{"pool_capacity": 64}"#).unwrap();
        assert_eq!(config.pool_capacity, 64);
        assert_eq!(config.name, "can0");
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(DeviceConfig::from_json_str(r#"{"pool_size": 64}"#).is_err());
    }

    #[test]
    fn zero_capacity_rejected() {
        let config = DeviceConfig {
            pool_capacity: 0,
            ..DeviceConfig::default()
        };
        assert!(matches!(config.validate(), Err(DriverError::Config(_))));
    }

    #[test]
    fn oversized_capacity_rejected() {
        let mut config = DeviceConfig {
            pool_capacity: 1 << 60,
            ..DeviceConfig::default()
        };
        assert!(matches!(config.validate(), Err(DriverError::Config(msg)) if msg.contains("maximum")));

        config.pool_capacity = MAX_POOL_CAPACITY;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn blank_name_rejected() {
        let config = DeviceConfig {
            name: "  ".to_string(),
            ..DeviceConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_loading() {
        let path = std::env::temp_dir().join(format!(
            "canpipe-config-{}-{:?}.json",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::write(&path, r#"{"name": "can1", "pool_capacity": 128}"#).unwrap();
        let config = DeviceConfig::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.name, "can1");
        assert_eq!(config.pool_capacity, 128);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = DeviceConfig::from_json_file("/nonexistent/canpipe.json").unwrap_err();
        assert!(matches!(err, DriverError::Config(msg) if msg.contains("canpipe.json")));
    }
}
