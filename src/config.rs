//! Peripheral configuration
//!
//! Every field has a default, so hosts only send what they want to change.
//! Hosts hand the config over as JSON; the demo binary and desktop hosts can
//! also layer a config file and `GATTLINK_*` environment variables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::ble::{
    AdvertiseMode, AdvertisingConfig, ServiceDefinition, TxPower, NOTIFY_CHAR_UUID, SERVICE_UUID,
    WRITE_CHAR_UUID,
};
use crate::permissions::Permission;

/// Default advertised device name
pub const DEFAULT_DEVICE_NAME: &str = "Wizepass Test";

/// Default bound on the advertising STARTING state
pub const DEFAULT_ADVERTISE_TIMEOUT_MS: u64 = 10_000;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "GATTLINK";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[cfg(feature = "config-file")]
    #[error("Failed to load config: {0}")]
    Source(#[from] config::ConfigError),
}

/// Peripheral session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    pub device_name: String,
    pub tx_power: TxPower,
    pub advertise_mode: AdvertiseMode,
    pub connectable: bool,
    pub include_device_name: bool,
    /// Put the service UUID in the advertising payload as well
    pub advertise_service_uuid: bool,
    pub service_uuid: Uuid,
    pub write_characteristic_uuid: Uuid,
    pub notify_characteristic_uuid: Uuid,
    pub advertise_timeout_ms: u64,
    /// Text notified back to the central after each received write
    pub reply_on_receive: Option<String>,
    pub required_permissions: Vec<Permission>,
    pub enable_logging: bool,
    pub log_level: Option<String>,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            tx_power: TxPower::High,
            advertise_mode: AdvertiseMode::LowLatency,
            connectable: true,
            include_device_name: true,
            advertise_service_uuid: false,
            service_uuid: SERVICE_UUID,
            write_characteristic_uuid: WRITE_CHAR_UUID,
            notify_characteristic_uuid: NOTIFY_CHAR_UUID,
            advertise_timeout_ms: DEFAULT_ADVERTISE_TIMEOUT_MS,
            reply_on_receive: None,
            required_permissions: Permission::ALL.to_vec(),
            enable_logging: false,
            log_level: None,
        }
    }
}

impl PeripheralConfig {
    /// Parse the JSON config a host passes at session creation
    pub fn from_json(data: &[u8]) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_slice(data).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional file, then apply `GATTLINK_*` environment overrides
    #[cfg(feature = "config-file")]
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.advertise_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "advertise_timeout_ms must be greater than zero".to_string(),
            ));
        }
        let uuids = [
            self.service_uuid,
            self.write_characteristic_uuid,
            self.notify_characteristic_uuid,
        ];
        if uuids.iter().collect::<BTreeSet<_>>().len() != uuids.len() {
            return Err(ConfigError::Invalid(
                "service and characteristic UUIDs must be distinct".to_string(),
            ));
        }
        Ok(())
    }

    pub fn advertise_timeout(&self) -> Duration {
        Duration::from_millis(self.advertise_timeout_ms)
    }

    pub fn advertising_config(&self) -> AdvertisingConfig {
        let mut service_uuids = BTreeSet::new();
        if self.advertise_service_uuid {
            service_uuids.insert(self.service_uuid);
        }
        AdvertisingConfig {
            device_name: self.device_name.clone(),
            tx_power: self.tx_power,
            mode: self.advertise_mode,
            connectable: self.connectable,
            include_device_name: self.include_device_name,
            service_uuids,
        }
    }

    pub fn service_definitions(&self) -> Vec<ServiceDefinition> {
        vec![ServiceDefinition::standard(
            self.service_uuid,
            self.write_characteristic_uuid,
            self.notify_characteristic_uuid,
        )]
    }
}
