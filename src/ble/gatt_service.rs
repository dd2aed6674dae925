//! GATT service specification for the peripheral
//!
//! Defines the service/characteristic model registered with the platform stack
//! and the fixed UUIDs existing centrals expect.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Primary service UUID (fixed for wire compatibility)
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000aaa0_0000_1000_8000_aabbccddeeff);

/// Notify characteristic UUID (peripheral -> central)
pub const NOTIFY_CHAR_UUID: Uuid = Uuid::from_u128(0x0000aaa1_0000_1000_8000_aabbccddeeff);

/// Write characteristic UUID (central -> peripheral)
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x0000aaa2_0000_1000_8000_aabbccddeeff);

/// GATT service definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicDefinition>,
}

/// Characteristic definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicDefinition {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub permissions: CharacteristicPermissions,
    /// Current value, if one has been written or notified
    pub value: Option<Vec<u8>>,
}

/// Characteristic properties
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

/// Characteristic permissions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicPermissions {
    pub readable: bool,
    pub writable: bool,
}

impl CharacteristicProperties {
    /// Properties for an inbound characteristic (write with and without response)
    pub fn write_only() -> Self {
        Self {
            read: false,
            write: true,
            write_without_response: true,
            notify: false,
        }
    }

    /// Properties for the outbound notify characteristic
    pub fn notify() -> Self {
        Self {
            read: false,
            write: false,
            write_without_response: false,
            notify: true,
        }
    }

    /// Whether a central may write to this characteristic
    pub fn is_writable(&self) -> bool {
        self.write || self.write_without_response
    }
}

impl CharacteristicPermissions {
    pub fn read_only() -> Self {
        Self {
            readable: true,
            writable: false,
        }
    }

    pub fn write_only() -> Self {
        Self {
            readable: false,
            writable: true,
        }
    }
}

impl CharacteristicDefinition {
    /// Inbound characteristic: centrals write payloads here
    pub fn write_target(uuid: Uuid) -> Self {
        Self {
            uuid,
            properties: CharacteristicProperties::write_only(),
            permissions: CharacteristicPermissions::write_only(),
            value: None,
        }
    }

    /// Outbound characteristic: the peripheral notifies through it
    pub fn notify_target(uuid: Uuid) -> Self {
        Self {
            uuid,
            properties: CharacteristicProperties::notify(),
            permissions: CharacteristicPermissions::read_only(),
            value: None,
        }
    }
}

impl ServiceDefinition {
    /// Service with one write characteristic and one notify characteristic
    pub fn standard(service_uuid: Uuid, write_uuid: Uuid, notify_uuid: Uuid) -> Self {
        Self {
            uuid: service_uuid,
            characteristics: vec![
                CharacteristicDefinition::write_target(write_uuid),
                CharacteristicDefinition::notify_target(notify_uuid),
            ],
        }
    }

    /// Get characteristic by UUID
    pub fn get_characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicDefinition> {
        self.characteristics.iter().find(|c| &c.uuid == uuid)
    }

    /// Get mutable characteristic by UUID
    pub fn get_characteristic_mut(&mut self, uuid: &Uuid) -> Option<&mut CharacteristicDefinition> {
        self.characteristics.iter_mut().find(|c| &c.uuid == uuid)
    }
}

impl Default for ServiceDefinition {
    fn default() -> Self {
        Self::standard(SERVICE_UUID, WRITE_CHAR_UUID, NOTIFY_CHAR_UUID)
    }
}
