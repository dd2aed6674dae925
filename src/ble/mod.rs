//! Bluetooth Low Energy peripheral core
//!
//! Advertising lifecycle, the GATT server state machine, single-connection
//! tracking and the event bridge, all driven through a [`BlePlatform`].

pub mod adapter;
pub mod advertiser;
pub mod connection;
pub mod events;
pub mod gatt_server;
pub mod gatt_service;
pub mod host;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::{AdapterInfo, BlePlatform, GattStatus, PlatformError, RequestId};
pub use advertiser::{
    AdvertiseError, AdvertiseErrorCode, AdvertiseMode, Advertiser, AdvertiserState,
    AdvertisingConfig, StartOutcome, TxPower,
};
pub use connection::{Admission, Connection, ConnectionState, ConnectionTracker};
pub use events::{EventBridge, EventStream, PeripheralEvent};
pub use gatt_server::{GattResult, GattServer, ServerError, WriteOutcome, WriteRequest};
pub use gatt_service::{
    CharacteristicDefinition, CharacteristicPermissions, CharacteristicProperties,
    ServiceDefinition, NOTIFY_CHAR_UUID, SERVICE_UUID, WRITE_CHAR_UUID,
};
pub use host::{HostDrivenPlatform, PlatformCommand};
