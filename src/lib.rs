//! gattlink - BLE peripheral core
//!
//! Advertises a connectable peripheral, serves a GATT service with one write
//! characteristic and one notify characteristic, tracks the single connected
//! central and reports everything that happens as [`ble::PeripheralEvent`]s.
//!
//! The radio itself stays behind [`ble::BlePlatform`]. Mobile hosts use the
//! host-driven platform and the JSON bridge in [`ffi`].

pub(crate) mod logging;

pub mod ble;
pub mod config;
pub mod ffi;
pub mod permissions;
pub mod session;
pub mod util;

use thiserror::Error;

pub use ble::{
    BlePlatform, ConnectionState, EventStream, HostDrivenPlatform, PeripheralEvent,
    PlatformCommand,
};
pub use config::PeripheralConfig;
pub use logging::{init_logging, parse_log_level};
pub use permissions::{GrantedPermissions, Permission, PermissionChecker};
pub use session::{PeripheralSession, SessionStatus};

/// Errors returned by the peripheral session
#[derive(Error, Debug)]
pub enum PeripheralError {
    #[error(
        "Bluetooth permissions required: {}",
        .0.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")
    )]
    PermissionDenied(Vec<Permission>),

    #[error("Advertising error: {0}")]
    Advertise(#[from] ble::AdvertiseError),

    #[error("GATT server error: {0}")]
    Server(#[from] ble::ServerError),

    #[error("Platform error: {0}")]
    Platform(#[from] ble::PlatformError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl PeripheralError {
    /// Stable error code for the host bridge
    pub fn code(&self) -> &'static str {
        match self {
            PeripheralError::PermissionDenied(_) => "ERR_PERMISSION",
            PeripheralError::Advertise(_) => "ERR_ADVERTISE",
            PeripheralError::Server(ble::ServerError::NoActiveConnection) => "ERR_NOT_CONNECTED",
            PeripheralError::Server(_) => "ERR_GATT",
            PeripheralError::Platform(_) => "ERR_PLATFORM",
            PeripheralError::Config(_) => "ERR_CONFIG",
        }
    }
}
