//! Platform-agnostic Bluetooth peripheral adapter
//!
//! This module defines the capability set a host BLE stack must provide so the
//! peripheral controller can run on top of it. The radio, link layer and ATT
//! protocol stay with the platform; this crate only drives them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::advertiser::AdvertisingConfig;
use super::gatt_service::ServiceDefinition;

/// Platform BLE stack consumed by the peripheral controller
///
/// Advertising and server lifecycle calls only submit work; their outcome is
/// reported back through the session's callback entry points. Notification and
/// write-response sends are synchronous because they are issued from inside
/// callback handling and under the connection lock.
#[async_trait]
pub trait BlePlatform: Send + Sync {
    /// Submit an advertising request
    ///
    /// # Returns
    /// * `Ok(())` if the platform accepted the request; the result arrives later
    /// * `Err(PlatformError)` if it could not even be submitted
    async fn start_advertising(&self, config: &AdvertisingConfig) -> Result<(), PlatformError>;

    /// Stop (or cancel) advertising
    async fn stop_advertising(&self) -> Result<(), PlatformError>;

    /// Open the GATT server and register the given services
    async fn open_gatt_server(&self, services: &[ServiceDefinition]) -> Result<(), PlatformError>;

    /// Close the GATT server, dropping any connection
    async fn close_gatt_server(&self) -> Result<(), PlatformError>;

    /// Push a notification of `characteristic` to `remote_id`
    ///
    /// Returns `false` if the platform refused the send.
    fn send_notification(&self, remote_id: &str, characteristic: Uuid, payload: &[u8]) -> bool;

    /// Acknowledge a write request
    fn send_write_response(&self, remote_id: &str, request_id: RequestId, status: GattStatus) -> bool;

    /// Drop the link to `remote_id`
    fn disconnect(&self, remote_id: &str);

    /// Get adapter information (platform-specific details)
    fn info(&self) -> AdapterInfo;
}

/// Opaque token identifying one write request on the platform side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub i64);

/// ATT status returned in a write response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GattStatus {
    Success,
    Failure,
}

impl GattStatus {
    /// Raw ATT status value
    pub fn code(&self) -> u8 {
        match self {
            GattStatus::Success => 0x00,
            GattStatus::Failure => 0x0e,
        }
    }
}

/// Information about the BLE adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterInfo {
    /// Platform name (e.g., "Android", "Linux")
    pub platform: String,
    /// Adapter name or identifier
    pub name: String,
    /// Adapter address
    pub address: String,
    /// Whether the adapter is powered on
    pub powered: bool,
}

impl std::fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) - {} - Powered: {}",
            self.name, self.platform, self.address, self.powered
        )
    }
}

/// Errors raised at the platform boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("BLE adapter not powered")]
    AdapterNotPowered,

    #[error("Platform error: {0}")]
    Other(String),
}
