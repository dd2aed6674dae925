//! FFI data types and JSON schemas (v1)
//!
//! All data exchanged across the host boundary uses JSON. Requests carry a
//! `version` field for future compatibility.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ble::{AdapterInfo, ConnectionState, PeripheralEvent, RequestId};
use crate::config::PeripheralConfig;
use crate::permissions::Permission;
use crate::session::SessionStatus;

/// Version 1 of the FFI protocol
pub const FFI_VERSION: u32 = 1;

// ============================================================================
// Result envelope
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FfiResult<T> {
    Ok { ok: bool, data: T },
    Err { ok: bool, code: String, message: String },
}

impl<T> FfiResult<T> {
    pub fn success(data: T) -> Self {
        FfiResult::Ok { ok: true, data }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        FfiResult::Err {
            ok: false,
            code: code.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Session setup
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub version: u32,
    /// Host platform name reported in adapter info
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Runtime permissions the host has already been granted
    #[serde(default)]
    pub granted_permissions: Vec<Permission>,
    #[serde(default)]
    pub config: PeripheralConfig,
}

fn default_platform() -> String {
    "Android".to_string()
}

// ============================================================================
// Host -> core callbacks
// ============================================================================

/// Platform callback the host forwards into the core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostCallback {
    AdvertiseStarted,
    AdvertiseFailed {
        code: i32,
    },
    #[serde(rename_all = "camelCase")]
    ConnectionStateChanged {
        remote_id: String,
        state: ConnectionState,
    },
    #[serde(rename_all = "camelCase")]
    CharacteristicWrite {
        remote_id: String,
        characteristic: Uuid,
        #[serde(with = "crate::util::base64_bytes")]
        payload: Vec<u8>,
        #[serde(default)]
        response_needed: bool,
        #[serde(default)]
        request_id: Option<RequestId>,
    },
    AdapterPowerChanged {
        powered: bool,
    },
}

// ============================================================================
// Core -> host events
// ============================================================================

/// Event shape the presentation layer listens for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum HostEvent {
    #[serde(rename = "onAdvertisingStart")]
    AdvertisingStart,
    #[serde(rename = "onAdvertisingFailure")]
    AdvertisingFailure { code: i32, reason: String },
    #[serde(rename = "onDeviceConnected", rename_all = "camelCase")]
    DeviceConnected { remote_id: String },
    #[serde(rename = "onDeviceDisconnected", rename_all = "camelCase")]
    DeviceDisconnected { remote_id: String },
    #[serde(rename = "onDataReceived")]
    DataReceived { data: String },
    #[serde(rename = "onUnknownCharacteristic", rename_all = "camelCase")]
    UnknownCharacteristic {
        remote_id: String,
        characteristic: Uuid,
    },
}

impl From<PeripheralEvent> for HostEvent {
    fn from(event: PeripheralEvent) -> Self {
        match event {
            PeripheralEvent::AdvertisingStarted => HostEvent::AdvertisingStart,
            PeripheralEvent::AdvertisingFailed { code } => HostEvent::AdvertisingFailure {
                code: code.code(),
                reason: code.to_string(),
            },
            PeripheralEvent::DeviceConnected { remote_id } => {
                HostEvent::DeviceConnected { remote_id }
            }
            PeripheralEvent::DeviceDisconnected { remote_id } => {
                HostEvent::DeviceDisconnected { remote_id }
            }
            PeripheralEvent::DataReceived { payload } => HostEvent::DataReceived { data: payload },
            PeripheralEvent::UnknownCharacteristic {
                remote_id,
                characteristic,
            } => HostEvent::UnknownCharacteristic {
                remote_id,
                characteristic,
            },
        }
    }
}

// ============================================================================
// Diagnostics
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub version: u32,
    /// One of `idle`, `starting`, `advertising`, `failed`
    pub advertiser: String,
    pub failure_code: Option<i32>,
    pub server_open: bool,
    pub connected_remote: Option<String>,
    pub pending_commands: usize,
    pub adapter: AdapterInfo,
}

impl SessionStatusResponse {
    pub fn new(status: SessionStatus, pending_commands: usize, adapter: AdapterInfo) -> Self {
        use crate::ble::AdvertiserState;

        let (advertiser, failure_code) = match status.advertiser {
            AdvertiserState::Idle => ("idle", None),
            AdvertiserState::Starting => ("starting", None),
            AdvertiserState::Advertising => ("advertising", None),
            AdvertiserState::Failed(code) => ("failed", Some(code.code())),
        };
        Self {
            version: FFI_VERSION,
            advertiser: advertiser.to_string(),
            failure_code,
            server_open: status.server_open,
            connected_remote: status.connected_remote,
            pending_commands,
            adapter,
        }
    }
}
