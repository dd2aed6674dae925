//! Host-driven BLE platform
//!
//! In host-driven mode the operating system's BLE service (e.g. the Android
//! `BluetoothGattServer`) owns the radio. Rust never calls into it directly:
//! every platform request becomes a [`PlatformCommand`] queued here, and the
//! host drains the queue in order and executes each command. Results come back
//! through the session's callback entry points.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use super::adapter::{AdapterInfo, BlePlatform, GattStatus, PlatformError, RequestId};
use super::advertiser::AdvertisingConfig;
use super::gatt_service::ServiceDefinition;

/// Maximum number of undrained commands before sends are refused
const MAX_PENDING_COMMANDS: usize = 256;

/// Work item for the host BLE stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlatformCommand {
    StartAdvertising {
        config: AdvertisingConfig,
    },
    StopAdvertising,
    OpenGattServer {
        services: Vec<ServiceDefinition>,
    },
    CloseGattServer,
    #[serde(rename_all = "camelCase")]
    SendNotification {
        remote_id: String,
        characteristic: Uuid,
        #[serde(with = "crate::util::base64_bytes")]
        payload: Vec<u8>,
    },
    #[serde(rename_all = "camelCase")]
    SendWriteResponse {
        remote_id: String,
        request_id: RequestId,
        status: GattStatus,
    },
    #[serde(rename_all = "camelCase")]
    Disconnect {
        remote_id: String,
    },
}

/// [`BlePlatform`] that hands every request to the host as a queued command
pub struct HostDrivenPlatform {
    commands: Mutex<VecDeque<PlatformCommand>>,
    powered: AtomicBool,
    platform_name: String,
}

impl HostDrivenPlatform {
    pub fn new(platform_name: impl Into<String>) -> Self {
        Self {
            commands: Mutex::new(VecDeque::new()),
            powered: AtomicBool::new(true),
            platform_name: platform_name.into(),
        }
    }

    /// Host reports adapter power changes
    pub fn set_powered(&self, powered: bool) {
        tracing::info!("Host adapter powered: {}", powered);
        self.powered.store(powered, Ordering::SeqCst);
    }

    pub fn is_powered(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }

    /// Pop the oldest command for the host to execute
    pub fn next_command(&self) -> Option<PlatformCommand> {
        self.commands.lock().pop_front()
    }

    /// Take every queued command, oldest first
    pub fn drain_commands(&self) -> Vec<PlatformCommand> {
        self.commands.lock().drain(..).collect()
    }

    pub fn pending_commands(&self) -> usize {
        self.commands.lock().len()
    }

    fn push(&self, command: PlatformCommand) -> bool {
        let mut commands = self.commands.lock();
        if commands.len() >= MAX_PENDING_COMMANDS {
            tracing::warn!(
                "Host command queue full ({} pending), dropping {:?}",
                commands.len(),
                command
            );
            return false;
        }
        commands.push_back(command);
        true
    }

    fn require_powered(&self) -> Result<(), PlatformError> {
        if self.is_powered() {
            Ok(())
        } else {
            Err(PlatformError::AdapterNotPowered)
        }
    }
}

#[async_trait]
impl BlePlatform for HostDrivenPlatform {
    async fn start_advertising(&self, config: &AdvertisingConfig) -> Result<(), PlatformError> {
        self.require_powered()?;
        if !self.push(PlatformCommand::StartAdvertising {
            config: config.clone(),
        }) {
            return Err(PlatformError::Other("host command queue full".to_string()));
        }
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), PlatformError> {
        self.push(PlatformCommand::StopAdvertising);
        Ok(())
    }

    async fn open_gatt_server(&self, services: &[ServiceDefinition]) -> Result<(), PlatformError> {
        self.require_powered()?;
        if !self.push(PlatformCommand::OpenGattServer {
            services: services.to_vec(),
        }) {
            return Err(PlatformError::Other("host command queue full".to_string()));
        }
        Ok(())
    }

    async fn close_gatt_server(&self) -> Result<(), PlatformError> {
        self.push(PlatformCommand::CloseGattServer);
        Ok(())
    }

    fn send_notification(&self, remote_id: &str, characteristic: Uuid, payload: &[u8]) -> bool {
        self.is_powered()
            && self.push(PlatformCommand::SendNotification {
                remote_id: remote_id.to_string(),
                characteristic,
                payload: payload.to_vec(),
            })
    }

    fn send_write_response(&self, remote_id: &str, request_id: RequestId, status: GattStatus) -> bool {
        self.push(PlatformCommand::SendWriteResponse {
            remote_id: remote_id.to_string(),
            request_id,
            status,
        })
    }

    fn disconnect(&self, remote_id: &str) {
        self.push(PlatformCommand::Disconnect {
            remote_id: remote_id.to_string(),
        });
    }

    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            platform: self.platform_name.clone(),
            name: format!("{} Bluetooth (Host-Driven)", self.platform_name),
            address: "00:00:00:00:00:00".to_string(),
            powered: self.is_powered(),
        }
    }
}
