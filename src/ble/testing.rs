//! Recording platform used by the unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use uuid::Uuid;

use super::adapter::{AdapterInfo, BlePlatform, GattStatus, PlatformError, RequestId};
use super::advertiser::AdvertisingConfig;
use super::gatt_service::ServiceDefinition;

#[derive(Default)]
struct Recorded {
    advertise_requests: usize,
    stop_requests: usize,
    opened: Vec<Vec<ServiceDefinition>>,
    closed: usize,
    notifications: Vec<(String, Uuid, Vec<u8>)>,
    write_responses: Vec<(String, RequestId, GattStatus)>,
    disconnects: Vec<String>,
    fail_advertising: bool,
    fail_open: bool,
    refuse_notifications: bool,
    open_gate: Option<Arc<Notify>>,
    server_open: bool,
}

#[derive(Default)]
pub struct MockPlatform {
    recorded: Mutex<Recorded>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_advertising(&self, fail: bool) {
        self.recorded.lock().fail_advertising = fail;
    }

    pub fn fail_open(&self, fail: bool) {
        self.recorded.lock().fail_open = fail;
    }

    pub fn refuse_notifications(&self, refuse: bool) {
        self.recorded.lock().refuse_notifications = refuse;
    }

    /// Hold every `open_gatt_server` call until the returned gate is notified
    pub fn gate_open(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.recorded.lock().open_gate = Some(gate.clone());
        gate
    }

    /// Whether the platform-side server is currently open
    pub fn server_open(&self) -> bool {
        self.recorded.lock().server_open
    }

    pub fn advertise_requests(&self) -> usize {
        self.recorded.lock().advertise_requests
    }

    pub fn stop_requests(&self) -> usize {
        self.recorded.lock().stop_requests
    }

    pub fn opened(&self) -> Vec<Vec<ServiceDefinition>> {
        self.recorded.lock().opened.clone()
    }

    pub fn closed(&self) -> usize {
        self.recorded.lock().closed
    }

    pub fn notifications(&self) -> Vec<(String, Uuid, Vec<u8>)> {
        self.recorded.lock().notifications.clone()
    }

    pub fn write_responses(&self) -> Vec<(String, RequestId, GattStatus)> {
        self.recorded.lock().write_responses.clone()
    }

    pub fn disconnects(&self) -> Vec<String> {
        self.recorded.lock().disconnects.clone()
    }
}

#[async_trait]
impl BlePlatform for MockPlatform {
    async fn start_advertising(&self, _config: &AdvertisingConfig) -> Result<(), PlatformError> {
        let mut recorded = self.recorded.lock();
        if recorded.fail_advertising {
            return Err(PlatformError::AdapterNotPowered);
        }
        recorded.advertise_requests += 1;
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), PlatformError> {
        self.recorded.lock().stop_requests += 1;
        Ok(())
    }

    async fn open_gatt_server(&self, services: &[ServiceDefinition]) -> Result<(), PlatformError> {
        let gate = {
            let mut recorded = self.recorded.lock();
            if recorded.fail_open {
                return Err(PlatformError::Other("gatt server unavailable".to_string()));
            }
            recorded.opened.push(services.to_vec());
            recorded.open_gate.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.recorded.lock().server_open = true;
        Ok(())
    }

    async fn close_gatt_server(&self) -> Result<(), PlatformError> {
        let mut recorded = self.recorded.lock();
        recorded.closed += 1;
        recorded.server_open = false;
        Ok(())
    }

    fn send_notification(&self, remote_id: &str, characteristic: Uuid, payload: &[u8]) -> bool {
        let mut recorded = self.recorded.lock();
        if recorded.refuse_notifications {
            return false;
        }
        recorded
            .notifications
            .push((remote_id.to_string(), characteristic, payload.to_vec()));
        true
    }

    fn send_write_response(&self, remote_id: &str, request_id: RequestId, status: GattStatus) -> bool {
        self.recorded
            .lock()
            .write_responses
            .push((remote_id.to_string(), request_id, status));
        true
    }

    fn disconnect(&self, remote_id: &str) {
        self.recorded.lock().disconnects.push(remote_id.to_string());
    }

    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            platform: "Mock".to_string(),
            name: "Recording adapter".to_string(),
            address: "00:00:00:00:00:00".to_string(),
            powered: true,
        }
    }
}
