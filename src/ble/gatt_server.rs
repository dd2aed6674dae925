//! GATT server state machine
//!
//! Owns the registered services, admits a single central, routes write
//! requests to the event bridge and pushes notifications to the admitted
//! central through the platform.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::adapter::{BlePlatform, GattStatus, PlatformError, RequestId};
use super::connection::{Admission, Connection, ConnectionState, ConnectionTracker};
use super::events::{EventBridge, PeripheralEvent};
use super::gatt_service::ServiceDefinition;

/// Result type for GATT operations
pub type GattResult<T> = Result<T, ServerError>;

/// One incoming write, alive only while it is handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub remote_id: String,
    pub characteristic: Uuid,
    pub payload: Vec<u8>,
    pub response_required: bool,
    pub request_id: RequestId,
}

/// What happened to a write request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Forwarded to the application as `DataReceived`
    Delivered { payload: String },
    /// Target UUID is not a registered write characteristic
    UnknownCharacteristic,
}

/// GATT server errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    #[error("Duplicate UUID in service definitions: {0}")]
    DuplicateUuid(Uuid),

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("GATT server already open with different services")]
    AlreadyOpen,

    #[error("GATT server not open")]
    NotOpen,

    #[error("GATT server closed while setup was in progress")]
    SetupCancelled,

    #[error("No active connection")]
    NoActiveConnection,

    #[error("Platform refused notification to {0}")]
    NotificationFailed(String),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

struct Registry {
    /// Definitions exactly as passed to `setup`
    definitions: Vec<ServiceDefinition>,
    notify_uuid: Uuid,
    writable: HashSet<Uuid>,
    values: HashMap<Uuid, Vec<u8>>,
    /// Distinguishes this registration from any later one
    generation: u64,
}

impl Registry {
    fn uuids(&self) -> HashSet<Uuid> {
        collect_uuids(&self.definitions).into_iter().collect()
    }
}

/// Every service and characteristic UUID, in definition order
fn collect_uuids(services: &[ServiceDefinition]) -> Vec<Uuid> {
    services
        .iter()
        .flat_map(|s| std::iter::once(s.uuid).chain(s.characteristics.iter().map(|c| c.uuid)))
        .collect()
}

/// Check a service list and return the UUID of its notify characteristic
pub fn validate_services(services: &[ServiceDefinition]) -> GattResult<Uuid> {
    let mut seen = HashSet::new();
    let mut notify_uuid = None;

    for service in services {
        if !seen.insert(service.uuid) {
            return Err(ServerError::DuplicateUuid(service.uuid));
        }

        for characteristic in &service.characteristics {
            if !seen.insert(characteristic.uuid) {
                return Err(ServerError::DuplicateUuid(characteristic.uuid));
            }

            let props = characteristic.properties;
            if props.notify {
                if !characteristic.permissions.readable {
                    return Err(ServerError::InvalidDefinition(format!(
                        "notify characteristic {} lacks read permission",
                        characteristic.uuid
                    )));
                }
                if notify_uuid.replace(characteristic.uuid).is_some() {
                    return Err(ServerError::InvalidDefinition(
                        "more than one notify characteristic".to_string(),
                    ));
                }
            }
            if props.is_writable() && !characteristic.permissions.writable {
                return Err(ServerError::InvalidDefinition(format!(
                    "write characteristic {} lacks write permission",
                    characteristic.uuid
                )));
            }
        }
    }

    notify_uuid.ok_or_else(|| ServerError::InvalidDefinition("no notify characteristic".to_string()))
}

/// Application-level GATT server on top of a [`BlePlatform`]
pub struct GattServer {
    platform: Arc<dyn BlePlatform>,
    events: EventBridge,
    tracker: ConnectionTracker,
    registry: Mutex<Option<Registry>>,
    generations: AtomicU64,
}

impl GattServer {
    pub fn new(platform: Arc<dyn BlePlatform>, events: EventBridge) -> Self {
        Self {
            platform,
            events,
            tracker: ConnectionTracker::new(),
            registry: Mutex::new(None),
            generations: AtomicU64::new(0),
        }
    }

    /// Register `services` and open the platform server
    ///
    /// Calling again with the identical list is a no-op.
    pub async fn setup(&self, services: Vec<ServiceDefinition>) -> GattResult<()> {
        let notify_uuid = validate_services(&services)?;
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut registry = self.registry.lock();
            if let Some(existing) = registry.as_ref() {
                if existing.definitions == services {
                    tracing::debug!("GATT server already set up with these services");
                    return Ok(());
                }
                let existing_uuids = existing.uuids();
                if let Some(dup) = collect_uuids(&services)
                    .into_iter()
                    .find(|uuid| existing_uuids.contains(uuid))
                {
                    return Err(ServerError::DuplicateUuid(dup));
                }
                return Err(ServerError::AlreadyOpen);
            }

            let writable = services
                .iter()
                .flat_map(|s| s.characteristics.iter())
                .filter(|c| c.properties.is_writable())
                .map(|c| c.uuid)
                .collect();
            let values = services
                .iter()
                .flat_map(|s| s.characteristics.iter())
                .filter_map(|c| c.value.clone().map(|v| (c.uuid, v)))
                .collect();

            *registry = Some(Registry {
                definitions: services.clone(),
                notify_uuid,
                writable,
                values,
                generation,
            });
        }

        if let Err(e) = self.platform.open_gatt_server(&services).await {
            tracing::error!("Failed to open GATT server: {}", e);
            let mut registry = self.registry.lock();
            if registry.as_ref().map(|r| r.generation) == Some(generation) {
                *registry = None;
            }
            return Err(ServerError::Platform(e));
        }

        // A close that ran while the platform was opening already dropped the
        // registry; the platform server it raced with must not outlive it
        let still_registered =
            self.registry.lock().as_ref().map(|r| r.generation) == Some(generation);
        if !still_registered {
            tracing::warn!("GATT server closed while opening, closing platform server again");
            self.platform.close_gatt_server().await?;
            return Err(ServerError::SetupCancelled);
        }

        tracing::info!(
            "GATT server open with {} service(s), notify characteristic {}",
            services.len(),
            notify_uuid
        );
        Ok(())
    }

    /// Close the platform server and forget the tracked connection
    pub async fn close(&self) -> GattResult<()> {
        if self.registry.lock().take().is_none() {
            return Ok(());
        }
        if let Some(connection) = self.tracker.clear() {
            tracing::info!("Dropping connection to {} on server close", connection.remote_id);
        }
        self.platform.close_gatt_server().await?;
        tracing::info!("GATT server closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.registry.lock().is_some()
    }

    /// Registered service definitions
    pub fn services(&self) -> Vec<ServiceDefinition> {
        self.registry
            .lock()
            .as_ref()
            .map(|r| r.definitions.clone())
            .unwrap_or_default()
    }

    /// Last value written to or notified from `uuid`
    pub fn characteristic_value(&self, uuid: &Uuid) -> Option<Vec<u8>> {
        self.registry.lock().as_ref()?.values.get(uuid).cloned()
    }

    /// Currently admitted central
    pub fn connection(&self) -> Option<Connection> {
        self.tracker.current()
    }

    /// Platform callback: a central's link state changed
    ///
    /// Connection events are emitted while the tracker slot is locked, so
    /// subscribers see them in the order the tracker applied them.
    pub fn on_connection_state_change(&self, remote_id: &str, new_state: ConnectionState) {
        match new_state {
            ConnectionState::Connected => {
                let admission = self.tracker.set_connected_with(remote_id, |admission| {
                    if *admission == Admission::Admitted {
                        self.events.emit(PeripheralEvent::DeviceConnected {
                            remote_id: remote_id.to_string(),
                        });
                    }
                });
                match admission {
                    Admission::Admitted => {
                        tracing::info!("Central connected: {}", remote_id);
                    }
                    Admission::AlreadyConnected => {
                        tracing::debug!("Duplicate connect from {}", remote_id);
                    }
                    Admission::Occupied { current } => {
                        tracing::warn!(
                            "Rejecting central {}: already serving {}",
                            remote_id,
                            current
                        );
                        self.platform.disconnect(remote_id);
                    }
                }
            }
            ConnectionState::Disconnected => {
                let removed = self.tracker.set_disconnected_with(remote_id, |removed| {
                    if removed.is_some() {
                        self.events.emit(PeripheralEvent::DeviceDisconnected {
                            remote_id: remote_id.to_string(),
                        });
                    }
                });
                match removed {
                    Some(connection) => {
                        tracing::info!(
                            "Central disconnected: {} (connected for {:?})",
                            remote_id,
                            connection.connected_at.elapsed()
                        );
                    }
                    None => {
                        tracing::debug!("Disconnect from untracked central {}", remote_id);
                    }
                }
            }
        }
    }

    /// Platform callback: a central wrote to a characteristic
    pub fn on_characteristic_write_request(&self, request: WriteRequest) -> WriteOutcome {
        let outcome = {
            let mut registry = self.registry.lock();
            match registry.as_mut() {
                Some(r) if r.writable.contains(&request.characteristic) => {
                    r.values.insert(request.characteristic, request.payload.clone());
                    WriteOutcome::Delivered {
                        payload: String::from_utf8_lossy(&request.payload).into_owned(),
                    }
                }
                _ => WriteOutcome::UnknownCharacteristic,
            }
        };

        match &outcome {
            WriteOutcome::Delivered { payload } => {
                tracing::info!(
                    "Received {} bytes from {} on {}",
                    request.payload.len(),
                    request.remote_id,
                    request.characteristic
                );
                tracing::debug!("   Data: {}", hex::encode(&request.payload));
                self.events.emit(PeripheralEvent::DataReceived {
                    payload: payload.clone(),
                });
            }
            WriteOutcome::UnknownCharacteristic => {
                tracing::warn!(
                    "Write from {} to unregistered characteristic {}",
                    request.remote_id,
                    request.characteristic
                );
                self.events.emit(PeripheralEvent::UnknownCharacteristic {
                    remote_id: request.remote_id.clone(),
                    characteristic: request.characteristic,
                });
            }
        }

        // Unregistered targets still get an answer, with a failure status
        let status = match &outcome {
            WriteOutcome::Delivered { .. } => GattStatus::Success,
            WriteOutcome::UnknownCharacteristic => GattStatus::Failure,
        };
        if request.response_required
            && !self
                .platform
                .send_write_response(&request.remote_id, request.request_id, status)
        {
            tracing::warn!(
                "Platform failed to send write response {:?} to {}",
                request.request_id,
                request.remote_id
            );
        }

        outcome
    }

    /// Notify the admitted central with `payload`
    ///
    /// The connection is read and the platform send issued under the tracker
    /// lock, so a racing disconnect can never redirect the send.
    pub fn notify(&self, payload: &[u8]) -> GattResult<()> {
        let notify_uuid = self
            .registry
            .lock()
            .as_ref()
            .map(|r| r.notify_uuid)
            .ok_or(ServerError::NotOpen)?;

        self.tracker.with_current(|current| {
            let connection = current.ok_or(ServerError::NoActiveConnection)?;

            if let Some(registry) = self.registry.lock().as_mut() {
                registry.values.insert(notify_uuid, payload.to_vec());
            }

            if !self
                .platform
                .send_notification(&connection.remote_id, notify_uuid, payload)
            {
                return Err(ServerError::NotificationFailed(connection.remote_id.clone()));
            }

            tracing::debug!(
                "Notified {} with {} bytes",
                connection.remote_id,
                payload.len()
            );
            Ok(())
        })
    }
}
