//! Peripheral session
//!
//! Ties the advertiser and the GATT server together into one scoped resource
//! and exposes the command surface the application drives. Platform callbacks
//! enter through the `on_*` methods; their effects leave through the event
//! bridge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::ble::{
    AdapterInfo, AdvertiseError, AdvertiseErrorCode, Advertiser, AdvertiserState, BlePlatform,
    ConnectionState, EventBridge, EventStream, GattServer, StartOutcome, WriteOutcome,
    WriteRequest,
};
use crate::config::PeripheralConfig;
use crate::permissions::PermissionChecker;
use crate::PeripheralError;

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub advertiser: AdvertiserState,
    pub server_open: bool,
    pub connected_remote: Option<String>,
}

struct SessionShared {
    config: PeripheralConfig,
    platform: Arc<dyn BlePlatform>,
    permissions: Box<dyn PermissionChecker>,
    events: EventBridge,
    advertiser: Advertiser,
    server: GattServer,
    /// Serializes start, shutdown and failure teardown
    lifecycle: tokio::sync::Mutex<()>,
    /// Platform resources may be held and need releasing
    active: AtomicBool,
}

/// One advertise + serve session on a platform BLE stack
#[derive(Clone)]
pub struct PeripheralSession {
    shared: Arc<SessionShared>,
}

impl PeripheralSession {
    pub fn new(
        config: PeripheralConfig,
        platform: Arc<dyn BlePlatform>,
        permissions: impl PermissionChecker + 'static,
    ) -> Self {
        let events = EventBridge::new();
        Self {
            shared: Arc::new(SessionShared {
                advertiser: Advertiser::new(Arc::clone(&platform), events.clone()),
                server: GattServer::new(Arc::clone(&platform), events.clone()),
                config,
                platform,
                permissions: Box::new(permissions),
                events,
                lifecycle: tokio::sync::Mutex::new(()),
                active: AtomicBool::new(false),
            }),
        }
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> EventStream {
        self.shared.events.subscribe()
    }

    pub fn config(&self) -> &PeripheralConfig {
        &self.shared.config
    }

    pub fn advertiser(&self) -> &Advertiser {
        &self.shared.advertiser
    }

    pub fn server(&self) -> &GattServer {
        &self.shared.server
    }

    pub fn adapter_info(&self) -> AdapterInfo {
        self.shared.platform.info()
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            advertiser: self.shared.advertiser.state(),
            server_open: self.shared.server.is_open(),
            connected_remote: self.shared.server.connection().map(|c| c.remote_id),
        }
    }

    /// Start advertising and open the GATT server together
    ///
    /// Returns once both requests are submitted; whether advertising actually
    /// came up is reported through `AdvertisingStarted` / `AdvertisingFailed`.
    /// If either half cannot be brought up, the other is rolled back.
    pub async fn start_peripheral_mode(&self) -> Result<(), PeripheralError> {
        let shared = &self.shared;
        let _guard = shared.lifecycle.lock().await;

        let missing = shared.permissions.missing(&shared.config.required_permissions);
        if !missing.is_empty() {
            tracing::warn!("Missing Bluetooth permissions: {:?}", missing);
            return Err(PeripheralError::PermissionDenied(missing));
        }

        if shared.server.is_open()
            && matches!(
                shared.advertiser.state(),
                AdvertiserState::Starting | AdvertiserState::Advertising
            )
        {
            tracing::debug!("Peripheral mode already running");
            return Ok(());
        }

        tracing::info!("Starting BLE peripheral mode on {}", shared.platform.info());
        shared.active.store(true, Ordering::SeqCst);

        let (advertised, served) = futures::join!(
            shared.advertiser.start(shared.config.advertising_config()),
            shared.server.setup(shared.config.service_definitions()),
        );

        match (advertised, served) {
            (Ok(outcome), Ok(())) => {
                // The platform may have reported failure while the server was opening
                if let AdvertiserState::Failed(code) = shared.advertiser.state() {
                    tracing::error!(
                        "Advertising failed during startup, closing GATT server: {}",
                        code
                    );
                    if let Err(close_err) = shared.server.close().await {
                        tracing::warn!("Rollback close failed: {}", close_err);
                    }
                    shared.active.store(false, Ordering::SeqCst);
                    return Err(AdvertiseError::StartFailed(code).into());
                }
                if let StartOutcome::Pending { attempt } = outcome {
                    self.arm_advertise_timeout(attempt);
                }
                tracing::info!("BLE peripheral mode started");
                Ok(())
            }
            (Ok(_), Err(e)) => {
                tracing::error!("GATT server setup failed, stopping advertising: {}", e);
                if let Err(stop_err) = shared.advertiser.stop().await {
                    tracing::warn!("Rollback stop failed: {}", stop_err);
                }
                shared.active.store(false, Ordering::SeqCst);
                Err(e.into())
            }
            (Err(e), served) => {
                tracing::error!("Advertising start failed, closing GATT server: {}", e);
                if served.is_ok() {
                    if let Err(close_err) = shared.server.close().await {
                        tracing::warn!("Rollback close failed: {}", close_err);
                    }
                }
                shared.active.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    fn arm_advertise_timeout(&self, attempt: u64) {
        let weak: Weak<SessionShared> = Arc::downgrade(&self.shared);
        let timeout = self.shared.config.advertise_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shared.advertiser.expire_start(attempt).await {
                close_after_advertise_failure(&shared).await;
            }
        });
    }

    /// Push `payload` to the connected central
    pub fn notify(&self, payload: &[u8]) -> Result<(), PeripheralError> {
        self.shared.server.notify(payload)?;
        Ok(())
    }

    /// Release advertising and the GATT server
    pub async fn shutdown(&self) -> Result<(), PeripheralError> {
        let shared = &self.shared;
        let _guard = shared.lifecycle.lock().await;

        tracing::info!("Shutting down BLE peripheral mode");
        let stopped = match shared.advertiser.stop().await {
            Ok(()) | Err(AdvertiseError::NotAdvertising) => Ok(()),
            Err(e) => Err(e),
        };
        let closed = shared.server.close().await;
        shared.active.store(false, Ordering::SeqCst);

        stopped?;
        closed?;
        Ok(())
    }

    /// Platform callback: advertising is live
    pub fn on_advertise_started(&self) {
        self.shared.advertiser.on_start_success();
    }

    /// Platform callback: advertising failed with a raw platform code
    pub async fn on_advertise_failed(&self, code: i32) {
        let code = AdvertiseErrorCode::from_code(code);
        if self.shared.advertiser.on_start_failure(code) {
            close_after_advertise_failure(&self.shared).await;
        }
    }

    /// Platform callback: a central's link state changed
    pub fn on_connection_state_change(&self, remote_id: &str, state: ConnectionState) {
        self.shared.server.on_connection_state_change(remote_id, state);
    }

    /// Platform callback: a central wrote to a characteristic
    pub fn on_characteristic_write(&self, request: WriteRequest) -> WriteOutcome {
        let outcome = self.shared.server.on_characteristic_write_request(request);

        if let (WriteOutcome::Delivered { payload }, Some(reply)) =
            (&outcome, self.shared.config.reply_on_receive.as_ref())
        {
            tracing::debug!(
                "Replying to '{}'",
                crate::util::common::preview(payload.as_bytes(), 32)
            );
            if let Err(e) = self.shared.server.notify(reply.as_bytes()) {
                tracing::warn!("Auto-reply notification not sent: {}", e);
            }
        }

        outcome
    }
}

/// Advertising will not come up for this session; drop the server half too
///
/// Waits behind any start or shutdown in progress. A start that is still
/// running handles the failure itself, and a newer start owns the server.
async fn close_after_advertise_failure(shared: &SessionShared) {
    let _guard = shared.lifecycle.lock().await;
    if !matches!(shared.advertiser.state(), AdvertiserState::Failed(_)) {
        tracing::debug!("Advertising restarted since the failure, keeping GATT server");
        return;
    }
    if let Err(e) = shared.server.close().await {
        tracing::warn!("Failed to close GATT server after advertising failure: {}", e);
    }
    shared.active.store(false, Ordering::SeqCst);
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        let platform = Arc::clone(&self.platform);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::info!("Session dropped while active, releasing BLE resources");
                handle.spawn(async move {
                    if let Err(e) = platform.stop_advertising().await {
                        tracing::warn!("Failed to stop advertising on drop: {}", e);
                    }
                    if let Err(e) = platform.close_gatt_server().await {
                        tracing::warn!("Failed to close GATT server on drop: {}", e);
                    }
                });
            }
            Err(_) => {
                tracing::warn!("Session dropped outside a runtime; BLE resources not released");
            }
        }
    }
}
