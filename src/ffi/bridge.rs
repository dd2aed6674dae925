//! Host bridge
//!
//! String-in/string-out entry points a host binding (JNI, Swift, C) wraps.
//! Sessions live in a handle table; every platform request the core makes is
//! queued as a [`PlatformCommand`] the host pulls with [`next_command`], and
//! every platform callback comes back in through [`push_callback`]. Results
//! are JSON [`FfiResult`] envelopes.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;

use super::runtime;
use super::types::*;
use crate::ble::{EventStream, HostDrivenPlatform, PlatformCommand, RequestId, WriteRequest};
use crate::logging::{h_debug, h_info, h_warn};
use crate::permissions::GrantedPermissions;
use crate::session::PeripheralSession;

/// Message returned once peripheral mode is up
pub const STARTED_MESSAGE: &str = "BLE Peripheral Mode started";

struct BridgeSession {
    session: PeripheralSession,
    platform: Arc<HostDrivenPlatform>,
    events: Mutex<EventStream>,
}

// Global state for session instances; slots are never reused so stale handles
// cannot reach a newer session
lazy_static::lazy_static! {
    static ref SESSIONS: Arc<Mutex<Vec<Option<Arc<BridgeSession>>>>> =
        Arc::new(Mutex::new(Vec::new()));
}

// =============================================================================
// Initialization and lifecycle
// =============================================================================

/// Create a session from a JSON [`CreateSessionRequest`]
///
/// Returns a handle to the session, or -1 on failure.
pub fn create_session(request_json: &[u8]) -> i64 {
    let result: Result<i64, String> = (|| {
        runtime::ensure_runtime()?;

        let request: CreateSessionRequest = serde_json::from_slice(request_json)
            .map_err(|e| format!("Failed to parse session request: {}", e))?;
        if request.version != FFI_VERSION {
            return Err(format!("Unsupported FFI version {}", request.version));
        }
        request.config.validate().map_err(|e| e.to_string())?;

        if request.config.enable_logging {
            crate::logging::init_logging(request.config.log_level.as_deref());
        }

        let platform = Arc::new(HostDrivenPlatform::new(request.platform));
        let session = PeripheralSession::new(
            request.config,
            platform.clone(),
            GrantedPermissions::new(request.granted_permissions),
        );
        let events = session.subscribe();

        let mut sessions = SESSIONS.lock();
        sessions.push(Some(Arc::new(BridgeSession {
            session,
            platform,
            events: Mutex::new(events),
        })));
        let handle = (sessions.len() - 1) as i64;

        h_info!("Peripheral session created with handle {}", handle);
        Ok(handle)
    })();

    match result {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!("Failed to create session: {}", e);
            -1
        }
    }
}

/// Library version
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Stop advertising and close the GATT server for `handle`
pub fn shutdown(handle: i64) -> String {
    let result = get_session(handle).and_then(|bridge| {
        h_info!("Shutting down session handle {}", handle);
        runtime::block_on(bridge.session.shutdown())
            .map_err(internal)?
            .map_err(|e| failure(e.code(), e.to_string()))?;
        Ok(true)
    });
    respond(result)
}

/// Release `handle`; any still-active radio work is torn down in the background
pub fn destroy_session(handle: i64) -> bool {
    let removed = {
        let mut sessions = SESSIONS.lock();
        if handle < 0 || handle as usize >= sessions.len() {
            return false;
        }
        sessions[handle as usize].take()
    };

    match removed {
        Some(bridge) => {
            h_info!("Destroying session handle {}", handle);
            // Dropped inside the runtime so teardown can be spawned
            if let Err(e) = runtime::enter(move || drop(bridge)) {
                h_warn!("Session {} dropped without a runtime: {}", handle, e);
            }
            true
        }
        None => false,
    }
}

// =============================================================================
// Commands from the application
// =============================================================================

/// Start advertising and the GATT server
pub fn start_peripheral_mode(handle: i64) -> String {
    let result = get_session(handle).and_then(|bridge| {
        runtime::block_on(bridge.session.start_peripheral_mode())
            .map_err(internal)?
            .map_err(|e| {
                h_warn!("Failed to start peripheral mode: {}", e);
                failure(e.code(), e.to_string())
            })?;
        Ok(STARTED_MESSAGE.to_string())
    });
    respond(result)
}

/// Notify the connected central with `payload`
pub fn notify(handle: i64, payload: &[u8]) -> String {
    let result = get_session(handle).and_then(|bridge| {
        bridge
            .session
            .notify(payload)
            .map_err(|e| failure(e.code(), e.to_string()))?;
        Ok(true)
    });
    respond(result)
}

/// Session diagnostics as a [`SessionStatusResponse`]
pub fn status(handle: i64) -> String {
    let result = get_session(handle).map(|bridge| {
        SessionStatusResponse::new(
            bridge.session.status(),
            bridge.platform.pending_commands(),
            bridge.session.adapter_info(),
        )
    });
    respond(result)
}

// =============================================================================
// Host-driven platform API
// =============================================================================

/// Forward a JSON [`HostCallback`] from the platform stack
pub fn push_callback(handle: i64, callback_json: &[u8]) -> String {
    let result = get_session(handle).and_then(|bridge| {
        let callback: HostCallback = serde_json::from_slice(callback_json)
            .map_err(|e| failure("ERR_INVALID_INPUT", e.to_string()))?;
        h_debug!("Host callback on handle {}: {:?}", handle, callback);

        match callback {
            HostCallback::AdvertiseStarted => bridge.session.on_advertise_started(),
            HostCallback::AdvertiseFailed { code } => {
                runtime::block_on(bridge.session.on_advertise_failed(code)).map_err(internal)?
            }
            HostCallback::ConnectionStateChanged { remote_id, state } => {
                bridge.session.on_connection_state_change(&remote_id, state)
            }
            HostCallback::CharacteristicWrite {
                remote_id,
                characteristic,
                payload,
                response_needed,
                request_id,
            } => {
                let request_id = match (request_id, response_needed) {
                    (Some(id), _) => id,
                    // Never acknowledged, so the id is not sent anywhere
                    (None, false) => RequestId(0),
                    (None, true) => {
                        return Err(failure(
                            "ERR_INVALID_INPUT",
                            "characteristicWrite with responseNeeded requires a requestId",
                        ))
                    }
                };
                bridge.session.on_characteristic_write(WriteRequest {
                    remote_id,
                    characteristic,
                    payload,
                    response_required: response_needed,
                    request_id,
                });
            }
            HostCallback::AdapterPowerChanged { powered } => bridge.platform.set_powered(powered),
        }
        Ok(true)
    });
    respond(result)
}

/// Next queued [`PlatformCommand`] for the host to execute, or `null`
pub fn next_command(handle: i64) -> String {
    let result = get_session(handle).map(|bridge| {
        let command: Option<PlatformCommand> = bridge.platform.next_command();
        command
    });
    respond(result)
}

/// Next [`HostEvent`] for the presentation layer, or `null`
pub fn next_event(handle: i64) -> String {
    let result = get_session(handle).and_then(|bridge| {
        let mut events = bridge.events.lock();
        match events.try_recv() {
            Ok(event) => Ok(Some(HostEvent::from(event))),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(failure(
                "ERR_CLOSED",
                "event stream closed".to_string(),
            )),
        }
    });
    respond(result)
}

// =============================================================================
// Helper functions
// =============================================================================

type BridgeResult<T> = Result<T, FfiResult<()>>;

fn get_session(handle: i64) -> BridgeResult<Arc<BridgeSession>> {
    let sessions = SESSIONS.lock();
    if handle < 0 || handle as usize >= sessions.len() {
        return Err(failure(
            "ERR_INVALID_HANDLE",
            format!("Invalid handle: {}", handle),
        ));
    }
    sessions[handle as usize].clone().ok_or_else(|| {
        failure("ERR_INVALID_HANDLE", format!("Session {} destroyed", handle))
    })
}

fn failure(code: &str, message: impl Into<String>) -> FfiResult<()> {
    FfiResult::error(code, message)
}

fn internal(message: String) -> FfiResult<()> {
    failure("ERR_INTERNAL", message)
}

fn respond<T: Serialize>(result: BridgeResult<T>) -> String {
    let json = match result {
        Ok(data) => serde_json::to_string(&FfiResult::success(data)),
        Err(error) => serde_json::to_string(&error),
    };
    json.unwrap_or_else(|_| {
        r#"{"ok":false,"code":"ERR_FATAL","message":"Serialization failed"}"#.to_string()
    })
}
