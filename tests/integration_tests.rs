//! Integration tests for the peripheral session

use async_trait::async_trait;
use gattlink::ble::{
    AdapterInfo, AdvertiseErrorCode, AdvertiserState, AdvertisingConfig, GattStatus,
    PlatformError, RequestId, ServerError, ServiceDefinition, WriteOutcome, WriteRequest,
    NOTIFY_CHAR_UUID, WRITE_CHAR_UUID,
};
use gattlink::{
    BlePlatform, ConnectionState, GrantedPermissions, HostDrivenPlatform, PeripheralConfig,
    PeripheralError, PeripheralEvent, PeripheralSession, PlatformCommand,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

fn host_session() -> (Arc<HostDrivenPlatform>, PeripheralSession) {
    let platform = Arc::new(HostDrivenPlatform::new("Android"));
    let session = PeripheralSession::new(
        PeripheralConfig::default(),
        platform.clone(),
        GrantedPermissions::all(),
    );
    (platform, session)
}

async fn started_session() -> (Arc<HostDrivenPlatform>, PeripheralSession) {
    let (platform, session) = host_session();
    session.start_peripheral_mode().await.unwrap();
    session.on_advertise_started();
    platform.drain_commands();
    (platform, session)
}

fn write(remote_id: &str, characteristic: Uuid, payload: &[u8], request_id: i64) -> WriteRequest {
    WriteRequest {
        remote_id: remote_id.to_string(),
        characteristic,
        payload: payload.to_vec(),
        response_required: true,
        request_id: RequestId(request_id),
    }
}

#[tokio::test]
async fn test_start_issues_advertise_and_server_commands() {
    let (platform, session) = host_session();
    let mut events = session.subscribe();

    session.start_peripheral_mode().await.unwrap();

    let commands = platform.drain_commands();
    assert_eq!(commands.len(), 2);
    match &commands[0] {
        PlatformCommand::StartAdvertising { config } => {
            assert_eq!(config.device_name, "Wizepass Test");
            assert!(config.connectable);
            assert!(config.include_device_name);
        }
        other => panic!("expected StartAdvertising, got {:?}", other),
    }
    assert_eq!(
        commands[1],
        PlatformCommand::OpenGattServer {
            services: vec![ServiceDefinition::default()]
        }
    );

    session.on_advertise_started();
    assert_eq!(events.try_recv().unwrap(), PeripheralEvent::AdvertisingStarted);
    assert!(events.try_recv().is_err());
    assert_eq!(session.status().advertiser, AdvertiserState::Advertising);
}

#[tokio::test]
async fn test_every_failure_code_reaches_the_application() {
    for code in AdvertiseErrorCode::KNOWN {
        let (platform, session) = host_session();
        let mut events = session.subscribe();
        session.start_peripheral_mode().await.unwrap();
        platform.drain_commands();

        session.on_advertise_failed(code.code()).await;

        assert_eq!(
            events.try_recv().unwrap(),
            PeripheralEvent::AdvertisingFailed { code }
        );
        assert!(events.try_recv().is_err());
        assert_eq!(session.status().advertiser, AdvertiserState::Failed(code));
        assert_eq!(platform.drain_commands(), vec![PlatformCommand::CloseGattServer]);
    }
}

#[tokio::test]
async fn test_notify_without_connection() {
    let (platform, session) = started_session().await;

    let result = session.notify(&[0x01]);
    assert!(matches!(
        result,
        Err(PeripheralError::Server(ServerError::NoActiveConnection))
    ));
    assert_eq!(platform.pending_commands(), 0);
}

#[tokio::test]
async fn test_connect_notify_disconnect_notify() {
    let (platform, session) = started_session().await;
    let mut events = session.subscribe();

    session.on_connection_state_change("AA:BB", ConnectionState::Connected);
    session.notify(&[0x01, 0x02]).unwrap();
    session.on_connection_state_change("AA:BB", ConnectionState::Disconnected);
    let second = session.notify(&[0x03]);

    assert!(matches!(
        second,
        Err(PeripheralError::Server(ServerError::NoActiveConnection))
    ));
    assert_eq!(
        platform.drain_commands(),
        vec![PlatformCommand::SendNotification {
            remote_id: "AA:BB".to_string(),
            characteristic: NOTIFY_CHAR_UUID,
            payload: vec![0x01, 0x02],
        }]
    );
    assert_eq!(
        events.try_recv().unwrap(),
        PeripheralEvent::DeviceConnected {
            remote_id: "AA:BB".to_string()
        }
    );
    assert_eq!(
        events.try_recv().unwrap(),
        PeripheralEvent::DeviceDisconnected {
            remote_id: "AA:BB".to_string()
        }
    );
}

#[tokio::test]
async fn test_write_is_forwarded_and_acknowledged() {
    let (platform, session) = started_session().await;
    let mut events = session.subscribe();
    session.on_connection_state_change("AA:BB", ConnectionState::Connected);
    events.try_recv().unwrap();

    let outcome = session.on_characteristic_write(write(
        "AA:BB",
        WRITE_CHAR_UUID,
        b"https://example.com",
        7,
    ));
    assert_eq!(
        outcome,
        WriteOutcome::Delivered {
            payload: "https://example.com".to_string()
        }
    );
    assert_eq!(
        events.try_recv().unwrap(),
        PeripheralEvent::DataReceived {
            payload: "https://example.com".to_string()
        }
    );
    assert!(events.try_recv().is_err());
    assert_eq!(
        platform.drain_commands(),
        vec![PlatformCommand::SendWriteResponse {
            remote_id: "AA:BB".to_string(),
            request_id: RequestId(7),
            status: GattStatus::Success,
        }]
    );
}

#[tokio::test]
async fn test_unregistered_write_is_still_acknowledged() {
    let (platform, session) = started_session().await;
    let mut events = session.subscribe();
    let stray = Uuid::from_u128(0x0000_beef_0000_1000_8000_00805f9b34fb);

    let outcome = session.on_characteristic_write(write("AA:BB", stray, b"hello", 9));
    assert_eq!(outcome, WriteOutcome::UnknownCharacteristic);

    // The notify characteristic is not a write target either
    session.on_characteristic_write(write("AA:BB", NOTIFY_CHAR_UUID, b"hello", 10));

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert!(received
        .iter()
        .all(|e| !matches!(e, PeripheralEvent::DataReceived { .. })));
    assert_eq!(received.len(), 2);

    let acks: Vec<_> = platform
        .drain_commands()
        .into_iter()
        .filter_map(|c| match c {
            PlatformCommand::SendWriteResponse {
                request_id, status, ..
            } => Some((request_id, status)),
            _ => None,
        })
        .collect();
    assert_eq!(
        acks,
        vec![
            (RequestId(9), GattStatus::Failure),
            (RequestId(10), GattStatus::Failure)
        ]
    );
}

#[tokio::test]
async fn test_repeated_setup_is_idempotent() {
    let (platform, session) = started_session().await;

    for _ in 0..3 {
        session
            .server()
            .setup(vec![ServiceDefinition::default()])
            .await
            .unwrap();
    }
    assert_eq!(platform.pending_commands(), 0);
    assert_eq!(session.server().services(), vec![ServiceDefinition::default()]);
}

#[tokio::test]
async fn test_second_central_is_disconnected() {
    let (platform, session) = started_session().await;
    let mut events = session.subscribe();

    session.on_connection_state_change("AA:BB", ConnectionState::Connected);
    session.on_connection_state_change("CC:DD", ConnectionState::Connected);

    assert_eq!(
        platform.drain_commands(),
        vec![PlatformCommand::Disconnect {
            remote_id: "CC:DD".to_string()
        }]
    );
    assert_eq!(session.status().connected_remote.as_deref(), Some("AA:BB"));
    assert_eq!(
        events.try_recv().unwrap(),
        PeripheralEvent::DeviceConnected {
            remote_id: "AA:BB".to_string()
        }
    );
    assert!(events.try_recv().is_err());

    // The rejected central's disconnect does not disturb the tracked one
    session.on_connection_state_change("CC:DD", ConnectionState::Disconnected);
    assert_eq!(session.status().connected_remote.as_deref(), Some("AA:BB"));
}

#[tokio::test]
async fn test_unpowered_adapter_fails_start() {
    let (platform, session) = host_session();
    platform.set_powered(false);

    let result = session.start_peripheral_mode().await;
    assert!(result.is_err());
    assert!(!session.status().server_open);
    assert_ne!(session.status().advertiser, AdvertiserState::Starting);
}

#[tokio::test]
async fn test_shutdown_then_restart() {
    let (platform, session) = started_session().await;
    session.shutdown().await.unwrap();
    assert_eq!(
        platform.drain_commands(),
        vec![PlatformCommand::StopAdvertising, PlatformCommand::CloseGattServer]
    );

    session.start_peripheral_mode().await.unwrap();
    assert_eq!(platform.drain_commands().len(), 2);
}

/// Platform that tracks which links are physically up and records any
/// notification sent to a link that is down
#[derive(Default)]
struct LinkCheckingPlatform {
    links: Mutex<HashSet<String>>,
    delivered: AtomicUsize,
    misdirected: AtomicBool,
}

#[async_trait]
impl BlePlatform for LinkCheckingPlatform {
    async fn start_advertising(&self, _config: &AdvertisingConfig) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn open_gatt_server(&self, _services: &[ServiceDefinition]) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn close_gatt_server(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    fn send_notification(&self, remote_id: &str, _characteristic: Uuid, _payload: &[u8]) -> bool {
        if self.links.lock().contains(remote_id) {
            self.delivered.fetch_add(1, Ordering::SeqCst);
        } else {
            self.misdirected.store(true, Ordering::SeqCst);
        }
        true
    }

    fn send_write_response(&self, _remote_id: &str, _request_id: RequestId, _status: GattStatus) -> bool {
        true
    }

    fn disconnect(&self, _remote_id: &str) {}

    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            platform: "Test".to_string(),
            name: "Link checker".to_string(),
            address: "00:00:00:00:00:00".to_string(),
            powered: true,
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_notify_never_reaches_a_dropped_link() {
    let platform = Arc::new(LinkCheckingPlatform::default());
    let config = PeripheralConfig {
        required_permissions: Vec::new(),
        ..Default::default()
    };
    let session = PeripheralSession::new(config, platform.clone(), GrantedPermissions::none());
    session.start_peripheral_mode().await.unwrap();
    session.on_advertise_started();

    let mut handles = Vec::new();
    for remote in ["AA:BB", "CC:DD"] {
        let session = session.clone();
        let platform = platform.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..2_000 {
                // Link comes up before the stack reports it, and goes down after
                platform.links.lock().insert(remote.to_string());
                session.on_connection_state_change(remote, ConnectionState::Connected);
                session.on_connection_state_change(remote, ConnectionState::Disconnected);
                platform.links.lock().remove(remote);
            }
        }));
    }
    for _ in 0..2 {
        let session = session.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..5_000u32 {
                let _ = session.notify(&i.to_le_bytes());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert!(!platform.misdirected.load(Ordering::SeqCst));
    assert!(session.status().connected_remote.is_none());
    session.shutdown().await.unwrap();
}
