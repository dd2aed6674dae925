//! gattlink demonstration
//!
//! Runs a peripheral session against a scripted host: the host answers every
//! queued platform command the way a phone's BLE stack would, then plays a
//! central that connects, writes a URL and disconnects.

use anyhow::{Context, Result};
use gattlink::ble::{HostDrivenPlatform, PlatformCommand, RequestId, WriteRequest};
use gattlink::{ConnectionState, GrantedPermissions, PeripheralConfig, PeripheralSession};
use std::sync::Arc;
use tracing::info;

const DEMO_CENTRAL: &str = "5C:F3:70:00:00:01";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config = load_config()?;
    gattlink::init_logging(config.log_level.as_deref());

    info!("🚀 Starting gattlink peripheral demonstration...");

    let platform = Arc::new(HostDrivenPlatform::new("Demo"));
    let session = PeripheralSession::new(config, platform.clone(), GrantedPermissions::all());
    let mut events = session.subscribe();

    session
        .start_peripheral_mode()
        .await
        .context("failed to start peripheral mode")?;
    info!("📡 {}", gattlink::ffi::STARTED_MESSAGE);

    run_host(&platform, &session).await;

    // Central connects and writes a URL
    session.on_connection_state_change(DEMO_CENTRAL, ConnectionState::Connected);
    let write_uuid = session.config().write_characteristic_uuid;
    session.on_characteristic_write(WriteRequest {
        remote_id: DEMO_CENTRAL.to_string(),
        characteristic: write_uuid,
        payload: b"https://example.com/pass/42".to_vec(),
        response_required: true,
        request_id: RequestId(1),
    });
    run_host(&platform, &session).await;

    match session.notify(b"Hello from gattlink") {
        Ok(()) => info!("✅ Notification queued"),
        Err(e) => info!("❌ Notification failed: {}", e),
    }
    run_host(&platform, &session).await;

    session.on_connection_state_change(DEMO_CENTRAL, ConnectionState::Disconnected);

    session.shutdown().await.context("failed to shut down")?;
    run_host(&platform, &session).await;

    while let Ok(event) = events.try_recv() {
        info!("📨 {}: {:?}", event.name(), event);
    }

    info!("🏁 Demonstration finished");
    Ok(())
}

#[cfg(feature = "config-file")]
fn load_config() -> Result<PeripheralConfig> {
    let path = std::env::var("GATTLINK_CONFIG").ok();
    PeripheralConfig::load(path.as_deref().map(std::path::Path::new))
        .context("failed to load configuration")
}

#[cfg(not(feature = "config-file"))]
fn load_config() -> Result<PeripheralConfig> {
    Ok(PeripheralConfig::default())
}

/// Execute queued commands the way the platform stack would
async fn run_host(platform: &HostDrivenPlatform, session: &PeripheralSession) {
    for command in platform.drain_commands() {
        info!("🔧 Host executing {:?}", command);
        if let PlatformCommand::StartAdvertising { .. } = command {
            session.on_advertise_started();
        }
    }
    tokio::task::yield_now().await;
}
