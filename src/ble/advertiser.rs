//! Advertising lifecycle
//!
//! `Idle -> Starting -> Advertising` on success, `Starting -> Failed` on a
//! platform failure or timeout, back to `Idle` on an explicit stop. The
//! platform reports the outcome of a start request asynchronously; the
//! advertiser only applies that outcome while the matching request is pending.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::adapter::{BlePlatform, PlatformError};
use super::events::{EventBridge, PeripheralEvent};

/// Transmit power level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxPower {
    Low,
    Medium,
    High,
}

/// Advertising interval trade-off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvertiseMode {
    LowPower,
    Balanced,
    LowLatency,
}

/// Everything the platform needs to start broadcasting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisingConfig {
    pub device_name: String,
    pub tx_power: TxPower,
    pub mode: AdvertiseMode,
    pub connectable: bool,
    pub include_device_name: bool,
    pub service_uuids: BTreeSet<Uuid>,
}

impl AdvertisingConfig {
    /// Check the config describes a payload the platform can broadcast
    pub fn validate(&self) -> Result<(), AdvertiseError> {
        if self.include_device_name && self.device_name.trim().is_empty() {
            return Err(AdvertiseError::InvalidConfig(
                "device name is empty but include_device_name is set".to_string(),
            ));
        }
        if !self.include_device_name && self.service_uuids.is_empty() {
            return Err(AdvertiseError::InvalidConfig(
                "advertisement carries neither a device name nor a service UUID".to_string(),
            ));
        }
        Ok(())
    }
}

/// Platform-reported advertising failure, mapped to a stable kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdvertiseErrorCode {
    DataTooLarge,
    TooManyAdvertisers,
    AlreadyStarted,
    InternalError,
    FeatureUnsupported,
    /// The platform never answered within the start timeout
    Timeout,
    Unknown(i32),
}

impl AdvertiseErrorCode {
    /// All codes with a fixed meaning
    pub const KNOWN: [AdvertiseErrorCode; 6] = [
        AdvertiseErrorCode::DataTooLarge,
        AdvertiseErrorCode::TooManyAdvertisers,
        AdvertiseErrorCode::AlreadyStarted,
        AdvertiseErrorCode::InternalError,
        AdvertiseErrorCode::FeatureUnsupported,
        AdvertiseErrorCode::Timeout,
    ];

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => AdvertiseErrorCode::DataTooLarge,
            2 => AdvertiseErrorCode::TooManyAdvertisers,
            3 => AdvertiseErrorCode::AlreadyStarted,
            4 => AdvertiseErrorCode::InternalError,
            5 => AdvertiseErrorCode::FeatureUnsupported,
            -1 => AdvertiseErrorCode::Timeout,
            other => AdvertiseErrorCode::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            AdvertiseErrorCode::DataTooLarge => 1,
            AdvertiseErrorCode::TooManyAdvertisers => 2,
            AdvertiseErrorCode::AlreadyStarted => 3,
            AdvertiseErrorCode::InternalError => 4,
            AdvertiseErrorCode::FeatureUnsupported => 5,
            AdvertiseErrorCode::Timeout => -1,
            AdvertiseErrorCode::Unknown(code) => *code,
        }
    }
}

impl std::fmt::Display for AdvertiseErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdvertiseErrorCode::DataTooLarge => write!(f, "advertise data too large"),
            AdvertiseErrorCode::TooManyAdvertisers => write!(f, "too many advertisers"),
            AdvertiseErrorCode::AlreadyStarted => write!(f, "advertising already started"),
            AdvertiseErrorCode::InternalError => write!(f, "internal error"),
            AdvertiseErrorCode::FeatureUnsupported => write!(f, "feature unsupported"),
            AdvertiseErrorCode::Timeout => write!(f, "timed out waiting for the platform"),
            AdvertiseErrorCode::Unknown(code) => write!(f, "unknown error {}", code),
        }
    }
}

/// Advertiser state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiserState {
    Idle,
    Starting,
    Advertising,
    Failed(AdvertiseErrorCode),
}

/// Result of a successful `start` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Already broadcasting; nothing was submitted
    AlreadyAdvertising,
    /// Request submitted; the result arrives through a callback
    Pending { attempt: u64 },
}

/// Advertising errors returned to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdvertiseError {
    #[error("Invalid advertising config: {0}")]
    InvalidConfig(String),

    #[error("Advertising start already in progress")]
    AlreadyInProgress,

    #[error("Not advertising")]
    NotAdvertising,

    #[error("Advertising failed to start: {0}")]
    StartFailed(AdvertiseErrorCode),

    #[error("Platform rejected advertising request: {0}")]
    Platform(#[from] PlatformError),
}

struct AdvertiserInner {
    state: AdvertiserState,
    config: Option<AdvertisingConfig>,
    /// Bumped on every start/stop so stale callbacks and timers can be told apart
    attempt: u64,
}

/// Owns advertising configuration and start/stop lifecycle
pub struct Advertiser {
    platform: Arc<dyn BlePlatform>,
    events: EventBridge,
    inner: Mutex<AdvertiserInner>,
}

impl Advertiser {
    pub fn new(platform: Arc<dyn BlePlatform>, events: EventBridge) -> Self {
        Self {
            platform,
            events,
            inner: Mutex::new(AdvertiserInner {
                state: AdvertiserState::Idle,
                config: None,
                attempt: 0,
            }),
        }
    }

    pub fn state(&self) -> AdvertiserState {
        self.inner.lock().state
    }

    pub fn is_advertising(&self) -> bool {
        self.state() == AdvertiserState::Advertising
    }

    /// Config of the current or last start request
    pub fn config(&self) -> Option<AdvertisingConfig> {
        self.inner.lock().config.clone()
    }

    /// Submit a start request to the platform
    pub async fn start(&self, config: AdvertisingConfig) -> Result<StartOutcome, AdvertiseError> {
        config.validate()?;

        let attempt = {
            let mut inner = self.inner.lock();
            match inner.state {
                AdvertiserState::Starting => return Err(AdvertiseError::AlreadyInProgress),
                AdvertiserState::Advertising => {
                    tracing::debug!("Advertising already active, start ignored");
                    return Ok(StartOutcome::AlreadyAdvertising);
                }
                AdvertiserState::Idle | AdvertiserState::Failed(_) => {}
            }
            inner.state = AdvertiserState::Starting;
            inner.attempt += 1;
            inner.config = Some(config.clone());
            inner.attempt
        };

        tracing::info!(
            "Starting BLE advertising as '{}' ({:?}, {:?}, connectable: {})",
            config.device_name,
            config.mode,
            config.tx_power,
            config.connectable
        );

        if let Err(e) = self.platform.start_advertising(&config).await {
            tracing::error!("Platform refused advertising request: {}", e);
            let mut inner = self.inner.lock();
            if inner.state == AdvertiserState::Starting && inner.attempt == attempt {
                inner.state = AdvertiserState::Failed(AdvertiseErrorCode::InternalError);
                self.events.emit(PeripheralEvent::AdvertisingFailed {
                    code: AdvertiseErrorCode::InternalError,
                });
            }
            return Err(AdvertiseError::Platform(e));
        }

        Ok(StartOutcome::Pending { attempt })
    }

    /// Platform callback: advertising is live
    ///
    /// Returns `false` if no start request was pending.
    pub fn on_start_success(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != AdvertiserState::Starting {
            tracing::warn!("Ignoring advertise success in state {:?}", inner.state);
            return false;
        }
        inner.state = AdvertiserState::Advertising;
        tracing::info!("BLE advertising started");
        self.events.emit(PeripheralEvent::AdvertisingStarted);
        true
    }

    /// Platform callback: advertising could not be started
    ///
    /// Returns `false` if no start request was pending.
    pub fn on_start_failure(&self, code: AdvertiseErrorCode) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != AdvertiserState::Starting {
            tracing::warn!("Ignoring advertise failure {} in state {:?}", code, inner.state);
            return false;
        }
        inner.state = AdvertiserState::Failed(code);
        tracing::warn!("BLE advertising failed: {} (code {})", code, code.code());
        self.events.emit(PeripheralEvent::AdvertisingFailed { code });
        true
    }

    /// Fail start request `attempt` if the platform still has not answered
    ///
    /// Returns `true` if the attempt was expired.
    pub async fn expire_start(&self, attempt: u64) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state != AdvertiserState::Starting || inner.attempt != attempt {
                return false;
            }
            inner.state = AdvertiserState::Failed(AdvertiseErrorCode::Timeout);
            tracing::warn!("BLE advertising start timed out (attempt {})", attempt);
            self.events.emit(PeripheralEvent::AdvertisingFailed {
                code: AdvertiseErrorCode::Timeout,
            });
        }

        if let Err(e) = self.platform.stop_advertising().await {
            tracing::warn!("Failed to cancel timed out advertising request: {}", e);
        }
        true
    }

    /// Stop advertising (or cancel a pending start)
    pub async fn stop(&self) -> Result<(), AdvertiseError> {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                AdvertiserState::Advertising | AdvertiserState::Starting => {
                    inner.state = AdvertiserState::Idle;
                    inner.attempt += 1;
                }
                AdvertiserState::Idle | AdvertiserState::Failed(_) => {
                    return Err(AdvertiseError::NotAdvertising);
                }
            }
        }

        tracing::info!("Stopping BLE advertising");
        self.platform.stop_advertising().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::testing::MockPlatform;

    fn config() -> AdvertisingConfig {
        AdvertisingConfig {
            device_name: "Wizepass Test".to_string(),
            tx_power: TxPower::High,
            mode: AdvertiseMode::LowLatency,
            connectable: true,
            include_device_name: true,
            service_uuids: BTreeSet::new(),
        }
    }

    fn advertiser() -> (Arc<MockPlatform>, Advertiser, crate::ble::EventStream) {
        let platform = Arc::new(MockPlatform::new());
        let events = EventBridge::new();
        let rx = events.subscribe();
        let advertiser = Advertiser::new(platform.clone(), events);
        (platform, advertiser, rx)
    }

    #[test]
    fn test_error_code_mapping() {
        for code in AdvertiseErrorCode::KNOWN {
            assert_eq!(AdvertiseErrorCode::from_code(code.code()), code);
        }
        assert_eq!(AdvertiseErrorCode::from_code(42), AdvertiseErrorCode::Unknown(42));
        assert_eq!(AdvertiseErrorCode::Unknown(42).code(), 42);
    }

    #[test]
    fn test_config_validation() {
        assert!(config().validate().is_ok());

        let mut nameless = config();
        nameless.device_name = "  ".to_string();
        assert!(matches!(nameless.validate(), Err(AdvertiseError::InvalidConfig(_))));

        let mut empty = config();
        empty.include_device_name = false;
        assert!(matches!(empty.validate(), Err(AdvertiseError::InvalidConfig(_))));

        empty.service_uuids.insert(crate::ble::SERVICE_UUID);
        assert!(empty.validate().is_ok());
    }

    #[tokio::test]
    async fn test_start_then_success() {
        let (platform, advertiser, mut rx) = advertiser();

        let outcome = advertiser.start(config()).await.unwrap();
        assert_eq!(outcome, StartOutcome::Pending { attempt: 1 });
        assert_eq!(advertiser.state(), AdvertiserState::Starting);
        assert_eq!(platform.advertise_requests(), 1);

        assert!(advertiser.on_start_success());
        assert!(advertiser.is_advertising());
        assert_eq!(rx.try_recv().unwrap(), PeripheralEvent::AdvertisingStarted);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_every_failure_code_is_reported_once() {
        for code in AdvertiseErrorCode::KNOWN {
            let (_platform, advertiser, mut rx) = advertiser();
            advertiser.start(config()).await.unwrap();

            assert!(advertiser.on_start_failure(code));
            assert_eq!(advertiser.state(), AdvertiserState::Failed(code));
            assert_eq!(rx.try_recv().unwrap(), PeripheralEvent::AdvertisingFailed { code });
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_concurrent_start_is_rejected() {
        let (platform, advertiser, _rx) = advertiser();
        advertiser.start(config()).await.unwrap();

        let second = advertiser.start(config()).await;
        assert_eq!(second, Err(AdvertiseError::AlreadyInProgress));
        assert_eq!(platform.advertise_requests(), 1);
    }

    #[tokio::test]
    async fn test_start_while_advertising_does_not_register_twice() {
        let (platform, advertiser, _rx) = advertiser();
        advertiser.start(config()).await.unwrap();
        advertiser.on_start_success();

        let again = advertiser.start(config()).await.unwrap();
        assert_eq!(again, StartOutcome::AlreadyAdvertising);
        assert_eq!(platform.advertise_requests(), 1);
    }

    #[tokio::test]
    async fn test_stop_transitions() {
        let (platform, advertiser, _rx) = advertiser();
        assert_eq!(advertiser.stop().await, Err(AdvertiseError::NotAdvertising));

        advertiser.start(config()).await.unwrap();
        advertiser.on_start_success();
        advertiser.stop().await.unwrap();
        assert_eq!(advertiser.state(), AdvertiserState::Idle);
        assert_eq!(platform.stop_requests(), 1);

        assert_eq!(advertiser.stop().await, Err(AdvertiseError::NotAdvertising));
    }

    #[tokio::test]
    async fn test_late_callbacks_are_dropped() {
        let (_platform, advertiser, mut rx) = advertiser();
        advertiser.start(config()).await.unwrap();
        advertiser.stop().await.unwrap();

        assert!(!advertiser.on_start_success());
        assert!(!advertiser.on_start_failure(AdvertiseErrorCode::InternalError));
        assert_eq!(advertiser.state(), AdvertiserState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_platform_submission_error() {
        let (platform, advertiser, mut rx) = advertiser();
        platform.fail_advertising(true);

        let result = advertiser.start(config()).await;
        assert!(matches!(result, Err(AdvertiseError::Platform(_))));
        assert_eq!(
            advertiser.state(),
            AdvertiserState::Failed(AdvertiseErrorCode::InternalError)
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            PeripheralEvent::AdvertisingFailed {
                code: AdvertiseErrorCode::InternalError
            }
        );

        // Failed is not terminal
        platform.fail_advertising(false);
        assert!(advertiser.start(config()).await.is_ok());
        assert_eq!(advertiser.state(), AdvertiserState::Starting);
    }

    #[tokio::test]
    async fn test_expire_only_matching_attempt() {
        let (platform, advertiser, mut rx) = advertiser();
        let StartOutcome::Pending { attempt } = advertiser.start(config()).await.unwrap() else {
            panic!("expected a pending start");
        };

        assert!(!advertiser.expire_start(attempt + 1).await);
        assert!(advertiser.expire_start(attempt).await);
        assert_eq!(
            advertiser.state(),
            AdvertiserState::Failed(AdvertiseErrorCode::Timeout)
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            PeripheralEvent::AdvertisingFailed {
                code: AdvertiseErrorCode::Timeout
            }
        );
        assert_eq!(platform.stop_requests(), 1);

        // A success arriving after the timeout is ignored
        assert!(!advertiser.on_start_success());
        assert!(!advertiser.expire_start(attempt).await);
    }
}
