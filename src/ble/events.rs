//! Event bridge between platform callbacks and the application
//!
//! Every platform callback that matters to the application becomes one
//! [`PeripheralEvent`]. Each subscriber gets its own ordered queue; events are
//! never replayed to subscribers that register later.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::advertiser::AdvertiseErrorCode;

/// Events delivered to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    /// The platform confirmed advertising is live
    AdvertisingStarted,
    /// Advertising could not be started
    AdvertisingFailed { code: AdvertiseErrorCode },
    /// A central connected and was admitted
    DeviceConnected { remote_id: String },
    /// The admitted central went away
    DeviceDisconnected { remote_id: String },
    /// A central wrote to a registered write characteristic
    DataReceived { payload: String },
    /// A central wrote to a UUID that is not registered as writable
    UnknownCharacteristic { remote_id: String, characteristic: Uuid },
}

impl PeripheralEvent {
    /// Stable event name, matching what the presentation layer listens for
    pub fn name(&self) -> &'static str {
        match self {
            PeripheralEvent::AdvertisingStarted => "onAdvertisingStart",
            PeripheralEvent::AdvertisingFailed { .. } => "onAdvertisingFailure",
            PeripheralEvent::DeviceConnected { .. } => "onDeviceConnected",
            PeripheralEvent::DeviceDisconnected { .. } => "onDeviceDisconnected",
            PeripheralEvent::DataReceived { .. } => "onDataReceived",
            PeripheralEvent::UnknownCharacteristic { .. } => "onUnknownCharacteristic",
        }
    }
}

/// Receiving end handed to a subscriber
pub type EventStream = mpsc::UnboundedReceiver<PeripheralEvent>;

/// Publish/subscribe fan-out for [`PeripheralEvent`]s
#[derive(Clone, Default)]
pub struct EventBridge {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<PeripheralEvent>>>>,
}

impl EventBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber; it only sees events emitted from now on
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber
    ///
    /// The subscriber list lock is held for the whole fan-out so concurrent
    /// emitters cannot interleave: all subscribers observe the same order.
    pub fn emit(&self, event: PeripheralEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());

        if subscribers.is_empty() {
            tracing::debug!("No subscribers for {}, event dropped", event.name());
        } else {
            tracing::debug!("Emitted {} to {} subscriber(s)", event.name(), subscribers.len());
        }
    }

    /// Number of subscribers still listening
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }
}
