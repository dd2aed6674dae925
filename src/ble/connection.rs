//! Connection tracking
//!
//! Single-slot holder for the central currently admitted by the GATT server.
//! The slot is the only place connection state lives; the server consults it
//! for every notification.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Link state of a central as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// The admitted central
#[derive(Debug, Clone)]
pub struct Connection {
    /// Platform identifier of the central (e.g. its device address)
    pub remote_id: String,
    pub state: ConnectionState,
    pub connected_at: Instant,
}

/// Outcome of offering a connection to the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The slot was empty; the remote is now tracked
    Admitted,
    /// The remote was already the tracked connection
    AlreadyConnected,
    /// Another central holds the slot
    Occupied { current: String },
}

/// Holds at most one live [`Connection`]
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    slot: Mutex<Option<Connection>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current connection
    pub fn current(&self) -> Option<Connection> {
        self.slot.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Track `remote_id` if the slot is free
    pub fn set_connected(&self, remote_id: &str) -> Admission {
        self.set_connected_with(remote_id, |_| {})
    }

    /// [`set_connected`](Self::set_connected), running `on_admission` before
    /// the slot is unlocked
    ///
    /// Anything `on_admission` publishes is ordered with every other
    /// transition of this tracker.
    pub fn set_connected_with(&self, remote_id: &str, on_admission: impl FnOnce(&Admission)) -> Admission {
        let mut slot = self.slot.lock();
        let admission = match slot.as_ref() {
            Some(existing) if existing.remote_id == remote_id => Admission::AlreadyConnected,
            Some(existing) => Admission::Occupied {
                current: existing.remote_id.clone(),
            },
            None => {
                *slot = Some(Connection {
                    remote_id: remote_id.to_string(),
                    state: ConnectionState::Connected,
                    connected_at: Instant::now(),
                });
                Admission::Admitted
            }
        };
        on_admission(&admission);
        admission
    }

    /// Clear the slot if it holds `remote_id`
    ///
    /// Returns the connection that was removed, with its state set to
    /// `Disconnected`. Disconnects of untracked remotes leave the slot alone.
    pub fn set_disconnected(&self, remote_id: &str) -> Option<Connection> {
        self.set_disconnected_with(remote_id, |_| {})
    }

    /// [`set_disconnected`](Self::set_disconnected), running `on_removal`
    /// before the slot is unlocked
    pub fn set_disconnected_with(
        &self,
        remote_id: &str,
        on_removal: impl FnOnce(Option<&Connection>),
    ) -> Option<Connection> {
        let mut slot = self.slot.lock();
        let removed = if slot.as_ref().map(|c| c.remote_id.as_str()) == Some(remote_id) {
            slot.take().map(|mut connection| {
                connection.state = ConnectionState::Disconnected;
                connection
            })
        } else {
            None
        };
        on_removal(removed.as_ref());
        removed
    }

    /// Drop whatever is tracked (server teardown)
    pub fn clear(&self) -> Option<Connection> {
        self.slot.lock().take()
    }

    /// Run `f` with the slot locked
    ///
    /// Nothing can connect or disconnect while `f` runs, so whatever `f` does
    /// with the connection targets the value tracked at this instant.
    pub fn with_current<R>(&self, f: impl FnOnce(Option<&Connection>) -> R) -> R {
        let slot = self.slot.lock();
        f(slot.as_ref())
    }
}
