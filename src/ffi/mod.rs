//! FFI module for platform integration
//!
//! Interfaces for platform-specific code (Android, iOS) to drive the Rust
//! peripheral core. It handles:
//! - Session lifecycle behind integer handles
//! - Host-driven BLE platform (next_command, push_callback)
//! - Event delivery to the presentation layer (next_event)

pub mod bridge;
pub mod runtime;
pub mod types;

pub use bridge::*;
pub use types::*;
