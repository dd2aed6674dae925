//! Async runtime management for FFI
//!
//! Maintains a single Tokio runtime that is initialized once and used for all
//! async operations entered from the host boundary.

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Runtime;

static RUNTIME: OnceCell<Arc<Mutex<Runtime>>> = OnceCell::new();

/// Initialize the global async runtime
pub fn init_runtime() -> Result<(), String> {
    // Timers (advertise start timeout) and teardown tasks need a live worker
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("gattlink-rt")
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to create runtime: {}", e))?;

    RUNTIME
        .set(Arc::new(Mutex::new(runtime)))
        .map_err(|_| "Runtime already initialized".to_string())
}

/// Initialize the runtime unless it already exists
pub fn ensure_runtime() -> Result<(), String> {
    if RUNTIME.get().is_some() {
        return Ok(());
    }
    match init_runtime() {
        Ok(()) => Ok(()),
        // Lost an initialization race; the winner's runtime is fine
        Err(_) if RUNTIME.get().is_some() => Ok(()),
        Err(e) => Err(e),
    }
}

/// Get a reference to the global runtime
pub fn get_runtime() -> Result<Arc<Mutex<Runtime>>, String> {
    RUNTIME
        .get()
        .cloned()
        .ok_or_else(|| "Runtime not initialized".to_string())
}

/// Execute an async task on the global runtime
pub fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, String> {
    let runtime = get_runtime()?;
    let rt = runtime.lock();
    Ok(rt.block_on(future))
}

/// Enter the runtime context so synchronous code can spawn and arm timers
pub fn enter<R>(f: impl FnOnce() -> R) -> Result<R, String> {
    let runtime = get_runtime()?;
    let rt = runtime.lock();
    let _guard = rt.enter();
    Ok(f())
}
