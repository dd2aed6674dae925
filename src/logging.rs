//! Logging setup
//!
//! Everything logs through `tracing`. On Android the host bridge macros also
//! mirror into `log` so messages reach logcat through `android_logger`.

// Host bridge logging macros:
// - On Android: mirror all messages to log::debug! (for android_logger / logcat),
//   while still emitting via tracing.
// - On other platforms: just use tracing.
#[cfg(feature = "android")]
macro_rules! h_info {
    ($($arg:tt)*) => {{
        tracing::info!($($arg)*);
        log::debug!($($arg)*);
    }};
}
#[cfg(not(feature = "android"))]
macro_rules! h_info {
    ($($arg:tt)*) => {
        tracing::info!($($arg)*);
    };
}

#[cfg(feature = "android")]
macro_rules! h_debug {
    ($($arg:tt)*) => {{
        tracing::debug!($($arg)*);
        log::debug!($($arg)*);
    }};
}
#[cfg(not(feature = "android"))]
macro_rules! h_debug {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*);
    };
}

#[cfg(feature = "android")]
macro_rules! h_warn {
    ($($arg:tt)*) => {{
        tracing::warn!($($arg)*);
        log::warn!($($arg)*);
    }};
}
#[cfg(not(feature = "android"))]
macro_rules! h_warn {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*);
    };
}

pub(crate) use {h_debug, h_info, h_warn};

/// Map a config log level string onto a tracing level (default INFO)
pub fn parse_log_level(level: Option<&str>) -> tracing::Level {
    match level.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
        Some("trace") => tracing::Level::TRACE,
        Some("debug") => tracing::Level::DEBUG,
        Some("info") => tracing::Level::INFO,
        Some("warn") => tracing::Level::WARN,
        Some("error") => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

/// Install the global subscriber; later calls are no-ops
pub fn init_logging(level: Option<&str>) {
    let level = parse_log_level(level);

    #[cfg(feature = "android")]
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Debug)
            .with_tag("gattlink"),
    );

    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}
