//! # Logging Infrastructure Module
//!
//! Centralized logging for the loopback pipeline, built on the `tracing`
//! ecosystem for structured, low-overhead logging from the audio callback
//! threads.
//!
//! ## Log Levels
//!
//! - **ERROR**: engine rejections, device failures, unrecoverable setup issues
//! - **WARN**: recoverable anomalies such as resampler sample-count mismatches
//! - **INFO**: session lifecycle, negotiated formats, stream open/close
//! - **DEBUG**: per-frame diagnostics, queue depth, callback activity
//!
//! ## Environment Configuration
//!
//! Set the `RUST_LOG` environment variable to control log output:
//! - `RUST_LOG=loopcheck=debug` - all logs from this crate
//! - `RUST_LOG=warn` - warnings and errors only
//! - `RUST_LOG=loopcheck::audio=debug,warn` - debug the audio modules only

use once_cell::sync::Lazy;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the global logger.
///
/// Sets up the tracing subscriber with environment-based filtering and a
/// console formatter. Safe to call more than once; only the first call
/// installs the subscriber.
///
/// Host applications that install their own subscriber can simply skip this.
pub fn init_logger() -> Result<(), Box<dyn std::error::Error>> {
    static INIT: Lazy<()> = Lazy::new(|| {
        // Fall back to "loopcheck=debug,warn" when RUST_LOG is not set:
        // detailed logging for this crate, warnings only from dependencies.
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("loopcheck=debug,warn"));

        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(true) // callbacks run on engine threads
                    .with_level(true)
                    .with_line_number(true),
            )
            .init();
    });

    Lazy::force(&INIT);
    Ok(())
}

/// Convenience re-export of the log macros.
///
/// All code in the crate imports `crate::logger::log` and uses the familiar
/// macro names:
///
/// ```rust
/// use loopcheck::logger::log;
///
/// log::info!("render format: {} Hz, {} channel(s)", 48000, 2);
/// log::warn!("resampler returned {} samples, expected {}", 1762, 1764);
/// ```
pub mod log {
    pub use tracing::{debug, error, info, warn};
}
