//! # Error Types
//!
//! Error taxonomy for the loopback pipeline. Start-path failures are the only
//! fallible surface: every variant here aborts a `start_test` /
//! `start_duplex_test` call and rolls the session back to idle. Runtime
//! anomalies inside audio callbacks (such as a resampler producing an
//! unexpected sample count) are logged diagnostics, never errors — a
//! real-time callback has no channel to propagate failure without breaking
//! its timing contract.

use thiserror::Error;

/// Errors produced while starting a loopback test.
///
/// `stop_test` cannot fail; it always releases owned resources and reports
/// via its boolean return whether any stream was actually open.
#[derive(Debug, Error)]
pub enum LoopbackError {
    /// A test is already running on this session; the running test is left
    /// untouched.
    #[error("a loopback test is already active")]
    AlreadyActive,

    /// The engine does not know the device, or the device reported a zero
    /// default sample rate (unplugged or unusable).
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The capture device cannot provide the rate/channel pair required by
    /// the duplex path, and no negotiation can reconcile it.
    #[error("capture device does not support {channels} channel(s) at {sample_rate} Hz")]
    UnsupportedCaptureFormat { sample_rate: u32, channels: u16 },

    /// Echo cancellation was requested on the split path. Only the duplex
    /// path has access to the true previously-rendered frame, so the split
    /// path rejects the combination up front.
    #[error("echo cancellation requires a duplex test")]
    EchoCancelUnavailable,

    /// No resampler could be constructed for the negotiated capture/render
    /// format pair.
    #[error("cannot construct resampler {in_channels}ch@{in_rate} Hz -> {out_channels}ch@{out_rate} Hz")]
    ResamplerConstruction {
        in_channels: u16,
        in_rate: u32,
        out_channels: u16,
        out_rate: u32,
    },

    /// A preprocessing sub-setting was rejected. The gate is configured as a
    /// single atomic unit, so any rejected setting invalidates the whole
    /// gate and the session rolls back.
    #[error("preprocessing configuration rejected: {0}")]
    PreprocessConfiguration(String),

    /// The audio engine refused to open or start a stream.
    #[error("audio engine rejected {0} stream")]
    StreamOpen(&'static str),
}
