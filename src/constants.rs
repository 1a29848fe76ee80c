//! # Application Constants
//!
//! This module contains the crate-wide policy constants shared by the format
//! negotiator, the stream bridges and the configuration defaults.
//!
//! ## Frame Window
//!
//! Every stream in the pipeline works on fixed-duration frames. The window
//! length is a policy constant of the design, not a per-call parameter:
//! all frame lengths are derived from it and the negotiated sample rate.

/// Duration of one audio frame in seconds (40 ms).
///
/// Frame lengths for every stream are computed as
/// `round(sample_rate * FRAME_WINDOW_SECS)`.
pub const FRAME_WINDOW_SECS: f64 = 0.04;

/// Default requested sample rate when none is configured
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default requested channel count (mono)
pub const DEFAULT_CHANNELS: u16 = 1;

/// Default denoise aggressiveness level (positive dB of attenuation)
pub const DEFAULT_DENOISE_LEVEL: i32 = 15;

/// Default residual-echo suppression level for echo cancellation (dB, negative)
pub const DEFAULT_ECHO_SUPPRESS_LEVEL: i32 = -40;

/// Default suppression applied while near-end speech is active (dB, negative)
pub const DEFAULT_ECHO_SUPPRESS_ACTIVE: i32 = -15;
