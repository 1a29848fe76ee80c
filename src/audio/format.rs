//! # Format Negotiation Module
//!
//! Given the capabilities of an input and an output device and a requested
//! sample rate / channel count, this module decides the actual capture and
//! render formats for a loopback test and whether a resampler is needed to
//! bridge them.
//!
//! ## Negotiation Rules
//!
//! 1. The render side gets the request if the output device supports it
//!    natively; otherwise it falls back to the output device's default rate
//!    and its best-matching channel count.
//! 2. The capture side mirrors the render format. If the input device cannot
//!    provide that exact format natively, capture is downgraded to the input
//!    device's default rate and best-matching channel count, and the stream
//!    must be resampled capture -> render.
//!
//! Frame lengths are always the fixed 40 ms window at the stream's own rate.
//! For a resampled capture stream the input-side frame length is computed
//! from the window at the capture rate rather than scaled from the render
//! frame length, which keeps rational rate ratios exact per frame.

use crate::audio::engine::DeviceInfo;
use crate::constants::FRAME_WINDOW_SECS;
use crate::error::LoopbackError;
use crate::logger::log;

/// Sample rate and channel layout of one stream. Immutable once negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl DeviceFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Samples per channel in one 40 ms frame at this format's rate.
    pub fn frame_samples(&self) -> usize {
        frame_samples(self.sample_rate)
    }
}

/// Outcome of format negotiation for one loopback test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub capture: DeviceFormat,
    pub render: DeviceFormat,
    /// True when capture and render formats differ and the capture stream
    /// must be resampled before playback.
    pub needs_resample: bool,
}

/// Samples per channel in one 40 ms frame at the given rate.
pub fn frame_samples(sample_rate: u32) -> usize {
    (sample_rate as f64 * FRAME_WINDOW_SECS).round() as usize
}

/// Negotiate capture and render formats for a loopback test.
///
/// Fails with [`LoopbackError::DeviceUnavailable`] when either device reports
/// a zero default sample rate. Resampler construction is the caller's
/// responsibility; this function only reports whether one is required.
pub fn negotiate(
    requested_rate: u32,
    requested_channels: u16,
    input_dev: &DeviceInfo,
    output_dev: &DeviceInfo,
) -> Result<NegotiatedFormat, LoopbackError> {
    if input_dev.default_sample_rate == 0 {
        return Err(LoopbackError::DeviceUnavailable(input_dev.id.clone()));
    }
    if output_dev.default_sample_rate == 0 {
        return Err(LoopbackError::DeviceUnavailable(output_dev.id.clone()));
    }

    // Render side: the request if the output device can honor it, otherwise
    // the device's own defaults.
    let render = if output_dev.supports_output_format(requested_channels, requested_rate) {
        DeviceFormat::new(requested_rate, requested_channels)
    } else {
        DeviceFormat::new(
            output_dev.default_sample_rate,
            output_dev.closest_output_channels(requested_channels),
        )
    };

    // Capture side adapts to the render format. The channel fallback is
    // matched against the original request, not the render layout.
    let mut capture = render;
    let mut needs_resample = false;
    if !input_dev.supports_input_format(render.channels, render.sample_rate) {
        capture = DeviceFormat::new(
            input_dev.default_sample_rate,
            input_dev.closest_input_channels(requested_channels),
        );
        needs_resample = true;
    }

    log::info!(
        "negotiated formats: capture {} Hz/{}ch, render {} Hz/{}ch, resample={}",
        capture.sample_rate,
        capture.channels,
        render.sample_rate,
        render.channels,
        needs_resample
    );

    Ok(NegotiatedFormat {
        capture,
        render,
        needs_resample,
    })
}
