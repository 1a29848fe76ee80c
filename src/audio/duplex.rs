//! # Duplex-Mode Bridge
//!
//! A duplex stream gives the pipeline hardware-synchronized capture and
//! render callbacks, which is what makes true acoustic echo cancellation
//! possible: the engine hands back the exact frame it previously rendered as
//! the echo reference. The engine drives [`DuplexProcessor`] in two phases
//! per cycle:
//!
//! 1. **Echo-reference phase**: the raw capture is resampled and split, then
//!    cleaned against the prior output frame via `echo_cancel` (or plainly
//!    split when echo cancellation is off). This phase only reads the prior
//!    output; the engine may still be flushing the current one.
//! 2. **Produce phase**: the cleaned channel buffers run through
//!    `preprocess` and are merged in place into the engine's output buffer,
//!    becoming the next rendered frame.
//!
//! The engine guarantees the two phases of one cycle never run concurrently,
//! so no locking is needed around the channel buffers.
//!
//! ## Stereo Echo Cancellation
//!
//! Echo cancellation across a stereo pair requires *both* channel units to
//! have it enabled. If only one does, the echo phase silently degrades to a
//! plain stereo split; this asymmetric-enablement behavior is by contract,
//! not an oversight.

use crate::audio::channels::{merge_stereo, split_stereo};
use crate::audio::engine::DuplexHandler;
use crate::audio::preprocess::PreprocessUnit;
use crate::audio::resample::Resampler;
use crate::logger::log;

/// Two-phase handler for a duplex loopback test.
///
/// Owns the optional capture resampler, the per-channel buffers sized to the
/// frame length, and one preprocessing unit per processing channel. Dropped
/// when the engine closes the duplex stream, which also closes the units.
pub struct DuplexProcessor {
    resampler: Option<Box<dyn Resampler + Send>>,
    resample_buffer: Vec<f32>,
    left: Vec<f32>,
    /// Empty for mono processing
    right: Vec<f32>,
    /// Stereo echo-phase scratch: split capture and split reference
    in_left: Vec<f32>,
    in_right: Vec<f32>,
    ref_left: Vec<f32>,
    ref_right: Vec<f32>,
    units: Vec<Box<dyn PreprocessUnit>>,
    /// Channel count of the engine's render side; the prior-output frame
    /// arrives in this layout
    output_channels: u16,
}

impl DuplexProcessor {
    pub fn new(
        frame_samples: usize,
        channels: u16,
        output_channels: u16,
        resampler: Option<Box<dyn Resampler + Send>>,
        units: Vec<Box<dyn PreprocessUnit>>,
    ) -> Self {
        debug_assert_eq!(units.len(), channels as usize);
        let stereo = channels == 2;

        Self {
            resample_buffer: if resampler.is_some() {
                vec![0.0; frame_samples * channels as usize]
            } else {
                Vec::new()
            },
            resampler,
            left: vec![0.0; frame_samples],
            right: if stereo { vec![0.0; frame_samples] } else { Vec::new() },
            in_left: if stereo { vec![0.0; frame_samples] } else { Vec::new() },
            in_right: if stereo { vec![0.0; frame_samples] } else { Vec::new() },
            ref_left: if stereo { vec![0.0; frame_samples] } else { Vec::new() },
            ref_right: if stereo { vec![0.0; frame_samples] } else { Vec::new() },
            units,
            output_channels,
        }
    }

    fn channels(&self) -> usize {
        if self.right.is_empty() {
            1
        } else {
            2
        }
    }
}

impl DuplexHandler for DuplexProcessor {
    fn on_duplex_echo(&mut self, capture: &[f32], prior_output: &[f32], _sample_count: usize) {
        let output_samples = self.left.len();
        let channels = self.channels();

        let resampled = if let Some(resampler) = self.resampler.as_mut() {
            let produced = resampler.resample(capture, &mut self.resample_buffer);
            if produced != output_samples {
                log::warn!(
                    "resampler produced {} samples, expected {}",
                    produced,
                    output_samples
                );
            }
            true
        } else {
            false
        };
        let input: &[f32] = if resampled {
            &self.resample_buffer
        } else {
            capture
        };

        if channels == 1 {
            if self.units[0].is_echo_cancel() {
                self.units[0].echo_cancel(
                    &input[..output_samples],
                    prior_output,
                    &mut self.left,
                );
            } else {
                self.left.copy_from_slice(&input[..output_samples]);
            }
            return;
        }

        // Stereo: echo cancellation runs only when both channel units have
        // it enabled; otherwise fall back to a plain split.
        if self.units[0].is_echo_cancel() && self.units[1].is_echo_cancel() {
            split_stereo(input, output_samples, &mut self.in_left, &mut self.in_right);

            if self.output_channels == 1 {
                // Mono render side: the same reference feeds both channels.
                self.ref_left.copy_from_slice(&prior_output[..output_samples]);
                self.ref_right.copy_from_slice(&prior_output[..output_samples]);
            } else {
                split_stereo(
                    prior_output,
                    output_samples,
                    &mut self.ref_left,
                    &mut self.ref_right,
                );
            }

            self.units[0].echo_cancel(&self.in_left, &self.ref_left, &mut self.left);
            self.units[1].echo_cancel(&self.in_right, &self.ref_right, &mut self.right);
        } else {
            split_stereo(input, output_samples, &mut self.left, &mut self.right);
        }
    }

    fn on_duplex_produce(&mut self, _capture: &[f32], output: &mut [f32], _sample_count: usize) {
        let output_samples = self.left.len();
        let channels = self.channels();

        self.units[0].preprocess(&mut self.left);
        if channels == 1 {
            output[..output_samples].copy_from_slice(&self.left);
        } else {
            self.units[1].preprocess(&mut self.right);
            debug_assert!(output.len() >= output_samples * 2);
            merge_stereo(&self.left, &self.right, output, output_samples);
        }
    }
}

impl Drop for DuplexProcessor {
    fn drop(&mut self) {
        for unit in &mut self.units {
            unit.close();
        }
    }
}
