//! # Split-Mode Bridge
//!
//! Independent capture and playback streams bridged through the
//! [`FrameQueue`]. The engine drives two handler objects on its own threads:
//!
//! - [`CaptureProcessor`] receives raw capture frames, reshapes them to the
//!   render format (resample, channel split, preprocessing, channel merge)
//!   and pushes the finished frame onto the queue.
//! - [`PlaybackFeeder`] pops the oldest frame into the engine's output
//!   buffer, or silence when the queue has run dry.
//!
//! All capture-side state is owned by the capture handler and only ever
//! touched from the capture callback thread; the queue is the single point
//! of synchronization between the two streams.

use std::sync::Arc;

use crate::audio::channels::{merge_stereo, split_stereo};
use crate::audio::engine::{CaptureHandler, PlaybackHandler};
use crate::audio::format::DeviceFormat;
use crate::audio::preprocess::PreprocessUnit;
use crate::audio::queue::FrameQueue;
use crate::audio::resample::Resampler;
use crate::logger::log;

/// Capture-side handler for a split-mode test.
///
/// Holds the optional capture->render resampler, the per-channel buffers
/// sized to the render frame length, and one preprocessing unit per render
/// channel. Constructed at session start and dropped when the engine closes
/// the capture stream, which also closes the preprocessing units.
pub struct CaptureProcessor {
    resampler: Option<Box<dyn Resampler + Send>>,
    /// Scratch for the resampled interleaved frame, render-format sized
    resample_buffer: Vec<f32>,
    left: Vec<f32>,
    /// Empty for a mono render format
    right: Vec<f32>,
    units: Vec<Box<dyn PreprocessUnit>>,
    queue: Arc<FrameQueue>,
}

impl CaptureProcessor {
    pub fn new(
        render: DeviceFormat,
        resampler: Option<Box<dyn Resampler + Send>>,
        units: Vec<Box<dyn PreprocessUnit>>,
        queue: Arc<FrameQueue>,
    ) -> Self {
        let frame = render.frame_samples();
        debug_assert_eq!(units.len(), render.channels as usize);

        Self {
            resample_buffer: if resampler.is_some() {
                vec![0.0; frame * render.channels as usize]
            } else {
                Vec::new()
            },
            resampler,
            left: vec![0.0; frame],
            right: if render.channels == 2 {
                vec![0.0; frame]
            } else {
                Vec::new()
            },
            units,
            queue,
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

impl CaptureHandler for CaptureProcessor {
    fn on_capture(&mut self, frame: &[f32], sample_count: usize) {
        let output_samples = self.left.len();
        let channels = self.channels();

        // Reshape the raw capture into the per-channel render buffers.
        if let Some(resampler) = self.resampler.as_mut() {
            let produced = resampler.resample(frame, &mut self.resample_buffer);
            if produced != output_samples {
                // Best-effort degradation: the buffers keep their nominal
                // length and playback continues with whatever was written.
                log::warn!(
                    "resampler produced {} samples, expected {}",
                    produced,
                    output_samples
                );
            }

            if channels == 1 {
                self.left.copy_from_slice(&self.resample_buffer[..output_samples]);
            } else {
                split_stereo(
                    &self.resample_buffer,
                    output_samples,
                    &mut self.left,
                    &mut self.right,
                );
            }
        } else {
            debug_assert_eq!(sample_count, output_samples);
            if channels == 1 {
                self.left.copy_from_slice(&frame[..output_samples]);
            } else {
                split_stereo(frame, output_samples, &mut self.left, &mut self.right);
            }
        }

        self.units[0].preprocess(&mut self.left);
        if channels == 2 {
            self.units[1].preprocess(&mut self.right);
        }

        // Only the enqueue itself runs under the queue lock.
        if channels == 1 {
            self.queue.push(self.left.clone());
        } else {
            let mut merged = vec![0.0; output_samples * 2];
            merge_stereo(&self.left, &self.right, &mut merged, output_samples);
            self.queue.push(merged);
        }
    }
}

impl Drop for CaptureProcessor {
    fn drop(&mut self) {
        for unit in &mut self.units {
            unit.close();
        }
    }
}

/// Playback-side handler for a split-mode test.
pub struct PlaybackFeeder {
    queue: Arc<FrameQueue>,
}

impl PlaybackFeeder {
    pub fn new(queue: Arc<FrameQueue>) -> Self {
        Self { queue }
    }
}

impl PlaybackHandler for PlaybackFeeder {
    fn on_playback(&mut self, buffer: &mut [f32], _sample_count: usize) -> bool {
        // Pop-or-silence; underrun is the designed policy, not an error.
        self.queue.pop_into(buffer);
        true
    }

    fn on_playback_ended(&mut self) {
        log::debug!("playback stream ended");
    }
}
