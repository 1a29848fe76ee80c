//! # Session Lifecycle Module
//!
//! [`LoopbackSession`] owns the start/stop state machine of a loopback test:
//! it negotiates formats, configures the preprocessing gate, registers the
//! bridge handlers with the audio engine, and tears everything down again.
//!
//! ## State Machine
//!
//! ```text
//! Idle --start_test / start_duplex_test--> Active --stop_test--> Idle
//! ```
//!
//! Starting while a test is active fails without touching the running test.
//! `stop_test` is idempotent: always safe, always releases every owned
//! resource, and reports whether any stream was actually open.
//!
//! ## Startup Rollback
//!
//! Every step of the start sequence that fails triggers a full `stop_test`
//! before the error is returned, so no partially-open stream is ever left
//! behind: negotiate formats, construct the resampler, configure the
//! preprocessing gate, open the render stream, start it, open the capture
//! stream. Once the capture stream is open the session is active.

use std::sync::Arc;

use crate::audio::duplex::DuplexProcessor;
use crate::audio::engine::{AudioEngine, GroupId, StreamHandle};
use crate::audio::format::{frame_samples, negotiate, DeviceFormat, NegotiatedFormat};
use crate::audio::preprocess::{
    configure_units, DenoiseUnitFactory, PreprocessConfig, PreprocessUnit, PreprocessUnitFactory,
};
use crate::audio::queue::FrameQueue;
use crate::audio::resample::{make_resampler, Resampler};
use crate::audio::split::{CaptureProcessor, PlaybackFeeder};
use crate::config::LoopbackConfig;
use crate::error::LoopbackError;
use crate::logger::log;

/// Owner of one loopback test at a time.
///
/// The session acquires a sound group from the engine on construction and
/// releases it on drop; a still-active test is stopped by `Drop` as well.
/// Exactly one test can be active per session; a second start fails fast
/// with [`LoopbackError::AlreadyActive`].
pub struct LoopbackSession {
    engine: Arc<dyn AudioEngine>,
    preprocess_factory: Arc<dyn PreprocessUnitFactory>,
    group: GroupId,
    active: bool,
    format: Option<NegotiatedFormat>,
    /// Split-mode hand-off between the capture and playback callbacks
    queue: Arc<FrameQueue>,
    input_stream: Option<StreamHandle>,
    output_stream: Option<StreamHandle>,
    duplex_stream: Option<StreamHandle>,
}

impl LoopbackSession {
    /// Create an idle session using the default RNNoise preprocessing units.
    pub fn new(engine: Arc<dyn AudioEngine>) -> Self {
        Self::with_preprocess_factory(engine, Arc::new(DenoiseUnitFactory))
    }

    /// Create an idle session with a custom preprocessing collaborator.
    pub fn with_preprocess_factory(
        engine: Arc<dyn AudioEngine>,
        preprocess_factory: Arc<dyn PreprocessUnitFactory>,
    ) -> Self {
        let group = engine.open_sound_group();
        Self {
            engine,
            preprocess_factory,
            group,
            active: false,
            format: None,
            queue: Arc::new(FrameQueue::new()),
            input_stream: None,
            output_stream: None,
            duplex_stream: None,
        }
    }

    /// Whether a test is currently running.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The formats negotiated for the running test, if any.
    pub fn negotiated_format(&self) -> Option<NegotiatedFormat> {
        self.format
    }

    /// Frames currently waiting in the split-mode queue.
    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    /// Start a split-mode loopback test: independent capture and render
    /// streams bridged through the frame queue.
    ///
    /// Echo cancellation is rejected here — without a hardware-synchronized
    /// render reference the canceller would train on garbage; use
    /// [`LoopbackSession::start_duplex_test`] instead.
    pub fn start_test(
        &mut self,
        input_device_id: &str,
        output_device_id: &str,
        sample_rate: u32,
        channels: u16,
        preprocess: &PreprocessConfig,
    ) -> Result<(), LoopbackError> {
        if self.active {
            return Err(LoopbackError::AlreadyActive);
        }
        if preprocess.enable_aec {
            return Err(LoopbackError::EchoCancelUnavailable);
        }

        let input_dev = self
            .engine
            .get_device(input_device_id)
            .ok_or_else(|| LoopbackError::DeviceUnavailable(input_device_id.to_string()))?;
        let output_dev = self
            .engine
            .get_device(output_device_id)
            .ok_or_else(|| LoopbackError::DeviceUnavailable(output_device_id.to_string()))?;

        let fmt = negotiate(sample_rate, channels, &input_dev, &output_dev)?;
        let render_samples = fmt.render.frame_samples();

        // A resampled capture stream runs at its own 40 ms frame length; the
        // resampler reshapes it to the render frame.
        let (resampler, capture_samples) = if fmt.needs_resample {
            let resampler = self.build_resampler(fmt.capture, fmt.render)?;
            (Some(resampler), fmt.capture.frame_samples())
        } else {
            (None, render_samples)
        };

        let units = self.build_gate(fmt.render.sample_rate, render_samples, fmt.render.channels, preprocess)?;

        log::info!(
            "starting split loopback: {} -> {}",
            input_dev.name,
            output_dev.name
        );

        let feeder = Box::new(PlaybackFeeder::new(self.queue.clone()));
        let output_stream = match self.engine.open_output_stream(
            feeder,
            output_device_id,
            self.group,
            fmt.render.sample_rate,
            fmt.render.channels,
            render_samples,
        ) {
            Some(handle) => handle,
            None => {
                self.stop_test();
                return Err(LoopbackError::StreamOpen("render"));
            }
        };
        self.output_stream = Some(output_stream);

        if !self.engine.start_stream(output_stream) {
            self.stop_test();
            return Err(LoopbackError::StreamOpen("render"));
        }

        let processor = Box::new(CaptureProcessor::new(
            fmt.render,
            resampler,
            units,
            self.queue.clone(),
        ));
        let input_stream = match self.engine.open_input_stream(
            processor,
            input_device_id,
            self.group,
            fmt.capture.sample_rate,
            fmt.capture.channels,
            capture_samples,
        ) {
            Some(handle) => handle,
            None => {
                self.stop_test();
                return Err(LoopbackError::StreamOpen("capture"));
            }
        };
        self.input_stream = Some(input_stream);

        self.format = Some(fmt);
        self.active = true;
        Ok(())
    }

    /// Start a duplex loopback test: one hardware-synchronized
    /// capture+render cycle, the only mode in which echo cancellation has a
    /// true reference frame to train on.
    ///
    /// The capture device must support the requested rate natively (at its
    /// best-matching channel count); a mismatched channel count is bridged
    /// with a same-rate layout conversion.
    pub fn start_duplex_test(
        &mut self,
        input_device_id: &str,
        output_device_id: &str,
        sample_rate: u32,
        channels: u16,
        preprocess: &PreprocessConfig,
    ) -> Result<(), LoopbackError> {
        if self.active {
            return Err(LoopbackError::AlreadyActive);
        }

        let input_dev = self
            .engine
            .get_device(input_device_id)
            .ok_or_else(|| LoopbackError::DeviceUnavailable(input_device_id.to_string()))?;
        if input_dev.default_sample_rate == 0 {
            return Err(LoopbackError::DeviceUnavailable(input_device_id.to_string()));
        }

        let input_channels = input_dev.closest_input_channels(channels);
        if !input_dev.supports_input_format(input_channels, sample_rate) {
            return Err(LoopbackError::UnsupportedCaptureFormat {
                sample_rate,
                channels: input_channels,
            });
        }

        let samples = frame_samples(sample_rate);
        let capture = DeviceFormat::new(sample_rate, input_channels);
        let render = DeviceFormat::new(sample_rate, channels);

        // Same-rate layout bridge when the device's channel count differs
        // from the requested one.
        let resampler = if input_channels != channels {
            Some(self.build_resampler(capture, render)?)
        } else {
            None
        };

        let units = self.build_gate(sample_rate, samples, channels, preprocess)?;

        log::info!(
            "starting duplex loopback on {} ({} Hz, {}ch capture / {}ch render)",
            input_dev.name,
            sample_rate,
            input_channels,
            channels
        );

        let processor = Box::new(DuplexProcessor::new(
            samples,
            channels,
            channels,
            resampler,
            units,
        ));
        let duplex_stream = match self.engine.open_duplex_stream(
            processor,
            input_device_id,
            output_device_id,
            self.group,
            sample_rate,
            input_channels,
            channels,
            samples,
        ) {
            Some(handle) => handle,
            None => {
                self.stop_test();
                return Err(LoopbackError::StreamOpen("duplex"));
            }
        };
        self.duplex_stream = Some(duplex_stream);

        self.format = Some(NegotiatedFormat {
            capture,
            render,
            needs_resample: input_channels != channels,
        });
        self.active = true;
        Ok(())
    }

    /// Split-mode start using a persisted configuration.
    pub fn start_from_config(&mut self, config: &LoopbackConfig) -> Result<(), LoopbackError> {
        self.start_test(
            &config.input_device_id,
            &config.output_device_id,
            config.sample_rate,
            config.channels,
            &config.preprocess,
        )
    }

    /// Duplex start using a persisted configuration.
    pub fn start_duplex_from_config(
        &mut self,
        config: &LoopbackConfig,
    ) -> Result<(), LoopbackError> {
        self.start_duplex_test(
            &config.input_device_id,
            &config.output_device_id,
            config.sample_rate,
            config.channels,
            &config.preprocess,
        )
    }

    /// Stop whatever is running and release every owned resource.
    ///
    /// Closing a stream drops its handler, which releases the resampler and
    /// channel buffers and closes the preprocessing units; the engine
    /// guarantees no callback is in flight once a close call returns. Always
    /// safe to call; the return value reports whether any stream was
    /// actually open.
    pub fn stop_test(&mut self) -> bool {
        let mut was_open = false;
        if let Some(handle) = self.duplex_stream.take() {
            was_open |= self.engine.close_duplex_stream(handle);
        }
        if let Some(handle) = self.input_stream.take() {
            was_open |= self.engine.close_input_stream(handle);
        }
        if let Some(handle) = self.output_stream.take() {
            was_open |= self.engine.close_output_stream(handle);
        }

        self.queue.clear();
        self.format = None;
        self.active = false;

        if was_open {
            log::info!("loopback test stopped");
        }
        was_open
    }

    fn build_resampler(
        &self,
        capture: DeviceFormat,
        render: DeviceFormat,
    ) -> Result<Box<dyn Resampler + Send>, LoopbackError> {
        make_resampler(
            capture.channels,
            capture.sample_rate,
            render.channels,
            render.sample_rate,
        )
        .ok_or(LoopbackError::ResamplerConstruction {
            in_channels: capture.channels,
            in_rate: capture.sample_rate,
            out_channels: render.channels,
            out_rate: render.sample_rate,
        })
    }

    /// Create and configure one preprocessing unit per render channel as an
    /// atomic step; a rejected sub-setting rolls the session back.
    fn build_gate(
        &mut self,
        sample_rate: u32,
        frame_samples: usize,
        channels: u16,
        preprocess: &PreprocessConfig,
    ) -> Result<Vec<Box<dyn PreprocessUnit>>, LoopbackError> {
        let mut units: Vec<Box<dyn PreprocessUnit>> = (0..channels)
            .map(|_| self.preprocess_factory.create_unit())
            .collect();

        if let Err(err) = configure_units(&mut units, sample_rate, frame_samples, preprocess) {
            self.stop_test();
            return Err(err);
        }
        Ok(units)
    }
}

impl Drop for LoopbackSession {
    fn drop(&mut self) {
        if self.active {
            self.stop_test();
        }
        self.engine.remove_sound_group(self.group);
    }
}
