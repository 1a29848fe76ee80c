//! # Audio Engine Contract
//!
//! The pipeline does not talk to sound hardware directly. It is driven by an
//! external audio I/O engine that owns the platform streams and invokes
//! capture/playback/duplex callbacks on its own threads. This module defines
//! that collaborator contract:
//!
//! - [`AudioEngine`]: device lookup, stream open/start/close, sound groups
//! - [`DeviceInfo`]: a device's identity plus its format capabilities
//! - [`CaptureHandler`] / [`PlaybackHandler`] / [`DuplexHandler`]: the
//!   state-holding callback objects registered with each stream
//!
//! ## Threading Contract
//!
//! The engine may run capture and playback callbacks concurrently on
//! different threads; within one stream, frames arrive in order. For a
//! duplex stream the engine guarantees the echo-reference callback and the
//! produce callback of one cycle never overlap. `close_*_stream` must not
//! return while a callback on that stream is still in flight — handler
//! state is released on close and no callback may observe it afterwards.
//!
//! ## Stream Start Semantics
//!
//! Input and duplex streams begin delivering callbacks as soon as they are
//! opened. Output streams are opened silent and begin pulling frames only
//! after [`AudioEngine::start_stream`].

use std::fmt;

/// Identifier for a sound group, a bag of streams the engine tears down
/// together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u32);

/// Opaque token identifying one open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

/// A device's identity and format capabilities as reported by the engine.
///
/// `default_sample_rate == 0` marks a device that exists in the engine's
/// table but is currently unusable (unplugged, claimed exclusively, driver
/// error); format negotiation treats it as unavailable.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    /// The rate the device runs at when nothing else is requested; zero
    /// when the device is unusable.
    pub default_sample_rate: u32,
    /// Sample rates the device can capture at
    pub input_sample_rates: Vec<u32>,
    /// Sample rates the device can render at
    pub output_sample_rates: Vec<u32>,
    /// Highest capture channel count (0 = capture not supported)
    pub max_input_channels: u16,
    /// Highest render channel count (0 = render not supported)
    pub max_output_channels: u16,
}

impl DeviceInfo {
    /// Whether the device can capture natively at the exact rate/channel pair.
    pub fn supports_input_format(&self, channels: u16, sample_rate: u32) -> bool {
        channels > 0
            && channels <= self.max_input_channels
            && self.input_sample_rates.contains(&sample_rate)
    }

    /// Whether the device can render natively at the exact rate/channel pair.
    pub fn supports_output_format(&self, channels: u16, sample_rate: u32) -> bool {
        channels > 0
            && channels <= self.max_output_channels
            && self.output_sample_rates.contains(&sample_rate)
    }

    /// Best capture channel count for a requested one: the request itself if
    /// the device can do it, otherwise the closest count it offers.
    pub fn closest_input_channels(&self, requested: u16) -> u16 {
        requested.clamp(1, self.max_input_channels.max(1))
    }

    /// Best render channel count for a requested one.
    pub fn closest_output_channels(&self, requested: u16) -> u16 {
        requested.clamp(1, self.max_output_channels.max(1))
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} Hz, in {}ch / out {}ch)",
            self.name, self.default_sample_rate, self.max_input_channels, self.max_output_channels
        )
    }
}

/// Callback object for a capture stream.
///
/// `frame` holds `sample_count * channels` interleaved samples; the handler
/// owns all state it needs and is invoked from an engine thread.
pub trait CaptureHandler: Send {
    fn on_capture(&mut self, frame: &[f32], sample_count: usize);
}

/// Callback object for a playback stream.
pub trait PlaybackHandler: Send {
    /// Fill `buffer` (`sample_count * channels` interleaved samples) with the
    /// next frame to render. Returning `false` asks the engine to end the
    /// stream after this frame.
    fn on_playback(&mut self, buffer: &mut [f32], sample_count: usize) -> bool;

    /// Notification that the stream finished draining after `on_playback`
    /// returned `false` or the stream was closed.
    fn on_playback_ended(&mut self) {}
}

/// Callback object for a duplex stream, driven in two phases per cycle.
pub trait DuplexHandler: Send {
    /// Echo-reference phase: `capture` is the newly captured frame,
    /// `prior_output` the frame the engine most recently rendered. The
    /// handler must only read `prior_output`; the engine may still be
    /// flushing the current output buffer.
    fn on_duplex_echo(&mut self, capture: &[f32], prior_output: &[f32], sample_count: usize);

    /// Produce phase: overwrite `output` in place with the frame to render
    /// next.
    fn on_duplex_produce(&mut self, capture: &[f32], output: &mut [f32], sample_count: usize);
}

/// The external audio I/O engine.
///
/// Open calls return `None` when the engine rejects the stream (unknown
/// device, unsupported format, resource exhaustion). Close calls return
/// whether a stream was actually open under that handle, and only return
/// once no callback is in flight.
pub trait AudioEngine: Send + Sync {
    /// Allocate a sound group for a set of related streams.
    fn open_sound_group(&self) -> GroupId;

    /// Release a sound group, closing any stream still registered under it.
    fn remove_sound_group(&self, group: GroupId);

    /// Look up a device and its capabilities.
    fn get_device(&self, id: &str) -> Option<DeviceInfo>;

    /// Open a capture stream; callbacks begin immediately.
    #[allow(clippy::too_many_arguments)]
    fn open_input_stream(
        &self,
        handler: Box<dyn CaptureHandler>,
        device_id: &str,
        group: GroupId,
        sample_rate: u32,
        channels: u16,
        frame_samples: usize,
    ) -> Option<StreamHandle>;

    /// Open a playback stream; silent until [`AudioEngine::start_stream`].
    #[allow(clippy::too_many_arguments)]
    fn open_output_stream(
        &self,
        handler: Box<dyn PlaybackHandler>,
        device_id: &str,
        group: GroupId,
        sample_rate: u32,
        channels: u16,
        frame_samples: usize,
    ) -> Option<StreamHandle>;

    /// Open a hardware-synchronized capture+render stream; the duplex cycle
    /// begins immediately.
    #[allow(clippy::too_many_arguments)]
    fn open_duplex_stream(
        &self,
        handler: Box<dyn DuplexHandler>,
        input_device_id: &str,
        output_device_id: &str,
        group: GroupId,
        sample_rate: u32,
        input_channels: u16,
        output_channels: u16,
        frame_samples: usize,
    ) -> Option<StreamHandle>;

    /// Start pulling frames on a previously opened playback stream.
    fn start_stream(&self, handle: StreamHandle) -> bool;

    fn close_input_stream(&self, handle: StreamHandle) -> bool;
    fn close_output_stream(&self, handle: StreamHandle) -> bool;
    fn close_duplex_stream(&self, handle: StreamHandle) -> bool;
}
