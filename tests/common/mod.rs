//! Shared test doubles: a scripted in-memory audio engine and a recording
//! preprocessing unit. Tests drive the engine's callbacks by hand, which
//! makes the whole pipeline observable without touching real hardware.

// Each test binary compiles this module separately and uses a different
// subset of it.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use loopcheck::audio::engine::{
    AudioEngine, CaptureHandler, DeviceInfo, DuplexHandler, GroupId, PlaybackHandler, StreamHandle,
};
use loopcheck::audio::preprocess::{AgcSettings, PreprocessUnit, PreprocessUnitFactory};

/// Build a capability report for a scripted device.
pub fn fake_device(
    id: &str,
    default_rate: u32,
    rates: &[u32],
    max_input_channels: u16,
    max_output_channels: u16,
) -> DeviceInfo {
    DeviceInfo {
        id: id.to_string(),
        name: format!("Fake {}", id),
        default_sample_rate: default_rate,
        input_sample_rates: rates.to_vec(),
        output_sample_rates: rates.to_vec(),
        max_input_channels,
        max_output_channels,
    }
}

/// Failure switches for the scripted engine.
#[derive(Debug, Default, Clone)]
pub struct FakeEngineScript {
    pub fail_input_open: bool,
    pub fail_output_open: bool,
    pub fail_output_start: bool,
    pub fail_duplex_open: bool,
}

/// Parameters a stream was opened with, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedStream {
    pub device_id: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_samples: usize,
}

#[derive(Default)]
struct Inner {
    next_handle: u64,
    next_group: u32,
    capture: HashMap<u64, Box<dyn CaptureHandler>>,
    playback: HashMap<u64, Box<dyn PlaybackHandler>>,
    duplex: HashMap<u64, Box<dyn DuplexHandler>>,
    /// Last rendered frame per duplex stream, the echo reference
    duplex_prev: HashMap<u64, Vec<f32>>,
    started: Vec<u64>,
    input_opens: Vec<OpenedStream>,
    output_opens: Vec<OpenedStream>,
    duplex_opens: Vec<OpenedStream>,
    closes: Vec<&'static str>,
}

/// Scripted in-memory [`AudioEngine`]. Streams are handler registrations;
/// tests invoke the callbacks through the `drive_*` methods.
#[derive(Default)]
pub struct FakeEngine {
    devices: Mutex<HashMap<String, DeviceInfo>>,
    script: Mutex<FakeEngineScript>,
    inner: Mutex<Inner>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_device(&self, device: DeviceInfo) {
        self.devices
            .lock()
            .unwrap()
            .insert(device.id.clone(), device);
    }

    pub fn set_script(&self, script: FakeEngineScript) {
        *self.script.lock().unwrap() = script;
    }

    /// Feed one frame to the registered capture handler.
    pub fn drive_capture(&self, frame: &[f32], sample_count: usize) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(handler) = inner.capture.values_mut().next() else {
            return false;
        };
        handler.on_capture(frame, sample_count);
        true
    }

    /// Request one frame from the registered playback handler.
    pub fn drive_playback(&self, buffer: &mut [f32], sample_count: usize) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(handler) = inner.playback.values_mut().next() else {
            return false;
        };
        handler.on_playback(buffer, sample_count)
    }

    /// Run one full duplex cycle (echo phase then produce phase), feeding the
    /// previously produced frame back as the echo reference the way a real
    /// engine would.
    pub fn run_duplex_frame(&self, capture: &[f32], output: &mut [f32], sample_count: usize) -> bool {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let Some((&id, _)) = inner.duplex.iter().next() else {
            return false;
        };

        let prev = inner
            .duplex_prev
            .get(&id)
            .cloned()
            .unwrap_or_else(|| vec![0.0; output.len()]);

        let handler = inner.duplex.get_mut(&id).unwrap();
        handler.on_duplex_echo(capture, &prev, sample_count);
        handler.on_duplex_produce(capture, output, sample_count);
        inner.duplex_prev.insert(id, output.to_vec());
        true
    }

    pub fn input_opens(&self) -> Vec<OpenedStream> {
        self.inner.lock().unwrap().input_opens.clone()
    }

    pub fn output_opens(&self) -> Vec<OpenedStream> {
        self.inner.lock().unwrap().output_opens.clone()
    }

    pub fn duplex_opens(&self) -> Vec<OpenedStream> {
        self.inner.lock().unwrap().duplex_opens.clone()
    }

    pub fn closes(&self) -> Vec<&'static str> {
        self.inner.lock().unwrap().closes.clone()
    }

    pub fn open_stream_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.capture.len() + inner.playback.len() + inner.duplex.len()
    }

    pub fn started_streams(&self) -> usize {
        self.inner.lock().unwrap().started.len()
    }
}

fn opened(device_id: &str, sample_rate: u32, channels: u16, frame_samples: usize) -> OpenedStream {
    OpenedStream {
        device_id: device_id.to_string(),
        sample_rate,
        channels,
        frame_samples,
    }
}

impl AudioEngine for FakeEngine {
    fn open_sound_group(&self) -> GroupId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_group += 1;
        GroupId(inner.next_group)
    }

    fn remove_sound_group(&self, _group: GroupId) {
        let mut inner = self.inner.lock().unwrap();
        inner.capture.clear();
        inner.playback.clear();
        inner.duplex.clear();
        inner.duplex_prev.clear();
    }

    fn get_device(&self, id: &str) -> Option<DeviceInfo> {
        self.devices.lock().unwrap().get(id).cloned()
    }

    fn open_input_stream(
        &self,
        handler: Box<dyn CaptureHandler>,
        device_id: &str,
        _group: GroupId,
        sample_rate: u32,
        channels: u16,
        frame_samples: usize,
    ) -> Option<StreamHandle> {
        if self.script.lock().unwrap().fail_input_open {
            return None;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.next_handle += 1;
        let id = inner.next_handle;
        inner.capture.insert(id, handler);
        inner
            .input_opens
            .push(opened(device_id, sample_rate, channels, frame_samples));
        Some(StreamHandle(id))
    }

    fn open_output_stream(
        &self,
        handler: Box<dyn PlaybackHandler>,
        device_id: &str,
        _group: GroupId,
        sample_rate: u32,
        channels: u16,
        frame_samples: usize,
    ) -> Option<StreamHandle> {
        if self.script.lock().unwrap().fail_output_open {
            return None;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.next_handle += 1;
        let id = inner.next_handle;
        inner.playback.insert(id, handler);
        inner
            .output_opens
            .push(opened(device_id, sample_rate, channels, frame_samples));
        Some(StreamHandle(id))
    }

    fn open_duplex_stream(
        &self,
        handler: Box<dyn DuplexHandler>,
        input_device_id: &str,
        _output_device_id: &str,
        _group: GroupId,
        sample_rate: u32,
        input_channels: u16,
        _output_channels: u16,
        frame_samples: usize,
    ) -> Option<StreamHandle> {
        if self.script.lock().unwrap().fail_duplex_open {
            return None;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.next_handle += 1;
        let id = inner.next_handle;
        inner.duplex.insert(id, handler);
        inner
            .duplex_opens
            .push(opened(input_device_id, sample_rate, input_channels, frame_samples));
        Some(StreamHandle(id))
    }

    fn start_stream(&self, handle: StreamHandle) -> bool {
        if self.script.lock().unwrap().fail_output_start {
            return false;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.started.push(handle.0);
        true
    }

    fn close_input_stream(&self, handle: StreamHandle) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.closes.push("input");
        inner.capture.remove(&handle.0).is_some()
    }

    fn close_output_stream(&self, handle: StreamHandle) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.closes.push("output");
        inner.playback.remove(&handle.0).is_some()
    }

    fn close_duplex_stream(&self, handle: StreamHandle) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.closes.push("duplex");
        inner.duplex_prev.remove(&handle.0);
        inner.duplex.remove(&handle.0).is_some()
    }
}

/// Counters shared between a [`RecordingUnitFactory`] and its units.
#[derive(Default)]
pub struct UnitCounters {
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub echo_calls: AtomicUsize,
    pub preprocess_calls: AtomicUsize,
    /// Reference buffer seen by the most recent echo_cancel call
    pub last_reference: Mutex<Vec<f32>>,
}

/// Factory producing pass-through units that record what happens to them.
pub struct RecordingUnitFactory {
    pub counters: Arc<UnitCounters>,
    /// Setter name that should report rejection, for gate-failure tests
    pub fail_step: Option<&'static str>,
}

impl RecordingUnitFactory {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(UnitCounters::default()),
            fail_step: None,
        }
    }

    pub fn failing_at(step: &'static str) -> Self {
        Self {
            counters: Arc::new(UnitCounters::default()),
            fail_step: Some(step),
        }
    }
}

impl PreprocessUnitFactory for RecordingUnitFactory {
    fn create_unit(&self) -> Box<dyn PreprocessUnit> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Box::new(RecordingUnit {
            counters: self.counters.clone(),
            fail_step: self.fail_step,
            aec: false,
        })
    }
}

pub struct RecordingUnit {
    counters: Arc<UnitCounters>,
    fail_step: Option<&'static str>,
    aec: bool,
}

impl RecordingUnit {
    fn ok_unless(&self, step: &'static str) -> bool {
        self.fail_step != Some(step)
    }
}

impl PreprocessUnit for RecordingUnit {
    fn initialize(&mut self, _sample_rate: u32, _frame_samples: usize) -> bool {
        self.ok_unless("initialize")
    }
    fn enable_agc(&mut self, _enable: bool) -> bool {
        self.ok_unless("enable_agc")
    }
    fn set_agc_settings(&mut self, _settings: &AgcSettings) -> bool {
        self.ok_unless("set_agc_settings")
    }
    fn enable_denoise(&mut self, _enable: bool) -> bool {
        self.ok_unless("enable_denoise")
    }
    fn set_denoise_level(&mut self, _level: i32) -> bool {
        self.ok_unless("set_denoise_level")
    }
    fn enable_dereverb(&mut self, _enable: bool) -> bool {
        self.ok_unless("enable_dereverb")
    }
    fn enable_echo_cancel(&mut self, enable: bool) -> bool {
        self.aec = enable;
        self.ok_unless("enable_echo_cancel")
    }
    fn set_echo_suppress_level(&mut self, _level: i32) -> bool {
        self.ok_unless("set_echo_suppress_level")
    }
    fn set_echo_suppress_active(&mut self, _level: i32) -> bool {
        self.ok_unless("set_echo_suppress_active")
    }
    fn preprocess(&mut self, _buffer: &mut [f32]) {
        self.counters.preprocess_calls.fetch_add(1, Ordering::SeqCst);
    }
    fn echo_cancel(&mut self, capture: &[f32], reference: &[f32], cleaned: &mut [f32]) {
        self.counters.echo_calls.fetch_add(1, Ordering::SeqCst);
        *self.counters.last_reference.lock().unwrap() = reference.to_vec();
        cleaned.copy_from_slice(capture);
    }
    fn is_echo_cancel(&self) -> bool {
        self.aec
    }
    fn close(&mut self) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}
