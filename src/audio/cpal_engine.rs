//! # CPAL Engine Adapter
//!
//! [`CpalEngine`] implements the [`AudioEngine`] contract on top of CPAL so
//! the loopback pipeline can run against real hardware. Each stream lives on
//! its own thread: the thread builds the CPAL stream, reports back whether
//! the build succeeded, keeps the stream alive while the running flag is
//! set, and drops it on close. Closing joins the thread, which is what
//! upholds the engine contract that no callback is in flight once a close
//! call returns.
//!
//! ## Device Identifiers
//!
//! Devices are addressed as `input_<index>` / `output_<index>` in CPAL
//! enumeration order, with `input_default` / `output_default` resolving to
//! the host defaults.
//!
//! ## Frame Chunking
//!
//! CPAL delivers whatever buffer size the driver prefers; the adapter
//! accumulates callback data and hands the pipeline handlers exact
//! fixed-length frames.
//!
//! ## Duplex Emulation
//!
//! CPAL has no native duplex stream. The adapter runs the duplex cycle in
//! the capture callback: each complete capture frame runs the echo phase
//! against the last produced frame, then the produce phase, and the produced
//! frame travels over a bounded channel to the playback callback. The two
//! phases therefore never run concurrently, preserving the duplex contract,
//! but capture and render are synchronized in software rather than by the
//! hardware clock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use crossbeam_channel::bounded;

use crate::audio::engine::{
    AudioEngine, CaptureHandler, DeviceInfo, DuplexHandler, GroupId, PlaybackHandler, StreamHandle,
};
use crate::logger::log;

/// Sample rates probed when building a device's capability report.
const PROBE_RATES: [u32; 7] = [8000, 16000, 22050, 32000, 44100, 48000, 96000];

/// How long stream threads sleep between shutdown-flag checks.
const KEEPALIVE_POLL: Duration = Duration::from_millis(10);

/// Depth of the duplex produce-to-playback channel, in frames.
const DUPLEX_CHANNEL_FRAMES: usize = 4;

enum StreamKind {
    Input,
    Output,
    Duplex,
}

struct StreamEntry {
    kind: StreamKind,
    group: GroupId,
    running: Arc<AtomicBool>,
    started: Arc<AtomicBool>,
    threads: Vec<thread::JoinHandle<()>>,
}

/// CPAL-backed [`AudioEngine`].
#[derive(Default)]
pub struct CpalEngine {
    streams: Mutex<HashMap<u64, StreamEntry>>,
    next_handle: AtomicU64,
    next_group: AtomicU32,
}

impl CpalEngine {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            next_group: AtomicU32::new(1),
        }
    }

    /// Enumerate capture devices with their capability reports.
    pub fn list_input_devices() -> Vec<DeviceInfo> {
        let host = cpal::default_host();
        let mut devices = Vec::new();

        if let Ok(device_iter) = host.input_devices() {
            for (index, device) in device_iter.enumerate() {
                devices.push(describe_device(&device, &format!("input_{}", index), true));
            }
        }
        devices
    }

    /// Enumerate render devices with their capability reports.
    pub fn list_output_devices() -> Vec<DeviceInfo> {
        let host = cpal::default_host();
        let mut devices = Vec::new();

        if let Ok(device_iter) = host.output_devices() {
            for (index, device) in device_iter.enumerate() {
                devices.push(describe_device(&device, &format!("output_{}", index), false));
            }
        }
        devices
    }

    fn register(
        &self,
        kind: StreamKind,
        group: GroupId,
        running: Arc<AtomicBool>,
        started: Arc<AtomicBool>,
        threads: Vec<thread::JoinHandle<()>>,
    ) -> StreamHandle {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.streams.lock().unwrap().insert(
            id,
            StreamEntry {
                kind,
                group,
                running,
                started,
                threads,
            },
        );
        StreamHandle(id)
    }

    fn close_stream(&self, handle: StreamHandle, expect: fn(&StreamKind) -> bool) -> bool {
        let entry = {
            let mut streams = self.streams.lock().unwrap();
            let kind_matches = streams
                .get(&handle.0)
                .map(|entry| expect(&entry.kind))
                .unwrap_or(false);
            if kind_matches {
                streams.remove(&handle.0)
            } else {
                None
            }
        };

        match entry {
            Some(entry) => {
                entry.running.store(false, Ordering::Relaxed);
                for thread in entry.threads {
                    let _ = thread.join();
                }
                true
            }
            None => false,
        }
    }
}

impl AudioEngine for CpalEngine {
    fn open_sound_group(&self) -> GroupId {
        GroupId(self.next_group.fetch_add(1, Ordering::Relaxed))
    }

    fn remove_sound_group(&self, group: GroupId) {
        let handles: Vec<u64> = {
            let streams = self.streams.lock().unwrap();
            streams
                .iter()
                .filter(|(_, entry)| entry.group == group)
                .map(|(&id, _)| id)
                .collect()
        };
        for id in handles {
            self.close_stream(StreamHandle(id), |_| true);
        }
    }

    fn get_device(&self, id: &str) -> Option<DeviceInfo> {
        let is_input = id.starts_with("input");
        let device = get_cpal_device(id, is_input)?;
        Some(describe_device(&device, id, is_input))
    }

    fn open_input_stream(
        &self,
        handler: Box<dyn CaptureHandler>,
        device_id: &str,
        group: GroupId,
        sample_rate: u32,
        channels: u16,
        frame_samples: usize,
    ) -> Option<StreamHandle> {
        let device = get_cpal_device(device_id, true)?;
        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: BufferSize::Default,
        };

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<bool>(1);
        let running_thread = running.clone();

        let thread = thread::spawn(move || {
            let samples_per_frame = frame_samples * config.channels as usize;
            let mut pending: Vec<f32> = Vec::with_capacity(samples_per_frame * 2);
            let mut frame = vec![0.0f32; samples_per_frame];
            let mut handler = handler;
            let running_cb = running_thread.clone();

            let stream = match device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    // Re-chunk whatever the driver delivers into exact
                    // fixed-length frames.
                    pending.extend_from_slice(data);
                    while pending.len() >= samples_per_frame {
                        for (slot, sample) in frame.iter_mut().zip(pending.drain(..samples_per_frame))
                        {
                            *slot = sample;
                        }
                        handler.on_capture(&frame, frame_samples);
                    }
                },
                move |err| {
                    log::error!("capture stream error: {}", err);
                },
                None,
            ) {
                Ok(stream) => stream,
                Err(err) => {
                    log::error!("failed to build capture stream: {}", err);
                    let _ = ready_tx.send(false);
                    return;
                }
            };

            // Capture streams deliver callbacks as soon as they are open.
            if let Err(err) = stream.play() {
                log::error!("failed to start capture stream: {}", err);
                let _ = ready_tx.send(false);
                return;
            }
            let _ = ready_tx.send(true);

            while running_thread.load(Ordering::Relaxed) {
                thread::sleep(KEEPALIVE_POLL);
            }
        });

        if !ready_rx.recv().unwrap_or(false) {
            let _ = thread.join();
            return None;
        }

        let started = Arc::new(AtomicBool::new(true));
        Some(self.register(StreamKind::Input, group, running, started, vec![thread]))
    }

    fn open_output_stream(
        &self,
        handler: Box<dyn PlaybackHandler>,
        device_id: &str,
        group: GroupId,
        sample_rate: u32,
        channels: u16,
        frame_samples: usize,
    ) -> Option<StreamHandle> {
        let device = get_cpal_device(device_id, false)?;
        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: BufferSize::Default,
        };

        let running = Arc::new(AtomicBool::new(true));
        let started = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = bounded::<bool>(1);
        let running_thread = running.clone();
        let started_thread = started.clone();

        let thread = thread::spawn(move || {
            let samples_per_frame = frame_samples * config.channels as usize;
            let mut buffer: VecDeque<f32> = VecDeque::with_capacity(samples_per_frame * 2);
            let mut frame = vec![0.0f32; samples_per_frame];
            let mut handler = handler;
            let mut ended = false;
            let running_cb = running_thread.clone();

            let stream = match device.build_output_stream(
                &config,
                move |data: &mut [f32], _| {
                    if !running_cb.load(Ordering::Relaxed) {
                        data.fill(0.0);
                        return;
                    }
                    // Pull whole frames from the handler until the driver's
                    // buffer is covered.
                    while !ended && buffer.len() < data.len() {
                        if handler.on_playback(&mut frame, frame_samples) {
                            buffer.extend(frame.iter().copied());
                        } else {
                            handler.on_playback_ended();
                            ended = true;
                        }
                    }
                    for sample in data.iter_mut() {
                        *sample = buffer.pop_front().unwrap_or(0.0);
                    }
                },
                move |err| {
                    log::error!("render stream error: {}", err);
                },
                None,
            ) {
                Ok(stream) => stream,
                Err(err) => {
                    log::error!("failed to build render stream: {}", err);
                    let _ = ready_tx.send(false);
                    return;
                }
            };
            let _ = ready_tx.send(true);

            // Render streams stay silent until start_stream flips the flag.
            while running_thread.load(Ordering::Relaxed) && !started_thread.load(Ordering::Relaxed)
            {
                thread::sleep(KEEPALIVE_POLL);
            }
            if running_thread.load(Ordering::Relaxed) {
                if let Err(err) = stream.play() {
                    log::error!("failed to start render stream: {}", err);
                    return;
                }
            }

            while running_thread.load(Ordering::Relaxed) {
                thread::sleep(KEEPALIVE_POLL);
            }
        });

        if !ready_rx.recv().unwrap_or(false) {
            let _ = thread.join();
            return None;
        }

        Some(self.register(StreamKind::Output, group, running, started, vec![thread]))
    }

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
    ) -> Option<StreamHandle> {
        let input_device = get_cpal_device(input_device_id, true)?;
        let output_device = get_cpal_device(output_device_id, false)?;

        let input_config = StreamConfig {
            channels: input_channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: BufferSize::Default,
        };
        let output_config = StreamConfig {
            channels: output_channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: BufferSize::Default,
        };

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<bool>(1);
        let (frame_tx, frame_rx) = bounded::<Vec<f32>>(DUPLEX_CHANNEL_FRAMES);
        let running_thread = running.clone();

        // Both streams live on one thread; the duplex cycle itself runs in
        // the capture callback so the echo and produce phases of one cycle
        // can never overlap.
        let thread = thread::spawn(move || {
            let in_samples = frame_samples * input_config.channels as usize;
            let out_samples = frame_samples * output_config.channels as usize;

            let mut pending: Vec<f32> = Vec::with_capacity(in_samples * 2);
            let mut capture_frame = vec![0.0f32; in_samples];
            let mut prev_output = vec![0.0f32; out_samples];
            let mut handler = handler;
            let running_cb = running_thread.clone();

            let input_stream = match input_device.build_input_stream(
                &input_config,
                move |data: &[f32], _| {
                    if !running_cb.load(Ordering::Relaxed) {
                        return;
                    }
                    pending.extend_from_slice(data);
                    while pending.len() >= in_samples {
                        for (slot, sample) in
                            capture_frame.iter_mut().zip(pending.drain(..in_samples))
                        {
                            *slot = sample;
                        }

                        handler.on_duplex_echo(&capture_frame, &prev_output, frame_samples);

                        let mut produced = vec![0.0f32; out_samples];
                        handler.on_duplex_produce(&capture_frame, &mut produced, frame_samples);

                        // A full channel means playback is behind; dropping
                        // the oldest produced frame keeps the cycle moving.
                        if frame_tx.try_send(produced.clone()).is_err() {
                            log::debug!("duplex playback behind, dropping produced frame");
                        }
                        prev_output = produced;
                    }
                },
                move |err| {
                    log::error!("duplex capture error: {}", err);
                },
                None,
            ) {
                Ok(stream) => stream,
                Err(err) => {
                    log::error!("failed to build duplex capture stream: {}", err);
                    let _ = ready_tx.send(false);
                    return;
                }
            };

            let mut playback_buffer: VecDeque<f32> = VecDeque::with_capacity(out_samples * 2);
            let output_stream = match output_device.build_output_stream(
                &output_config,
                move |data: &mut [f32], _| {
                    while let Ok(frame) = frame_rx.try_recv() {
                        playback_buffer.extend(frame);
                    }
                    for sample in data.iter_mut() {
                        *sample = playback_buffer.pop_front().unwrap_or(0.0);
                    }
                },
                move |err| {
                    log::error!("duplex render error: {}", err);
                },
                None,
            ) {
                Ok(stream) => stream,
                Err(err) => {
                    log::error!("failed to build duplex render stream: {}", err);
                    let _ = ready_tx.send(false);
                    return;
                }
            };

            if input_stream.play().is_err() || output_stream.play().is_err() {
                log::error!("failed to start duplex streams");
                let _ = ready_tx.send(false);
                return;
            }
            let _ = ready_tx.send(true);

            while running_thread.load(Ordering::Relaxed) {
                thread::sleep(KEEPALIVE_POLL);
            }
        });

        if !ready_rx.recv().unwrap_or(false) {
            let _ = thread.join();
            return None;
        }

        let started = Arc::new(AtomicBool::new(true));
        Some(self.register(StreamKind::Duplex, group, running, started, vec![thread]))
    }

    fn start_stream(&self, handle: StreamHandle) -> bool {
        let streams = self.streams.lock().unwrap();
        match streams.get(&handle.0) {
            Some(entry) => {
                entry.started.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    fn close_input_stream(&self, handle: StreamHandle) -> bool {
        self.close_stream(handle, |kind| matches!(kind, StreamKind::Input))
    }

    fn close_output_stream(&self, handle: StreamHandle) -> bool {
        self.close_stream(handle, |kind| matches!(kind, StreamKind::Output))
    }

    fn close_duplex_stream(&self, handle: StreamHandle) -> bool {
        self.close_stream(handle, |kind| matches!(kind, StreamKind::Duplex))
    }
}

impl Drop for CpalEngine {
    fn drop(&mut self) {
        let handles: Vec<u64> = self.streams.lock().unwrap().keys().copied().collect();
        for id in handles {
            self.close_stream(StreamHandle(id), |_| true);
        }
    }
}

/// Resolve a device identifier to a CPAL device.
fn get_cpal_device(device_id: &str, is_input: bool) -> Option<cpal::Device> {
    let host = cpal::default_host();

    if is_input {
        if device_id == "input_default" {
            return host.default_input_device();
        }
        if let Ok(device_iter) = host.input_devices() {
            for (index, device) in device_iter.enumerate() {
                if format!("input_{}", index) == device_id {
                    return Some(device);
                }
            }
        }
    } else {
        if device_id == "output_default" {
            return host.default_output_device();
        }
        if let Ok(device_iter) = host.output_devices() {
            for (index, device) in device_iter.enumerate() {
                if format!("output_{}", index) == device_id {
                    return Some(device);
                }
            }
        }
    }

    None
}

/// Build a capability report for one side (capture or render) of a device.
fn describe_device(device: &cpal::Device, id: &str, is_input: bool) -> DeviceInfo {
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let (default_sample_rate, sample_rates, max_channels) = if is_input {
        let default_rate = device
            .default_input_config()
            .map(|config| config.sample_rate().0)
            .unwrap_or(0);
        let ranges: Vec<_> = device
            .supported_input_configs()
            .map(|configs| configs.collect())
            .unwrap_or_default();
        (default_rate, probe_rates(&ranges), max_config_channels(&ranges))
    } else {
        let default_rate = device
            .default_output_config()
            .map(|config| config.sample_rate().0)
            .unwrap_or(0);
        let ranges: Vec<_> = device
            .supported_output_configs()
            .map(|configs| configs.collect())
            .unwrap_or_default();
        (default_rate, probe_rates(&ranges), max_config_channels(&ranges))
    };

    DeviceInfo {
        id: id.to_string(),
        name,
        default_sample_rate,
        input_sample_rates: if is_input { sample_rates.clone() } else { Vec::new() },
        output_sample_rates: if is_input { Vec::new() } else { sample_rates },
        max_input_channels: if is_input { max_channels } else { 0 },
        max_output_channels: if is_input { 0 } else { max_channels },
    }
}

/// Which of the common rates the device ranges can actually run at.
fn probe_rates(ranges: &[cpal::SupportedStreamConfigRange]) -> Vec<u32> {
    PROBE_RATES
        .iter()
        .copied()
        .filter(|&rate| {
            ranges
                .iter()
                .any(|range| range.clone().try_with_sample_rate(SampleRate(rate)).is_some())
        })
        .collect()
}

fn max_config_channels(ranges: &[cpal::SupportedStreamConfigRange]) -> u16 {
    ranges.iter().map(|range| range.channels()).max().unwrap_or(0)
}
