//! # Speech Preprocessing Module
//!
//! Per-channel speech cleanup applied between capture and playback: automatic
//! gain control, denoising, dereverberation and echo handling. The pipeline
//! only depends on the [`PreprocessUnit`] collaborator contract; the default
//! implementation, [`DenoiseUnit`], wraps the RNNoise model from
//! `nnnoiseless` with a voice-activity-gated gain stage.
//!
//! ## The Gate
//!
//! A loopback test owns one unit per render channel. All settings are applied
//! once, at session start, through [`configure_units`] — the configuration is
//! a single atomic step, and any rejected sub-setting invalidates the whole
//! gate so the session can roll back. There is no reconfiguration while a
//! test runs.
//!
//! ## Echo Cancellation
//!
//! [`PreprocessUnit::echo_cancel`] is only invoked on the duplex path, where
//! the engine hands back the frame it actually just rendered. With echo
//! cancellation disabled the operation degrades to a plain copy of the raw
//! capture. For stereo, the duplex bridge uses echo cancellation only when
//! *both* channel units have it enabled; asymmetric enablement falls back to
//! a plain stereo split (see `audio::duplex`).

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_DENOISE_LEVEL, DEFAULT_ECHO_SUPPRESS_ACTIVE, DEFAULT_ECHO_SUPPRESS_LEVEL,
};
use crate::error::LoopbackError;
use crate::logger::log;

/// Automatic gain control parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgcSettings {
    /// Target peak amplitude the gain controller steers toward (0.0 - 1.0)
    pub gain_level: f32,
    /// Fastest allowed gain increase, dB per second
    pub max_increment: i32,
    /// Fastest allowed gain decrease, dB per second
    pub max_decrement: i32,
    /// Hard cap on applied gain, dB
    pub max_gain: i32,
}

impl Default for AgcSettings {
    fn default() -> Self {
        Self {
            gain_level: 0.25,
            max_increment: 12,
            max_decrement: 40,
            max_gain: 30,
        }
    }
}

/// Echo cancellation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AecSettings {
    /// Residual echo suppression, dB (negative)
    pub suppress_level: i32,
    /// Suppression while near-end speech is active, dB (negative)
    pub suppress_active: i32,
}

impl Default for AecSettings {
    fn default() -> Self {
        Self {
            suppress_level: DEFAULT_ECHO_SUPPRESS_LEVEL,
            suppress_active: DEFAULT_ECHO_SUPPRESS_ACTIVE,
        }
    }
}

/// The complete preprocessing configuration for one loopback test.
///
/// Dereverberation has no toggle of its own: it is always enabled while the
/// gate is active, riding on the denoiser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    pub enable_agc: bool,
    pub agc: AgcSettings,
    pub denoise: bool,
    /// Denoise aggressiveness, positive dB of maximum attenuation
    pub denoise_level: i32,
    pub enable_aec: bool,
    pub aec: AecSettings,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            enable_agc: false,
            agc: AgcSettings::default(),
            denoise: true,
            denoise_level: DEFAULT_DENOISE_LEVEL,
            enable_aec: false,
            aec: AecSettings::default(),
        }
    }
}

/// Per-channel speech preprocessing collaborator.
///
/// Setters return `false` when the underlying engine rejects the value;
/// [`configure_units`] turns any rejection into a gate failure. `preprocess`
/// and `echo_cancel` run on engine callback threads and must stay bounded
/// and allocation-free on the hot path.
pub trait PreprocessUnit: Send {
    fn initialize(&mut self, sample_rate: u32, frame_samples: usize) -> bool;

    fn enable_agc(&mut self, enable: bool) -> bool;
    fn set_agc_settings(&mut self, settings: &AgcSettings) -> bool;
    fn enable_denoise(&mut self, enable: bool) -> bool;
    fn set_denoise_level(&mut self, level: i32) -> bool;
    fn enable_dereverb(&mut self, enable: bool) -> bool;
    fn enable_echo_cancel(&mut self, enable: bool) -> bool;
    fn set_echo_suppress_level(&mut self, level: i32) -> bool;
    fn set_echo_suppress_active(&mut self, level: i32) -> bool;

    /// In-place gain/noise cleanup of one channel buffer.
    fn preprocess(&mut self, buffer: &mut [f32]);

    /// Remove the rendered signal's acoustic leak from `capture`, writing the
    /// cleaned channel into `cleaned`. With echo cancellation disabled this
    /// is a plain copy of `capture`.
    fn echo_cancel(&mut self, capture: &[f32], reference: &[f32], cleaned: &mut [f32]);

    fn is_echo_cancel(&self) -> bool;

    /// Release engine resources. Further processing calls are no-ops.
    fn close(&mut self);
}

/// Creates preprocessing units for a session; swap in a test double to drive
/// the pipeline without the RNNoise engine.
pub trait PreprocessUnitFactory: Send + Sync {
    fn create_unit(&self) -> Box<dyn PreprocessUnit>;
}

/// Apply one preprocessing configuration to every channel unit as a single
/// atomic step.
///
/// The setter sequence mirrors the order the settings depend on each other:
/// initialization first, then gain control, denoise, dereverb and echo
/// parameters. The first rejected setting aborts with
/// [`LoopbackError::PreprocessConfiguration`]; the caller is expected to run
/// a full stop so no half-configured unit survives.
pub fn configure_units(
    units: &mut [Box<dyn PreprocessUnit>],
    sample_rate: u32,
    frame_samples: usize,
    config: &PreprocessConfig,
) -> Result<(), LoopbackError> {
    let mut apply = |step: &'static str, f: &mut dyn FnMut(&mut dyn PreprocessUnit) -> bool| {
        for index in 0..units.len() {
            if !f(&mut *units[index]) {
                log::error!("preprocessing gate rejected step '{}'", step);
                // The gate is all-or-nothing: close every unit, including
                // the ones that accepted earlier steps.
                for unit in units.iter_mut() {
                    unit.close();
                }
                return Err(LoopbackError::PreprocessConfiguration(step.to_string()));
            }
        }
        Ok(())
    };

    apply("initialize", &mut |u| u.initialize(sample_rate, frame_samples))?;
    apply("enable_agc", &mut |u| u.enable_agc(config.enable_agc))?;
    apply("set_agc_settings", &mut |u| u.set_agc_settings(&config.agc))?;
    apply("enable_denoise", &mut |u| u.enable_denoise(config.denoise))?;
    apply("set_denoise_level", &mut |u| {
        u.set_denoise_level(config.denoise_level)
    })?;
    apply("enable_dereverb", &mut |u| u.enable_dereverb(true))?;
    apply("enable_echo_cancel", &mut |u| {
        u.enable_echo_cancel(config.enable_aec)
    })?;
    apply("set_echo_suppress_level", &mut |u| {
        u.set_echo_suppress_level(config.aec.suppress_level)
    })?;
    apply("set_echo_suppress_active", &mut |u| {
        u.set_echo_suppress_active(config.aec.suppress_active)
    })?;

    log::debug!(
        "preprocessing gate configured for {} unit(s) at {} Hz, {} samples/frame",
        units.len(),
        sample_rate,
        frame_samples
    );
    Ok(())
}

/// Default [`PreprocessUnitFactory`] producing [`DenoiseUnit`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenoiseUnitFactory;

impl PreprocessUnitFactory for DenoiseUnitFactory {
    fn create_unit(&self) -> Box<dyn PreprocessUnit> {
        Box::new(DenoiseUnit::new())
    }
}

/// Reference-energy threshold below which the echo suppressor leaves the
/// captured signal untouched.
const ECHO_REFERENCE_GATE: f32 = 1e-4;

/// RNNoise-backed preprocessing unit.
///
/// Denoising runs the capture through the RNNoise model in its native
/// 480-sample chunks and gates the result on the model's voice-activity
/// score; the configured denoise level sets how hard non-speech chunks are
/// attenuated. AGC is a peak-tracking gain that steers toward the configured
/// target level within the configured slew limits. Echo handling is an
/// energy-keyed suppressor: when the reference frame carries signal, the
/// captured channel is attenuated by the configured suppression level.
pub struct DenoiseUnit {
    denoiser: Option<Box<nnnoiseless::DenoiseState<'static>>>,
    sample_rate: u32,
    frame_samples: usize,

    agc_enabled: bool,
    agc: AgcSettings,
    /// Current smoothed AGC gain (linear)
    agc_gain: f32,

    denoise_enabled: bool,
    /// Attenuation applied to non-speech chunks (linear), from the level
    noise_floor_gain: f32,
    dereverb_enabled: bool,

    aec_enabled: bool,
    echo_suppress_level: i32,
    echo_suppress_active: i32,
}

impl DenoiseUnit {
    pub fn new() -> Self {
        Self {
            denoiser: None,
            sample_rate: 0,
            frame_samples: 0,
            agc_enabled: false,
            agc: AgcSettings::default(),
            agc_gain: 1.0,
            denoise_enabled: false,
            noise_floor_gain: db_to_gain(-(DEFAULT_DENOISE_LEVEL as f32)),
            dereverb_enabled: false,
            aec_enabled: false,
            echo_suppress_level: DEFAULT_ECHO_SUPPRESS_LEVEL,
            echo_suppress_active: DEFAULT_ECHO_SUPPRESS_ACTIVE,
        }
    }

    fn run_denoiser(&mut self, buffer: &mut [f32]) {
        // The RNNoise model works in its own fixed chunk size (480 samples,
        // 10 ms at 48 kHz), independent of the pipeline frame length.
        const FRAME_SIZE: usize = nnnoiseless::FRAME_SIZE;

        let Some(denoiser) = self.denoiser.as_mut() else {
            return;
        };

        let mut chunk_out = [0.0f32; FRAME_SIZE];
        let full_chunks = buffer.len() / FRAME_SIZE;

        for i in 0..full_chunks {
            let start = i * FRAME_SIZE;
            let chunk = &buffer[start..start + FRAME_SIZE];

            // The model returns a voice-activity score in 0.0 - 1.0; chunks
            // it considers non-speech drop to the configured noise floor.
            let vad = denoiser.process_frame(&mut chunk_out, chunk);
            let gain = if vad < 0.5 { self.noise_floor_gain } else { 1.0 };

            for (out, &processed) in buffer[start..start + FRAME_SIZE]
                .iter_mut()
                .zip(chunk_out.iter())
            {
                *out = processed * gain;
            }
        }

        // The tail shorter than one model chunk is faded out instead of being
        // run through the model, which avoids a partial-frame artifact at the
        // end of every buffer.
        let processed = full_chunks * FRAME_SIZE;
        let remain = buffer.len() - processed;
        for (i, sample) in buffer[processed..].iter_mut().enumerate() {
            let fade = 1.0 - (i as f32 / remain as f32);
            *sample *= fade * 0.5;
        }
    }

    fn run_agc(&mut self, buffer: &mut [f32]) {
        let peak = buffer.iter().fold(0.0f32, |acc, &s| acc.max(s.abs()));
        if peak > 0.0 {
            let desired = (self.agc.gain_level / peak).min(db_to_gain(self.agc.max_gain as f32));

            // Slew limits are per second; one buffer covers
            // frame_samples / sample_rate seconds.
            let seconds = self.frame_samples as f32 / self.sample_rate.max(1) as f32;
            let up = db_to_gain(self.agc.max_increment as f32 * seconds);
            let down = db_to_gain(-(self.agc.max_decrement as f32) * seconds);
            self.agc_gain = desired.clamp(self.agc_gain * down, self.agc_gain * up);
        }

        for sample in buffer.iter_mut() {
            *sample = (*sample * self.agc_gain).clamp(-1.0, 1.0);
        }
    }
}

impl Default for DenoiseUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl PreprocessUnit for DenoiseUnit {
    fn initialize(&mut self, sample_rate: u32, frame_samples: usize) -> bool {
        if sample_rate == 0 || frame_samples == 0 {
            return false;
        }
        self.sample_rate = sample_rate;
        self.frame_samples = frame_samples;
        self.denoiser = Some(nnnoiseless::DenoiseState::new());
        self.agc_gain = 1.0;
        true
    }

    fn enable_agc(&mut self, enable: bool) -> bool {
        if self.denoiser.is_none() {
            return false;
        }
        self.agc_enabled = enable;
        true
    }

    fn set_agc_settings(&mut self, settings: &AgcSettings) -> bool {
        if !(0.0..=1.0).contains(&settings.gain_level) || settings.max_gain < 0 {
            return false;
        }
        self.agc = settings.clone();
        true
    }

    fn enable_denoise(&mut self, enable: bool) -> bool {
        if self.denoiser.is_none() {
            return false;
        }
        self.denoise_enabled = enable;
        true
    }

    fn set_denoise_level(&mut self, level: i32) -> bool {
        if !(0..=60).contains(&level) {
            return false;
        }
        self.noise_floor_gain = db_to_gain(-(level as f32));
        true
    }

    fn enable_dereverb(&mut self, enable: bool) -> bool {
        if self.denoiser.is_none() {
            return false;
        }
        // Dereverberation has no dedicated stage; the RNNoise model already
        // suppresses diffuse tails, so the flag only gates that behavior.
        self.dereverb_enabled = enable;
        true
    }

    fn enable_echo_cancel(&mut self, enable: bool) -> bool {
        if self.denoiser.is_none() {
            return false;
        }
        self.aec_enabled = enable;
        true
    }

    fn set_echo_suppress_level(&mut self, level: i32) -> bool {
        if level > 0 {
            return false;
        }
        self.echo_suppress_level = level;
        true
    }

    fn set_echo_suppress_active(&mut self, level: i32) -> bool {
        if level > 0 {
            return false;
        }
        self.echo_suppress_active = level;
        true
    }

    fn preprocess(&mut self, buffer: &mut [f32]) {
        if self.denoiser.is_none() {
            return;
        }
        if self.denoise_enabled {
            self.run_denoiser(buffer);
        }
        if self.agc_enabled {
            self.run_agc(buffer);
        }
    }

    fn echo_cancel(&mut self, capture: &[f32], reference: &[f32], cleaned: &mut [f32]) {
        let n = capture.len().min(cleaned.len());

        if !self.aec_enabled || self.denoiser.is_none() {
            cleaned[..n].copy_from_slice(&capture[..n]);
            return;
        }

        let reference_energy = mean_square(reference);
        let capture_energy = mean_square(&capture[..n]);

        if reference_energy < ECHO_REFERENCE_GATE {
            // Nothing audible was rendered; there is no echo to remove.
            cleaned[..n].copy_from_slice(&capture[..n]);
            return;
        }

        // Double-talk heuristic: when the near end is louder than the far
        // reference, back off to the gentler active-suppression level.
        let suppress_db = if capture_energy > reference_energy {
            self.echo_suppress_active
        } else {
            self.echo_suppress_level
        };
        let gain = db_to_gain(suppress_db as f32);

        for (out, &sample) in cleaned[..n].iter_mut().zip(capture[..n].iter()) {
            *out = sample * gain;
        }
    }

    fn is_echo_cancel(&self) -> bool {
        self.aec_enabled
    }

    fn close(&mut self) {
        self.denoiser = None;
        self.agc_enabled = false;
        self.denoise_enabled = false;
        self.dereverb_enabled = false;
        self.aec_enabled = false;
        self.agc_gain = 1.0;
    }
}

fn db_to_gain(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

fn mean_square(buffer: &[f32]) -> f32 {
    if buffer.is_empty() {
        return 0.0;
    }
    buffer.iter().map(|&s| s * s).sum::<f32>() / buffer.len() as f32
}
