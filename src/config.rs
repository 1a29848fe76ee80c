//! # Configuration Management Module
//!
//! Persistent storage of loopback test settings. Configuration is stored in
//! a platform-appropriate location using the TOML format for human
//! readability and easy manual editing if needed.
//!
//! ## Design Philosophy
//!
//! 1. **Fail-safe defaults**: always provide working defaults if the config
//!    file is missing or corrupt
//! 2. **Platform compliance**: store config files in OS-appropriate locations
//! 3. **User-friendly format**: TOML, editable by hand
//!
//! ## Configuration Storage Locations
//!
//! - **Windows**: `%APPDATA%\Loopcheck\config.toml`
//! - **macOS**: `~/Library/Application Support/Loopcheck/config.toml`
//! - **Linux**: `~/.config/loopcheck/config.toml`

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::audio::preprocess::PreprocessConfig;
use crate::constants::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE};

/// Settings for one loopback test run.
///
/// ## Field Descriptions
///
/// - `input_device_id`: identifier of the capture device under test
/// - `output_device_id`: identifier of the render device under test
/// - `sample_rate`: requested sample rate; negotiation may downgrade it
/// - `channels`: requested channel count (1 or 2)
/// - `preprocess`: speech preprocessing applied between capture and render
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoopbackConfig {
    /// Capture device identifier
    pub input_device_id: String,

    /// Render device identifier
    pub output_device_id: String,

    /// Requested sample rate in Hz; the negotiated formats may differ when
    /// a device cannot honor it
    pub sample_rate: u32,

    /// Requested channel count, 1 (mono) or 2 (stereo)
    pub channels: u16,

    /// Speech preprocessing configuration, applied once at test start
    pub preprocess: PreprocessConfig,
}

impl Default for LoopbackConfig {
    /// Defaults resolve the system default devices at 48 kHz mono with
    /// denoising on and everything else off.
    fn default() -> Self {
        Self {
            input_device_id: "input_default".to_string(),
            output_device_id: "output_default".to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            preprocess: PreprocessConfig::default(),
        }
    }
}

impl LoopbackConfig {
    /// Load configuration from disk, using defaults if the file doesn't
    /// exist or cannot be parsed.
    ///
    /// Fallback order: parse the existing file; on a missing file use
    /// defaults; on a corrupt file log to stderr and use defaults; if the
    /// platform config directory cannot be determined, use defaults.
    pub fn load() -> Self {
        match Self::config_path() {
            Ok(path) => {
                if path.exists() {
                    match fs::read_to_string(&path) {
                        Ok(content) => match toml::from_str(&content) {
                            Ok(config) => config,
                            Err(e) => {
                                eprintln!("Failed to parse config: {}", e);
                                Self::default()
                            }
                        },
                        Err(e) => {
                            eprintln!("Failed to read config file: {}", e);
                            Self::default()
                        }
                    }
                } else {
                    Self::default()
                }
            }
            Err(e) => {
                eprintln!("Failed to get config path: {}", e);
                Self::default()
            }
        }
    }

    /// Save the current configuration to disk as pretty-printed TOML,
    /// creating the config directory if needed. Errors are propagated so
    /// the host can surface them.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Platform-appropriate configuration file path.
    fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_dir = if cfg!(target_os = "windows") || cfg!(target_os = "macos") {
            dirs::config_dir()
                .ok_or("Could not find config directory")?
                .join("Loopcheck")
        } else {
            // Linux and other Unix-like systems
            dirs::config_dir()
                .ok_or("Could not find config directory")?
                .join("loopcheck")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Create a config for testing with all fields populated
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            input_device_id: "test_input".to_string(),
            output_device_id: "test_output".to_string(),
            sample_rate: 44100,
            channels: 2,
            preprocess: PreprocessConfig::default(),
        }
    }
}
