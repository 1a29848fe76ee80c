//! # Loopcheck - Audio Device Self-Test Pipeline
//!
//! Loopcheck verifies microphone and speaker functionality by looping
//! captured audio back to an output device, optionally reshaping it on the
//! way: sample-rate conversion, mono/stereo layout changes, and speech
//! preprocessing (gain control, denoising, echo handling). Listening to the
//! loop tells a user immediately whether both devices work and how long the
//! round trip takes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐     ┌─────────────────┐
//! │ LoopbackSession │     │  Audio Pipeline  │     │  AudioEngine    │
//! │                 │     │                  │     │  (collaborator) │
//! │ • start/stop    │◄───►│ • negotiation    │◄───►│ • devices       │
//! │ • rollback      │     │ • resampling     │     │ • streams       │
//! │ • one test max  │     │ • preprocessing  │     │ • callbacks     │
//! └─────────────────┘     │ • frame queue    │     └─────────────────┘
//!                         └──────────────────┘
//! ```
//!
//! Two operating modes are supported:
//!
//! - **Split mode**: independent capture and render streams bridged through
//!   a thread-safe frame queue. Works on every backend.
//! - **Duplex mode**: a single hardware-synchronized capture+render cycle,
//!   giving the preprocessing gate the actual previously-played frame as an
//!   echo reference. Required for echo cancellation.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use loopcheck::audio::cpal_engine::CpalEngine;
//! use loopcheck::audio::session::LoopbackSession;
//! use loopcheck::audio::preprocess::PreprocessConfig;
//!
//! loopcheck::logger::init_logger().expect("logger");
//!
//! let engine = Arc::new(CpalEngine::new());
//! let mut session = LoopbackSession::new(engine);
//! session
//!     .start_test(
//!         "input_default",
//!         "output_default",
//!         48000,
//!         1,
//!         &PreprocessConfig::default(),
//!     )
//!     .expect("start loopback");
//!
//! std::thread::sleep(std::time::Duration::from_secs(5));
//! session.stop_test();
//! ```
//!
//! ## Technical Stack
//!
//! - **Audio I/O**: CPAL (cross-platform audio library), behind the
//!   [`audio::engine::AudioEngine`] contract so hosts can bring their own
//!   engine
//! - **Denoising**: nnnoiseless (RNNoise implementation)
//! - **Configuration**: TOML with serde serialization
//! - **Logging**: tracing ecosystem for structured logging

pub mod audio; // format negotiation, bridges, preprocessing, engine contract
pub mod config; // persistent test settings
pub mod constants; // frame-window policy constant and defaults
pub mod error; // start-path error taxonomy
pub mod logger; // tracing bootstrap

pub use audio::session::LoopbackSession;
pub use config::LoopbackConfig;
pub use error::LoopbackError;
