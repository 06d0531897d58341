//! PlayStation 1 sampler instrument
//!
//! Wraps the [`psx_spu`] voice core in everything an instrument plugin
//! needs: host parameters, a control bridge that lets UI and MIDI threads
//! drive the audio thread safely, a real-time render loop, state blobs,
//! JSON presets and idle-time metering.
//!
//! # Quick start
//! ```no_run
//! use psx_sampler::{create_sampler, ParamId, SamplerConfig};
//! use psx_spu::SampleData;
//!
//! let (handle, mut engine) = create_sampler(SamplerConfig::new(48_000))?;
//! handle.load_sample(SampleData::from_pcm(vec![0i16; 4096], 22_050))?;
//! handle.set_param(ParamId::ReleaseShift, 14.0)?;
//! handle.note_on(60, 100)?;
//!
//! // On the audio thread
//! let mut left = [0.0f32; 512];
//! let mut right = [0.0f32; 512];
//! engine.render(&mut left, &mut right);
//!
//! // On the UI thread
//! let report = handle.on_idle();
//! println!("peaks {:?}", report.peaks);
//! # Ok::<(), psx_sampler::SamplerError>(())
//! ```

use std::sync::Arc;

use psx_spu::SpuError;

pub mod bridge;
pub mod config;
pub mod engine;
pub mod idle;
pub mod params;
pub mod state;

/// Error types for the sampler
#[derive(thiserror::Error, Debug)]
pub enum SamplerError {
    /// State blob could not be decoded
    #[error("Invalid state: {0}")]
    State(String),

    /// Command queue is full; the command was dropped
    #[error("Command queue full ({capacity} commands pending)")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Preset names a parameter that does not exist
    #[error("Unknown parameter: {0}")]
    UnknownParam(String),

    /// Sample decoding failed
    #[error("SPU error: {0}")]
    Spu(#[from] SpuError),

    /// Preset could not be read or written
    #[error("Invalid preset: {0}")]
    Preset(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for SamplerError {
    fn from(msg: String) -> Self {
        SamplerError::Other(msg)
    }
}

impl From<&str> for SamplerError {
    fn from(msg: &str) -> Self {
        SamplerError::Other(msg.to_string())
    }
}

/// Result type for sampler operations
pub type Result<T> = std::result::Result<T, SamplerError>;

/// Create a linked control handle and audio engine.
///
/// The handle is cloneable and goes to UI/MIDI threads; the engine goes to
/// the audio thread.
pub fn create_sampler(config: SamplerConfig) -> Result<(SamplerHandle, SamplerEngine)> {
    config.validate()?;
    let shared = Arc::new(bridge::Shared::new(&config));
    let engine = SamplerEngine::new(Arc::clone(&shared), &config);
    log::debug!(
        "sampler created at {} Hz, queue capacity {}",
        config.output_sample_rate,
        config.command_queue_capacity
    );
    Ok((SamplerHandle::new(shared, config), engine))
}

// Public API exports
pub use bridge::{SamplerHandle, VoiceStatus};
pub use config::SamplerConfig;
pub use engine::SamplerEngine;
pub use idle::IdleReport;
pub use params::{ParamId, ParamKind, Params, PARAM_COUNT};
pub use state::{decode_state, encode_state};
