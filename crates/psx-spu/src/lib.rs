//! PlayStation 1 SPU voice emulation
//!
//! A sample-accurate model of the PS1 Sound Processing Unit voice hardware as
//! used by a sampler instrument: 24 voices, each playing 16-bit PCM with a
//! fixed-point pitch step, loop region, hardware ADSR envelope and stereo
//! volume, mixed into a saturating 16-bit stereo output at 44.1 kHz.
//!
//! # Features
//! - Integer ADSR envelope state machine driven by precomputed rate tables
//! - 4.12 fixed-point pitch stepping with linear interpolation and
//!   fraction-preserving loop wrap
//! - Fixed 24-slot voice pool with deterministic voice stealing
//! - Constant-power pan law and linear velocity scaling
//! - PS-ADPCM block decoding and VAG container parsing
//!
//! # Quick start
//! ```no_run
//! use std::sync::Arc;
//! use psx_spu::{Core, SampleData, StereoSample};
//!
//! let mut spu = Core::new();
//! spu.set_sample(Some(Arc::new(SampleData::from_pcm(vec![0i16; 1024], 44_100))));
//! spu.note_on(60, 100);
//!
//! let mut frames = [StereoSample::default(); 256];
//! spu.render(&mut frames);
//! spu.note_off(60);
//! ```
//!
//! The core never allocates, locks or fails while rendering; bad input is
//! clamped and a missing sample renders silence.

#![warn(missing_docs)]

pub mod adpcm; // PS-ADPCM blocks and VAG files
pub mod constants;
pub mod core; // Voice pool and mixdown
pub mod envelope; // ADSR state machine
pub mod pitch;
pub mod sample;
pub mod voice;
pub mod volume;

/// Error types for SPU emulation operations
///
/// The render path never produces errors; these only surface from sample
/// decoding and configuration.
#[derive(thiserror::Error, Debug)]
pub enum SpuError {
    /// Sample data could not be decoded
    #[error("Invalid sample data: {0}")]
    InvalidSample(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for SpuError {
    /// Converts a String into `SpuError::Other`.
    ///
    /// Prefer the specific variants (`InvalidSample`, `ConfigError`) where the
    /// failure kind is known.
    fn from(msg: String) -> Self {
        SpuError::Other(msg)
    }
}

impl From<&str> for SpuError {
    /// Converts a string slice into `SpuError::Other`.
    fn from(msg: &str) -> Self {
        SpuError::Other(msg.to_string())
    }
}

/// Result type for SPU operations
pub type Result<T> = std::result::Result<T, SpuError>;

// Public API exports
pub use crate::core::{Core, VoiceInfo, VoiceTemplate};
pub use adpcm::{decode_blocks, encode_blocks, parse_vag, write_vag, AdpcmFlags, VagFile};
pub use constants::{LEVEL_MAX, NUM_VOICES, PITCH_STEP_MAX, PITCH_STEP_UNITY, VOLUME_MAX};
pub use envelope::{AdsrEnvelope, AdsrState, EnvelopePhase};
pub use pitch::{base_note_for_sample_rate, pitch_step_for_note, sample_rate_for_base_note};
pub use sample::{LoopRegion, SampleData};
pub use voice::{StereoSample, Voice};
pub use volume::{calc_voice_volume, Volume};
