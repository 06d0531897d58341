//! Sampler configuration

use crate::{Result, SamplerError};

/// Largest command queue the sampler accepts
const MAX_QUEUE_CAPACITY: usize = 1 << 16;

/// Runtime configuration of a sampler instance
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    /// Host output rate in Hz. The SPU runs at this rate with pitch steps
    /// scaled to keep notes in tune.
    pub output_sample_rate: u32,

    /// Maximum number of control commands waiting for the next render call.
    /// Commands beyond this are rejected with `SamplerError::QueueFull`.
    pub command_queue_capacity: usize,

    /// Notes held longer than this are released by the idle task.
    /// Zero disables the check.
    pub max_note_hold_secs: f64,
}

impl SamplerConfig {
    /// Configuration for a host running at `sample_rate` Hz
    pub fn new(sample_rate: u32) -> Self {
        SamplerConfig {
            output_sample_rate: sample_rate,
            command_queue_capacity: 1024,
            max_note_hold_secs: 0.0,
        }
    }

    /// Small queue for hosts calling render with short buffers
    pub fn low_latency(sample_rate: u32) -> Self {
        SamplerConfig {
            command_queue_capacity: 128,
            ..Self::new(sample_rate)
        }
    }

    /// Hold limit in output samples, `None` when disabled
    pub fn max_note_hold_samples(&self) -> Option<u32> {
        if self.max_note_hold_secs > 0.0 {
            let samples = self.max_note_hold_secs * self.output_sample_rate as f64;
            Some(samples.min(u32::MAX as f64) as u32)
        } else {
            None
        }
    }

    /// Check every field for usable values
    pub fn validate(&self) -> Result<()> {
        if self.output_sample_rate == 0 {
            return Err(SamplerError::ConfigError(
                "output sample rate must be non-zero".into(),
            ));
        }
        if self.command_queue_capacity == 0 || self.command_queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(SamplerError::ConfigError(format!(
                "command queue capacity must be in 1..={MAX_QUEUE_CAPACITY}, got {}",
                self.command_queue_capacity
            )));
        }
        if !self.max_note_hold_secs.is_finite() || self.max_note_hold_secs < 0.0 {
            return Err(SamplerError::ConfigError(format!(
                "max note hold must be a non-negative number of seconds, got {}",
                self.max_note_hold_secs
            )));
        }
        Ok(())
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::new(44_100)
    }
}
