//! SPU voice
//!
//! One sample-playback channel: a fixed-point read position advanced by the
//! pitch step every output sample, linear interpolation between neighbouring
//! samples, an ADSR envelope and a stereo gain.

use crate::constants::{PITCH_FRAC_BITS, PITCH_FRAC_MASK, PITCH_STEP_UNITY};
use crate::envelope::{AdsrEnvelope, AdsrState, EnvelopePhase};
use crate::sample::LoopRegion;
use crate::volume::Volume;

/// Stereo output of a voice or of the whole mix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StereoSample {
    /// Left channel
    pub left: i16,
    /// Right channel
    pub right: i16,
}

/// A single SPU voice. Slots are reused across notes and never reallocated.
#[derive(Debug, Clone)]
pub struct Voice {
    slot: usize,
    sample_rate: u32,
    base_note: f64,
    loop_start: u32,
    loop_end: u32,
    /// Read position in samples, `PITCH_FRAC_BITS` fractional bits
    position: u64,
    base_pitch_step: u32,
    pitch_step: u32,
    envelope: AdsrEnvelope,
    adsr: AdsrState,
    volume: Volume,
    active: bool,
}

impl Voice {
    /// Create an idle voice for hardware slot `slot`
    pub fn new(slot: usize) -> Self {
        Voice {
            slot,
            sample_rate: 0,
            base_note: 0.0,
            loop_start: 0,
            loop_end: 0,
            position: 0,
            base_pitch_step: PITCH_STEP_UNITY,
            pitch_step: PITCH_STEP_UNITY,
            envelope: AdsrEnvelope::default(),
            adsr: AdsrState::new(),
            volume: Volume::default(),
            active: false,
        }
    }

    /// Start playback from the beginning of the sample.
    ///
    /// `pitch_step` is the effective step (bend already applied) and
    /// `base_pitch_step` the unbent step it was derived from.
    #[allow(clippy::too_many_arguments)]
    pub fn key_on(
        &mut self,
        sample_rate: u32,
        base_note: f64,
        loop_start: u32,
        loop_end: u32,
        envelope: AdsrEnvelope,
        volume: Volume,
        base_pitch_step: u32,
        pitch_step: u32,
    ) {
        self.sample_rate = sample_rate;
        self.base_note = base_note;
        self.loop_start = loop_start;
        self.loop_end = loop_end;
        self.envelope = envelope.clamped();
        self.volume = volume;
        self.base_pitch_step = base_pitch_step;
        self.pitch_step = pitch_step;
        self.position = 0;
        self.adsr.key_on();
        self.active = true;
    }

    /// Move into the release phase
    pub fn key_off(&mut self) {
        self.adsr.key_off();
    }

    /// Silence immediately and free the slot
    pub fn kill(&mut self) {
        self.adsr.kill();
        self.active = false;
    }

    /// Hardware slot index
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// True while the voice produces sound
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Current envelope phase
    pub fn phase(&self) -> EnvelopePhase {
        self.adsr.phase()
    }

    /// Current envelope level
    pub fn envelope_level(&self) -> i32 {
        self.adsr.level()
    }

    /// Envelope configuration in use
    pub fn envelope(&self) -> &AdsrEnvelope {
        &self.envelope
    }

    /// Replace the envelope configuration without restarting it
    pub fn set_envelope(&mut self, envelope: AdsrEnvelope) {
        self.envelope = envelope.clamped();
    }

    /// Stereo gain
    pub fn volume(&self) -> Volume {
        self.volume
    }

    /// Replace the stereo gain
    pub fn set_volume(&mut self, volume: Volume) {
        self.volume = volume;
    }

    /// Effective pitch step (bend applied)
    pub fn pitch_step(&self) -> u32 {
        self.pitch_step
    }

    /// Unbent pitch step derived from the note
    pub fn base_pitch_step(&self) -> u32 {
        self.base_pitch_step
    }

    /// Set both the unbent and the effective pitch step
    pub fn set_pitch_step(&mut self, base_pitch_step: u32, pitch_step: u32) {
        self.base_pitch_step = base_pitch_step;
        self.pitch_step = pitch_step;
    }

    /// Native sample rate the voice was started with
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Base note the voice was started with
    pub fn base_note(&self) -> f64 {
        self.base_note
    }

    /// Replace the source rate and base note stamped at key-on
    pub fn set_source(&mut self, sample_rate: u32, base_note: f64) {
        self.sample_rate = sample_rate;
        self.base_note = base_note;
    }

    /// Configured loop points `(start, end)`
    pub fn loop_points(&self) -> (u32, u32) {
        (self.loop_start, self.loop_end)
    }

    /// Replace the loop points; takes effect on the next step
    pub fn set_loop(&mut self, loop_start: u32, loop_end: u32) {
        self.loop_start = loop_start;
        self.loop_end = loop_end;
    }

    /// Read position in whole samples
    pub fn position(&self) -> u64 {
        self.position >> PITCH_FRAC_BITS
    }

    /// Read position including the 12-bit fraction
    pub fn position_fixed(&self) -> u64 {
        self.position
    }

    /// Produce one output sample and advance.
    ///
    /// Reads the interpolated sample at the current position, applies the
    /// envelope and volume, then advances the position and ticks the
    /// envelope. Goes inactive when the envelope reaches `Off` or playback
    /// runs off the end of an unlooped sample.
    pub fn step(&mut self, pcm: &[i16]) -> StereoSample {
        if !self.active {
            return StereoSample::default();
        }
        if pcm.is_empty() {
            self.kill();
            return StereoSample::default();
        }

        let looping = LoopRegion::validated(self.loop_start, self.loop_end, pcm.len());
        let index = (self.position >> PITCH_FRAC_BITS) as usize;
        if index >= pcm.len() {
            self.kill();
            return StereoSample::default();
        }

        let raw = interpolate(pcm, index, self.position & PITCH_FRAC_MASK, looping);
        let enveloped = (raw * self.adsr.level()) >> 15;
        let (left, right) = self.volume.apply(enveloped);

        self.advance(looping);
        self.adsr.tick(&self.envelope);
        if !self.adsr.is_active() {
            self.active = false;
        }

        StereoSample {
            left: left as i16,
            right: right as i16,
        }
    }

    fn advance(&mut self, looping: Option<LoopRegion>) {
        self.position += self.pitch_step as u64;
        if let Some(region) = looping {
            let end = (region.end as u64) << PITCH_FRAC_BITS;
            if self.position >= end {
                let start = (region.start as u64) << PITCH_FRAC_BITS;
                let len = (region.len() as u64) << PITCH_FRAC_BITS;
                self.position = start + (self.position - start) % len;
            }
        }
    }
}

/// Linear interpolation between `pcm[index]` and its successor. Inside a loop
/// the sample after the loop end is the loop start; past an unlooped end the
/// last sample is held.
#[inline]
fn interpolate(pcm: &[i16], index: usize, frac: u64, looping: Option<LoopRegion>) -> i32 {
    let current = pcm[index] as i32;
    let next_index = match looping {
        Some(region) if index + 1 == region.end as usize => region.start as usize,
        _ => index + 1,
    };
    let next = pcm.get(next_index).map_or(current, |&s| s as i32);
    current + (((next - current) * frac as i32) >> PITCH_FRAC_BITS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::VOLUME_MAX;

    fn full_volume() -> Volume {
        Volume {
            left: VOLUME_MAX as i16,
            right: VOLUME_MAX as i16,
        }
    }

    fn started(loop_start: u32, loop_end: u32, step: u32) -> Voice {
        let mut voice = Voice::new(3);
        voice.key_on(
            44_100,
            60.0,
            loop_start,
            loop_end,
            AdsrEnvelope::default(),
            full_volume(),
            step,
            step,
        );
        voice
    }

    #[test]
    fn test_idle_voice_is_silent() {
        let mut voice = Voice::new(0);
        assert_eq!(voice.step(&[1000; 16]), StereoSample::default());
        assert!(!voice.is_active());
        assert_eq!(voice.slot(), 0);
    }

    #[test]
    fn test_empty_sample_is_silent() {
        let mut voice = started(0, 0, PITCH_STEP_UNITY);
        assert_eq!(voice.step(&[]), StereoSample::default());
        assert!(!voice.is_active());
    }

    #[test]
    fn test_unlooped_sample_stops_at_end() {
        let pcm = vec![10_000i16; 64];
        let mut voice = started(0, 0, PITCH_STEP_UNITY);
        for _ in 0..64 {
            voice.step(&pcm);
        }
        assert!(voice.is_active());
        assert_eq!(voice.step(&pcm), StereoSample::default());
        assert!(!voice.is_active());
    }

    #[test]
    fn test_interpolation_halfway() {
        let pcm = [0i16, 1000, 2000, 3000];
        assert_eq!(interpolate(&pcm, 0, 0x800, None), 500);
        assert_eq!(interpolate(&pcm, 3, 0x800, None), 3000);
        let region = LoopRegion::validated(1, 4, 4);
        assert_eq!(interpolate(&pcm, 3, 0x800, region), 2000);
    }

    #[test]
    fn test_loop_wrap_keeps_fraction() {
        let pcm = vec![0i16; 32];
        let mut voice = started(8, 16, 0x1800);
        while voice.position_fixed() < (15 << PITCH_FRAC_BITS) {
            voice.step(&pcm);
        }
        let before = voice.position_fixed();
        voice.step(&pcm);
        let after = voice.position_fixed();
        let expected = before + 0x1800 - (8 << PITCH_FRAC_BITS);
        assert_eq!(after, expected);
        assert!(after >= 8 << PITCH_FRAC_BITS && after < 16 << PITCH_FRAC_BITS);
    }

    #[test]
    fn test_invalid_loop_plays_once() {
        let pcm = vec![5_000i16; 40];
        let mut voice = started(30, 10, PITCH_STEP_UNITY);
        let mut produced = 0;
        while voice.is_active() && produced < 1000 {
            voice.step(&pcm);
            produced += 1;
        }
        assert_eq!(produced, 41);
    }

    #[test]
    fn test_envelope_and_volume_scale_output() {
        let pcm = vec![i16::MAX; 256];
        let mut voice = started(0, 0, PITCH_STEP_UNITY);
        voice.set_volume(Volume {
            left: VOLUME_MAX as i16,
            right: 0,
        });
        // Level is zero on the first sample, full from the fourth on
        assert_eq!(voice.step(&pcm).left, 0);
        for _ in 0..4 {
            voice.step(&pcm);
        }
        let out = voice.step(&pcm);
        assert!(out.left > 16_000, "left {}", out.left);
        assert_eq!(out.right, 0);
    }

    #[test]
    fn test_release_to_off_deactivates() {
        let pcm = vec![1_000i16; 4096];
        let mut voice = started(0, 4096, PITCH_STEP_UNITY);
        voice.step(&pcm);
        voice.key_off();
        assert_eq!(voice.phase(), EnvelopePhase::Release);
        let mut n = 0;
        while voice.is_active() {
            voice.step(&pcm);
            n += 1;
            assert!(n < 100_000);
        }
        assert_eq!(voice.phase(), EnvelopePhase::Off);
    }
}
