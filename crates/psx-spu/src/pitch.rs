//! Pitch step and pitch bend conversion
//!
//! Pitch steps are 4.12 fixed point: `0x1000` plays one source sample per
//! output sample. A sample's *base note* is the note that plays it at unity
//! step on a 44.1 kHz SPU, so a 22.05 kHz sample has base note 72.

use crate::constants::{
    PITCH_BEND_CENTER, PITCH_BEND_MAX, PITCH_STEP_MAX, PITCH_STEP_UNITY, SPU_SAMPLE_RATE,
};

/// Note that plays a 44.1 kHz sample at its native rate
pub const REFERENCE_NOTE: f64 = 60.0;

/// Pitch step for playing `note` of a sample whose base note is `base_note`
/// on an SPU running at `output_rate` Hz.
///
/// The result is clamped to `1..=PITCH_STEP_MAX` like the hardware register.
pub fn pitch_step_for_note(note: f64, base_note: f64, output_rate: u32) -> u32 {
    let output_rate = if output_rate == 0 {
        SPU_SAMPLE_RATE
    } else {
        output_rate
    };
    let ratio = ((note - base_note) / 12.0).exp2() * SPU_SAMPLE_RATE as f64 / output_rate as f64;
    let step = (ratio * PITCH_STEP_UNITY as f64).round();
    if step.is_finite() {
        step.clamp(1.0, PITCH_STEP_MAX as f64) as u32
    } else {
        PITCH_STEP_UNITY
    }
}

/// Base note for a sample recorded at `sample_rate` Hz
pub fn base_note_for_sample_rate(sample_rate: f64) -> f64 {
    if sample_rate <= 0.0 || !sample_rate.is_finite() {
        return REFERENCE_NOTE;
    }
    REFERENCE_NOTE - 12.0 * (sample_rate / SPU_SAMPLE_RATE as f64).log2()
}

/// Sample rate implied by a base note (inverse of [`base_note_for_sample_rate`])
pub fn sample_rate_for_base_note(base_note: f64) -> f64 {
    SPU_SAMPLE_RATE as f64 * ((REFERENCE_NOTE - base_note) / 12.0).exp2()
}

/// Map a 14-bit pitch bend value to an offset in notes.
///
/// The mapping is linear on each side of the center: `0x3FFF` gives
/// `+up_range` notes, `0x0000` gives `-down_range` notes, `0x2000` gives zero.
/// Values above `0x3FFF` are clamped.
pub fn bend_to_notes(value: u16, up_range: f64, down_range: f64) -> f64 {
    let offset = value.min(PITCH_BEND_MAX) as i32 - PITCH_BEND_CENTER as i32;
    if offset >= 0 {
        offset as f64 / (PITCH_BEND_MAX - PITCH_BEND_CENTER) as f64 * up_range
    } else {
        offset as f64 / PITCH_BEND_CENTER as f64 * down_range
    }
}

/// Q12 pitch multiplier for a bend of `notes`; zero notes is exactly `0x1000`.
pub fn bend_multiplier(notes: f64) -> u32 {
    if notes == 0.0 || !notes.is_finite() {
        return PITCH_STEP_UNITY;
    }
    let mult = ((notes / 12.0).exp2() * PITCH_STEP_UNITY as f64).round();
    mult.clamp(1.0, u32::MAX as f64) as u32
}

/// Apply a Q12 bend multiplier to a base pitch step, clamped to the register range
#[inline]
pub fn bent_pitch_step(base_step: u32, multiplier: u32) -> u32 {
    let step = (base_step as u64 * multiplier as u64) >> 12;
    step.clamp(1, PITCH_STEP_MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_base_note_plays_at_unity() {
        assert_eq!(pitch_step_for_note(60.0, 60.0, 44_100), PITCH_STEP_UNITY);
        assert_eq!(pitch_step_for_note(72.0, 60.0, 44_100), 0x2000);
        assert_eq!(pitch_step_for_note(48.0, 60.0, 44_100), 0x800);
    }

    #[test]
    fn test_step_clamped_to_register() {
        assert_eq!(pitch_step_for_note(127.0, 0.0, 44_100), PITCH_STEP_MAX);
        assert_eq!(pitch_step_for_note(0.0, 127.0, 44_100), 1);
    }

    #[test]
    fn test_output_rate_compensation() {
        assert_eq!(pitch_step_for_note(60.0, 60.0, 88_200), 0x800);
        assert_eq!(pitch_step_for_note(60.0, 60.0, 0), PITCH_STEP_UNITY);
    }

    #[test]
    fn test_sample_rate_and_base_note_are_inverse() {
        assert_relative_eq!(base_note_for_sample_rate(22_050.0), 72.0, epsilon = 1e-9);
        assert_relative_eq!(base_note_for_sample_rate(44_100.0), 60.0, epsilon = 1e-9);
        for rate in [8_000.0, 11_025.0, 32_000.0, 48_000.0] {
            let note = base_note_for_sample_rate(rate);
            assert_relative_eq!(sample_rate_for_base_note(note), rate, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_bend_mapping() {
        assert_eq!(bend_to_notes(PITCH_BEND_CENTER, 2.0, 2.0), 0.0);
        assert_relative_eq!(bend_to_notes(PITCH_BEND_MAX, 2.0, 12.0), 2.0);
        assert_relative_eq!(bend_to_notes(0, 2.0, 12.0), -12.0);
        assert_relative_eq!(bend_to_notes(u16::MAX, 3.0, 3.0), 3.0);
    }

    #[test]
    fn test_center_bend_is_identity() {
        let mult = bend_multiplier(bend_to_notes(PITCH_BEND_CENTER, 7.0, 7.0));
        assert_eq!(mult, PITCH_STEP_UNITY);
        for step in [1u32, 0x123, 0x1000, 0x2ABC, PITCH_STEP_MAX] {
            assert_eq!(bent_pitch_step(step, mult), step);
        }
    }

    #[test]
    fn test_octave_bend_doubles_step() {
        assert_eq!(bend_multiplier(12.0), 0x2000);
        assert_eq!(bent_pitch_step(0x1000, bend_multiplier(12.0)), 0x2000);
        assert_eq!(bent_pitch_step(0x1000, bend_multiplier(-12.0)), 0x800);
    }
}
