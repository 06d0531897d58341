//! Voice volume computation
//!
//! Combines the patch volume, pan and MIDI velocity into the left/right voice
//! gains the mixer multiplies with.
//!
//! - Volume and velocity scale linearly: `base = VOLUME_MAX * vol * vel / 127²`
//! - Pan uses a constant-power law. Pan 0..=64 maps to `t = pan / 128` and
//!   64..=127 to `t = 0.5 + (pan - 64) / 126`, then `left = cos(t·π/2)` and
//!   `right = sin(t·π/2)`. The center is -3 dB on both sides; the extremes
//!   silence the opposite side completely.

use std::sync::OnceLock;

use crate::constants::{MIDI_VALUE_MAX, VOLUME_MAX};

/// Pan value that yields equal left and right gain
pub const PAN_CENTER: u8 = 64;

/// Left/right voice gain, each in `0..=VOLUME_MAX`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Volume {
    /// Left channel gain
    pub left: i16,
    /// Right channel gain
    pub right: i16,
}

impl Volume {
    /// Full gain on both channels
    pub const FULL: Volume = Volume {
        left: VOLUME_MAX as i16,
        right: VOLUME_MAX as i16,
    };

    /// Apply this gain to a mono sample, returning `(left, right)`
    #[inline]
    pub fn apply(&self, sample: i32) -> (i32, i32) {
        (
            (sample * self.left as i32) >> 15,
            (sample * self.right as i32) >> 15,
        )
    }
}

/// Q15 pan gains, `[pan] = (left, right)`, with 0x8000 meaning unity
struct PanLookup {
    data: [(u32, u32); 128],
}

impl PanLookup {
    fn new() -> Self {
        let mut data = [(0u32, 0u32); 128];
        for (pan, slot) in data.iter_mut().enumerate() {
            let t = if pan <= PAN_CENTER as usize {
                pan as f64 / 128.0
            } else {
                0.5 + (pan as f64 - 64.0) / 126.0
            };
            let angle = t * std::f64::consts::FRAC_PI_2;
            let left = (angle.cos() * 32768.0).round().clamp(0.0, 32768.0) as u32;
            let right = (angle.sin() * 32768.0).round().clamp(0.0, 32768.0) as u32;
            *slot = (left, right);
        }
        PanLookup { data }
    }

    fn get(&self, pan: u8) -> (u32, u32) {
        self.data[pan.min(MIDI_VALUE_MAX) as usize]
    }
}

/// Static lookup table - initialized once
static PAN_LOOKUP: OnceLock<PanLookup> = OnceLock::new();

fn get_pan_lookup() -> &'static PanLookup {
    PAN_LOOKUP.get_or_init(PanLookup::new)
}

/// Build the pan table ahead of time so the first note-on on the audio
/// thread does not pay for it.
pub fn warm_up_tables() {
    get_pan_lookup();
}

/// Compute the left/right voice gains for a volume, pan and velocity.
///
/// # Arguments
///
/// * `volume` - Patch volume (0-127)
/// * `pan` - Pan position (0 = left, 64 = center, 127 = right)
/// * `velocity` - MIDI note velocity (0-127)
///
/// All inputs are clamped to 0-127.
pub fn calc_voice_volume(volume: u8, pan: u8, velocity: u8) -> Volume {
    let volume = volume.min(MIDI_VALUE_MAX) as i64;
    let velocity = velocity.min(MIDI_VALUE_MAX) as i64;
    let base = VOLUME_MAX as i64 * volume * velocity / (127 * 127);

    let (pan_left, pan_right) = get_pan_lookup().get(pan);
    let left = (base * pan_left as i64) >> 15;
    let right = (base * pan_right as i64) >> 15;

    Volume {
        left: left.clamp(0, VOLUME_MAX as i64) as i16,
        right: right.clamp(0, VOLUME_MAX as i64) as i16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_center_pan_is_balanced() {
        for velocity in [1u8, 64, 100, 127] {
            let vol = calc_voice_volume(127, PAN_CENTER, velocity);
            assert_eq!(vol.left, vol.right, "velocity {velocity}");
            assert!(vol.left > 0);
        }
    }

    #[test]
    fn test_hard_pan_silences_other_side() {
        let left = calc_voice_volume(127, 0, 127);
        assert_eq!(left.right, 0);
        assert_eq!(left.left, VOLUME_MAX as i16);

        let right = calc_voice_volume(127, 127, 127);
        assert_eq!(right.left, 0);
        assert_eq!(right.right, VOLUME_MAX as i16);
    }

    #[test]
    fn test_constant_power_across_pan() {
        for pan in 0..=127u8 {
            let vol = calc_voice_volume(127, pan, 127);
            let l = vol.left as f64 / VOLUME_MAX as f64;
            let r = vol.right as f64 / VOLUME_MAX as f64;
            approx::assert_abs_diff_eq!(l * l + r * r, 1.0, epsilon = 0.01);
        }
    }

    #[test]
    fn test_velocity_is_linear() {
        let full = calc_voice_volume(127, 0, 127).left as i32;
        let half = calc_voice_volume(127, 0, 64).left as i32;
        assert!((half * 2 - full).abs() < 600, "full {full} half {half}");
        assert_eq!(calc_voice_volume(127, 0, 0), Volume::default());
    }

    #[test]
    fn test_out_of_range_inputs_are_clamped() {
        assert_eq!(
            calc_voice_volume(255, 255, 255),
            calc_voice_volume(127, 127, 127)
        );
    }

    #[test]
    fn test_apply_scales_sample() {
        let vol = Volume {
            left: 0x4000,
            right: 0x7FFF,
        };
        let (l, r) = vol.apply(1000);
        assert_eq!(l, 500);
        assert_eq!(r, 999);
    }
}
