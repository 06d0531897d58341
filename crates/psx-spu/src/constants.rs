//! Hardware constants of the PS1 SPU voice model.

/// Number of hardware voices
pub const NUM_VOICES: usize = 24;

/// Native SPU output rate in Hz
pub const SPU_SAMPLE_RATE: u32 = 44_100;

/// Maximum envelope level (15-bit)
pub const LEVEL_MAX: i32 = 0x7FFF;

/// Envelope level above which exponential attack slows down by 4x
pub const EXP_ATTACK_SLOWDOWN_LEVEL: i32 = 0x6000;

/// Maximum per-channel voice gain
pub const VOLUME_MAX: i32 = 0x7FFF;

/// Number of fractional bits in the pitch step and playback position
pub const PITCH_FRAC_BITS: u32 = 12;

/// Pitch step that plays one source sample per output sample
pub const PITCH_STEP_UNITY: u32 = 1 << PITCH_FRAC_BITS;

/// Largest pitch step the hardware pitch register can hold (~4x)
pub const PITCH_STEP_MAX: u32 = 0x3FFF;

/// Mask for the fractional part of a playback position
pub const PITCH_FRAC_MASK: u64 = (1 << PITCH_FRAC_BITS) - 1;

/// Highest MIDI note / velocity value
pub const MIDI_VALUE_MAX: u8 = 127;

/// 14-bit pitch bend center (no bend)
pub const PITCH_BEND_CENTER: u16 = 0x2000;

/// Largest 14-bit pitch bend value
pub const PITCH_BEND_MAX: u16 = 0x3FFF;

/// Samples decoded from one 16-byte PS-ADPCM block
pub const ADPCM_SAMPLES_PER_BLOCK: usize = 28;

/// Size in bytes of one PS-ADPCM block
pub const ADPCM_BLOCK_SIZE: usize = 16;

/// Clamp a 32-bit mix value to the signed 16-bit output range
#[inline]
pub fn clamp16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}
