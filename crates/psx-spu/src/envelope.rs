//! SPU ADSR Envelope Generator
//!
//! Implements the PS1 SPU volume envelope as an integer state machine. Every
//! phase moves the 15-bit level by a signed step once every `cycles` samples,
//! where both values come from a precomputed rate table indexed by the
//! phase's shift (0-31), step code (0-3) and direction:
//!
//! ```text
//! cycles = 1 << max(0, shift - 11)
//! step   = (+7 - code) << max(0, 11 - shift)     increasing
//! step   = (-8 + code) << max(0, 11 - shift)     decreasing
//! ```
//!
//! Exponential curves are level-dependent adjustments of the table entry:
//! an exponential increase reads the entry two shifts slower once the level
//! exceeds 0x6000 (4x the cycles from shift 11 up, a quarter of the step
//! below that), and
//! an exponential decrease scales the step by `level / 0x8000` (arithmetic
//! shift, so the step never rounds to zero while the level is positive).

use std::fmt;

use crate::constants::{EXP_ATTACK_SLOWDOWN_LEVEL, LEVEL_MAX};

/// Envelope phase of a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopePhase {
    /// Silent, voice is free
    #[default]
    Off,
    /// Rising towards the maximum level after key-on
    Attack,
    /// Exponential fall towards the sustain level
    Decay,
    /// Held until key-off, optionally drifting up or down
    Sustain,
    /// Falling towards silence after key-off
    Release,
}

impl EnvelopePhase {
    /// True for every phase except `Off`
    pub fn is_active(self) -> bool {
        self != EnvelopePhase::Off
    }
}

impl fmt::Display for EnvelopePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopePhase::Off => write!(f, "Off"),
            EnvelopePhase::Attack => write!(f, "Attack"),
            EnvelopePhase::Decay => write!(f, "Decay"),
            EnvelopePhase::Sustain => write!(f, "Sustain"),
            EnvelopePhase::Release => write!(f, "Release"),
        }
    }
}

/// ADSR configuration, mirroring the 32-bit hardware ADSR register pair.
///
/// Step fields are hardware step codes: for increasing phases code `n` means
/// `+7 - n`, for decreasing phases `-8 + n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdsrEnvelope {
    /// Attack step code (0-3)
    pub attack_step: u8,
    /// Attack shift (0-31), larger is slower
    pub attack_shift: u8,
    /// Exponential attack curve
    pub attack_is_exponential: bool,
    /// Decay shift (0-15)
    pub decay_shift: u8,
    /// Sustain level (0-15), target level is `(n + 1) * 0x800`
    pub sustain_level: u8,
    /// Sustain step code (0-3)
    pub sustain_step: u8,
    /// Sustain shift (0-31)
    pub sustain_shift: u8,
    /// Sustain moves down instead of up
    pub sustain_is_decreasing: bool,
    /// Exponential sustain curve
    pub sustain_is_exponential: bool,
    /// Release shift (0-31)
    pub release_shift: u8,
    /// Exponential release curve
    pub release_is_exponential: bool,
}

impl Default for AdsrEnvelope {
    /// Instant attack to full level, held sustain and a short linear release
    fn default() -> Self {
        AdsrEnvelope {
            attack_step: 0,
            attack_shift: 0,
            attack_is_exponential: false,
            decay_shift: 0,
            sustain_level: 15,
            sustain_step: 0,
            sustain_shift: 31,
            sustain_is_decreasing: true,
            sustain_is_exponential: false,
            release_shift: 10,
            release_is_exponential: false,
        }
    }
}

impl AdsrEnvelope {
    /// Decode from the hardware register pair (`ADSR1 | ADSR2 << 16`)
    pub fn from_register(value: u32) -> Self {
        let adsr1 = value & 0xFFFF;
        let adsr2 = value >> 16;
        AdsrEnvelope {
            attack_is_exponential: (adsr1 & 0x8000) != 0,
            attack_shift: ((adsr1 >> 10) & 0x1F) as u8,
            attack_step: ((adsr1 >> 8) & 0x03) as u8,
            decay_shift: ((adsr1 >> 4) & 0x0F) as u8,
            sustain_level: (adsr1 & 0x0F) as u8,
            sustain_is_exponential: (adsr2 & 0x8000) != 0,
            sustain_is_decreasing: (adsr2 & 0x4000) != 0,
            sustain_shift: ((adsr2 >> 8) & 0x1F) as u8,
            sustain_step: ((adsr2 >> 6) & 0x03) as u8,
            release_is_exponential: (adsr2 & 0x20) != 0,
            release_shift: (adsr2 & 0x1F) as u8,
        }
    }

    /// Encode into the hardware register pair (`ADSR1 | ADSR2 << 16`)
    pub fn to_register(&self) -> u32 {
        let env = self.clamped();
        let adsr1 = ((env.attack_is_exponential as u32) << 15)
            | ((env.attack_shift as u32) << 10)
            | ((env.attack_step as u32) << 8)
            | ((env.decay_shift as u32) << 4)
            | env.sustain_level as u32;
        let adsr2 = ((env.sustain_is_exponential as u32) << 15)
            | ((env.sustain_is_decreasing as u32) << 14)
            | ((env.sustain_shift as u32) << 8)
            | ((env.sustain_step as u32) << 6)
            | ((env.release_is_exponential as u32) << 5)
            | env.release_shift as u32;
        adsr1 | (adsr2 << 16)
    }

    /// Clamp every field into its hardware range
    pub fn clamped(mut self) -> Self {
        self.attack_step = self.attack_step.min(3);
        self.attack_shift = self.attack_shift.min(31);
        self.decay_shift = self.decay_shift.min(15);
        self.sustain_level = self.sustain_level.min(15);
        self.sustain_step = self.sustain_step.min(3);
        self.sustain_shift = self.sustain_shift.min(31);
        self.release_shift = self.release_shift.min(31);
        self
    }

    /// Level at which decay hands over to sustain
    pub fn sustain_target(&self) -> i32 {
        ((self.sustain_level.min(15) as i32 + 1) * 0x800).min(LEVEL_MAX)
    }

    /// Rate parameters of a phase, `None` for `Off`
    fn rate(&self, phase: EnvelopePhase) -> Option<PhaseRate> {
        let rate = match phase {
            EnvelopePhase::Off => return None,
            EnvelopePhase::Attack => PhaseRate {
                shift: self.attack_shift,
                code: self.attack_step,
                decreasing: false,
                exponential: self.attack_is_exponential,
            },
            EnvelopePhase::Decay => PhaseRate {
                shift: self.decay_shift.min(15),
                code: 0,
                decreasing: true,
                exponential: true,
            },
            EnvelopePhase::Sustain => PhaseRate {
                shift: self.sustain_shift,
                code: self.sustain_step,
                decreasing: self.sustain_is_decreasing,
                exponential: self.sustain_is_exponential,
            },
            EnvelopePhase::Release => PhaseRate {
                shift: self.release_shift,
                code: 0,
                decreasing: true,
                exponential: self.release_is_exponential,
            },
        };
        Some(rate)
    }
}

#[derive(Debug, Clone, Copy)]
struct PhaseRate {
    shift: u8,
    code: u8,
    decreasing: bool,
    exponential: bool,
}

/// One rate table entry: the level moves by `step` every `cycles` samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EnvelopeRate {
    cycles: u32,
    step: i32,
}

/// Rate table: [direction][shift][step code], direction 0 = increasing
const fn build_rate_table() -> [[[EnvelopeRate; 4]; 32]; 2] {
    let mut table = [[[EnvelopeRate { cycles: 1, step: 0 }; 4]; 32]; 2];
    let mut dir = 0;
    while dir < 2 {
        let mut shift = 0;
        while shift < 32 {
            let step_shift = if shift < 11 { 11 - shift } else { 0 };
            let cycle_shift = if shift > 11 { shift - 11 } else { 0 };
            let mut code = 0;
            while code < 4 {
                let base = if dir == 0 {
                    7 - code as i32
                } else {
                    -8 + code as i32
                };
                table[dir][shift][code] = EnvelopeRate {
                    cycles: 1 << cycle_shift,
                    step: base << step_shift,
                };
                code += 1;
            }
            shift += 1;
        }
        dir += 1;
    }
    table
}

static RATE_TABLE: [[[EnvelopeRate; 4]; 32]; 2] = build_rate_table();

fn lookup_rate(rate: PhaseRate) -> EnvelopeRate {
    RATE_TABLE[rate.decreasing as usize][(rate.shift as usize).min(31)][(rate.code as usize).min(3)]
}

/// Runtime envelope state of a voice: phase, level and the wait counter
/// holding the level between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdsrState {
    phase: EnvelopePhase,
    level: i32,
    wait: u32,
}

impl AdsrState {
    /// A silent envelope in the `Off` phase
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase
    pub fn phase(&self) -> EnvelopePhase {
        self.phase
    }

    /// Current level (0..=LEVEL_MAX)
    pub fn level(&self) -> i32 {
        self.level
    }

    /// True unless the envelope is `Off`
    pub fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    /// Restart from level zero in the attack phase
    pub fn key_on(&mut self) {
        self.phase = EnvelopePhase::Attack;
        self.level = 0;
        self.wait = 0;
    }

    /// Enter release from any active phase. Does nothing once `Off` or
    /// already releasing.
    pub fn key_off(&mut self) {
        if matches!(
            self.phase,
            EnvelopePhase::Attack | EnvelopePhase::Decay | EnvelopePhase::Sustain
        ) {
            self.phase = EnvelopePhase::Release;
            self.wait = 0;
        }
    }

    /// Force silence immediately, bypassing the release curve
    pub fn kill(&mut self) {
        self.phase = EnvelopePhase::Off;
        self.level = 0;
        self.wait = 0;
    }

    /// Advance the envelope by one output sample
    pub fn tick(&mut self, env: &AdsrEnvelope) {
        // A sustain target at or above the current level skips decay entirely
        if self.phase == EnvelopePhase::Decay && self.level <= env.sustain_target() {
            self.phase = EnvelopePhase::Sustain;
            self.wait = 0;
        }

        let Some(rate) = env.rate(self.phase) else {
            return;
        };

        if self.wait > 0 {
            self.wait -= 1;
            return;
        }

        let mut rate = rate;
        if rate.exponential && !rate.decreasing && self.level > EXP_ATTACK_SLOWDOWN_LEVEL {
            rate.shift += 2;
        }
        let entry = lookup_rate(rate);
        let mut step = entry.step;
        if rate.exponential && rate.decreasing {
            step = (step * self.level) >> 15;
        }
        let cycles = entry.cycles;

        self.level = (self.level + step).clamp(0, LEVEL_MAX);
        self.wait = cycles - 1;

        match self.phase {
            EnvelopePhase::Attack if self.level >= LEVEL_MAX => {
                self.phase = EnvelopePhase::Decay;
                self.wait = 0;
            }
            EnvelopePhase::Decay if self.level <= env.sustain_target() => {
                self.phase = EnvelopePhase::Sustain;
                self.wait = 0;
            }
            EnvelopePhase::Release if self.level == 0 => {
                self.kill();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_until(state: &mut AdsrState, env: &AdsrEnvelope, phase: EnvelopePhase) -> usize {
        for n in 0..10_000_000 {
            if state.phase() == phase {
                return n;
            }
            state.tick(env);
        }
        panic!("envelope never reached {phase}");
    }

    #[test]
    fn test_rate_table_formula() {
        let fast_up = RATE_TABLE[0][0][0];
        assert_eq!(fast_up, EnvelopeRate { cycles: 1, step: 7 << 11 });

        let fast_down = RATE_TABLE[1][0][3];
        assert_eq!(fast_down, EnvelopeRate { cycles: 1, step: -5 << 11 });

        let slow_down = RATE_TABLE[1][31][0];
        assert_eq!(slow_down, EnvelopeRate { cycles: 1 << 20, step: -8 });

        let unity = RATE_TABLE[0][11][1];
        assert_eq!(unity, EnvelopeRate { cycles: 1, step: 6 });
    }

    #[test]
    fn test_register_round_trip() {
        let env = AdsrEnvelope {
            attack_step: 2,
            attack_shift: 17,
            attack_is_exponential: true,
            decay_shift: 9,
            sustain_level: 6,
            sustain_step: 1,
            sustain_shift: 23,
            sustain_is_decreasing: true,
            sustain_is_exponential: true,
            release_shift: 14,
            release_is_exponential: true,
        };
        assert_eq!(AdsrEnvelope::from_register(env.to_register()), env);
        assert_eq!(AdsrEnvelope::from_register(0xFFFF_FFFF).to_register() & 0x2000_0000, 0);
    }

    #[test]
    fn test_clamped_limits_fields() {
        let env = AdsrEnvelope {
            attack_step: 9,
            attack_shift: 200,
            decay_shift: 16,
            sustain_level: 99,
            sustain_step: 4,
            sustain_shift: 32,
            release_shift: 40,
            ..AdsrEnvelope::default()
        }
        .clamped();
        assert_eq!(env.attack_step, 3);
        assert_eq!(env.attack_shift, 31);
        assert_eq!(env.decay_shift, 15);
        assert_eq!(env.sustain_level, 15);
        assert_eq!(env.sustain_step, 3);
        assert_eq!(env.sustain_shift, 31);
        assert_eq!(env.release_shift, 31);
    }

    #[test]
    fn test_linear_attack_reaches_max_then_decays() {
        let env = AdsrEnvelope {
            sustain_level: 7,
            decay_shift: 4,
            ..AdsrEnvelope::default()
        };
        let mut state = AdsrState::new();
        state.key_on();
        assert_eq!(state.phase(), EnvelopePhase::Attack);

        // +7 << 11 per sample: 0x7FFF needs three steps
        state.tick(&env);
        assert_eq!(state.level(), 14336);
        state.tick(&env);
        state.tick(&env);
        assert_eq!(state.level(), LEVEL_MAX);
        assert_eq!(state.phase(), EnvelopePhase::Decay);

        run_until(&mut state, &env, EnvelopePhase::Sustain);
        assert!(state.level() <= env.sustain_target());
        assert!(state.level() > env.sustain_target() - 0x800);
    }

    #[test]
    fn test_exponential_attack_slows_near_top() {
        let linear = AdsrEnvelope {
            attack_shift: 12,
            ..AdsrEnvelope::default()
        };
        let exponential = AdsrEnvelope {
            attack_is_exponential: true,
            ..linear
        };

        let mut a = AdsrState::new();
        a.key_on();
        let linear_time = run_until(&mut a, &linear, EnvelopePhase::Decay);

        let mut b = AdsrState::new();
        b.key_on();
        let exp_time = run_until(&mut b, &exponential, EnvelopePhase::Decay);

        assert!(exp_time > linear_time, "{exp_time} <= {linear_time}");
    }

    #[test]
    fn test_exponential_attack_shrinks_step_at_fast_rates() {
        // Shift 8: +56 per sample, +14 per sample above 0x6000
        let env = AdsrEnvelope {
            attack_shift: 8,
            attack_is_exponential: true,
            ..AdsrEnvelope::default()
        };
        let mut state = AdsrState::new();
        state.key_on();
        while state.level() <= EXP_ATTACK_SLOWDOWN_LEVEL {
            let before = state.level();
            state.tick(&env);
            assert_eq!(state.level() - before, 56);
        }
        for _ in 0..4 {
            let before = state.level();
            state.tick(&env);
            assert_eq!(state.level() - before, 14);
        }
    }

    #[test]
    fn test_sustain_holds_until_key_off() {
        let env = AdsrEnvelope {
            sustain_shift: 31,
            ..AdsrEnvelope::default()
        };
        let mut state = AdsrState::new();
        state.key_on();
        run_until(&mut state, &env, EnvelopePhase::Sustain);
        for _ in 0..10_000 {
            state.tick(&env);
        }
        assert_eq!(state.phase(), EnvelopePhase::Sustain);

        state.key_off();
        assert_eq!(state.phase(), EnvelopePhase::Release);
        run_until(&mut state, &env, EnvelopePhase::Off);
        assert_eq!(state.level(), 0);
    }

    #[test]
    fn test_increasing_sustain_clamps_at_max() {
        let env = AdsrEnvelope {
            sustain_level: 3,
            sustain_shift: 0,
            sustain_is_decreasing: false,
            ..AdsrEnvelope::default()
        };
        let mut state = AdsrState::new();
        state.key_on();
        run_until(&mut state, &env, EnvelopePhase::Sustain);
        for _ in 0..100 {
            state.tick(&env);
        }
        assert_eq!(state.level(), LEVEL_MAX);
        assert_eq!(state.phase(), EnvelopePhase::Sustain);
    }

    #[test]
    fn test_exponential_release_reaches_zero() {
        let env = AdsrEnvelope {
            release_shift: 8,
            release_is_exponential: true,
            ..AdsrEnvelope::default()
        };
        let mut state = AdsrState::new();
        state.key_on();
        run_until(&mut state, &env, EnvelopePhase::Sustain);
        state.key_off();
        let samples = run_until(&mut state, &env, EnvelopePhase::Off);
        assert!(samples > 0);
        assert_eq!(state.level(), 0);
    }

    #[test]
    fn test_key_off_before_tick_goes_silent_next_sample() {
        let env = AdsrEnvelope::default();
        let mut state = AdsrState::new();
        state.key_on();
        state.key_off();
        assert_eq!(state.phase(), EnvelopePhase::Release);
        state.tick(&env);
        assert_eq!(state.phase(), EnvelopePhase::Off);
    }

    #[test]
    fn test_kill_bypasses_release() {
        let env = AdsrEnvelope::default();
        let mut state = AdsrState::new();
        state.key_on();
        state.tick(&env);
        state.kill();
        assert_eq!(state.phase(), EnvelopePhase::Off);
        assert_eq!(state.level(), 0);
        state.key_off();
        assert_eq!(state.phase(), EnvelopePhase::Off);
    }

    #[test]
    fn test_level_stays_in_range_for_all_shapes() {
        for register in (0u32..=0xFFFF_FFFF).step_by(0x0137_9AB3) {
            let env = AdsrEnvelope::from_register(register);
            let mut state = AdsrState::new();
            state.key_on();
            for n in 0..20_000 {
                if n == 12_000 {
                    state.key_off();
                }
                state.tick(&env);
                assert!(
                    (0..=LEVEL_MAX).contains(&state.level()),
                    "register {register:#010x} produced level {}",
                    state.level()
                );
            }
        }
    }
}
