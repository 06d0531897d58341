//! Host parameters
//!
//! The sampler exposes 25 parameters. Some are informational (sample length)
//! and two are views of the same value: setting `SampleRate` re-derives
//! `BaseNote` and the other way round.
//!
//! Values are stored in native units (Hz, notes, hardware register fields).
//! Integer and switch parameters are rounded on every write and everything
//! is clamped to its range.

use std::collections::BTreeMap;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use psx_spu::{
    base_note_for_sample_rate, sample_rate_for_base_note, AdsrEnvelope, SampleData,
    VoiceTemplate,
};

use crate::{Result, SamplerError};

/// Number of host parameters
pub const PARAM_COUNT: usize = 25;

/// Samples per PS-ADPCM block, for the informational block count
const SAMPLES_PER_BLOCK: f64 = 28.0;

/// Largest sample length and loop point
const MAX_SAMPLE_LENGTH: f64 = 16_777_216.0;

/// Preset format version written by [`Params::to_preset_json`]
const PRESET_VERSION: u32 = 1;

/// Parameter identifiers, in host registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum ParamId {
    SampleRate = 0,
    BaseNote,
    LengthInSamples,
    LengthInBlocks,
    LoopStartSample,
    LoopEndSample,
    Volume,
    Pan,
    PitchstepUp,
    PitchstepDown,
    AttackStep,
    AttackShift,
    AttackIsExp,
    DecayShift,
    SustainLevel,
    SustainStep,
    SustainShift,
    SustainDec,
    SustainIsExp,
    ReleaseShift,
    ReleaseIsExp,
    NoteMin,
    NoteMax,
    PitchBendUpOffset,
    PitchBendDownOffset,
}

/// How a parameter value is quantized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Continuous value
    Float,
    /// Whole numbers only
    Int,
    /// 0 or 1
    Switch,
}

impl ParamId {
    /// Every parameter in index order
    pub const ALL: [ParamId; PARAM_COUNT] = [
        ParamId::SampleRate,
        ParamId::BaseNote,
        ParamId::LengthInSamples,
        ParamId::LengthInBlocks,
        ParamId::LoopStartSample,
        ParamId::LoopEndSample,
        ParamId::Volume,
        ParamId::Pan,
        ParamId::PitchstepUp,
        ParamId::PitchstepDown,
        ParamId::AttackStep,
        ParamId::AttackShift,
        ParamId::AttackIsExp,
        ParamId::DecayShift,
        ParamId::SustainLevel,
        ParamId::SustainStep,
        ParamId::SustainShift,
        ParamId::SustainDec,
        ParamId::SustainIsExp,
        ParamId::ReleaseShift,
        ParamId::ReleaseIsExp,
        ParamId::NoteMin,
        ParamId::NoteMax,
        ParamId::PitchBendUpOffset,
        ParamId::PitchBendDownOffset,
    ];

    /// Parameter for a host index
    pub fn from_index(index: usize) -> Option<Self> {
        ParamId::from_usize(index)
    }

    /// Host index of this parameter
    pub fn index(self) -> usize {
        self.to_usize().unwrap_or_default()
    }

    /// Stable name used in presets
    pub fn name(self) -> &'static str {
        match self {
            ParamId::SampleRate => "SampleRate",
            ParamId::BaseNote => "BaseNote",
            ParamId::LengthInSamples => "LengthInSamples",
            ParamId::LengthInBlocks => "LengthInBlocks",
            ParamId::LoopStartSample => "LoopStartSample",
            ParamId::LoopEndSample => "LoopEndSample",
            ParamId::Volume => "Volume",
            ParamId::Pan => "Pan",
            ParamId::PitchstepUp => "PitchstepUp",
            ParamId::PitchstepDown => "PitchstepDown",
            ParamId::AttackStep => "AttackStep",
            ParamId::AttackShift => "AttackShift",
            ParamId::AttackIsExp => "AttackIsExp",
            ParamId::DecayShift => "DecayShift",
            ParamId::SustainLevel => "SustainLevel",
            ParamId::SustainStep => "SustainStep",
            ParamId::SustainShift => "SustainShift",
            ParamId::SustainDec => "SustainDec",
            ParamId::SustainIsExp => "SustainIsExp",
            ParamId::ReleaseShift => "ReleaseShift",
            ParamId::ReleaseIsExp => "ReleaseIsExp",
            ParamId::NoteMin => "NoteMin",
            ParamId::NoteMax => "NoteMax",
            ParamId::PitchBendUpOffset => "PitchBendUpOffset",
            ParamId::PitchBendDownOffset => "PitchBendDownOffset",
        }
    }

    /// Look a parameter up by its preset name
    pub fn from_name(name: &str) -> Option<Self> {
        ParamId::ALL.iter().copied().find(|id| id.name() == name)
    }

    /// Quantization of the value
    pub fn kind(self) -> ParamKind {
        match self {
            ParamId::SampleRate
            | ParamId::BaseNote
            | ParamId::PitchBendUpOffset
            | ParamId::PitchBendDownOffset => ParamKind::Float,
            ParamId::AttackIsExp
            | ParamId::SustainDec
            | ParamId::SustainIsExp
            | ParamId::ReleaseIsExp => ParamKind::Switch,
            _ => ParamKind::Int,
        }
    }

    /// Inclusive `(min, max)` range in native units
    pub fn range(self) -> (f64, f64) {
        match self {
            // The rate range is whatever a 0..=127 base note implies
            ParamId::SampleRate => (
                sample_rate_for_base_note(127.0),
                sample_rate_for_base_note(0.0),
            ),
            ParamId::BaseNote => (0.0, 127.0),
            ParamId::LengthInSamples | ParamId::LoopStartSample | ParamId::LoopEndSample => {
                (0.0, MAX_SAMPLE_LENGTH)
            }
            ParamId::LengthInBlocks => (0.0, (MAX_SAMPLE_LENGTH / SAMPLES_PER_BLOCK).ceil()),
            ParamId::Volume | ParamId::Pan | ParamId::NoteMin | ParamId::NoteMax => (0.0, 127.0),
            ParamId::PitchstepUp | ParamId::PitchstepDown => (0.0, 48.0),
            ParamId::AttackStep | ParamId::SustainStep => (0.0, 3.0),
            ParamId::AttackShift | ParamId::SustainShift | ParamId::ReleaseShift => (0.0, 31.0),
            ParamId::DecayShift | ParamId::SustainLevel => (0.0, 15.0),
            ParamId::AttackIsExp
            | ParamId::SustainDec
            | ParamId::SustainIsExp
            | ParamId::ReleaseIsExp => (0.0, 1.0),
            ParamId::PitchBendUpOffset | ParamId::PitchBendDownOffset => (-1.0, 1.0),
        }
    }

    /// Value of a fresh instrument
    pub fn default_value(self) -> f64 {
        match self {
            ParamId::SampleRate => 44_100.0,
            ParamId::BaseNote => 60.0,
            ParamId::Volume | ParamId::NoteMax => 127.0,
            ParamId::Pan => 64.0,
            ParamId::PitchstepUp | ParamId::PitchstepDown => 2.0,
            ParamId::SustainLevel => 15.0,
            ParamId::SustainShift => 31.0,
            ParamId::SustainDec => 1.0,
            ParamId::ReleaseShift => 10.0,
            _ => 0.0,
        }
    }

    /// Clamp and quantize a native value for this parameter
    pub fn sanitize(self, value: f64) -> f64 {
        let (min, max) = self.range();
        let value = if value.is_nan() { self.default_value() } else { value };
        let value = match self.kind() {
            ParamKind::Float => value,
            ParamKind::Int => value.round(),
            ParamKind::Switch => {
                if value >= 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
        };
        value.clamp(min, max)
    }
}

/// Complete parameter set of the instrument
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Params {
    values: [f64; PARAM_COUNT],
}

impl Default for Params {
    fn default() -> Self {
        let mut values = [0.0; PARAM_COUNT];
        for id in ParamId::ALL {
            values[id.index()] = id.default_value();
        }
        Params { values }
    }
}

impl Params {
    /// Build from raw values in index order, clamping each to its range.
    ///
    /// Linked parameters are taken as given, so a stored set loads back
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns `SamplerError::State` if any value is not finite.
    pub fn from_values(values: [f64; PARAM_COUNT]) -> Result<Self> {
        let mut params = Params::default();
        for id in ParamId::ALL {
            let value = values[id.index()];
            if !value.is_finite() {
                return Err(SamplerError::State(format!(
                    "parameter {} is not finite",
                    id.name()
                )));
            }
            params.values[id.index()] = id.sanitize(value);
        }
        Ok(params)
    }

    /// Raw values in index order
    pub fn values(&self) -> &[f64; PARAM_COUNT] {
        &self.values
    }

    /// Native value of `id`
    pub fn get(&self, id: ParamId) -> f64 {
        self.values[id.index()]
    }

    /// Value of `id` mapped to `0.0..=1.0`
    pub fn normalized(&self, id: ParamId) -> f64 {
        let (min, max) = id.range();
        ((self.get(id) - min) / (max - min)).clamp(0.0, 1.0)
    }

    /// Set `id` to a native value, returning the value actually stored.
    ///
    /// Setting the sample rate updates the base note and vice versa.
    pub fn set(&mut self, id: ParamId, value: f64) -> f64 {
        let value = id.sanitize(value);
        self.values[id.index()] = value;
        match id {
            ParamId::SampleRate => self.store(ParamId::BaseNote, base_note_for_sample_rate(value)),
            ParamId::BaseNote => self.store(ParamId::SampleRate, sample_rate_for_base_note(value)),
            _ => {}
        }
        value
    }

    /// Set `id` from a host value in `0.0..=1.0`
    pub fn set_normalized(&mut self, id: ParamId, normalized: f64) -> f64 {
        let (min, max) = id.range();
        let normalized = if normalized.is_nan() { 0.0 } else { normalized.clamp(0.0, 1.0) };
        self.set(id, min + normalized * (max - min))
    }

    fn store(&mut self, id: ParamId, value: f64) {
        self.values[id.index()] = id.sanitize(value);
    }

    fn get_u8(&self, id: ParamId) -> u8 {
        self.get(id) as u8
    }

    fn get_flag(&self, id: ParamId) -> bool {
        self.get(id) >= 0.5
    }

    /// Update the sample-derived parameters for a newly loaded sample:
    /// lengths, rate (and base note) and loop points
    pub fn apply_sample(&mut self, sample: &SampleData) {
        let len = sample.len() as f64;
        self.store(ParamId::LengthInSamples, len);
        self.store(ParamId::LengthInBlocks, (len / SAMPLES_PER_BLOCK).ceil());
        self.set(ParamId::SampleRate, sample.sample_rate() as f64);
        let (start, end) = sample
            .loop_region()
            .map_or((0, 0), |region| (region.start, region.end));
        self.store(ParamId::LoopStartSample, start as f64);
        self.store(ParamId::LoopEndSample, end as f64);
    }

    /// Inclusive note range accepted by note-on
    pub fn note_range(&self) -> (u8, u8) {
        (self.get_u8(ParamId::NoteMin), self.get_u8(ParamId::NoteMax))
    }

    /// True if `note` lies inside the accepted note range
    pub fn note_in_range(&self, note: u8) -> bool {
        let (min, max) = self.note_range();
        (min..=max).contains(&note)
    }

    /// Pitch bend range `(up, down)` in notes, including the fine offsets
    pub fn bend_range(&self) -> (f64, f64) {
        let up = self.get(ParamId::PitchstepUp) + self.get(ParamId::PitchBendUpOffset);
        let down = self.get(ParamId::PitchstepDown) + self.get(ParamId::PitchBendDownOffset);
        (up.max(0.0), down.max(0.0))
    }

    /// Envelope described by the ADSR parameters
    pub fn envelope(&self) -> AdsrEnvelope {
        AdsrEnvelope {
            attack_step: self.get_u8(ParamId::AttackStep),
            attack_shift: self.get_u8(ParamId::AttackShift),
            attack_is_exponential: self.get_flag(ParamId::AttackIsExp),
            decay_shift: self.get_u8(ParamId::DecayShift),
            sustain_level: self.get_u8(ParamId::SustainLevel),
            sustain_step: self.get_u8(ParamId::SustainStep),
            sustain_shift: self.get_u8(ParamId::SustainShift),
            sustain_is_decreasing: self.get_flag(ParamId::SustainDec),
            sustain_is_exponential: self.get_flag(ParamId::SustainIsExp),
            release_shift: self.get_u8(ParamId::ReleaseShift),
            release_is_exponential: self.get_flag(ParamId::ReleaseIsExp),
        }
    }

    /// Voice template for the SPU core
    pub fn template(&self) -> VoiceTemplate {
        let (bend_up_notes, bend_down_notes) = self.bend_range();
        VoiceTemplate {
            sample_rate: self.get(ParamId::SampleRate).round() as u32,
            base_note: self.get(ParamId::BaseNote),
            loop_start: self.get(ParamId::LoopStartSample) as u32,
            loop_end: self.get(ParamId::LoopEndSample) as u32,
            volume: self.get_u8(ParamId::Volume),
            pan: self.get_u8(ParamId::Pan),
            envelope: self.envelope(),
            bend_up_notes,
            bend_down_notes,
        }
    }

    /// Serialize as a JSON preset keyed by parameter name
    pub fn to_preset_json(&self) -> Result<String> {
        let preset = PresetFile {
            version: PRESET_VERSION,
            params: ParamId::ALL
                .iter()
                .map(|&id| (id.name().to_string(), self.get(id)))
                .collect(),
        };
        serde_json::to_string_pretty(&preset).map_err(|e| SamplerError::Preset(e.to_string()))
    }

    /// Load a JSON preset. Parameters missing from the preset keep their
    /// defaults; unknown names are rejected.
    pub fn from_preset_json(json: &str) -> Result<Self> {
        let preset: PresetFile =
            serde_json::from_str(json).map_err(|e| SamplerError::Preset(e.to_string()))?;
        if preset.version != PRESET_VERSION {
            return Err(SamplerError::Preset(format!(
                "unsupported preset version {}",
                preset.version
            )));
        }

        let mut values = *Params::default().values();
        for (name, value) in preset.params {
            let id = ParamId::from_name(&name).ok_or(SamplerError::UnknownParam(name))?;
            values[id.index()] = value;
        }
        Params::from_values(values).map_err(|e| SamplerError::Preset(e.to_string()))
    }
}

/// On-disk preset layout
#[derive(Debug, Serialize, Deserialize)]
struct PresetFile {
    version: u32,
    params: BTreeMap<String, f64>,
}
