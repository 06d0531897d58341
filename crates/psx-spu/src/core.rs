//! SPU voice pool
//!
//! Owns the 24 hardware voices, hands them out on note-on (stealing when
//! every slot is busy), applies the global pitch bend and mixes all active
//! voices into one saturated stereo frame per output sample.

use std::sync::Arc;

use crate::constants::{
    clamp16, MIDI_VALUE_MAX, NUM_VOICES, PITCH_BEND_CENTER, PITCH_BEND_MAX, PITCH_STEP_UNITY,
    SPU_SAMPLE_RATE,
};
use crate::envelope::{AdsrEnvelope, EnvelopePhase};
use crate::pitch::{
    base_note_for_sample_rate, bend_multiplier, bend_to_notes, bent_pitch_step,
    pitch_step_for_note,
};
use crate::sample::SampleData;
use crate::voice::{StereoSample, Voice};
use crate::volume::{self, calc_voice_volume, PAN_CENTER};

/// Per-slot bookkeeping for the note a voice is playing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoiceInfo {
    /// MIDI note (0-127)
    pub note: u8,
    /// MIDI velocity (0-127)
    pub velocity: u8,
    /// Output samples rendered since note-on
    pub samples_active: u32,
}

/// Pool-wide voice parameters stamped into a voice at note-on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceTemplate {
    /// Native rate of the sample in Hz
    pub sample_rate: u32,
    /// Note that plays the sample at unity pitch on a 44.1 kHz SPU
    pub base_note: f64,
    /// Loop start in samples
    pub loop_start: u32,
    /// Loop end in samples (exclusive); `start >= end` disables the loop
    pub loop_end: u32,
    /// Patch volume (0-127)
    pub volume: u8,
    /// Pan (0 = left, 64 = center, 127 = right)
    pub pan: u8,
    /// Envelope configuration
    pub envelope: AdsrEnvelope,
    /// Pitch bend range above center, in notes
    pub bend_up_notes: f64,
    /// Pitch bend range below center, in notes
    pub bend_down_notes: f64,
}

impl Default for VoiceTemplate {
    fn default() -> Self {
        VoiceTemplate {
            sample_rate: SPU_SAMPLE_RATE,
            base_note: base_note_for_sample_rate(SPU_SAMPLE_RATE as f64),
            loop_start: 0,
            loop_end: 0,
            volume: MIDI_VALUE_MAX,
            pan: PAN_CENTER,
            envelope: AdsrEnvelope::default(),
            bend_up_notes: 2.0,
            bend_down_notes: 2.0,
        }
    }
}

impl VoiceTemplate {
    fn clamped(mut self) -> Self {
        self.volume = self.volume.min(MIDI_VALUE_MAX);
        self.pan = self.pan.min(MIDI_VALUE_MAX);
        self.envelope = self.envelope.clamped();
        if !self.base_note.is_finite() {
            self.base_note = base_note_for_sample_rate(self.sample_rate as f64);
        }
        for range in [&mut self.bend_up_notes, &mut self.bend_down_notes] {
            if !range.is_finite() || *range < 0.0 {
                *range = 0.0;
            }
        }
        self
    }
}

/// The SPU voice pool and mixer.
///
/// All methods are allocation-free and infallible so the pool can live on
/// the audio thread. Out-of-range inputs are clamped.
pub struct Core {
    voices: [Voice; NUM_VOICES],
    infos: [VoiceInfo; NUM_VOICES],
    template: VoiceTemplate,
    sample: Option<Arc<SampleData>>,
    output_rate: u32,
    pitch_bend: u16,
    bend_multiplier: u32,
}

impl Core {
    /// Create a silent pool rendering at the native SPU rate
    pub fn new() -> Self {
        Self::with_output_rate(SPU_SAMPLE_RATE)
    }

    /// Create a silent pool rendering at `output_rate` Hz. Pitch steps are
    /// scaled so notes keep their pitch at any rate.
    pub fn with_output_rate(output_rate: u32) -> Self {
        volume::warm_up_tables();
        Core {
            voices: std::array::from_fn(Voice::new),
            infos: [VoiceInfo::default(); NUM_VOICES],
            template: VoiceTemplate::default(),
            sample: None,
            output_rate: if output_rate == 0 {
                SPU_SAMPLE_RATE
            } else {
                output_rate
            },
            pitch_bend: PITCH_BEND_CENTER,
            bend_multiplier: PITCH_STEP_UNITY,
        }
    }

    /// Output sample rate in Hz
    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Change the output rate and re-pitch sounding voices
    pub fn set_output_rate(&mut self, output_rate: u32) {
        if output_rate == 0 || output_rate == self.output_rate {
            return;
        }
        self.output_rate = output_rate;
        self.update_pitch();
    }

    // ========== Note events ==========

    /// Start `note` on a free voice, stealing one if the pool is full.
    ///
    /// Returns the slot used. The lowest free slot wins. Without a free slot
    /// the releasing voice that has played longest is stolen, or the longest
    /// playing voice if none is releasing; ties go to the lowest slot.
    pub fn note_on(&mut self, note: u8, velocity: u8) -> usize {
        let note = note.min(MIDI_VALUE_MAX);
        let velocity = velocity.min(MIDI_VALUE_MAX);

        let slot = self.free_slot().unwrap_or_else(|| self.steal_slot());
        let template = self.template;
        let base_step = pitch_step_for_note(note as f64, template.base_note, self.output_rate);

        let voice = &mut self.voices[slot];
        voice.kill();
        voice.key_on(
            template.sample_rate,
            template.base_note,
            template.loop_start,
            template.loop_end,
            template.envelope,
            calc_voice_volume(template.volume, template.pan, velocity),
            base_step,
            bent_pitch_step(base_step, self.bend_multiplier),
        );
        self.infos[slot] = VoiceInfo {
            note,
            velocity,
            samples_active: 0,
        };
        slot
    }

    /// Release every voice playing `note` that is not already releasing.
    ///
    /// Returns the number of voices moved into release.
    pub fn note_off(&mut self, note: u8) -> usize {
        let mut released = 0;
        for (voice, info) in self.voices.iter_mut().zip(self.infos.iter()) {
            if voice.is_active() && info.note == note && voice.phase() != EnvelopePhase::Release {
                voice.key_off();
                released += 1;
            }
        }
        released
    }

    /// Release every active voice
    pub fn all_notes_off(&mut self) {
        for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
            voice.key_off();
        }
    }

    /// Silence every voice immediately, skipping release
    pub fn kill_all(&mut self) {
        for (voice, info) in self.voices.iter_mut().zip(self.infos.iter_mut()) {
            voice.kill();
            *info = VoiceInfo::default();
        }
    }

    /// Apply a 14-bit pitch bend (0x2000 = center) to every active voice
    pub fn pitch_bend(&mut self, value: u16) {
        self.pitch_bend = value.min(PITCH_BEND_MAX);
        self.update_bend_multiplier();
        for voice in self.voices.iter_mut().filter(|v| v.is_active()) {
            let base = voice.base_pitch_step();
            voice.set_pitch_step(base, bent_pitch_step(base, self.bend_multiplier));
        }
    }

    /// Current pitch bend value
    pub fn pitch_bend_value(&self) -> u16 {
        self.pitch_bend
    }

    /// Current Q12 pitch bend multiplier
    pub fn bend_multiplier(&self) -> u32 {
        self.bend_multiplier
    }

    // ========== Rendering ==========

    /// Render one stereo frame
    pub fn render_frame(&mut self) -> StereoSample {
        let pcm: &[i16] = match &self.sample {
            Some(sample) => sample.pcm(),
            None => &[],
        };

        let mut left = 0i32;
        let mut right = 0i32;
        for (voice, info) in self.voices.iter_mut().zip(self.infos.iter_mut()) {
            if !voice.is_active() {
                continue;
            }
            let out = voice.step(pcm);
            left += out.left as i32;
            right += out.right as i32;
            if voice.is_active() {
                info.samples_active = info.samples_active.saturating_add(1);
            } else {
                *info = VoiceInfo::default();
            }
        }

        StereoSample {
            left: clamp16(left),
            right: clamp16(right),
        }
    }

    /// Fill `out` with consecutive frames
    pub fn render(&mut self, out: &mut [StereoSample]) {
        for frame in out.iter_mut() {
            *frame = self.render_frame();
        }
    }

    // ========== Template and sample ==========

    /// Pool-wide parameters used by the next note-on
    pub fn template(&self) -> &VoiceTemplate {
        &self.template
    }

    /// Replace the pool-wide parameters. Sounding voices keep their old
    /// parameters until [`Core::reapply_template`].
    pub fn set_template(&mut self, template: VoiceTemplate) {
        self.template = template.clamped();
        self.update_bend_multiplier();
    }

    /// Push the current template into every sounding voice without
    /// re-triggering envelopes
    pub fn reapply_template(&mut self) {
        let template = self.template;
        for (voice, info) in self.voices.iter_mut().zip(self.infos.iter()) {
            if !voice.is_active() {
                continue;
            }
            voice.set_source(template.sample_rate, template.base_note);
            voice.set_loop(template.loop_start, template.loop_end);
            voice.set_envelope(template.envelope);
            voice.set_volume(calc_voice_volume(template.volume, template.pan, info.velocity));
        }
        self.update_pitch();
    }

    /// Sample played by every voice
    pub fn sample(&self) -> Option<&Arc<SampleData>> {
        self.sample.as_ref()
    }

    /// Swap the sample, returning the previous one. Sounding voices are
    /// killed since their positions refer to the old data.
    pub fn set_sample(&mut self, sample: Option<Arc<SampleData>>) -> Option<Arc<SampleData>> {
        self.kill_all();
        std::mem::replace(&mut self.sample, sample)
    }

    // ========== Queries ==========

    /// Voice in slot `index`
    pub fn voice(&self, index: usize) -> Option<&Voice> {
        self.voices.get(index)
    }

    /// Note bookkeeping of slot `index`
    pub fn voice_info(&self, index: usize) -> Option<&VoiceInfo> {
        self.infos.get(index)
    }

    /// All voices in slot order
    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    /// Number of voices currently producing sound
    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    // ========== Internals ==========

    fn free_slot(&self) -> Option<usize> {
        self.voices.iter().position(|v| !v.is_active())
    }

    fn steal_slot(&self) -> usize {
        let oldest = |releasing_only: bool| {
            self.voices
                .iter()
                .filter(|v| {
                    v.is_active() && (!releasing_only || v.phase() == EnvelopePhase::Release)
                })
                .max_by(|a, b| {
                    let age_a = self.infos[a.slot()].samples_active;
                    let age_b = self.infos[b.slot()].samples_active;
                    age_a.cmp(&age_b).then(b.slot().cmp(&a.slot()))
                })
                .map(Voice::slot)
        };
        oldest(true).or_else(|| oldest(false)).unwrap_or(0)
    }

    fn update_bend_multiplier(&mut self) {
        let notes = bend_to_notes(
            self.pitch_bend,
            self.template.bend_up_notes,
            self.template.bend_down_notes,
        );
        self.bend_multiplier = bend_multiplier(notes);
    }

    /// Recompute base and effective pitch steps of sounding voices
    fn update_pitch(&mut self) {
        let base_note = self.template.base_note;
        for (voice, info) in self.voices.iter_mut().zip(self.infos.iter()) {
            if !voice.is_active() {
                continue;
            }
            let base = pitch_step_for_note(info.note as f64, base_note, self.output_rate);
            voice.set_pitch_step(base, bent_pitch_step(base, self.bend_multiplier));
        }
    }
}

impl Default for Core {
    fn default() -> Self {
        Self::new()
    }
}
