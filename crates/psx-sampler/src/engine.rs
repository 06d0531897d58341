//! Real-time render loop
//!
//! [`SamplerEngine`] lives on the audio thread and owns the SPU core. Each
//! render call:
//!
//! 1. locks the shared state, applies every queued command, unlocks
//! 2. renders the requested frames without holding any lock
//! 3. locks again to publish voice status and peaks
//!
//! The engine never logs, allocates in steady state or fails: it always
//! fills exactly the frames it was asked for.

use std::sync::Arc;

use psx_spu::{Core, SampleData, StereoSample};

use crate::bridge::{Command, ControlState, Shared, VoiceStatus};
use crate::config::SamplerConfig;
use crate::params::Params;

/// Audio-thread half of the sampler
pub struct SamplerEngine {
    shared: Arc<Shared>,
    core: Core,
}

impl SamplerEngine {
    pub(crate) fn new(shared: Arc<Shared>, config: &SamplerConfig) -> Self {
        let mut core = Core::with_output_rate(config.output_sample_rate);
        core.set_template(Params::default().template());
        SamplerEngine { shared, core }
    }

    /// Apply every queued command; returns how many were applied.
    ///
    /// Called by the render methods, exposed for hosts that want to flush
    /// commands without producing audio.
    pub fn process_commands(&mut self) -> usize {
        let mut state = self.shared.state.lock();
        let ControlState {
            queue,
            retired_samples,
            ..
        } = &mut *state;

        let mut applied = 0;
        while let Some(command) = queue.pop_front() {
            apply_command(&mut self.core, command, retired_samples);
            applied += 1;
        }
        applied
    }

    /// Render into planar stereo buffers. Renders as many frames as the
    /// shorter buffer holds; the excess of the longer one is silenced.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.process_commands();

        let frames = left.len().min(right.len());
        let mut peaks = [0.0f32; 2];
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let frame = self.core.render_frame();
            *l = to_f32(frame.left);
            *r = to_f32(frame.right);
            track_peaks(&mut peaks, *l, *r);
        }
        left[frames..].fill(0.0);
        right[frames..].fill(0.0);

        self.publish(peaks);
    }

    /// Render into an interleaved stereo buffer (`L R L R ...`). A trailing
    /// odd sample is silenced.
    pub fn render_interleaved(&mut self, out: &mut [f32]) {
        self.process_commands();

        let mut peaks = [0.0f32; 2];
        let mut chunks = out.chunks_exact_mut(2);
        for pair in &mut chunks {
            let frame = self.core.render_frame();
            pair[0] = to_f32(frame.left);
            pair[1] = to_f32(frame.right);
            track_peaks(&mut peaks, pair[0], pair[1]);
        }
        chunks.into_remainder().fill(0.0);

        self.publish(peaks);
    }

    /// Render raw SPU frames
    pub fn render_frames(&mut self, out: &mut [StereoSample]) {
        self.process_commands();

        let mut peaks = [0.0f32; 2];
        for frame in out.iter_mut() {
            *frame = self.core.render_frame();
            track_peaks(&mut peaks, to_f32(frame.left), to_f32(frame.right));
        }

        self.publish(peaks);
    }

    /// The SPU core driven by this engine
    pub fn core(&self) -> &Core {
        &self.core
    }

    fn publish(&mut self, peaks: [f32; 2]) {
        let mut state = self.shared.state.lock();
        for (slot, status) in state.voices.iter_mut().enumerate() {
            *status = match (self.core.voice(slot), self.core.voice_info(slot)) {
                (Some(voice), Some(info)) if voice.is_active() => VoiceStatus {
                    active: true,
                    note: info.note,
                    velocity: info.velocity,
                    samples_active: info.samples_active,
                    phase: voice.phase(),
                },
                _ => VoiceStatus::default(),
            };
        }
        for (held, new) in state.peaks.iter_mut().zip(peaks) {
            *held = held.max(new);
        }
    }
}

fn apply_command(core: &mut Core, command: Command, retired: &mut Vec<Arc<SampleData>>) {
    match command {
        Command::NoteOn { note, velocity } => {
            core.note_on(note, velocity);
        }
        Command::NoteOff { note } => {
            core.note_off(note);
        }
        Command::PitchBend(value) => core.pitch_bend(value),
        Command::AllNotesOff => core.all_notes_off(),
        Command::KillAll => core.kill_all(),
        Command::SetParams(params) => {
            core.set_template(params.template());
            core.reapply_template();
        }
        Command::SetSample(sample) => {
            // Freed later by the idle task, never here
            if let Some(previous) = core.set_sample(sample) {
                retired.push(previous);
            }
        }
    }
}

#[inline]
fn to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

#[inline]
fn track_peaks(peaks: &mut [f32; 2], left: f32, right: f32) {
    peaks[0] = peaks[0].max(left.abs());
    peaks[1] = peaks[1].max(right.abs());
}
