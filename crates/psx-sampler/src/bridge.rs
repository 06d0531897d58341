//! Control side of the sampler.
//!
//! UI and MIDI threads talk to the audio thread through [`SamplerHandle`].
//! Everything shared lives in one [`ControlState`] behind a single
//! `parking_lot::Mutex`:
//!
//! - a bounded command queue, drained by the engine once per render call
//! - the authoritative parameter set and sample
//! - the voice status snapshot and peak meters published by the engine
//! - samples retired by the engine, waiting to be dropped off the audio thread
//!
//! Commands are applied on the audio thread, so a handle call returns before
//! the change is audible. The audio thread locks the same mutex on every
//! render, so handle methods hold it only to copy or queue small values.
//! Encoding, decoding and logging happen after the guard is dropped.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use psx_spu::{parse_vag, write_vag, EnvelopePhase, SampleData, NUM_VOICES};

use crate::config::SamplerConfig;
use crate::params::{ParamId, Params};
use crate::state::{decode_state, encode_state};
use crate::{Result, SamplerError};

/// Work item for the audio thread
#[derive(Debug, Clone)]
pub(crate) enum Command {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    PitchBend(u16),
    AllNotesOff,
    KillAll,
    SetParams(Params),
    SetSample(Option<Arc<SampleData>>),
}

/// Published state of one voice slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoiceStatus {
    /// Voice is producing sound
    pub active: bool,
    /// Note being played
    pub note: u8,
    /// Velocity of the note-on
    pub velocity: u8,
    /// Output samples rendered since note-on
    pub samples_active: u32,
    /// Envelope phase
    pub phase: EnvelopePhase,
}

/// State shared between the control threads and the audio thread
pub(crate) struct ControlState {
    pub(crate) queue: VecDeque<Command>,
    capacity: usize,
    pub(crate) params: Params,
    pub(crate) sample: Option<Arc<SampleData>>,
    pub(crate) voices: [VoiceStatus; NUM_VOICES],
    pub(crate) peaks: [f32; 2],
    pub(crate) retired_samples: Vec<Arc<SampleData>>,
}

impl ControlState {
    fn new(capacity: usize) -> Self {
        ControlState {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            params: Params::default(),
            sample: None,
            voices: [VoiceStatus::default(); NUM_VOICES],
            peaks: [0.0; 2],
            retired_samples: Vec::new(),
        }
    }

    /// Queue a command. A parameter swap directly behind another one replaces
    /// it instead of taking a slot.
    pub(crate) fn push(&mut self, command: Command) -> Result<()> {
        if let Command::SetParams(params) = &command {
            if let Some(Command::SetParams(pending)) = self.queue.back_mut() {
                *pending = *params;
                return Ok(());
            }
        }
        self.ensure_room(1)?;
        self.queue.push_back(command);
        Ok(())
    }

    fn ensure_room(&self, count: usize) -> Result<()> {
        if self.queue.len() + count > self.capacity {
            return Err(SamplerError::QueueFull {
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// True if a note-off for `note` is waiting for the audio thread
    pub(crate) fn note_off_pending(&self, note: u8) -> bool {
        self.queue
            .iter()
            .any(|c| matches!(c, Command::NoteOff { note: queued } if *queued == note))
    }

    /// Queue a sample swap followed by the parameters that describe it
    fn push_sample(&mut self, sample: Option<Arc<SampleData>>, params: Params) -> Result<()> {
        self.ensure_room(2)?;
        // The engine parks every outgoing sample here; keep those pushes
        // allocation-free even with several swaps queued
        let queued_swaps = self
            .queue
            .iter()
            .filter(|c| matches!(c, Command::SetSample(_)))
            .count();
        self.retired_samples.reserve(queued_swaps + 1);
        self.queue.push_back(Command::SetSample(sample.clone()));
        self.queue.push_back(Command::SetParams(params));
        self.params = params;
        self.sample = sample;
        Ok(())
    }
}

/// The single guard around [`ControlState`]
pub(crate) struct Shared {
    pub(crate) state: Mutex<ControlState>,
}

impl Shared {
    pub(crate) fn new(config: &SamplerConfig) -> Self {
        Shared {
            state: Mutex::new(ControlState::new(config.command_queue_capacity)),
        }
    }
}

/// Cloneable control handle for UI and MIDI threads
#[derive(Clone)]
pub struct SamplerHandle {
    pub(crate) shared: Arc<Shared>,
    pub(crate) config: SamplerConfig,
}

impl SamplerHandle {
    pub(crate) fn new(shared: Arc<Shared>, config: SamplerConfig) -> Self {
        SamplerHandle { shared, config }
    }

    fn send(&self, command: Command) -> Result<()> {
        let result = self.shared.state.lock().push(command);
        if let Err(e) = &result {
            warn!("dropping sampler command: {e}");
        }
        result
    }

    // ========== MIDI ==========

    /// Queue a note-on. Velocity 0 is a note-off; notes outside the
    /// configured note range are ignored.
    pub fn note_on(&self, note: u8, velocity: u8) -> Result<()> {
        if velocity == 0 {
            return self.note_off(note);
        }
        let note = note.min(127);
        let mut state = self.shared.state.lock();
        if !state.params.note_in_range(note) {
            let range = state.params.note_range();
            drop(state);
            debug!("ignoring note {note} outside range {range:?}");
            return Ok(());
        }
        let result = state.push(Command::NoteOn {
            note,
            velocity: velocity.min(127),
        });
        drop(state);
        if let Err(e) = &result {
            warn!("dropping note-on {note}: {e}");
        }
        result
    }

    /// Queue a note-off for every voice playing `note`
    pub fn note_off(&self, note: u8) -> Result<()> {
        self.send(Command::NoteOff { note: note.min(127) })
    }

    /// Queue a 14-bit pitch bend (0x2000 = center)
    pub fn pitch_bend(&self, value: u16) -> Result<()> {
        self.send(Command::PitchBend(value.min(0x3FFF)))
    }

    /// Release every sounding voice
    pub fn all_notes_off(&self) -> Result<()> {
        self.send(Command::AllNotesOff)
    }

    /// Silence every voice immediately
    pub fn kill_all(&self) -> Result<()> {
        self.send(Command::KillAll)
    }

    // ========== Parameters ==========

    /// Set a parameter in native units. Returns the stored value after
    /// clamping. Sounding voices pick the change up without re-triggering.
    pub fn set_param(&self, id: ParamId, value: f64) -> Result<f64> {
        self.update_params(|params| params.set(id, value))
    }

    /// Set a parameter from a host value in `0.0..=1.0`
    pub fn set_param_normalized(&self, id: ParamId, normalized: f64) -> Result<f64> {
        self.update_params(|params| params.set_normalized(id, normalized))
    }

    /// Replace every parameter at once
    pub fn set_params(&self, params: Params) -> Result<()> {
        self.update_params(|current| *current = params)
    }

    fn update_params<T>(&self, change: impl FnOnce(&mut Params) -> T) -> Result<T> {
        let mut state = self.shared.state.lock();
        let mut params = state.params;
        let out = change(&mut params);
        state.push(Command::SetParams(params))?;
        state.params = params;
        Ok(out)
    }

    /// Current value of a parameter
    pub fn param(&self, id: ParamId) -> f64 {
        self.shared.state.lock().params.get(id)
    }

    /// Current parameter set
    pub fn params(&self) -> Params {
        self.shared.state.lock().params
    }

    // ========== Samples ==========

    /// Load a decoded sample. Updates the sample rate, length and loop
    /// parameters from it; sounding voices are cut.
    pub fn load_sample(&self, sample: SampleData) -> Result<()> {
        info!(
            "loading sample: {} samples at {} Hz, loop {:?}",
            sample.len(),
            sample.sample_rate(),
            sample.loop_region()
        );
        let sample = Arc::new(sample);
        let mut state = self.shared.state.lock();
        let mut params = state.params;
        params.apply_sample(&sample);
        state.push_sample(Some(sample), params)
    }

    /// Load a VAG file, returning the sample name stored in its header
    pub fn load_vag(&self, data: &[u8]) -> Result<String> {
        let vag = parse_vag(data)?;
        self.load_sample(vag.sample)?;
        Ok(vag.name)
    }

    /// Export the loaded sample as a VAG file, with the current sample rate
    /// and loop parameters. Returns `None` when no sample is loaded.
    pub fn save_vag(&self, name: &str) -> Option<Vec<u8>> {
        let (sample, params) = self.snapshot();
        let template = params.template();
        let export = SampleData::from_pcm(sample?.pcm().to_vec(), template.sample_rate)
            .with_loop(template.loop_start, template.loop_end);
        let data = write_vag(name, &export);
        debug!("exported {} samples as {} VAG bytes", export.len(), data.len());
        Some(data)
    }

    /// Sample currently loaded
    pub fn sample(&self) -> Option<Arc<SampleData>> {
        self.shared.state.lock().sample.clone()
    }

    fn snapshot(&self) -> (Option<Arc<SampleData>>, Params) {
        let state = self.shared.state.lock();
        (state.sample.clone(), state.params)
    }

    // ========== State ==========

    /// Encode parameters and sample into a state blob
    pub fn serialize(&self) -> Vec<u8> {
        let (sample, params) = self.snapshot();
        encode_state(&params, sample.as_deref())
    }

    /// Restore a state blob. On error nothing changes.
    pub fn deserialize(&self, data: &[u8]) -> Result<()> {
        let (params, sample) = decode_state(data).map_err(|e| {
            warn!("rejecting sampler state: {e}");
            e
        })?;
        debug!(
            "restoring state with {} sample",
            if sample.is_some() { "a" } else { "no" }
        );
        self.shared
            .state
            .lock()
            .push_sample(sample.map(Arc::new), params)
    }

    // ========== Readback ==========

    /// Voice status published by the last render call
    pub fn voice_status(&self) -> [VoiceStatus; NUM_VOICES] {
        self.shared.state.lock().voices
    }

    /// Number of sounding voices as of the last render call
    pub fn active_voice_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .voices
            .iter()
            .filter(|v| v.active)
            .count()
    }

    /// Commands waiting for the next render call
    pub fn pending_commands(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Configuration the sampler was created with
    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(capacity: usize) -> SamplerHandle {
        let config = SamplerConfig {
            command_queue_capacity: capacity,
            ..SamplerConfig::default()
        };
        SamplerHandle::new(Arc::new(Shared::new(&config)), config)
    }

    #[test]
    fn test_queue_is_bounded() {
        let handle = handle(4);
        for note in 0..4 {
            handle.note_on(60 + note, 100).unwrap();
        }
        assert!(matches!(
            handle.note_on(70, 100),
            Err(SamplerError::QueueFull { capacity: 4 })
        ));
        assert_eq!(handle.pending_commands(), 4);
    }

    #[test]
    fn test_param_swaps_are_coalesced() {
        let handle = handle(4);
        for value in 0..100 {
            handle.set_param(ParamId::Volume, value as f64).unwrap();
        }
        assert_eq!(handle.pending_commands(), 1);
        assert_eq!(handle.param(ParamId::Volume), 99.0);

        // Not coalesced across other commands
        handle.note_on(60, 1).unwrap();
        handle.set_param(ParamId::Pan, 0.0).unwrap();
        assert_eq!(handle.pending_commands(), 3);
    }

    #[test]
    fn test_failed_param_change_leaves_params() {
        let handle = handle(1);
        handle.note_on(60, 100).unwrap();
        assert!(handle.set_param(ParamId::Volume, 3.0).is_err());
        assert_eq!(handle.param(ParamId::Volume), 127.0);
    }

    #[test]
    fn test_velocity_zero_is_note_off() {
        let handle = handle(4);
        handle.note_on(60, 0).unwrap();
        let state = handle.shared.state.lock();
        assert!(matches!(state.queue.front(), Some(Command::NoteOff { note: 60 })));
    }

    #[test]
    fn test_notes_outside_range_are_ignored() {
        let handle = handle(8);
        handle.set_param(ParamId::NoteMin, 48.0).unwrap();
        handle.set_param(ParamId::NoteMax, 72.0).unwrap();
        handle.note_on(40, 100).unwrap();
        handle.note_on(80, 100).unwrap();
        assert_eq!(handle.pending_commands(), 1);
        handle.note_on(60, 100).unwrap();
        assert_eq!(handle.pending_commands(), 2);
    }

    #[test]
    fn test_load_sample_updates_params() {
        let handle = handle(8);
        let sample = SampleData::from_pcm(vec![0; 56], 22_050).with_loop(28, 56);
        handle.load_sample(sample).unwrap();
        assert_eq!(handle.param(ParamId::LengthInBlocks), 2.0);
        assert_eq!(handle.param(ParamId::LoopStartSample), 28.0);
        assert_eq!(handle.param(ParamId::BaseNote), 72.0);
        assert_eq!(handle.pending_commands(), 2);
        assert!(handle.sample().is_some());
    }

    #[test]
    fn test_bad_state_leaves_everything_untouched() {
        let handle = handle(8);
        handle.set_param(ParamId::DecayShift, 5.0).unwrap();
        let before = handle.serialize();
        let pending = handle.pending_commands();

        assert!(handle.deserialize(&before[..10]).is_err());
        assert!(handle.deserialize(b"garbage").is_err());
        assert_eq!(handle.serialize(), before);
        assert_eq!(handle.pending_commands(), pending);
    }

    #[test]
    fn test_serialize_shares_the_loaded_sample() {
        let handle = handle(8);
        handle
            .load_sample(SampleData::from_pcm(vec![7; 1 << 20], 44_100))
            .unwrap();
        let (sample, _) = handle.snapshot();
        let sample = sample.unwrap();

        let blob = handle.serialize();
        assert!(blob.len() > 2 * (1 << 20));
        assert!(Arc::ptr_eq(&sample, &handle.sample().unwrap()));
    }

    #[test]
    fn test_queued_swaps_reserve_retired_capacity() {
        let handle = handle(8);
        for len in 1..=3 {
            handle
                .load_sample(SampleData::from_pcm(vec![0; len], 44_100))
                .unwrap();
        }
        assert!(handle.shared.state.lock().retired_samples.capacity() >= 3);
    }

    #[test]
    fn test_save_vag_uses_current_loop_params() {
        let handle = handle(8);
        assert!(handle.save_vag("none").is_none());

        let sample = SampleData::from_pcm(vec![0; 84], 22_050).with_loop(56, 84);
        handle.load_sample(sample).unwrap();
        handle.set_param(ParamId::LoopStartSample, 28.0).unwrap();

        let file = parse_vag(&handle.save_vag("lead").unwrap()).unwrap();
        assert_eq!(file.name, "lead");
        assert_eq!(file.sample.sample_rate(), 22_050);
        assert_eq!(
            file.sample.loop_region().map(|r| (r.start, r.end)),
            Some((28, 84))
        );
    }
}
