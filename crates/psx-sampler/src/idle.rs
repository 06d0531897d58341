//! Idle-time housekeeping, run from the UI thread.

use log::{debug, warn};

use psx_spu::EnvelopePhase;

use crate::bridge::{Command, SamplerHandle, VoiceStatus};

/// Result of one idle pass
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IdleReport {
    /// Left/right peak level since the previous pass, 0.0..=1.0
    pub peaks: [f32; 2],
    /// Voices sounding as of the last render call
    pub active_voices: usize,
    /// Notes released by this pass
    pub released_notes: Vec<u8>,
}

impl SamplerHandle {
    /// Collect meters and clean up.
    ///
    /// Takes the peaks accumulated since the last call, releases notes held
    /// past `max_note_hold_secs` or outside the note range, and drops samples
    /// the audio thread has swapped out.
    ///
    /// Note-off releases every voice on a note, so a stale voice is left
    /// alone while a newer voice on the same note is still within the hold
    /// limit. Notes that already have a note-off queued are skipped, so
    /// repeated passes without a render never grow the queue.
    pub fn on_idle(&self) -> IdleReport {
        let hold_limit = self.config.max_note_hold_samples();
        let is_stale =
            |status: &VoiceStatus| hold_limit.is_some_and(|limit| status.samples_active >= limit);

        let (report, dropped, retired) = {
            let mut state = self.shared.state.lock();
            let peaks = std::mem::take(&mut state.peaks);
            let params = state.params;
            let voices = state.voices;
            let active_voices = voices.iter().filter(|v| v.active).count();
            let held = || {
                voices
                    .iter()
                    .filter(|v| v.active && v.phase != EnvelopePhase::Release)
            };

            let mut candidates = Vec::new();
            for status in held() {
                let note = status.note;
                let release = !params.note_in_range(note)
                    || (is_stale(status)
                        && !held().any(|other| other.note == note && !is_stale(other)));
                if release && !candidates.contains(&note) && !state.note_off_pending(note) {
                    candidates.push(note);
                }
            }

            let mut released_notes = Vec::with_capacity(candidates.len());
            let mut dropped = Vec::new();
            for note in candidates {
                match state.push(Command::NoteOff { note }) {
                    Ok(()) => released_notes.push(note),
                    Err(e) => dropped.push((note, e)),
                }
            }

            // Drain rather than take so the engine keeps its reserved capacity
            let retired: Vec<_> = state.retired_samples.drain(..).collect();
            (
                IdleReport {
                    peaks,
                    active_voices,
                    released_notes,
                },
                dropped,
                retired,
            )
        };

        for (note, e) in dropped {
            warn!("idle note-off for {note} not queued: {e}");
        }
        if !report.released_notes.is_empty() {
            debug!("idle released notes {:?}", report.released_notes);
        }
        if !retired.is_empty() {
            debug!("dropping {} retired sample(s)", retired.len());
        }
        drop(retired);
        report
    }
}

#[cfg(test)]
mod tests {
    use crate::{create_sampler, ParamId, SamplerConfig};
    use psx_spu::SampleData;

    #[test]
    fn test_peaks_are_taken() {
        let (handle, mut engine) = create_sampler(SamplerConfig::default()).unwrap();
        handle
            .load_sample(SampleData::from_pcm(vec![16_000; 4096], 44_100))
            .unwrap();
        handle.note_on(60, 127).unwrap();

        let mut buffer = [0.0f32; 256];
        engine.render_interleaved(&mut buffer);

        let report = handle.on_idle();
        assert!(report.peaks[0] > 0.1 && report.peaks[0] <= 1.0);
        assert_eq!(report.active_voices, 1);
        assert!(report.released_notes.is_empty());
        assert_eq!(handle.on_idle().peaks, [0.0, 0.0]);
    }

    #[test]
    fn test_out_of_range_notes_are_released() {
        let (handle, mut engine) = create_sampler(SamplerConfig::default()).unwrap();
        handle
            .load_sample(SampleData::from_pcm(vec![1_000; 4096], 44_100))
            .unwrap();
        handle.note_on(30, 100).unwrap();
        handle.note_on(60, 100).unwrap();
        let mut buffer = [0.0f32; 64];
        engine.render_interleaved(&mut buffer);

        handle.set_param(ParamId::NoteMin, 48.0).unwrap();
        let report = handle.on_idle();
        assert_eq!(report.released_notes, vec![30]);

        engine.render_interleaved(&mut buffer);
        assert!(handle.on_idle().released_notes.is_empty());
    }

    #[test]
    fn test_idle_without_render_queues_one_note_off() {
        let config = SamplerConfig {
            command_queue_capacity: 64,
            ..SamplerConfig::default()
        };
        let (handle, mut engine) = create_sampler(config).unwrap();
        handle
            .load_sample(SampleData::from_pcm(vec![1_000; 4096], 44_100))
            .unwrap();
        handle.note_on(30, 100).unwrap();
        let mut buffer = [0.0f32; 64];
        engine.render_interleaved(&mut buffer);

        handle.set_param(ParamId::NoteMin, 48.0).unwrap();
        assert_eq!(handle.on_idle().released_notes, vec![30]);
        for _ in 0..100 {
            assert!(handle.on_idle().released_notes.is_empty());
        }
        assert_eq!(handle.pending_commands(), 2);
        assert_eq!(handle.set_param(ParamId::Volume, 10.0).unwrap(), 10.0);
    }

    #[test]
    fn test_stale_note_kept_while_newer_voice_is_held() {
        let config = SamplerConfig {
            max_note_hold_secs: 0.01,
            ..SamplerConfig::default()
        };
        let (handle, mut engine) = create_sampler(config).unwrap();
        handle
            .load_sample(SampleData::from_pcm(vec![1_000; 1 << 16], 44_100).with_loop(0, 1 << 16))
            .unwrap();
        handle.note_on(60, 100).unwrap();
        let mut buffer = [0.0f32; 2 * 512];
        engine.render_interleaved(&mut buffer);

        // Retrigger: the first voice is past the limit, the second is fresh
        handle.note_on(60, 100).unwrap();
        engine.render_interleaved(&mut buffer[..2]);
        assert_eq!(handle.active_voice_count(), 2);
        assert!(handle.on_idle().released_notes.is_empty());

        engine.render_interleaved(&mut buffer);
        assert_eq!(handle.on_idle().released_notes, vec![60]);
    }

    #[test]
    fn test_retired_capacity_survives_idle() {
        let (handle, mut engine) = create_sampler(SamplerConfig::default()).unwrap();
        for len in 1..=3 {
            handle
                .load_sample(SampleData::from_pcm(vec![0; len], 44_100))
                .unwrap();
        }
        let mut buffer = [0.0f32; 2];
        engine.render_interleaved(&mut buffer);
        assert_eq!(handle.shared.state.lock().retired_samples.len(), 2);

        handle.on_idle();
        let state = handle.shared.state.lock();
        assert!(state.retired_samples.is_empty());
        assert!(state.retired_samples.capacity() >= 3);
    }
}
