//! Benchmarks for the SPU render hot path
//!
//! Run with: cargo bench --bench mixdown -p psx-spu

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use std::sync::Arc;

use psx_spu::{Core, SampleData, StereoSample, VoiceTemplate, NUM_VOICES};

fn looping_core() -> Core {
    let pcm: Vec<i16> = (0..22_050).map(|i| ((i * 97) % 30_000) as i16 - 15_000).collect();
    let mut core = Core::new();
    core.set_sample(Some(Arc::new(SampleData::from_pcm(pcm, 22_050))));
    core.set_template(VoiceTemplate {
        base_note: 72.0,
        loop_start: 1_000,
        loop_end: 22_050,
        ..VoiceTemplate::default()
    });
    core
}

fn bench_render_voices(c: &mut Criterion) {
    let mut group = c.benchmark_group("render_512");

    for voices in [1usize, 8, NUM_VOICES].iter() {
        let mut core = looping_core();
        for n in 0..*voices {
            core.note_on(48 + n as u8, 100);
        }
        let mut frames = vec![StereoSample::default(); 512];

        group.bench_with_input(BenchmarkId::from_parameter(voices), voices, |b, _| {
            b.iter(|| {
                core.render(&mut frames);
                black_box(&frames);
            });
        });
    }

    group.finish();
}

fn bench_note_churn(c: &mut Criterion) {
    c.bench_function("note_on_steal", |b| {
        let mut core = looping_core();
        for n in 0..NUM_VOICES {
            core.note_on(40 + n as u8, 100);
        }
        let mut note = 0u8;
        b.iter(|| {
            note = note.wrapping_add(1) % 128;
            black_box(core.note_on(note, 90));
            black_box(core.render_frame());
        });
    });
}

criterion_group!(benches, bench_render_voices, bench_note_churn);
criterion_main!(benches);
