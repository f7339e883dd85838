use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use soundmap_core::{
    envelope::EnvelopePreset,
    mixer::Mixer,
    model::{SoundPoint, SoundPointPatch},
    note::NoteKey,
    render::{EngineConfig, EngineKind, RenderFormat},
};

const BLOCK_SAMPLES: usize = 256;

#[test]
fn control_thread_and_render_thread_interleave() {
    let mixer = Mixer::new("concurrency");
    for (frequency, volume) in [(110.0, 0.5), (220.0, 0.4), (330.0, 0.3)] {
        mixer
            .add_point(SoundPoint::new(frequency, volume))
            .expect("point should be accepted");
    }
    mixer.set_envelope_preset(EnvelopePreset::Fast);
    mixer
        .start_playback_with(
            RenderFormat::stereo(16_000),
            &EngineConfig {
                worker_threads: 2,
                partition_frames: 32,
                ..EngineConfig::with_kind(EngineKind::Parallel)
            },
        )
        .expect("parallel playback should start");

    let rendering = AtomicBool::new(true);
    thread::scope(|scope| {
        scope.spawn(|| {
            let mut block = vec![0.0_f32; BLOCK_SAMPLES];
            while rendering.load(Ordering::Acquire) {
                mixer
                    .read(&mut block, 0, BLOCK_SAMPLES)
                    .expect("render pass should succeed");
                assert!(block.iter().all(|sample| sample.is_finite()));
            }
        });

        let first_point = mixer.points()[0].id;
        for round in 0..200_u32 {
            let key = NoteKey::Keyboard(round % 12);
            mixer
                .note_on(key, 1.0 + f64::from(round % 12) / 12.0, 0.7)
                .expect("note_on should succeed");
            if round % 3 == 0 {
                mixer
                    .patch_point(
                        first_point,
                        &SoundPointPatch {
                            volume: Some(f64::from(round % 10) / 10.0),
                            ..SoundPointPatch::default()
                        },
                    )
                    .expect("patch should apply");
            }
            mixer.note_off(&key);
        }
        rendering.store(false, Ordering::Release);
    });

    let mut block = vec![0.0_f32; BLOCK_SAMPLES];
    for _ in 0..64 {
        mixer
            .read(&mut block, 0, BLOCK_SAMPLES)
            .expect("render pass should succeed");
    }
    assert_eq!(mixer.active_notes(), 0, "every released note should retire");
    assert_eq!(mixer.status().engine.as_deref(), Some("Multithread"));
}
