use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use soundmap_core::{
    metrics::MixerStatus,
    mixer::Mixer,
    model::SoundPoint,
    note::NoteKey,
    recorder::{MemoryRecorder, RecordingSink, WavRecorder},
    render::{RenderFormat, SequentialEngine},
};

const SAMPLE_RATE: u32 = 8_000;
const BLOCK_SAMPLES: usize = 160;

fn playing_mixer() -> Mixer {
    let mixer = Mixer::new("recording");
    mixer
        .add_point(SoundPoint::new(200.0, 0.6))
        .expect("point should be accepted");
    mixer
        .start_playback(
            RenderFormat::stereo(SAMPLE_RATE),
            Box::new(SequentialEngine::default()),
        )
        .expect("playback should start");
    mixer
        .note_on(NoteKey::Midi(60), 1.0, 1.0)
        .expect("note_on should succeed");
    mixer
}

fn render(mixer: &Mixer, blocks: usize) -> Vec<f32> {
    let mut output = vec![0.0_f32; blocks * BLOCK_SAMPLES];
    for block in 0..blocks {
        mixer
            .read(&mut output, block * BLOCK_SAMPLES, BLOCK_SAMPLES)
            .expect("read should succeed");
    }
    output
}

#[test]
fn memory_recorder_captures_exactly_what_was_rendered() {
    let mixer = playing_mixer();
    let sink = Arc::new(MemoryRecorder::default());
    mixer.start_recording(Arc::clone(&sink) as Arc<dyn RecordingSink>);
    assert!(mixer.status().recording);

    let rendered = render(&mixer, 6);
    assert!(mixer.stop_recording().is_some());
    render(&mixer, 2);

    assert_eq!(sink.samples(), rendered);
    assert!(!mixer.status().recording);
}

#[test]
fn wav_recorder_round_trips_through_the_mixer() {
    let temp = tempfile::tempdir().expect("tempdir should be creatable");
    let path = temp.path().join("takes").join("session.wav");
    let mixer = playing_mixer();
    let recorder = Arc::new(
        WavRecorder::create(&path, RenderFormat::stereo(SAMPLE_RATE), 32)
            .expect("recorder should start"),
    );
    mixer.start_recording(Arc::clone(&recorder) as Arc<dyn RecordingSink>);

    let rendered = render(&mixer, 10);
    mixer.stop_recording();
    let summary = recorder.finish().expect("recording should finish");
    assert_eq!(summary.samples_written, rendered.len() as u64);
    assert_eq!(summary.dropped_blocks, 0);

    let reader = hound::WavReader::open(&path).expect("wav should open");
    assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
    assert_eq!(reader.spec().channels, 2);
    let samples: Vec<f32> = reader
        .into_samples::<f32>()
        .collect::<Result<_, _>>()
        .expect("samples should decode");
    assert_eq!(samples, rendered);
}

#[test]
fn observers_see_every_render_pass() {
    let mixer = playing_mixer();
    let passes = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&passes);
    mixer.add_observer(Arc::new(move |status: &MixerStatus| {
        assert_eq!(status.engine.as_deref(), Some("Singlethread"));
        seen.fetch_add(1, Ordering::Relaxed);
    }));

    render(&mixer, 5);
    assert_eq!(passes.load(Ordering::Relaxed), 5);

    let status = mixer.status();
    assert!(status.peaks.left > 0.0 && status.peaks.right > 0.0);
    assert!((status.buffer_ms - 10.0).abs() < 1e-9);
    assert!(status.to_string().starts_with("recording [Singlethread], load: "));
}
