use soundmap_core::{
    envelope::EnvelopePreset,
    mixer::{Mixer, NoteSource},
    model::{SoundPoint, SoundPointPatch},
    note::{NoteKey, NotePhase},
    render::{RenderFormat, SequentialEngine},
};

const SAMPLE_RATE: u32 = 8_000;
const BLOCK_SAMPLES: usize = 128;

fn mixer_with_point() -> Mixer {
    let mixer = Mixer::new("lifecycle");
    mixer
        .add_point(SoundPoint::new(220.0, 0.5))
        .expect("point should be accepted");
    mixer
        .start_playback(
            RenderFormat::stereo(SAMPLE_RATE),
            Box::new(SequentialEngine::default()),
        )
        .expect("playback should start");
    mixer
}

fn read_block(mixer: &Mixer) -> Vec<f32> {
    let mut block = vec![0.0_f32; BLOCK_SAMPLES];
    mixer
        .read(&mut block, 0, BLOCK_SAMPLES)
        .expect("read should succeed");
    block
}

fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0_f32, |peak, sample| peak.max(sample.abs()))
}

#[test]
fn immediate_note_on_note_off_terminates() {
    let mixer = mixer_with_point();
    mixer.set_envelope_preset(EnvelopePreset::Fast);
    assert!(
        mixer
            .note_on(NoteKey::Midi(69), 1.0, 1.0)
            .expect("note_on should succeed")
    );
    assert!(mixer.note_off(&NoteKey::Midi(69)));

    for _ in 0..12 {
        read_block(&mixer);
    }
    assert_eq!(mixer.active_notes(), 0, "released note should be pruned");
    assert_eq!(peak(&read_block(&mixer)), 0.0);
}

#[test]
fn phases_advance_once_per_pass() {
    let mixer = mixer_with_point();
    mixer.set_envelope_preset(EnvelopePreset::SlowPiano);
    mixer
        .note_on(NoteKey::Keyboard(1), 1.0, 0.8)
        .expect("note_on should succeed");
    assert_eq!(
        mixer.note_phases(),
        vec![(NoteKey::Keyboard(1), NotePhase::Init)]
    );

    read_block(&mixer);
    assert_eq!(mixer.note_phases()[0].1, NotePhase::Playing);

    mixer.note_off(&NoteKey::Keyboard(1));
    read_block(&mixer);
    assert_eq!(mixer.note_phases()[0].1, NotePhase::Stopping);
    assert!(
        !mixer.note_off(&NoteKey::Keyboard(1)),
        "a stopping note should not accept another note-off"
    );
}

#[test]
fn repeated_keys_release_oldest_first() {
    let mixer = mixer_with_point();
    mixer.set_envelope_preset(EnvelopePreset::Tube);
    for _ in 0..2 {
        mixer
            .note_on(NoteKey::Custom(7), 1.0, 1.0)
            .expect("note_on should succeed");
    }
    read_block(&mixer);

    assert!(mixer.note_off(&NoteKey::Custom(7)));
    read_block(&mixer);
    let phases: Vec<NotePhase> = mixer.note_phases().into_iter().map(|(_, phase)| phase).collect();
    assert_eq!(phases, vec![NotePhase::Stopping, NotePhase::Playing]);
}

#[test]
fn panic_silences_everything() {
    let mixer = mixer_with_point();
    mixer.set_envelope_preset(EnvelopePreset::Tube);
    mixer
        .note_on(NoteKey::Midi(60), 1.0, 1.0)
        .expect("note_on should succeed");
    read_block(&mixer);
    mixer.panic();
    assert_eq!(mixer.active_notes(), 0);
    assert_eq!(peak(&read_block(&mixer)), 0.0);
}

#[test]
fn drone_follows_live_point_edits() {
    let mixer = mixer_with_point();
    mixer.set_note_source(NoteSource::Drone);
    assert!(
        !mixer
            .note_on(NoteKey::Midi(60), 1.0, 1.0)
            .expect("note_on should not fail in drone mode"),
        "keyboard notes are ignored while droning"
    );

    for _ in 0..4 {
        read_block(&mixer);
    }
    assert_eq!(mixer.note_phases(), vec![(NoteKey::Drone, NotePhase::Playing)]);
    assert!(peak(&read_block(&mixer)) > 0.1, "drone should be audible");

    let id = mixer.points()[0].id;
    mixer
        .patch_point(
            id,
            &SoundPointPatch {
                mute: Some(true),
                ..SoundPointPatch::default()
            },
        )
        .expect("patch should apply");
    assert_eq!(peak(&read_block(&mixer)), 0.0, "muted drone should be silent");
    assert_eq!(mixer.active_notes(), 1);
}

#[test]
fn drone_keeps_sounding_under_a_decaying_template() {
    let mixer = mixer_with_point();
    mixer.set_envelope_preset(EnvelopePreset::Piano);
    mixer.set_note_source(NoteSource::Drone);

    // 0.1 s per block at 8 kHz stereo, held for seven seconds.
    let mut block = vec![0.0_f32; SAMPLE_RATE as usize / 5];
    let block_len = block.len();
    for _ in 0..70 {
        mixer
            .read(&mut block, 0, block_len)
            .expect("read should succeed");
    }
    assert_eq!(mixer.note_phases(), vec![(NoteKey::Drone, NotePhase::Playing)]);
    assert!(
        peak(&block) > 0.4,
        "drone faded to {} after seven seconds",
        peak(&block)
    );
}

#[test]
fn switching_source_clears_notes() {
    let mixer = mixer_with_point();
    mixer
        .note_on(NoteKey::Keyboard(3), 1.0, 1.0)
        .expect("note_on should succeed");
    mixer.set_note_source(NoteSource::None);
    assert_eq!(mixer.active_notes(), 0);
    assert_eq!(peak(&read_block(&mixer)), 0.0);
}
