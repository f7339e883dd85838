use std::sync::Arc;

use proptest::prelude::*;
use soundmap_core::{
    envelope::Envelope,
    model::StereoValue,
    note::{NotePoint, Voice},
};

const FREQUENCY: f64 = 110.0;

fn voice(points: Vec<NotePoint>) -> Voice {
    Voice {
        points: Arc::from(points),
        envelope: Envelope::default(),
        volume: 1.0,
    }
}

fn close(left: StereoValue, right: StereoValue) -> bool {
    (left.left - right.left).abs() < 1e-9 && (left.right - right.right).abs() < 1e-9
}

#[test]
fn two_loud_points_are_scaled_by_their_volume_sum() {
    let pair = voice(vec![
        NotePoint::sine(FREQUENCY, 0.8),
        NotePoint::sine(FREQUENCY, 0.8),
    ]);
    let single = voice(vec![NotePoint::sine(FREQUENCY, 1.0)]);
    for step in 0..64 {
        let time = f64::from(step) / 997.0;
        let expected = single.mix(time);
        let mixed = pair.mix(time);
        assert!(close(mixed, expected), "{mixed:?} != {expected:?} at {time}");
    }
}

#[test]
fn quiet_sets_are_not_amplified() {
    let pair = voice(vec![
        NotePoint::sine(FREQUENCY, 0.25),
        NotePoint::sine(FREQUENCY, 0.25),
    ]);
    let single = voice(vec![NotePoint::sine(FREQUENCY, 0.5)]);
    assert!(close(pair.mix(0.0013), single.mix(0.0013)));
}

#[test]
fn muted_solo_points_do_not_take_over() {
    let mut soloed = NotePoint::sine(FREQUENCY * 2.0, 0.9);
    soloed.solo = true;
    soloed.mute = true;
    let plain = NotePoint::sine(FREQUENCY, 0.4);
    let mixed = voice(vec![soloed, plain.clone()]);
    let reference = voice(vec![plain]);
    assert!(mixed.solo_point().is_none());
    assert!(close(mixed.mix(0.0021), reference.mix(0.0021)));
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn mix_is_normalized_only_above_unit_volume(
        volumes in prop::collection::vec(0.0_f64..=1.0, 1..8),
        time in 0.0_f64..1.0,
    ) {
        let total: f64 = volumes.iter().sum();
        let mixed = voice(
            volumes
                .iter()
                .map(|volume| NotePoint::sine(FREQUENCY, *volume))
                .collect(),
        );
        let unit = voice(vec![NotePoint::sine(FREQUENCY, 1.0)]).mix(time);
        let expected = unit * (total / total.max(1.0));
        prop_assert!(close(mixed.mix(time), expected));
    }

    #[test]
    fn solo_point_replaces_the_whole_mix(
        volumes in prop::collection::vec(0.0_f64..=1.0, 2..8),
        solo_seed in any::<prop::sample::Index>(),
        time in 0.0_f64..1.0,
    ) {
        let solo = solo_seed.index(volumes.len());
        let points: Vec<NotePoint> = volumes
            .iter()
            .enumerate()
            .map(|(index, volume)| {
                let mut point = NotePoint::sine(FREQUENCY * (index + 1) as f64, *volume);
                point.solo = index == solo;
                point
            })
            .collect();
        let mut alone = points[solo].clone();
        alone.solo = false;

        let mixed = voice(points).mix(time);
        let expected = voice(vec![alone]).mix(time);
        prop_assert!(close(mixed, expected));
    }
}
