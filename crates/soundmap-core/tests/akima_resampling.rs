use proptest::prelude::*;
use soundmap_core::{
    control_points::{ControlPoint, ControlPoints},
    interpolator::{AkimaSpline, InterpolationError, Interpolator},
};

fn knots() -> impl Strategy<Value = (Vec<f64>, Vec<f64>)> {
    prop::collection::vec((0.01_f64..1.0, -1.0_f64..1.0), 1..24).prop_map(|steps| {
        let mut x = 0.0;
        let (xs, ys): (Vec<f64>, Vec<f64>) = steps
            .into_iter()
            .map(|(dx, y)| {
                x += dx;
                (x, y)
            })
            .unzip();
        (xs, ys)
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn spline_reproduces_every_knot((xs, ys) in knots()) {
        let spline = AkimaSpline::new(&xs, &ys).expect("increasing knots should fit");
        for (x, y) in xs.iter().zip(&ys) {
            let value = spline.evaluate(*x);
            prop_assert!((value - y).abs() < 1e-9, "spline({}) = {}, knot {}", x, value, y);
        }
    }

    #[test]
    fn resampled_drawing_passes_through_its_points(
        ys in prop::collection::vec(0.0_f64..=1.0, 2..16),
    ) {
        let count = ys.len();
        let drawing = ControlPoints::new(
            ys.iter()
                .enumerate()
                .map(|(index, y)| ControlPoint::new(index as f64 / count as f64, *y)),
        );
        // count * 4 + 1 samples put a sample exactly on every drawn x
        let samples = drawing
            .resample(0.0, 1.0, 0.0, 1.0, count * 4 + 1)
            .expect("resampling should succeed");
        for (index, y) in ys.iter().enumerate() {
            let sample = samples[index * 4];
            prop_assert!((sample.y - y).abs() < 1e-9, "point {} drifted to {}", index, sample.y);
        }
        prop_assert!((samples[0].y - samples[count * 4].y).abs() < 1e-9, "period should close");
    }
}

#[test]
fn mismatched_knot_lists_are_rejected() {
    let err = AkimaSpline::new(&[0.0, 1.0], &[0.0]).expect_err("lengths differ");
    assert_eq!(err, InterpolationError::LengthMismatch { xs: 2, ys: 1 });
    assert_eq!(
        AkimaSpline::new(&[], &[]).expect_err("no knots"),
        InterpolationError::Empty
    );
}

#[test]
fn resampled_sine_drawing_tracks_the_sine() {
    let samples = ControlPoints::sine(24)
        .resample(0.0, 1.0, -1.0, 1.0, 200)
        .expect("resampling should succeed");
    for point in samples {
        let expected = (std::f64::consts::TAU * point.x).sin();
        assert!(
            (point.y - expected).abs() < 0.01,
            "at {} got {}, expected {expected}",
            point.x,
            point.y
        );
    }
}
