use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum InterpolationError {
    #[error("at least one knot is required")]
    Empty,
    #[error("knot count mismatch: {xs} x values, {ys} y values")]
    LengthMismatch { xs: usize, ys: usize },
    #[error("knot x values must be strictly increasing (index {index})")]
    NotIncreasing { index: usize },
}

pub trait Interpolator {
    fn evaluate(&self, x: f64) -> f64;
}

/// Akima spline through a set of knots.
///
/// Two extra knots are extrapolated on each side so the end segments get
/// tangents of their own; a segment whose neighbouring slope differences
/// cancel falls back to a flat tangent.
#[derive(Debug, Clone)]
pub struct AkimaSpline {
    model: Model,
}

#[derive(Debug, Clone)]
enum Model {
    Constant(f64),
    Line { k: f64, b: f64 },
    Spline(SplineSegments),
}

#[derive(Debug, Clone)]
struct SplineSegments {
    x: Vec<f64>,
    y: Vec<f64>,
    t: Vec<f64>,
    c: Vec<f64>,
    d: Vec<f64>,
}

impl AkimaSpline {
    pub fn new(xs: &[f64], ys: &[f64]) -> Result<Self, InterpolationError> {
        if xs.len() != ys.len() {
            return Err(InterpolationError::LengthMismatch {
                xs: xs.len(),
                ys: ys.len(),
            });
        }
        if xs.is_empty() {
            return Err(InterpolationError::Empty);
        }
        if let Some(index) = xs.windows(2).position(|pair| pair[1] <= pair[0]) {
            return Err(InterpolationError::NotIncreasing { index: index + 1 });
        }

        let model = match xs.len() {
            1 => Model::Constant(ys[0]),
            2 => {
                let k = (ys[1] - ys[0]) / (xs[1] - xs[0]);
                Model::Line { k, b: ys[0] - k * xs[0] }
            }
            _ => Model::Spline(SplineSegments::fit(xs, ys)),
        };

        Ok(Self { model })
    }
}

impl Interpolator for AkimaSpline {
    fn evaluate(&self, x: f64) -> f64 {
        match &self.model {
            Model::Constant(value) => *value,
            Model::Line { k, b } => k * x + b,
            Model::Spline(segments) => segments.evaluate(x),
        }
    }
}

impl SplineSegments {
    fn fit(xs: &[f64], ys: &[f64]) -> Self {
        let n = xs.len() + 4;
        let mut x = vec![0.0; n];
        let mut y = vec![0.0; n];
        x[2..n - 2].copy_from_slice(xs);
        y[2..n - 2].copy_from_slice(ys);

        let mut dx = vec![0.0; n];
        let mut m = vec![0.0; n];

        for i in 2..n - 3 {
            dx[i] = x[i + 1] - x[i];
            m[i] = (y[i + 1] - y[i]) / dx[i];
        }

        // leading extrapolated knots
        x[1] = x[2] + x[3] - x[4];
        dx[1] = x[2] - x[1];
        y[1] = dx[1] * (m[3] - 2.0 * m[2]) + y[2];
        m[1] = (y[2] - y[1]) / dx[1];

        x[0] = 2.0 * x[2] - x[4];
        dx[0] = x[1] - x[0];
        y[0] = dx[0] * (m[2] - 2.0 * m[1]) + y[1];
        m[0] = (y[1] - y[0]) / dx[0];

        // trailing extrapolated knots
        x[n - 2] = x[n - 3] + x[n - 4] - x[n - 5];
        y[n - 2] = (2.0 * m[n - 4] - m[n - 5]) * (x[n - 2] - x[n - 3]) + y[n - 3];
        dx[n - 3] = x[n - 2] - x[n - 3];
        m[n - 3] = (y[n - 2] - y[n - 3]) / dx[n - 3];

        x[n - 1] = 2.0 * x[n - 3] - x[n - 5];
        y[n - 1] = (2.0 * m[n - 3] - m[n - 4]) * (x[n - 1] - x[n - 2]) + y[n - 2];
        dx[n - 2] = x[n - 1] - x[n - 2];
        m[n - 2] = (y[n - 1] - y[n - 2]) / dx[n - 2];

        let mut t = vec![0.0; n];
        for i in 2..n - 2 {
            let upper = (m[i + 1] - m[i]).abs();
            let lower = (m[i - 1] - m[i - 2]).abs();
            let den = upper + lower;
            t[i] = if den == 0.0 {
                0.0
            } else {
                (upper * m[i - 1] + lower * m[i]) / den
            };
        }

        let mut c = vec![0.0; n];
        let mut d = vec![0.0; n];
        for i in 2..n - 2 {
            c[i] = (3.0 * m[i] - 2.0 * t[i] - t[i + 1]) / dx[i];
            d[i] = (t[i] + t[i + 1] - 2.0 * m[i]) / (dx[i] * dx[i]);
        }

        Self { x, y, t, c, d }
    }

    fn evaluate(&self, x: f64) -> f64 {
        let n = self.x.len();
        let mut p = 3;
        while p < n - 2 && x > self.x[p] {
            p += 1;
        }
        let i = p - 1;
        let xd = x - self.x[i];
        self.y[i] + (self.t[i] + (self.c[i] + self.d[i] * xd) * xd) * xd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_knot_is_constant() {
        let spline = AkimaSpline::new(&[0.3], &[0.7]).expect("one knot should fit");
        assert_eq!(spline.evaluate(-4.0), 0.7);
        assert_eq!(spline.evaluate(12.0), 0.7);
    }

    #[test]
    fn two_knots_form_a_line() {
        let spline = AkimaSpline::new(&[0.0, 1.0], &[1.0, 3.0]).expect("two knots should fit");
        assert!((spline.evaluate(0.25) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn spline_passes_through_knots() {
        let xs = [0.0, 0.2, 0.45, 0.7, 1.0];
        let ys = [0.0, 0.8, 0.3, 0.9, 0.1];
        let spline = AkimaSpline::new(&xs, &ys).expect("knots should fit");
        for (x, y) in xs.iter().zip(ys) {
            assert!((spline.evaluate(*x) - y).abs() < 1e-9, "missed knot at {x}");
        }
    }

    #[test]
    fn flat_knots_use_flat_tangents() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys = [0.5; 4];
        let spline = AkimaSpline::new(&xs, &ys).expect("knots should fit");
        for x in [0.1, 1.5, 2.9] {
            assert!((spline.evaluate(x) - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn rejects_unsorted_knots() {
        let err = AkimaSpline::new(&[0.0, 0.5, 0.5], &[0.0, 1.0, 0.0])
            .expect_err("duplicate x should fail");
        assert_eq!(err, InterpolationError::NotIncreasing { index: 2 });
    }
}
