use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::interpolator::{AkimaSpline, InterpolationError, Interpolator};

/// Copies of the period added on each side before fitting, so the spline
/// is periodic across the 0/1 seam.
const PERIODIC_EXTRA: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ControlPoint {
    pub x: f64,
    pub y: f64,
}

impl ControlPoint {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Sparse drawing of one waveform period.
///
/// `x` covers one period in `[0, 1)` and `y` runs from 0 (bottom of the
/// drawing) to 1 (top). Points are kept sorted with unique `x`; an `x` of
/// exactly 1 wraps onto 0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "Vec<ControlPoint>", into = "Vec<ControlPoint>")]
pub struct ControlPoints {
    points: Vec<ControlPoint>,
}

impl Default for ControlPoints {
    fn default() -> Self {
        Self::reset()
    }
}

impl From<Vec<ControlPoint>> for ControlPoints {
    fn from(points: Vec<ControlPoint>) -> Self {
        Self::new(points)
    }
}

impl From<ControlPoints> for Vec<ControlPoint> {
    fn from(points: ControlPoints) -> Self {
        points.points
    }
}

impl ControlPoints {
    #[must_use]
    pub fn new(points: impl IntoIterator<Item = ControlPoint>) -> Self {
        let mut points: Vec<ControlPoint> = points
            .into_iter()
            .filter(|point| point.x.is_finite() && point.y.is_finite())
            .map(|point| ControlPoint::new(wrap_period(point.x), point.y.clamp(0.0, 1.0)))
            .collect();
        points.sort_by(|a, b| a.x.total_cmp(&b.x));
        // keep the most recently drawn point when two share an x
        points.reverse();
        points.dedup_by(|later, earlier| later.x == earlier.x);
        points.reverse();
        Self { points }
    }

    /// A single centred point: a flat, silent period.
    #[must_use]
    pub fn reset() -> Self {
        Self {
            points: vec![ControlPoint::new(0.0, 0.5)],
        }
    }

    /// One sine period sampled at `count` evenly spaced points.
    #[must_use]
    pub fn sine(count: usize) -> Self {
        let count = count.max(1);
        Self::new((0..count).map(|i| {
            let x = i as f64 / count as f64;
            ControlPoint::new(x, 0.5 + 0.5 * (TAU * x).sin())
        }))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ControlPoint] {
        &self.points
    }

    /// Repeats the period `extra` times on both sides, shifting `x` by whole
    /// periods.
    #[must_use]
    pub fn periodic_extension(&self, extra: usize) -> Vec<ControlPoint> {
        let count = self.points.len();
        if count == 0 {
            return Vec::new();
        }

        let mut extended = Vec::with_capacity(count + 2 * extra);
        for offset in -(extra as isize)..(count + extra) as isize {
            let index = offset.rem_euclid(count as isize) as usize;
            let period = offset.div_euclid(count as isize) as f64;
            let point = self.points[index];
            extended.push(ControlPoint::new(point.x + period, point.y));
        }
        extended
    }

    /// Fits a periodic Akima spline and evaluates it at `count` evenly
    /// spaced positions across `[0, 1]`, rescaled into the given ranges.
    pub fn resample(
        &self,
        min_x: f64,
        max_x: f64,
        min_y: f64,
        max_y: f64,
        count: usize,
    ) -> Result<Vec<ControlPoint>, InterpolationError> {
        if self.points.is_empty() || count == 0 {
            return Ok(Vec::new());
        }

        let extended = self.periodic_extension(PERIODIC_EXTRA);
        let xs: Vec<f64> = extended.iter().map(|point| point.x).collect();
        let ys: Vec<f64> = extended.iter().map(|point| point.y).collect();
        let spline = AkimaSpline::new(&xs, &ys)?;

        let dx = max_x - min_x;
        let dy = max_y - min_y;
        let rescale = |x: f64| ControlPoint::new(min_x + x * dx, min_y + spline.evaluate(x) * dy);

        if count == 1 {
            return Ok(vec![rescale(0.5)]);
        }

        let step = 1.0 / (count - 1) as f64;
        Ok((0..count).map(|i| rescale(i as f64 * step)).collect())
    }

    /// Periodic moving average over `2·half_window + 1` neighbours.
    #[must_use]
    pub fn smoothed(&self, half_window: usize) -> Self {
        let count = self.points.len() as isize;
        if count == 0 {
            return self.clone();
        }

        let window = 2 * half_window as isize + 1;
        let points = (0..count)
            .map(|i| {
                let sum: f64 = (i - half_window as isize..=i + half_window as isize)
                    .map(|j| self.points[j.rem_euclid(count) as usize].y)
                    .sum();
                ControlPoint::new(self.points[i as usize].x, sum / window as f64)
            })
            .collect();
        Self { points }
    }

    /// Shifts the drawing by half a period.
    #[must_use]
    pub fn half_offset(&self) -> Self {
        Self::new(
            self.points
                .iter()
                .map(|point| ControlPoint::new(point.x - 0.5, point.y)),
        )
    }

    /// Stretches `y` to span the full `[0, 1]` range. Flat drawings are
    /// returned unchanged.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let (min_y, max_y) = self
            .points
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), point| {
                (lo.min(point.y), hi.max(point.y))
            });
        if self.points.is_empty() || max_y == min_y {
            return self.clone();
        }

        let span = max_y - min_y;
        Self {
            points: self
                .points
                .iter()
                .map(|point| ControlPoint::new(point.x, (point.y - min_y) / span))
                .collect(),
        }
    }
}

/// Folds `x` into `[0, 1)`. `rem_euclid` rounds tiny negatives up to 1.0.
fn wrap_period(x: f64) -> f64 {
    let wrapped = x.rem_euclid(1.0);
    if wrapped >= 1.0 { 0.0 } else { wrapped }
}
