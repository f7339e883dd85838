use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Threshold used both to shape the stage curves and to decide when a
/// released envelope has gone silent.
pub const ENVELOPE_EPSILON: f64 = 0.01;
const EPSILON_PLUS: f64 = 1.0 + ENVELOPE_EPSILON;

/// Closed-form ADSR curve.
///
/// Every stage follows the rational shape `1 - 1/(1 + k·t²)`, with `k`
/// chosen so the curve crosses [`ENVELOPE_EPSILON`] exactly at the end of
/// the stage. The value at any instant is computed directly from the start
/// and stop times, so the envelope is cheap to evaluate per sample and can
/// be copied freely into render snapshots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    attack_time: f64,
    attack_multiplier: f64,
    attack_k: f64,
    decay_time: f64,
    decay_multiplier: f64,
    decay_k: f64,
    sustain_level: f64,
    release_time: f64,
    release_multiplier: f64,
    release_k: f64,
    start_time: Option<f64>,
    stop_time: Option<f64>,
    stop_value: f64,
    stop_requested: bool,
}

impl Default for Envelope {
    fn default() -> Self {
        EnvelopePreset::Fast.envelope()
    }
}

impl Envelope {
    /// Durations are in seconds. Negative or non-finite durations collapse
    /// to zero and the sustain level is clamped to `0..=1`.
    #[must_use]
    pub fn new(attack_time: f64, decay_time: f64, sustain_level: f64, release_time: f64) -> Self {
        let mut envelope = Self {
            attack_time: sanitize_duration(attack_time),
            attack_multiplier: 1.0,
            attack_k: 0.0,
            decay_time: sanitize_duration(decay_time),
            decay_multiplier: 1.0,
            decay_k: 0.0,
            sustain_level: sanitize_level(sustain_level),
            release_time: sanitize_duration(release_time),
            release_multiplier: 1.0,
            release_k: 0.0,
            start_time: None,
            stop_time: None,
            stop_value: 0.0,
            stop_requested: false,
        };
        envelope.update_curves();
        envelope
    }

    #[must_use]
    pub fn with_attack_multiplier(mut self, multiplier: f64) -> Self {
        self.attack_multiplier = sanitize_multiplier(multiplier);
        self.update_curves();
        self
    }

    #[must_use]
    pub fn with_decay_multiplier(mut self, multiplier: f64) -> Self {
        self.decay_multiplier = sanitize_multiplier(multiplier);
        self.update_curves();
        self
    }

    #[must_use]
    pub fn with_release_multiplier(mut self, multiplier: f64) -> Self {
        self.release_multiplier = sanitize_multiplier(multiplier);
        self.update_curves();
        self
    }

    pub fn start(&mut self, time: f64) {
        self.start_time = Some(time);
        self.stop_time = None;
        self.stop_requested = false;
    }

    /// Enters the release stage. With a zero release time the request is
    /// remembered but the curve keeps running: the instrument decays on its
    /// own and ignores note-off.
    pub fn stop(&mut self, time: f64) {
        self.stop_requested = true;
        if self.ignores_stop() {
            return;
        }
        self.stop_value = self.value(time);
        self.stop_time = Some(time);
    }

    #[must_use]
    pub fn value(&self, time: f64) -> f64 {
        let Some(start_time) = self.start_time else {
            return 0.0;
        };

        let raw = match self.stop_time {
            None => {
                let mut t = time - start_time;
                if t < 0.0 {
                    0.0
                } else if t < self.attack_time {
                    rise(t, self.attack_k)
                } else {
                    t -= self.attack_time;
                    if t < self.decay_time {
                        1.0 - (1.0 - self.sustain_level) * rise(t, self.decay_k)
                    } else {
                        self.sustain_level
                    }
                }
            }
            Some(stop_time) => {
                let t = (time - stop_time).max(0.0);
                if t < self.release_time {
                    self.stop_value * fall(t, self.release_k)
                } else {
                    0.0
                }
            }
        };

        raw.clamp(0.0, 1.0)
    }

    /// True once a stop was requested and the curve has dropped below
    /// [`ENVELOPE_EPSILON`].
    #[must_use]
    pub fn is_done(&self, time: f64) -> bool {
        self.stop_requested && self.value(time) < ENVELOPE_EPSILON
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.start_time.is_some()
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop_time.is_some()
    }

    #[must_use]
    pub fn ignores_stop(&self) -> bool {
        self.release_time == 0.0
    }

    #[must_use]
    pub fn attack_time(&self) -> f64 {
        self.attack_time
    }

    #[must_use]
    pub fn decay_time(&self) -> f64 {
        self.decay_time
    }

    #[must_use]
    pub fn sustain_level(&self) -> f64 {
        self.sustain_level
    }

    #[must_use]
    pub fn release_time(&self) -> f64 {
        self.release_time
    }

    #[must_use]
    pub fn attack_k(&self) -> f64 {
        self.attack_k
    }

    #[must_use]
    pub fn decay_k(&self) -> f64 {
        self.decay_k
    }

    #[must_use]
    pub fn release_k(&self) -> f64 {
        self.release_k
    }

    #[must_use]
    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    #[must_use]
    pub fn stop_time(&self) -> Option<f64> {
        self.stop_time
    }

    #[must_use]
    pub fn stop_value(&self) -> f64 {
        self.stop_value
    }

    fn update_curves(&mut self) {
        self.attack_k = self.attack_multiplier * curve_k(self.attack_time);
        self.decay_k = self.decay_multiplier * curve_k(self.decay_time);
        self.release_k = self.release_multiplier * curve_k(self.release_time);
    }
}

fn rise(t: f64, k: f64) -> f64 {
    (1.0 - 1.0 / (1.0 + k * t * t)) * EPSILON_PLUS
}

fn fall(t: f64, k: f64) -> f64 {
    EPSILON_PLUS / (1.0 + k * t * t) - ENVELOPE_EPSILON
}

fn curve_k(duration: f64) -> f64 {
    if duration == 0.0 {
        return 0.0;
    }
    (1.0 - ENVELOPE_EPSILON) / ENVELOPE_EPSILON / duration / duration
}

fn sanitize_duration(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

fn sanitize_level(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn sanitize_multiplier(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        1.0
    }
}

/// Named envelope templates. Each call to [`EnvelopePreset::envelope`]
/// returns a fresh copy, so presets are never mutated by the notes using
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopePreset {
    Fast,
    SlowPiano,
    Piano,
    Clavisin,
    Tube,
}

impl EnvelopePreset {
    pub const ALL: [Self; 5] = [
        Self::Fast,
        Self::SlowPiano,
        Self::Piano,
        Self::Clavisin,
        Self::Tube,
    ];

    #[must_use]
    pub fn envelope(self) -> Envelope {
        match self {
            Self::Fast => Envelope::new(0.005, 0.0, 1.0, 0.005),
            Self::SlowPiano => Envelope::new(0.1, 0.2, 0.8, 3.0),
            Self::Piano => Envelope::new(0.005, 5.0, 0.0, 0.1),
            Self::Clavisin => Envelope::new(0.005, 10.0, 0.0, 0.0)
                .with_attack_multiplier(4.0)
                .with_decay_multiplier(2.0),
            Self::Tube => Envelope::new(1.0, 0.0, 1.0, 2.0),
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::SlowPiano => "slow_piano",
            Self::Piano => "piano",
            Self::Clavisin => "clavisin",
            Self::Tube => "tube",
        }
    }
}

impl fmt::Display for EnvelopePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EnvelopePreset {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(value))
            .ok_or_else(|| format!("unknown envelope preset: {value}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unstarted_envelope_is_silent() {
        let envelope = Envelope::new(0.1, 0.1, 0.5, 0.1);
        assert_eq!(envelope.value(0.05), 0.0);
        assert!(!envelope.is_done(0.05));
    }

    #[test]
    fn attack_reaches_peak_at_stage_boundary() {
        let mut envelope = Envelope::new(0.1, 0.2, 0.5, 0.3);
        envelope.start(1.0);
        let near_end = envelope.value(1.0 + 0.1 - 1e-9);
        assert!((near_end - 0.9999).abs() < 1e-6, "got {near_end}");
    }

    #[test]
    fn decay_settles_on_sustain_level() {
        let mut envelope = Envelope::new(0.01, 0.05, 0.4, 0.3);
        envelope.start(0.0);
        assert!((envelope.value(0.2) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn zero_release_ignores_stop_but_remembers_request() {
        let mut envelope = EnvelopePreset::Clavisin.envelope();
        envelope.start(0.0);
        envelope.stop(0.001);
        assert!(!envelope.is_stopped());
        assert!(!envelope.is_done(0.5));
        assert!(envelope.is_done(20.0), "decay-only instrument should fade out");
    }

    #[test]
    fn zero_length_stages_collapse_instantly() {
        let mut envelope = Envelope::new(0.0, 0.0, 0.7, 0.0);
        envelope.start(0.0);
        assert_eq!(envelope.attack_k(), 0.0);
        assert!((envelope.value(0.0) - 0.7).abs() < 1e-12);
    }

    #[test]
    fn overshooting_multiplier_stays_within_unit_range() {
        let mut envelope = Envelope::new(0.01, 0.1, 0.0, 0.1).with_attack_multiplier(8.0);
        envelope.start(0.0);
        for step in 0..200 {
            let value = envelope.value(f64::from(step) * 0.001);
            assert!((0.0..=1.0).contains(&value), "value {value} escaped range");
        }
    }

    #[test]
    fn preset_names_round_trip_through_from_str() {
        for preset in EnvelopePreset::ALL {
            assert_eq!(preset.name().parse::<EnvelopePreset>(), Ok(preset));
        }
    }
}
