use std::ops::{Add, AddAssign, Mul};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::waveform::WaveformId;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_CHANNELS: u16 = 2;
pub const DEFAULT_FREQUENCY: f64 = 440.0;
pub const DEFAULT_POINT_VOLUME: f64 = 0.5;

/// One oscillator of the live set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SoundPoint {
    pub id: Uuid,
    pub frequency: f64,
    pub volume: f64,
    pub waveform: WaveformId,
    pub mute: bool,
    pub solo: bool,
    pub left_pct: f64,
    pub right_pct: f64,
}

impl Default for SoundPoint {
    fn default() -> Self {
        Self::new(DEFAULT_FREQUENCY, DEFAULT_POINT_VOLUME)
    }
}

impl SoundPoint {
    #[must_use]
    pub fn new(frequency: f64, volume: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            frequency,
            volume,
            waveform: WaveformId::default(),
            mute: false,
            solo: false,
            left_pct: 1.0,
            right_pct: 1.0,
        }
    }

    #[must_use]
    pub fn with_waveform(mut self, waveform: impl Into<WaveformId>) -> Self {
        self.waveform = waveform.into();
        self
    }

    #[must_use]
    pub fn with_balance(mut self, balance: f64) -> Self {
        self.set_balance(balance);
        self
    }

    /// Maps a pan value in `-1..=1` onto the channel coefficients. Negative
    /// values attenuate the right channel, positive values the left.
    pub fn set_balance(&mut self, balance: f64) {
        let balance = if balance.is_finite() {
            balance.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        if balance < 0.0 {
            self.left_pct = 1.0;
            self.right_pct = 1.0 + balance;
        } else {
            self.left_pct = 1.0 - balance;
            self.right_pct = 1.0;
        }
    }

    #[must_use]
    pub fn balance(&self) -> f64 {
        if self.right_pct < 1.0 {
            self.right_pct - 1.0
        } else {
            1.0 - self.left_pct
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.frequency.is_finite()
            && self.frequency > 0.0
            && (0.0..=1.0).contains(&self.volume)
            && (0.0..=1.0).contains(&self.left_pct)
            && (0.0..=1.0).contains(&self.right_pct)
    }
}

/// Partial update for a [`SoundPoint`]. Unset fields are left as they are.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SoundPointPatch {
    pub frequency: Option<f64>,
    pub volume: Option<f64>,
    pub waveform: Option<WaveformId>,
    pub mute: Option<bool>,
    pub solo: Option<bool>,
    pub balance: Option<f64>,
}

impl SoundPointPatch {
    pub fn apply(&self, point: &mut SoundPoint) {
        if let Some(frequency) = self.frequency {
            point.frequency = frequency;
        }
        if let Some(volume) = self.volume {
            point.volume = volume;
        }
        if let Some(waveform) = &self.waveform {
            point.waveform = waveform.clone();
        }
        if let Some(mute) = self.mute {
            point.mute = mute;
        }
        if let Some(solo) = self.solo {
            point.solo = solo;
        }
        if let Some(balance) = self.balance {
            point.set_balance(balance);
        }
    }
}

/// The live oscillator set edited by the control thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OscillatorSet {
    points: Vec<SoundPoint>,
}

impl OscillatorSet {
    #[must_use]
    pub fn new(points: Vec<SoundPoint>) -> Self {
        Self { points }
    }

    #[must_use]
    pub fn points(&self) -> &[SoundPoint] {
        &self.points
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
    pub fn get(&self, id: Uuid) -> Option<&SoundPoint> {
        self.points.iter().find(|point| point.id == id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut SoundPoint> {
        self.points.iter_mut().find(|point| point.id == id)
    }

    pub fn push(&mut self, point: SoundPoint) {
        self.points.push(point);
    }

    pub fn remove(&mut self, id: Uuid) -> Option<SoundPoint> {
        let index = self.points.iter().position(|point| point.id == id)?;
        Some(self.points.remove(index))
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }
}

/// A left/right sample pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StereoValue {
    pub left: f64,
    pub right: f64,
}

impl StereoValue {
    pub const SILENT: Self = Self {
        left: 0.0,
        right: 0.0,
    };

    #[must_use]
    pub const fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }
}

impl Add for StereoValue {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.left + rhs.left, self.right + rhs.right)
    }
}

impl AddAssign for StereoValue {
    fn add_assign(&mut self, rhs: Self) {
        self.left += rhs.left;
        self.right += rhs.right;
    }
}

impl Mul<f64> for StereoValue {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.left * rhs, self.right * rhs)
    }
}
