use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    envelope::EnvelopePreset,
    model::{OscillatorSet, SoundPoint},
    note::NoteKey,
    render::RenderFormat,
    time::semitones_to_pitch,
};

pub const DEMO_SAMPLE_RATE: u32 = 22_050;
pub const DEMO_BLOCK_FRAMES: usize = 441;

/// Four partials over a 220 Hz fundamental, spread across the stereo field.
#[must_use]
pub fn demo_oscillators() -> OscillatorSet {
    let partial = |id: u128, frequency: f64, volume: f64, waveform: &str, balance: f64| {
        let mut point = SoundPoint::new(frequency, volume)
            .with_waveform(waveform)
            .with_balance(balance);
        point.id = Uuid::from_u128(id);
        point
    };

    OscillatorSet::new(vec![
        partial(0x5d1e_0001_0000_4000_8000_0000_0000_0001, 220.0, 0.5, "sine", 0.0),
        partial(0x5d1e_0001_0000_4000_8000_0000_0000_0002, 440.0, 0.25, "triangle", -0.4),
        partial(0x5d1e_0001_0000_4000_8000_0000_0000_0003, 660.0, 0.15, "sine", 0.4),
        partial(0x5d1e_0001_0000_4000_8000_0000_0000_0004, 880.0, 0.1, "bsine", 0.0),
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioAction {
    NoteOn { key: NoteKey, pitch: f64, velocity: f64 },
    NoteOff { key: NoteKey },
}

/// An action applied before the block starting at `frame` is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScenarioEvent {
    pub frame: u64,
    #[serde(flatten)]
    pub action: ScenarioAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderScenario {
    pub name: String,
    pub format: RenderFormat,
    pub envelope: EnvelopePreset,
    pub master_volume: f64,
    pub total_frames: u64,
    pub block_frames: usize,
    pub oscillators: OscillatorSet,
    pub events: Vec<ScenarioEvent>,
}

impl RenderScenario {
    /// Moves the scenario to another sample rate, keeping every event and
    /// the total length at the same wall-clock position.
    #[must_use]
    pub fn resampled(mut self, sample_rate: u32) -> Self {
        let from = self.format.sample_rate;
        if from == 0 || from == sample_rate {
            self.format.sample_rate = sample_rate;
            return self;
        }
        let ratio = f64::from(sample_rate) / f64::from(from);
        let scale = |frame: u64| (frame as f64 * ratio).round() as u64;

        self.total_frames = scale(self.total_frames);
        self.block_frames = (scale(self.block_frames as u64) as usize).max(1);
        for event in &mut self.events {
            event.frame = scale(event.frame);
        }
        self.format.sample_rate = sample_rate;
        self
    }

    /// Events due before the block starting at `frame`, given the previous
    /// block started at `previous`.
    pub fn events_between(
        &self,
        previous: Option<u64>,
        frame: u64,
    ) -> impl Iterator<Item = &ScenarioEvent> {
        self.events.iter().filter(move |event| {
            event.frame <= frame && previous.is_none_or(|previous| event.frame > previous)
        })
    }
}

/// A short chord: a held root, a fifth entering mid-attack and released
/// early, and an octave that overlaps both.
#[must_use]
pub fn demo_scenario() -> RenderScenario {
    let block = DEMO_BLOCK_FRAMES as u64;
    let on = |blocks: u64, key: u32, semitones: f64| ScenarioEvent {
        frame: blocks * block,
        action: ScenarioAction::NoteOn {
            key: NoteKey::Keyboard(key),
            pitch: semitones_to_pitch(semitones),
            velocity: 0.8,
        },
    };
    let off = |blocks: u64, key: u32| ScenarioEvent {
        frame: blocks * block,
        action: ScenarioAction::NoteOff {
            key: NoteKey::Keyboard(key),
        },
    };

    RenderScenario {
        name: "demo-chord".to_string(),
        format: RenderFormat::stereo(DEMO_SAMPLE_RATE),
        envelope: EnvelopePreset::SlowPiano,
        master_volume: 0.8,
        total_frames: 40 * block,
        block_frames: DEMO_BLOCK_FRAMES,
        oscillators: demo_oscillators(),
        events: vec![
            on(2, 0, 0.0),
            on(4, 7, 7.0),
            off(12, 7),
            on(14, 12, 12.0),
            off(24, 0),
            off(30, 12),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_scenario_is_deterministic() {
        assert_eq!(demo_scenario(), demo_scenario());
        assert!(demo_oscillators().points().iter().all(SoundPoint::is_valid));
    }

    #[test]
    fn events_are_grouped_by_block() {
        let scenario = demo_scenario();
        let block = scenario.block_frames as u64;
        assert_eq!(scenario.events_between(None, 0).count(), 0);
        assert_eq!(scenario.events_between(Some(block), 2 * block).count(), 1);
        assert_eq!(scenario.events_between(None, 4 * block).count(), 2);
    }

    #[test]
    fn resampling_keeps_events_on_block_boundaries() {
        let scenario = demo_scenario().resampled(44_100);
        assert_eq!(scenario.format, RenderFormat::stereo(44_100));
        assert_eq!(scenario.block_frames, 2 * DEMO_BLOCK_FRAMES);
        assert_eq!(scenario.total_frames, 2 * demo_scenario().total_frames);
        let block = scenario.block_frames as u64;
        assert!(scenario.events.iter().all(|event| event.frame % block == 0));
        assert_eq!(scenario.events_between(Some(block), 2 * block).count(), 1);
    }
}
