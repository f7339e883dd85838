use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    envelope::Envelope,
    model::{SoundPoint, StereoValue},
    waveform::{Waveform, WaveformBank, WaveformError, WaveformId},
};

/// Identity of a sounding note. Only equality matters to the mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKey {
    Midi(u8),
    Keyboard(u32),
    Custom(u64),
    Drone,
}

impl fmt::Display for NoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Midi(note) => write!(f, "midi:{note}"),
            Self::Keyboard(code) => write!(f, "key:{code}"),
            Self::Custom(id) => write!(f, "custom:{id}"),
            Self::Drone => f.write_str("drone"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotePhase {
    Init,
    Playing,
    Stopping,
    Done,
}

/// An oscillator captured at note-on with its waveform already resolved.
#[derive(Debug, Clone)]
pub struct NotePoint {
    pub frequency: f64,
    pub volume: f64,
    pub left_pct: f64,
    pub right_pct: f64,
    pub mute: bool,
    pub solo: bool,
    pub waveform_id: WaveformId,
    pub waveform: Waveform,
}

impl NotePoint {
    pub fn resolve(
        point: &SoundPoint,
        pitch_multiplier: f64,
        bank: &WaveformBank,
        sample_rate: u32,
    ) -> Result<Self, WaveformError> {
        Ok(Self {
            frequency: point.frequency * pitch_multiplier,
            volume: point.volume,
            left_pct: point.left_pct,
            right_pct: point.right_pct,
            mute: point.mute,
            solo: point.solo,
            waveform: bank.resolve(&point.waveform, sample_rate)?,
            waveform_id: point.waveform.clone(),
        })
    }

    #[must_use]
    pub fn with_waveform(
        frequency: f64,
        volume: f64,
        waveform_id: WaveformId,
        waveform: Waveform,
    ) -> Self {
        Self {
            frequency,
            volume,
            left_pct: 1.0,
            right_pct: 1.0,
            mute: false,
            solo: false,
            waveform_id,
            waveform,
        }
    }

    #[must_use]
    pub fn sine(frequency: f64, volume: f64) -> Self {
        Self::with_waveform(frequency, volume, WaveformId::default(), Waveform::Sine)
    }

    fn contribution(&self, local_time: f64) -> StereoValue {
        let value = self.volume * self.waveform.value(local_time, self.frequency);
        StereoValue::new(value * self.left_pct, value * self.right_pct)
    }
}

/// Immutable view of a note taken at the start of a render pass. All engines
/// evaluate these rather than the note itself.
#[derive(Debug, Clone)]
pub struct Voice {
    pub points: Arc<[NotePoint]>,
    pub envelope: Envelope,
    pub volume: f64,
}

impl Voice {
    /// The first unmuted soloed point, if any; it replaces the whole mix.
    #[must_use]
    pub fn solo_point(&self) -> Option<&NotePoint> {
        self.points.iter().find(|point| !point.mute && point.solo)
    }

    /// Oscillator mix at `local_time` seconds after the note started, before
    /// the envelope is applied.
    #[must_use]
    pub fn mix(&self, local_time: f64) -> StereoValue {
        if let Some(point) = self.solo_point() {
            return point.contribution(local_time);
        }

        let mut sum = StereoValue::SILENT;
        let mut total_volume = 0.0;
        for point in self.points.iter().filter(|point| !point.mute) {
            sum += point.contribution(local_time);
            total_volume += point.volume;
        }

        if total_volume > 1.0 {
            sum * (1.0 / total_volume)
        } else {
            sum
        }
    }

    #[must_use]
    pub fn value(&self, time: f64) -> StereoValue {
        let Some(start_time) = self.envelope.start_time() else {
            return StereoValue::SILENT;
        };
        let gain = self.envelope.value(time) * self.volume;
        if gain == 0.0 {
            return StereoValue::SILENT;
        }
        self.mix(time - start_time) * gain
    }
}

#[derive(Debug)]
struct NoteState {
    phase: NotePhase,
    pending_play: bool,
    pending_stop: bool,
    envelope: Envelope,
    points: Arc<[NotePoint]>,
}

/// A bundle of oscillators sharing one envelope and one output volume.
///
/// Lifecycle requests are queued and applied by [`Note::update_phase`], which
/// the render engine calls once per pass with the pass start time.
#[derive(Debug)]
pub struct Note {
    key: NoteKey,
    volume: f64,
    state: Mutex<NoteState>,
}

impl Note {
    #[must_use]
    pub fn new(key: NoteKey, points: Vec<NotePoint>, envelope: Envelope, volume: f64) -> Self {
        Self {
            key,
            volume: volume.clamp(0.0, 1.0),
            state: Mutex::new(NoteState {
                phase: NotePhase::Init,
                pending_play: false,
                pending_stop: false,
                envelope,
                points: points.into(),
            }),
        }
    }

    #[must_use]
    pub fn key(&self) -> NoteKey {
        self.key
    }

    #[must_use]
    pub fn volume(&self) -> f64 {
        self.volume
    }

    #[must_use]
    pub fn phase(&self) -> NotePhase {
        self.state.lock().phase
    }

    #[must_use]
    pub fn envelope(&self) -> Envelope {
        self.state.lock().envelope
    }

    #[must_use]
    pub fn points(&self) -> Arc<[NotePoint]> {
        Arc::clone(&self.state.lock().points)
    }

    pub fn request_play(&self) {
        let mut state = self.state.lock();
        if state.phase == NotePhase::Init {
            state.pending_play = true;
        }
    }

    /// Queues the release. Returns false when the note is already stopping
    /// or done. A note that was never asked to play finishes immediately.
    pub fn request_stop(&self) -> bool {
        let mut state = self.state.lock();
        match state.phase {
            NotePhase::Init if !state.pending_play => {
                state.phase = NotePhase::Done;
                true
            }
            NotePhase::Init | NotePhase::Playing if !state.pending_stop => {
                state.pending_stop = true;
                true
            }
            _ => false,
        }
    }

    /// True while the note is playing or waiting to start and no stop has
    /// been queued yet.
    #[must_use]
    pub fn accepts_stop(&self) -> bool {
        let state = self.state.lock();
        !state.pending_stop
            && match state.phase {
                NotePhase::Init => state.pending_play,
                NotePhase::Playing => true,
                NotePhase::Stopping | NotePhase::Done => false,
            }
    }

    /// Applies at most one queued transition at `time`, start before stop,
    /// then retires a released note whose envelope has faded out.
    pub fn update_phase(&self, time: f64) -> NotePhase {
        let mut state = self.state.lock();
        if state.pending_play {
            state.pending_play = false;
            if state.phase == NotePhase::Init {
                state.envelope.start(time);
                state.phase = NotePhase::Playing;
                trace!(key = %self.key, time, "note started");
            }
        } else if state.pending_stop {
            state.pending_stop = false;
            if state.phase == NotePhase::Playing {
                state.envelope.stop(time);
                state.phase = NotePhase::Stopping;
                trace!(key = %self.key, time, "note released");
            }
        }

        if state.phase == NotePhase::Stopping && state.envelope.is_done(time) {
            state.phase = NotePhase::Done;
            trace!(key = %self.key, time, "note done");
        }
        state.phase
    }

    /// Swaps the oscillator snapshot in place, keeping the envelope running.
    pub fn replace_points(&self, points: Vec<NotePoint>) {
        self.state.lock().points = points.into();
    }

    #[must_use]
    pub fn voice(&self) -> Voice {
        let state = self.state.lock();
        Voice {
            points: Arc::clone(&state.points),
            envelope: state.envelope,
            volume: self.volume,
        }
    }

    #[must_use]
    pub fn value(&self, time: f64) -> StereoValue {
        self.voice().value(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopePreset;

    fn square_point(volume: f64) -> NotePoint {
        let bank = WaveformBank::new();
        let id = WaveformId::new("square");
        let waveform = bank.resolve(&id, 1_000).expect("square should resolve");
        NotePoint::with_waveform(1.0, volume, id, waveform)
    }

    #[test]
    fn start_applies_before_stop() {
        let note = Note::new(
            NoteKey::Midi(60),
            vec![NotePoint::sine(220.0, 0.5)],
            EnvelopePreset::Fast.envelope(),
            1.0,
        );
        note.request_play();
        assert!(note.request_stop());

        assert_eq!(note.update_phase(0.0), NotePhase::Playing);
        assert_eq!(note.update_phase(0.001), NotePhase::Stopping);
        assert_eq!(note.update_phase(1.0), NotePhase::Done);
    }

    #[test]
    fn stop_without_play_finishes_immediately() {
        let note = Note::new(NoteKey::Drone, Vec::new(), Envelope::default(), 1.0);
        assert!(note.request_stop());
        assert_eq!(note.phase(), NotePhase::Done);
        assert!(!note.request_stop());
    }

    #[test]
    fn loud_mix_is_normalized_by_volume_sum() {
        let voice = Voice {
            points: vec![square_point(0.8), square_point(0.8)].into(),
            envelope: Envelope::default(),
            volume: 1.0,
        };
        let mixed = voice.mix(0.1);
        assert!((mixed.left - 1.0).abs() < 1e-12);
        assert!((mixed.right - 1.0).abs() < 1e-12);
    }

    #[test]
    fn muted_points_do_not_count_toward_normalization() {
        let mut muted = square_point(0.9);
        muted.mute = true;
        let voice = Voice {
            points: vec![square_point(0.6), muted].into(),
            envelope: Envelope::default(),
            volume: 1.0,
        };
        assert!((voice.mix(0.1).left - 0.6).abs() < 1e-12);
    }

    #[test]
    fn unstarted_voice_is_silent() {
        let note = Note::new(
            NoteKey::Keyboard(32),
            vec![square_point(1.0)],
            Envelope::default(),
            1.0,
        );
        assert_eq!(note.value(0.1), StereoValue::SILENT);
    }
}
