use std::{fmt, str::FromStr, sync::Arc, time::Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use crate::{
    control_points::ControlPoints,
    envelope::{Envelope, EnvelopePreset},
    metrics::{LoadSample, MetricsObserver, MixerStatus},
    model::{OscillatorSet, SoundPoint, SoundPointPatch},
    note::{Note, NoteKey, NotePhase, NotePoint},
    recorder::RecordingSink,
    render::{
        EngineConfig, EngineError, PeakLevels, RenderEngine, RenderFormat,
        create_engine_with_fallback,
    },
    time::buffer_seconds,
    waveform::{WaveformBank, WaveformError, WaveformId, WaveformInfo},
};

#[derive(Debug, Error)]
pub enum MixerError {
    #[error("pitch multiplier must be finite and positive, got {0}")]
    InvalidPitch(f64),
    #[error("frequency must be finite and positive, got {0}")]
    InvalidFrequency(f64),
    #[error("volume must be within 0..=1, got {0}")]
    InvalidVolume(f64),
    #[error("channel coefficients must be within 0..=1, got left {left} right {right}")]
    InvalidBalance { left: f64, right: f64 },
    #[error("sound point not found: {0}")]
    PointNotFound(Uuid),
    #[error("waveform {0} is still used by a sound point")]
    WaveformInUse(WaveformId),
    #[error("invalid read of {count} samples at offset {offset} in buffer of {len}")]
    InvalidRange {
        offset: usize,
        count: usize,
        len: usize,
    },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Waveform(#[from] WaveformError),
}

/// Where notes come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteSource {
    /// Silence; note events are ignored.
    None,
    /// One continuous note that follows the live oscillator set.
    Drone,
    #[default]
    Keyboard,
}

impl NoteSource {
    pub const ALL: [Self; 3] = [Self::None, Self::Drone, Self::Keyboard];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Drone => "drone",
            Self::Keyboard => "keyboard",
        }
    }
}

impl fmt::Display for NoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NoteSource {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|source| source.name().eq_ignore_ascii_case(value))
            .ok_or_else(|| format!("unknown note source: {value}"))
    }
}

#[derive(Debug)]
struct MixerState {
    points: OscillatorSet,
    revision: u64,
    notes: Vec<Arc<Note>>,
    /// Bumped whenever the note list is cleared.
    generation: u64,
    master_volume: f64,
    source: NoteSource,
    envelope: Envelope,
    format: RenderFormat,
    drone: Option<(Arc<Note>, u64)>,
}

#[derive(Debug, Default)]
struct MetricsState {
    engine: Option<&'static str>,
    peaks: PeakLevels,
    load: LoadSample,
    overloaded: bool,
    overload_count: u64,
}

/// Session-level orchestrator: the live oscillator set, the sounding notes
/// and the engine that renders them.
///
/// Control-thread calls (`note_on`, point edits, ...) and the audio callback
/// (`read`) may run concurrently. Shared state is locked only for mutation
/// and for taking the per-pass snapshot; rendering happens outside the lock.
pub struct Mixer {
    name: String,
    bank: WaveformBank,
    state: Mutex<MixerState>,
    engine: Mutex<Option<Box<dyn RenderEngine>>>,
    metrics: Mutex<MetricsState>,
    observers: Mutex<Vec<Arc<dyn MetricsObserver>>>,
    recorder: Mutex<Option<Arc<dyn RecordingSink>>>,
}

impl fmt::Debug for Mixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mixer")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

impl Mixer {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bank: WaveformBank::new(),
            state: Mutex::new(MixerState {
                points: OscillatorSet::default(),
                revision: 0,
                notes: Vec::new(),
                generation: 0,
                master_volume: 1.0,
                source: NoteSource::default(),
                envelope: Envelope::default(),
                format: RenderFormat::default(),
                drone: None,
            }),
            engine: Mutex::new(None),
            metrics: Mutex::new(MetricsState::default()),
            observers: Mutex::new(Vec::new()),
            recorder: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn waveform_bank(&self) -> &WaveformBank {
        &self.bank
    }

    #[must_use]
    pub fn format(&self) -> RenderFormat {
        self.state.lock().format
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.metrics.lock().engine.is_some()
    }

    #[instrument(
        skip(self, format, engine),
        fields(mixer = %self.name, engine = engine.name(), sample_rate = format.sample_rate)
    )]
    pub fn start_playback(
        &self,
        format: RenderFormat,
        mut engine: Box<dyn RenderEngine>,
    ) -> Result<(), MixerError> {
        engine.init(format)?;
        let engine_name = engine.name();
        *self.engine.lock() = Some(engine);
        {
            let mut state = self.state.lock();
            state.format = format;
            Self::clear_notes(&mut state);
        }
        *self.metrics.lock() = MetricsState {
            engine: Some(engine_name),
            ..MetricsState::default()
        };
        info!("playback started");
        Ok(())
    }

    /// Builds the configured engine, falling back to the CPU when the GPU
    /// is unavailable and the config allows it.
    pub fn start_playback_with(
        &self,
        format: RenderFormat,
        config: &EngineConfig,
    ) -> Result<(), MixerError> {
        let engine = create_engine_with_fallback(config)?;
        self.start_playback(format, engine)
    }

    #[instrument(skip(self), fields(mixer = %self.name))]
    pub fn stop_playback(&self) {
        *self.engine.lock() = None;
        *self.metrics.lock() = MetricsState::default();
        Self::clear_notes(&mut self.state.lock());
        info!("playback stopped");
    }

    /// Drops every note immediately.
    #[instrument(skip(self), fields(mixer = %self.name))]
    pub fn panic(&self) {
        let cleared = Self::clear_notes(&mut self.state.lock());
        info!(cleared, "notes cleared");
    }

    fn clear_notes(state: &mut MixerState) -> usize {
        let cleared = state.notes.len();
        state.notes.clear();
        state.drone = None;
        state.generation = state.generation.wrapping_add(1);
        cleared
    }

    /// Starts a note from the current oscillator set. Returns `Ok(false)`
    /// when the note source is not the keyboard.
    #[instrument(skip(self), fields(mixer = %self.name, key = %key))]
    pub fn note_on(&self, key: NoteKey, pitch: f64, velocity: f64) -> Result<bool, MixerError> {
        if !pitch.is_finite() || pitch <= 0.0 {
            return Err(MixerError::InvalidPitch(pitch));
        }
        let velocity = if velocity.is_nan() {
            0.0
        } else {
            velocity.clamp(0.0, 1.0)
        };

        let (points, envelope, sample_rate, generation) = {
            let state = self.state.lock();
            if state.source != NoteSource::Keyboard {
                debug!(source = %state.source, "note ignored");
                return Ok(false);
            }
            (
                state.points.clone(),
                state.envelope,
                state.format.sample_rate,
                state.generation,
            )
        };

        let points = self.resolve_points(&points, pitch, sample_rate)?;
        let note = Arc::new(Note::new(key, points, envelope, velocity));
        note.request_play();
        Ok(self.push_note(note, generation))
    }

    /// Appends `note` unless the list was cleared since `generation` was read.
    fn push_note(&self, note: Arc<Note>, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            debug!(source = %state.source, "notes cleared during note on");
            return false;
        }
        state.notes.push(note);
        info!(active = state.notes.len(), "note on");
        true
    }

    /// Releases the first note with `key` that is still playing or waiting
    /// to play.
    #[instrument(skip(self), fields(mixer = %self.name, key = %key))]
    pub fn note_off(&self, key: &NoteKey) -> bool {
        let state = self.state.lock();
        let found = state
            .notes
            .iter()
            .find(|note| note.key() == *key && note.accepts_stop())
            .is_some_and(|note| note.request_stop());
        info!(found, "note off");
        found
    }

    #[must_use]
    pub fn active_notes(&self) -> usize {
        self.state.lock().notes.len()
    }

    #[must_use]
    pub fn note_phases(&self) -> Vec<(NoteKey, NotePhase)> {
        self.state
            .lock()
            .notes
            .iter()
            .map(|note| (note.key(), note.phase()))
            .collect()
    }

    /// Audio callback: renders `count` interleaved samples into
    /// `buffer[offset..offset + count]` and returns the number written.
    pub fn read(
        &self,
        buffer: &mut [f32],
        offset: usize,
        count: usize,
    ) -> Result<usize, MixerError> {
        let end = offset
            .checked_add(count)
            .filter(|end| *end <= buffer.len() && count % 2 == 0 && offset % 2 == 0)
            .ok_or(MixerError::InvalidRange {
                offset,
                count,
                len: buffer.len(),
            })?;

        let started = Instant::now();
        let (notes, master_volume, format) = self.snapshot()?;

        let peaks = {
            let mut engine = self.engine.lock();
            let Some(engine) = engine.as_mut() else {
                buffer[offset..end].fill(0.0);
                trace!("read without playback, silence written");
                return Ok(count);
            };
            engine.read(&notes, buffer, offset, end, master_volume)?
        };

        let recorder = self.recorder.lock().clone();
        if let Some(recorder) = &recorder {
            recorder.write_block(&buffer[offset..end]);
        }

        let load = LoadSample::measure(
            started.elapsed().as_secs_f64(),
            buffer_seconds(count, format.channels, format.sample_rate),
        );
        self.record_metrics(peaks, load, notes.len());
        Ok(count)
    }

    fn snapshot(&self) -> Result<(Vec<Arc<Note>>, f64, RenderFormat), MixerError> {
        let mut state = self.state.lock();
        state.notes.retain(|note| note.phase() != NotePhase::Done);
        if state.source == NoteSource::Drone {
            self.refresh_drone(&mut state)?;
        }
        Ok((state.notes.clone(), state.master_volume, state.format))
    }

    fn refresh_drone(&self, state: &mut MixerState) -> Result<(), MixerError> {
        let revision = state.revision;
        match &state.drone {
            Some((_, seen)) if *seen == revision => return Ok(()),
            _ => {}
        }

        let points = self.resolve_points(&state.points, 1.0, state.format.sample_rate)?;
        match state.drone.take() {
            Some((note, _)) => {
                note.replace_points(points);
                state.drone = Some((note, revision));
            }
            None => {
                // Fast holds at full sustain, so the drone never decays away.
                let envelope = EnvelopePreset::Fast.envelope();
                let note = Arc::new(Note::new(NoteKey::Drone, points, envelope, 1.0));
                note.request_play();
                state.notes.push(Arc::clone(&note));
                state.drone = Some((note, revision));
                debug!("drone note started");
            }
        }
        Ok(())
    }

    fn resolve_points(
        &self,
        points: &OscillatorSet,
        pitch: f64,
        sample_rate: u32,
    ) -> Result<Vec<NotePoint>, MixerError> {
        points
            .points()
            .iter()
            .map(|point| {
                NotePoint::resolve(point, pitch, &self.bank, sample_rate).map_err(MixerError::from)
            })
            .collect()
    }

    fn record_metrics(&self, peaks: PeakLevels, load: LoadSample, active_notes: usize) {
        {
            let mut metrics = self.metrics.lock();
            metrics.peaks = peaks;
            metrics.load = load;
            metrics.overloaded = load.is_overload();
            if metrics.overloaded {
                metrics.overload_count += 1;
                warn!(
                    mixer = %self.name,
                    load_percent = load.load_percent,
                    buffer_ms = load.buffer_ms,
                    active_notes,
                    "render pass overran its buffer"
                );
            }
        }

        let observers = self.observers.lock().clone();
        if observers.is_empty() {
            return;
        }
        let status = self.status();
        for observer in &observers {
            observer.on_render(&status);
        }
    }

    #[must_use]
    pub fn status(&self) -> MixerStatus {
        let active_notes = self.active_notes();
        let recorder = self.recorder.lock().clone();
        let metrics = self.metrics.lock();
        MixerStatus {
            name: self.name.clone(),
            engine: metrics.engine.map(str::to_string),
            load_percent: metrics.load.load_percent,
            buffer_ms: metrics.load.buffer_ms,
            peaks: metrics.peaks,
            overloaded: metrics.overloaded,
            overload_count: metrics.overload_count,
            active_notes,
            recording: recorder.is_some(),
            dropped_recording_blocks: recorder.map_or(0, |recorder| recorder.dropped_blocks()),
        }
    }

    #[must_use]
    pub fn peak_levels(&self) -> PeakLevels {
        self.metrics.lock().peaks
    }

    pub fn add_observer(&self, observer: Arc<dyn MetricsObserver>) {
        self.observers.lock().push(observer);
    }

    #[instrument(skip(self, sink), fields(mixer = %self.name))]
    pub fn start_recording(&self, sink: Arc<dyn RecordingSink>) {
        *self.recorder.lock() = Some(sink);
        info!("recording attached");
    }

    /// Detaches the sink and hands it back so the caller can finalize it.
    #[instrument(skip(self), fields(mixer = %self.name))]
    pub fn stop_recording(&self) -> Option<Arc<dyn RecordingSink>> {
        let sink = self.recorder.lock().take();
        info!(was_recording = sink.is_some(), "recording detached");
        sink
    }

    #[must_use]
    pub fn master_volume(&self) -> f64 {
        self.state.lock().master_volume
    }

    #[instrument(skip(self), fields(mixer = %self.name))]
    pub fn set_master_volume(&self, volume: f64) -> Result<(), MixerError> {
        validate_volume(volume)?;
        self.state.lock().master_volume = volume;
        info!("master volume changed");
        Ok(())
    }

    #[must_use]
    pub fn note_source(&self) -> NoteSource {
        self.state.lock().source
    }

    /// Switches the note source and clears every sounding note.
    #[instrument(skip(self), fields(mixer = %self.name, source = %source))]
    pub fn set_note_source(&self, source: NoteSource) {
        let mut state = self.state.lock();
        state.source = source;
        Self::clear_notes(&mut state);
        info!("note source changed");
    }

    #[must_use]
    pub fn envelope(&self) -> Envelope {
        self.state.lock().envelope
    }

    /// Template copied into every note started afterwards.
    #[instrument(skip(self, envelope), fields(mixer = %self.name))]
    pub fn set_envelope(&self, envelope: Envelope) {
        self.state.lock().envelope = envelope;
        info!(
            attack = envelope.attack_time(),
            decay = envelope.decay_time(),
            sustain = envelope.sustain_level(),
            release = envelope.release_time(),
            "envelope template changed"
        );
    }

    pub fn set_envelope_preset(&self, preset: EnvelopePreset) {
        self.set_envelope(preset.envelope());
    }

    #[must_use]
    pub fn points(&self) -> Vec<SoundPoint> {
        self.state.lock().points.points().to_vec()
    }

    #[instrument(skip(self, point), fields(mixer = %self.name, point_id = %point.id))]
    pub fn add_point(&self, point: SoundPoint) -> Result<Uuid, MixerError> {
        validate_point(&point)?;
        let id = point.id;
        let mut state = self.state.lock();
        state.points.push(point);
        state.revision += 1;
        info!(points = state.points.len(), "sound point added");
        Ok(id)
    }

    #[instrument(skip(self), fields(mixer = %self.name, point_id = %id))]
    pub fn remove_point(&self, id: Uuid) -> Result<SoundPoint, MixerError> {
        let mut state = self.state.lock();
        let removed = state.points.remove(id).ok_or(MixerError::PointNotFound(id))?;
        state.revision += 1;
        info!(points = state.points.len(), "sound point removed");
        Ok(removed)
    }

    #[instrument(skip(self, patch), fields(mixer = %self.name, point_id = %id))]
    pub fn patch_point(&self, id: Uuid, patch: &SoundPointPatch) -> Result<SoundPoint, MixerError> {
        let mut state = self.state.lock();
        let point = state.points.get_mut(id).ok_or(MixerError::PointNotFound(id))?;
        let mut updated = point.clone();
        patch.apply(&mut updated);
        validate_point(&updated)?;
        *point = updated.clone();
        state.revision += 1;
        info!(
            frequency = updated.frequency,
            volume = updated.volume,
            mute = updated.mute,
            solo = updated.solo,
            "sound point patched"
        );
        Ok(updated)
    }

    pub fn register_custom_waveform(
        &self,
        id: WaveformId,
        points: ControlPoints,
    ) -> Result<WaveformId, MixerError> {
        Ok(self.bank.register_custom(id, points)?)
    }

    /// Republishes the tables of a custom waveform. Sounding notes keep the
    /// table they started with; the drone picks up the new one.
    pub fn edit_custom_waveform(
        &self,
        id: &WaveformId,
        points: ControlPoints,
    ) -> Result<(), MixerError> {
        self.bank.edit_custom(id, points)?;
        self.state.lock().revision += 1;
        Ok(())
    }

    /// Drops a custom waveform that no sound point refers to.
    pub fn remove_custom_waveform(&self, id: &WaveformId) -> Result<(), MixerError> {
        let state = self.state.lock();
        if state.points.points().iter().any(|point| &point.waveform == id) {
            return Err(MixerError::WaveformInUse(id.clone()));
        }
        self.bank.remove_custom(id)?;
        Ok(())
    }

    #[must_use]
    pub fn waveforms(&self) -> Vec<WaveformInfo> {
        self.bank.list()
    }
}

fn validate_volume(volume: f64) -> Result<(), MixerError> {
    if (0.0..=1.0).contains(&volume) {
        Ok(())
    } else {
        Err(MixerError::InvalidVolume(volume))
    }
}

fn validate_point(point: &SoundPoint) -> Result<(), MixerError> {
    if !point.frequency.is_finite() || point.frequency <= 0.0 {
        return Err(MixerError::InvalidFrequency(point.frequency));
    }
    validate_volume(point.volume)?;
    let coefficient = 0.0..=1.0;
    if !coefficient.contains(&point.left_pct) || !coefficient.contains(&point.right_pct) {
        return Err(MixerError::InvalidBalance {
            left: point.left_pct,
            right: point.right_pct,
        });
    }
    Ok(())
}
