//! Render strategies.
//!
//! Every engine follows the same contract: advance each note's phase once at
//! the pass start time, snapshot the notes into [`Voice`]s, then fill the
//! interleaved stereo range frame by frame at `start + n·Δ`. The engines only
//! differ in how the frames are scheduled.

use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::{
    model::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, StereoValue},
    note::{Note, NotePhase, Voice},
};

#[cfg(feature = "gpu")]
pub mod gpu;
pub mod parallel;
pub mod sequential;

#[cfg(feature = "gpu")]
pub use gpu::GpuEngine;
pub use parallel::{ParallelEngine, WorkerPool};
pub use sequential::SequentialEngine;

pub const STEREO_CHANNELS: u16 = 2;
pub const DEFAULT_PARTITION_FRAMES: usize = 256;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported output format: {channels} channels at {sample_rate} Hz")]
    InvalidFormat { channels: u16, sample_rate: u32 },
    #[error("engine has not been initialized")]
    NotInitialized,
    #[error("invalid render range {from}..{to} for buffer of {len} samples")]
    InvalidRange { from: usize, to: usize, len: usize },
    #[error("worker pool error: {0}")]
    WorkerPool(String),
    #[error("gpu error: {0}")]
    Gpu(String),
    #[error("wavetable built for {found} Hz cannot render at {expected} Hz")]
    TableRateMismatch { expected: u32, found: u32 },
    #[error("engine {0} is not available in this build")]
    Unavailable(EngineKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for RenderFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
        }
    }
}

impl RenderFormat {
    #[must_use]
    pub fn stereo(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: STEREO_CHANNELS,
        }
    }

    pub fn validate(self) -> Result<Self, EngineError> {
        if self.channels != STEREO_CHANNELS || self.sample_rate == 0 {
            return Err(EngineError::InvalidFormat {
                channels: self.channels,
                sample_rate: self.sample_rate,
            });
        }
        Ok(self)
    }

    #[must_use]
    pub fn time_delta(self) -> f64 {
        1.0 / f64::from(self.sample_rate.max(1))
    }
}

/// Per-channel peak magnitude of one render pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PeakLevels {
    pub left: f32,
    pub right: f32,
}

impl PeakLevels {
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            left: self.left.max(other.left),
            right: self.right.max(other.right),
        }
    }

    fn track(&mut self, left: f32, right: f32) {
        self.left = self.left.max(left.abs());
        self.right = self.right.max(right.abs());
    }
}

/// Engine-local sample clock. Time is always derived from the frame count
/// so every strategy computes bit-identical sample times.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderClock {
    format: Option<RenderFormat>,
    frames_rendered: u64,
}

impl RenderClock {
    pub fn reset(&mut self, format: RenderFormat) -> Result<(), EngineError> {
        self.format = Some(format.validate()?);
        self.frames_rendered = 0;
        Ok(())
    }

    #[must_use]
    pub fn format(&self) -> Option<RenderFormat> {
        self.format
    }

    #[must_use]
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    #[must_use]
    pub fn time_delta(&self) -> f64 {
        self.format.map_or(0.0, RenderFormat::time_delta)
    }

    #[must_use]
    pub fn time(&self) -> f64 {
        self.frames_rendered as f64 * self.time_delta()
    }

    /// Checks the range and returns the frame span to render.
    pub fn prepare(
        &self,
        buffer_len: usize,
        from: usize,
        to: usize,
    ) -> Result<FrameSpan, EngineError> {
        let format = self.format.ok_or(EngineError::NotInitialized)?;
        if from > to || to > buffer_len || from % 2 != 0 || (to - from) % 2 != 0 {
            return Err(EngineError::InvalidRange {
                from,
                to,
                len: buffer_len,
            });
        }
        Ok(FrameSpan {
            first_frame: self.frames_rendered,
            frames: (to - from) / 2,
            time_delta: format.time_delta(),
            sample_rate: format.sample_rate,
        })
    }

    pub fn advance(&mut self, frames: usize) {
        self.frames_rendered += frames as u64;
    }
}

/// The frames of one render pass.
#[derive(Debug, Clone, Copy)]
pub struct FrameSpan {
    pub first_frame: u64,
    pub frames: usize,
    pub time_delta: f64,
    pub sample_rate: u32,
}

impl FrameSpan {
    #[must_use]
    pub fn start_time(&self) -> f64 {
        self.time_at(0)
    }

    #[must_use]
    pub fn time_at(&self, offset: usize) -> f64 {
        (self.first_frame + offset as u64) as f64 * self.time_delta
    }
}

/// Advances every note once at `time` and snapshots the ones that have
/// started.
#[must_use]
pub fn begin_pass(notes: &[Arc<Note>], time: f64) -> Vec<Voice> {
    notes
        .iter()
        .filter_map(|note| match note.update_phase(time) {
            NotePhase::Init => None,
            _ => Some(note.voice()),
        })
        .collect()
}

#[must_use]
pub fn mix_voices(voices: &[Voice], time: f64) -> StereoValue {
    voices
        .iter()
        .fold(StereoValue::SILENT, |sum, voice| sum + voice.value(time))
}

/// Writes `out.len() / 2` frames starting `frame_offset` frames into `span`.
pub fn render_frames(
    voices: &[Voice],
    out: &mut [f32],
    span: &FrameSpan,
    frame_offset: usize,
    master_volume: f64,
) -> PeakLevels {
    let mut peaks = PeakLevels::default();
    for (index, frame) in out.chunks_exact_mut(2).enumerate() {
        let value = mix_voices(voices, span.time_at(frame_offset + index)) * master_volume;
        let (left, right) = (value.left as f32, value.right as f32);
        frame[0] = left;
        frame[1] = right;
        peaks.track(left, right);
    }
    peaks
}

pub trait RenderEngine: Send {
    fn kind(&self) -> EngineKind;

    fn name(&self) -> &'static str {
        self.kind().display_name()
    }

    /// Validates the format and resets the engine clock.
    fn init(&mut self, format: RenderFormat) -> Result<(), EngineError>;

    /// Fills `buffer[from..to]` with the mix of `notes` and returns the
    /// peaks of the written range.
    fn read(
        &mut self,
        notes: &[Arc<Note>],
        buffer: &mut [f32],
        from: usize,
        to: usize,
        master_volume: f64,
    ) -> Result<PeakLevels, EngineError>;

    /// Seconds rendered since the last `init`.
    fn time(&self) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Sequential,
    Parallel,
    Gpu,
}

impl EngineKind {
    pub const ALL: [Self; 3] = [Self::Sequential, Self::Parallel, Self::Gpu];

    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Gpu => "gpu",
        }
    }

    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Sequential => "Singlethread",
            Self::Parallel => "Multithread",
            Self::Gpu => "GPU",
        }
    }

    #[must_use]
    pub fn is_compiled(self) -> bool {
        match self {
            Self::Sequential | Self::Parallel => true,
            Self::Gpu => cfg!(feature = "gpu"),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| {
                kind.id().eq_ignore_ascii_case(value)
                    || kind.display_name().eq_ignore_ascii_case(value)
            })
            .ok_or_else(|| format!("unknown engine: {value}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,
    /// Zero lets the pool size itself from the available cores.
    pub worker_threads: usize,
    /// Frames per parallel task. Zero renders each pass as one partition.
    pub partition_frames: usize,
    pub gpu_fallback: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Parallel,
            worker_threads: 0,
            partition_frames: DEFAULT_PARTITION_FRAMES,
            gpu_fallback: true,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_kind(kind: EngineKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }
}

#[instrument(skip(config), fields(kind = %config.kind))]
pub fn create_engine(config: &EngineConfig) -> Result<Box<dyn RenderEngine>, EngineError> {
    let engine: Box<dyn RenderEngine> = match config.kind {
        EngineKind::Sequential => Box::new(SequentialEngine::default()),
        EngineKind::Parallel => Box::new(ParallelEngine::new(WorkerPool::new(
            config.worker_threads,
            config.partition_frames,
        )?)),
        #[cfg(feature = "gpu")]
        EngineKind::Gpu => Box::new(GpuEngine::new()?),
        #[cfg(not(feature = "gpu"))]
        EngineKind::Gpu => return Err(EngineError::Unavailable(EngineKind::Gpu)),
    };
    debug!(engine = engine.name(), "engine created");
    Ok(engine)
}

/// Like [`create_engine`], but a failed GPU engine is replaced by the
/// parallel CPU engine when `gpu_fallback` is set.
pub fn create_engine_with_fallback(
    config: &EngineConfig,
) -> Result<Box<dyn RenderEngine>, EngineError> {
    match create_engine(config) {
        Ok(engine) => Ok(engine),
        Err(error) if config.kind == EngineKind::Gpu && config.gpu_fallback => {
            warn!(%error, "gpu engine unavailable, falling back to parallel engine");
            let engine = create_engine(&EngineConfig {
                kind: EngineKind::Parallel,
                ..config.clone()
            })?;
            info!(engine = engine.name(), "fallback engine created");
            Ok(engine)
        }
        Err(error) => Err(error),
    }
}
