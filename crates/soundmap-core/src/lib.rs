pub mod config;
pub mod control_points;
pub mod diagnostics;
pub mod envelope;
pub mod fixtures;
pub mod interpolator;
pub mod metrics;
pub mod mixer;
pub mod model;
pub mod note;
pub mod parity;
pub mod recorder;
pub mod render;
pub mod time;
pub mod waveform;

pub use config::SoundmapConfig;
pub use control_points::{ControlPoint, ControlPoints};
pub use diagnostics::{
    TelemetryGuard, init_tracing, init_tracing_from_config, init_tracing_with_options,
};
pub use envelope::{Envelope, EnvelopePreset};
pub use interpolator::{AkimaSpline, InterpolationError, Interpolator};
pub use metrics::{MetricsObserver, MixerStatus};
pub use mixer::{Mixer, MixerError, NoteSource};
pub use model::{
    DEFAULT_SAMPLE_RATE, OscillatorSet, SoundPoint, SoundPointPatch, StereoValue,
};
pub use note::{Note, NoteKey, NotePhase, NotePoint, Voice};
pub use parity::{ParityReport, generate_parity_report};
pub use recorder::{MemoryRecorder, RecorderError, RecordingSink, WavRecorder};
pub use render::{
    EngineConfig, EngineError, EngineKind, PeakLevels, RenderEngine, RenderFormat,
    create_engine, create_engine_with_fallback,
};
pub use waveform::{Waveform, WaveformBank, WaveformError, WaveformId, Wavetable, WavetableCache};
