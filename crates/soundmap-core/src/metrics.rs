use std::fmt;

use serde::{Deserialize, Serialize};

use crate::render::PeakLevels;

/// Snapshot of the mixer after the most recent render pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MixerStatus {
    pub name: String,
    pub engine: Option<String>,
    pub load_percent: f64,
    pub buffer_ms: f64,
    pub peaks: PeakLevels,
    pub overloaded: bool,
    pub overload_count: u64,
    pub active_notes: usize,
    pub recording: bool,
    pub dropped_recording_blocks: u64,
}

impl fmt::Display for MixerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(engine) = &self.engine else {
            return write!(f, "{}, stopped", self.name);
        };
        write!(
            f,
            "{} [{engine}], load: {:.0}% ({:.1} ms)",
            self.name, self.load_percent, self.buffer_ms
        )?;
        if self.overloaded {
            f.write_str(" OVERLOAD")?;
        }
        if self.recording {
            f.write_str(" Recording...")?;
        }
        Ok(())
    }
}

/// Receives a status snapshot after every render pass. Called on the render
/// thread, so implementations must return quickly.
pub trait MetricsObserver: Send + Sync {
    fn on_render(&self, status: &MixerStatus);
}

impl<F> MetricsObserver for F
where
    F: Fn(&MixerStatus) + Send + Sync,
{
    fn on_render(&self, status: &MixerStatus) {
        self(status);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LoadSample {
    pub load_percent: f64,
    pub buffer_ms: f64,
}

impl LoadSample {
    /// Render time relative to the real-time length of the rendered buffer.
    pub(crate) fn measure(elapsed_secs: f64, buffer_secs: f64) -> Self {
        let load_percent = if buffer_secs > 0.0 {
            elapsed_secs / buffer_secs * 100.0
        } else {
            0.0
        };
        Self {
            load_percent,
            buffer_ms: buffer_secs * 1_000.0,
        }
    }

    pub(crate) fn is_overload(self) -> bool {
        self.load_percent > 100.0
    }
}
