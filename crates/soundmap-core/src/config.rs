use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    envelope::EnvelopePreset,
    fixtures::RenderScenario,
    model::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE},
    recorder::DEFAULT_QUEUE_BLOCKS,
    render::{EngineConfig, RenderFormat},
};

pub const CONFIG_FILE_NAME: &str = "soundmap.config.toml";
pub const CONFIG_PATH_ENV: &str = "SOUNDMAP_CONFIG_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SoundmapConfig {
    pub audio: AudioConfig,
    pub engine: EngineConfig,
    pub envelope: EnvelopeConfig,
    pub recording: RecordingConfig,
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub master_volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvelopeConfig {
    pub preset: EnvelopePreset,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RecordingConfig {
    pub queue_blocks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub rust_log_filter: String,
    pub trace_file_prefix: String,
    pub log_dir: PathBuf,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            master_volume: 1.0,
        }
    }
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            preset: EnvelopePreset::Fast,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            queue_blocks: DEFAULT_QUEUE_BLOCKS,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rust_log_filter: "info,soundmap_core=trace".to_string(),
            trace_file_prefix: "soundmap".to_string(),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl AudioConfig {
    #[must_use]
    pub fn format(&self) -> RenderFormat {
        RenderFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
        }
    }
}

impl SoundmapConfig {
    /// Loads the first config file found in the lookup order and fails when
    /// none exists.
    pub fn load() -> Result<Self> {
        let config_path = discover_config_path()?.with_context(|| {
            format!("failed to locate {CONFIG_FILE_NAME}; looked in cwd and parent directory")
        })?;
        Self::from_path(&config_path)
    }

    /// Like [`SoundmapConfig::load`], but a missing file yields the defaults.
    /// A file that exists and fails to parse is still an error.
    pub fn load_or_default() -> Result<Self> {
        match discover_config_path()? {
            Some(path) => Self::from_path(&path),
            None => {
                debug!("no config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Renders `scenario` with the configured format, master volume and
    /// envelope preset.
    #[must_use]
    pub fn apply_to_scenario(&self, scenario: RenderScenario) -> RenderScenario {
        let mut scenario = scenario.resampled(self.audio.sample_rate);
        scenario.format.channels = self.audio.channels;
        scenario.master_volume = self.audio.master_volume;
        scenario.envelope = self.envelope.preset;
        scenario
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config TOML from {}", path.display()))?;
        info!(path = %path.display(), engine = %config.engine.kind, "config loaded");
        Ok(config)
    }
}

fn discover_config_path() -> Result<Option<PathBuf>> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(Some(path));
        }
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [
        cwd.join(CONFIG_FILE_NAME),
        cwd.join("..").join(CONFIG_FILE_NAME),
    ];

    Ok(candidates.into_iter().find(|path| path.is_file()))
}
