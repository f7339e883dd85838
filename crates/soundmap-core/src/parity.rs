use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use crate::{
    fixtures::{RenderScenario, ScenarioAction},
    mixer::Mixer,
    render::{EngineConfig, EngineKind, RenderEngine, create_engine},
};

const PARITY_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineParity {
    pub kind: EngineKind,
    pub name: String,
    pub audio_hash: String,
    pub peak: f32,
    /// Largest sample difference against the first engine in the report.
    pub max_abs_diff: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedEngine {
    pub kind: EngineKind,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParityReport {
    pub schema_version: u32,
    pub scenario: String,
    pub sample_rate: u32,
    pub frames: u64,
    pub engines: Vec<EngineParity>,
    pub skipped: Vec<SkippedEngine>,
    pub max_abs_diff: f32,
}

/// Plays `scenario` through a fresh mixer driven by `engine`, one block at a
/// time, and returns the interleaved output.
#[instrument(skip(scenario, engine), fields(scenario = %scenario.name, engine = engine.name()))]
pub fn render_scenario(
    scenario: &RenderScenario,
    engine: Box<dyn RenderEngine>,
) -> Result<Vec<f32>> {
    let mixer = Mixer::new(scenario.name.clone());
    mixer.set_envelope_preset(scenario.envelope);
    mixer
        .set_master_volume(scenario.master_volume)
        .context("scenario master volume is invalid")?;
    for point in scenario.oscillators.points() {
        mixer
            .add_point(point.clone())
            .with_context(|| format!("scenario sound point {} is invalid", point.id))?;
    }
    mixer
        .start_playback(scenario.format, engine)
        .context("failed to start scenario playback")?;

    let channels = usize::from(scenario.format.channels);
    let total_frames = usize::try_from(scenario.total_frames)
        .context("scenario is too long for this platform")?;
    let block_frames = scenario.block_frames.max(1);
    let mut output = vec![0.0_f32; total_frames * channels];

    let mut previous = None;
    for first_frame in (0..total_frames).step_by(block_frames) {
        let frame = first_frame as u64;
        for event in scenario.events_between(previous, frame) {
            match event.action {
                ScenarioAction::NoteOn {
                    key,
                    pitch,
                    velocity,
                } => {
                    mixer
                        .note_on(key, pitch, velocity)
                        .with_context(|| format!("note on at frame {} failed", event.frame))?;
                }
                ScenarioAction::NoteOff { key } => {
                    mixer.note_off(&key);
                }
            }
        }
        previous = Some(frame);

        let frames = block_frames.min(total_frames - first_frame);
        mixer
            .read(&mut output, first_frame * channels, frames * channels)
            .with_context(|| format!("render failed at frame {first_frame}"))?;
    }

    mixer.stop_playback();
    Ok(output)
}

/// Renders `scenario` through every engine that can be built here. Engines
/// that fail to initialize are listed as skipped.
#[instrument(skip(scenario, base), fields(scenario = %scenario.name))]
pub fn generate_parity_report(
    scenario: &RenderScenario,
    base: &EngineConfig,
) -> Result<ParityReport> {
    let mut engines = Vec::new();
    let mut skipped = Vec::new();
    let mut reference: Option<Vec<f32>> = None;

    for kind in EngineKind::ALL {
        let engine = match create_engine(&EngineConfig {
            kind,
            ..base.clone()
        }) {
            Ok(engine) => engine,
            Err(error) => {
                warn!(%kind, %error, "engine skipped");
                skipped.push(SkippedEngine {
                    kind,
                    reason: error.to_string(),
                });
                continue;
            }
        };
        let name = engine.name().to_string();
        let samples = render_scenario(scenario, engine)?;

        let diff = reference
            .as_deref()
            .map_or(0.0, |reference| max_abs_diff(reference, &samples));
        engines.push(EngineParity {
            kind,
            name,
            audio_hash: audio_hash(&samples),
            peak: samples.iter().fold(0.0_f32, |peak, sample| peak.max(sample.abs())),
            max_abs_diff: diff,
        });
        if reference.is_none() {
            reference = Some(samples);
        }
    }

    let worst = engines
        .iter()
        .fold(0.0_f32, |max, engine| max.max(engine.max_abs_diff));
    info!(
        engines = engines.len(),
        skipped = skipped.len(),
        max_abs_diff = worst,
        "parity report built"
    );

    Ok(ParityReport {
        schema_version: PARITY_SCHEMA_VERSION,
        scenario: scenario.name.clone(),
        sample_rate: scenario.format.sample_rate,
        frames: scenario.total_frames,
        engines,
        skipped,
        max_abs_diff: worst,
    })
}

pub fn read_parity_report(path: &Path) -> Result<ParityReport> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read parity report: {}", path.display()))?;
    let report: ParityReport =
        serde_json::from_slice(&bytes).context("failed to parse parity report json")?;
    Ok(report)
}

pub fn write_parity_report(path: &Path, report: &ParityReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parity directory: {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(report).context("failed to encode parity report json")?;
    fs::write(path, json)
        .with_context(|| format!("failed to write parity report: {}", path.display()))?;
    Ok(())
}

/// SHA-256 over the samples quantized to 16 bits.
#[must_use]
pub fn audio_hash(samples: &[f32]) -> String {
    let mut hasher = Sha256::new();
    for sample in samples {
        let quantized = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
        hasher.update(quantized.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[must_use]
pub fn max_abs_diff(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() {
        return f32::INFINITY;
    }
    left.iter()
        .zip(right)
        .fold(0.0_f32, |max, (left, right)| max.max((left - right).abs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_of_mismatched_lengths_is_infinite() {
        assert_eq!(max_abs_diff(&[0.0, 0.5], &[0.0, 0.25]), 0.25);
        assert!(max_abs_diff(&[0.0], &[0.0, 0.0]).is_infinite());
    }

    #[test]
    fn hash_ignores_differences_below_quantization() {
        assert_eq!(audio_hash(&[0.25, -0.5]), audio_hash(&[0.250_001, -0.5]));
        assert_ne!(audio_hash(&[0.5, -0.5]), audio_hash(&[0.25, -0.5]));
    }
}
