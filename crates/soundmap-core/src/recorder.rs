use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Sender, TrySendError, bounded};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::render::RenderFormat;

pub const DEFAULT_QUEUE_BLOCKS: usize = 64;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("recording writer thread panicked")]
    WriterPanicked,
    #[error("recording already finished")]
    Finished,
}

/// Destination for rendered blocks. `write_block` runs on the render thread
/// and must not block.
pub trait RecordingSink: Send + Sync {
    fn write_block(&self, samples: &[f32]);

    fn dropped_blocks(&self) -> u64 {
        0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    pub path: PathBuf,
    pub samples_written: u64,
    pub dropped_blocks: u64,
}

type WriterHandle = JoinHandle<Result<u64, RecorderError>>;

/// Streams interleaved f32 blocks to a WAV file from a writer thread. Blocks
/// that do not fit in the bounded queue are dropped and counted.
pub struct WavRecorder {
    path: PathBuf,
    sender: Mutex<Option<Sender<Vec<f32>>>>,
    writer: Mutex<Option<WriterHandle>>,
    dropped: AtomicU64,
}

impl std::fmt::Debug for WavRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavRecorder")
            .field("path", &self.path)
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl WavRecorder {
    #[instrument(
        skip(path, format),
        fields(path = %path.as_ref().display(), sample_rate = format.sample_rate)
    )]
    pub fn create(
        path: impl AsRef<Path>,
        format: RenderFormat,
        queue_blocks: usize,
    ) -> Result<Self, RecorderError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec)?;
        let (sender, receiver) = bounded::<Vec<f32>>(queue_blocks.max(1));

        let handle = thread::Builder::new()
            .name("soundmap-recorder".to_string())
            .spawn(move || -> Result<u64, RecorderError> {
                let mut written = 0_u64;
                for block in receiver {
                    for sample in block {
                        writer.write_sample(sample)?;
                    }
                    written = writer.len().into();
                }
                writer.finalize()?;
                Ok(written)
            })?;

        info!("recording started");
        Ok(Self {
            path,
            sender: Mutex::new(Some(sender)),
            writer: Mutex::new(Some(handle)),
            dropped: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the queue, waits for the writer to drain it and finalizes the
    /// WAV header.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn finish(&self) -> Result<RecordingSummary, RecorderError> {
        drop(self.sender.lock().take());
        let handle = self.writer.lock().take().ok_or(RecorderError::Finished)?;
        let samples_written = handle.join().map_err(|_| RecorderError::WriterPanicked)??;
        let summary = RecordingSummary {
            path: self.path.clone(),
            samples_written,
            dropped_blocks: self.dropped.load(Ordering::Relaxed),
        };
        info!(
            samples = summary.samples_written,
            dropped = summary.dropped_blocks,
            "recording finished"
        );
        Ok(summary)
    }
}

impl RecordingSink for WavRecorder {
    fn write_block(&self, samples: &[f32]) {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return;
        };
        match sender.try_send(samples.to_vec()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "recording queue full, block dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("recording writer gone, block discarded");
            }
        }
    }

    fn dropped_blocks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for WavRecorder {
    fn drop(&mut self) {
        if self.writer.get_mut().is_none() {
            return;
        }
        if let Err(error) = self.finish() {
            warn!(%error, "recording did not finish cleanly");
        }
    }
}

/// Keeps every block in memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    samples: Mutex<Vec<f32>>,
}

impl MemoryRecorder {
    #[must_use]
    pub fn samples(&self) -> Vec<f32> {
        self.samples.lock().clone()
    }
}

impl RecordingSink for MemoryRecorder {
    fn write_block(&self, samples: &[f32]) {
        self.samples.lock().extend_from_slice(samples);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_recorder_writes_float_samples() {
        let temp = tempfile::tempdir().expect("tempdir should work");
        let path = temp.path().join("take.wav");
        let recorder = WavRecorder::create(&path, RenderFormat::stereo(8_000), 4)
            .expect("recorder should start");
        recorder.write_block(&[0.25, -0.25, 0.5, -0.5]);
        let summary = recorder.finish().expect("recording should finish");
        assert_eq!(summary.samples_written, 4);

        let reader = hound::WavReader::open(&path).expect("wav should open");
        assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);
        let samples: Vec<f32> = reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .expect("samples should decode");
        assert_eq!(samples, vec![0.25, -0.25, 0.5, -0.5]);
    }

    #[test]
    fn finishing_twice_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir should work");
        let recorder =
            WavRecorder::create(temp.path().join("twice.wav"), RenderFormat::stereo(8_000), 1)
                .expect("recorder should start");
        recorder.finish().expect("first finish should work");
        assert!(matches!(recorder.finish(), Err(RecorderError::Finished)));
    }
}
