use std::{fmt, sync::Arc};

use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};
use tracing::{info, trace};

use super::{
    EngineError, EngineKind, FrameSpan, PeakLevels, RenderClock, RenderEngine, RenderFormat,
    begin_pass, render_frames,
};
use crate::note::{Note, Voice};

/// Dedicated rayon pool that splits a pass into fixed-size frame partitions.
pub struct WorkerPool {
    pool: ThreadPool,
    partition_frames: usize,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.pool.current_num_threads())
            .field("partition_frames", &self.partition_frames)
            .finish()
    }
}

impl WorkerPool {
    /// `threads == 0` sizes the pool from the available cores.
    /// `partition_frames == 0` renders each pass as a single partition.
    pub fn new(threads: usize, partition_frames: usize) -> Result<Self, EngineError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("soundmap-render-{index}"))
            .build()
            .map_err(|error| EngineError::WorkerPool(error.to_string()))?;
        info!(
            threads = pool.current_num_threads(),
            partition_frames, "render worker pool started"
        );
        Ok(Self {
            pool,
            partition_frames,
        })
    }

    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    #[must_use]
    pub fn partition_frames(&self) -> usize {
        self.partition_frames
    }

    fn partition_len(&self, frames: usize) -> usize {
        let frames_per_task = if self.partition_frames == 0 {
            frames
        } else {
            self.partition_frames
        };
        frames_per_task.max(1) * 2
    }

    /// Renders the span into `out`, one task per partition, and returns once
    /// every partition has finished.
    pub fn render(
        &self,
        voices: &[Voice],
        out: &mut [f32],
        span: &FrameSpan,
        master_volume: f64,
    ) -> PeakLevels {
        let partition_len = self.partition_len(span.frames);
        let frames_per_task = partition_len / 2;
        self.pool.install(|| {
            out.par_chunks_mut(partition_len)
                .enumerate()
                .map(|(index, chunk)| {
                    render_frames(voices, chunk, span, index * frames_per_task, master_volume)
                })
                .reduce(PeakLevels::default, PeakLevels::merge)
        })
    }
}

#[derive(Debug)]
pub struct ParallelEngine {
    clock: RenderClock,
    pool: WorkerPool,
}

impl ParallelEngine {
    #[must_use]
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            clock: RenderClock::default(),
            pool,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

impl RenderEngine for ParallelEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Parallel
    }

    fn init(&mut self, format: RenderFormat) -> Result<(), EngineError> {
        self.clock.reset(format)
    }

    fn read(
        &mut self,
        notes: &[Arc<Note>],
        buffer: &mut [f32],
        from: usize,
        to: usize,
        master_volume: f64,
    ) -> Result<PeakLevels, EngineError> {
        let span = self.clock.prepare(buffer.len(), from, to)?;
        let voices = begin_pass(notes, span.start_time());
        let peaks = self
            .pool
            .render(&voices, &mut buffer[from..to], &span, master_volume);
        self.clock.advance(span.frames);
        trace!(frames = span.frames, voices = voices.len(), "parallel pass rendered");
        Ok(peaks)
    }

    fn time(&self) -> f64 {
        self.clock.time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_partition_size_means_one_partition() {
        let pool = WorkerPool::new(2, 0).expect("pool should build");
        assert_eq!(pool.partition_len(300), 600);
        assert_eq!(pool.partition_len(0), 2);
    }

    #[test]
    fn explicit_partition_size_is_in_frames() {
        let pool = WorkerPool::new(1, 64).expect("pool should build");
        assert_eq!(pool.threads(), 1);
        assert_eq!(pool.partition_len(1_000), 128);
    }
}
