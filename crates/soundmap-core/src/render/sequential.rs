use std::sync::Arc;

use tracing::trace;

use super::{
    EngineError, EngineKind, PeakLevels, RenderClock, RenderEngine, RenderFormat, begin_pass,
    render_frames,
};
use crate::note::Note;

/// Renders every frame in order on the calling thread.
#[derive(Debug, Default)]
pub struct SequentialEngine {
    clock: RenderClock,
}

impl RenderEngine for SequentialEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Sequential
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
        let peaks = render_frames(&voices, &mut buffer[from..to], &span, 0, master_volume);
        self.clock.advance(span.frames);
        trace!(frames = span.frames, voices = voices.len(), "sequential pass rendered");
        Ok(peaks)
    }

    fn time(&self) -> f64 {
        self.clock.time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        envelope::Envelope,
        note::{NoteKey, NotePoint},
    };

    #[test]
    fn silent_without_notes() {
        let mut engine = SequentialEngine::default();
        engine.init(RenderFormat::stereo(8_000)).expect("init should work");
        let mut buffer = vec![1.0_f32; 16];
        let peaks = engine.read(&[], &mut buffer, 0, 16, 1.0).expect("read should work");
        assert!(buffer.iter().all(|sample| *sample == 0.0));
        assert_eq!(peaks, PeakLevels::default());
        assert!((engine.time() - 8.0 / 8_000.0).abs() < 1e-15);
    }

    #[test]
    fn writes_only_the_requested_range() {
        let mut engine = SequentialEngine::default();
        engine.init(RenderFormat::stereo(8_000)).expect("init should work");
        let note = Arc::new(Note::new(
            NoteKey::Midi(69),
            vec![NotePoint::sine(440.0, 1.0)],
            Envelope::new(0.0, 0.0, 1.0, 0.1),
            1.0,
        ));
        note.request_play();

        let mut buffer = vec![9.0_f32; 20];
        engine.read(&[note], &mut buffer, 4, 16, 0.5).expect("read should work");
        assert!(buffer[..4].iter().all(|sample| *sample == 9.0));
        assert!(buffer[16..].iter().all(|sample| *sample == 9.0));
        assert!(buffer[4..16].iter().all(|sample| sample.abs() <= 0.5));
    }
}
