#[must_use]
pub fn frames_to_seconds(frames: u64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }

    frames as f64 / f64::from(sample_rate)
}

/// Real-time length of an interleaved buffer of `samples` values.
#[must_use]
pub fn buffer_seconds(samples: usize, channels: u16, sample_rate: u32) -> f64 {
    if channels == 0 {
        return 0.0;
    }

    let frames = samples / usize::from(channels);
    frames_to_seconds(frames as u64, sample_rate)
}

/// Semitone offset to frequency multiplier.
#[must_use]
pub fn semitones_to_pitch(semitones: f64) -> f64 {
    (semitones / 12.0).exp2()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_has_no_duration() {
        assert_eq!(frames_to_seconds(48_000, 48_000), 1.0);
        assert_eq!(frames_to_seconds(48_000, 0), 0.0);
    }

    #[test]
    fn stereo_buffer_length_counts_frames() {
        let seconds = buffer_seconds(882, 2, 44_100);
        assert!((seconds - 0.01).abs() < 1e-12);
        assert_eq!(buffer_seconds(882, 0, 44_100), 0.0);
    }

    #[test]
    fn octave_doubles_pitch() {
        assert!((semitones_to_pitch(12.0) - 2.0).abs() < 1e-12);
        assert!((semitones_to_pitch(-12.0) - 0.5).abs() < 1e-12);
    }
}
