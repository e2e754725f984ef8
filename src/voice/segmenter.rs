//! Energy-based utterance segmentation
//!
//! Splits a microphone stream into one utterance: speech onset when the RMS
//! energy of a chunk crosses the threshold, end of utterance after enough
//! trailing silence.

/// Minimum RMS energy to count a chunk as speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum utterance length (0.3 s at 16 kHz)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Trailing silence that ends an utterance (0.5 s at 16 kHz)
const SILENCE_SAMPLES: usize = 8000;

/// Where the segmenter is in the current utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// No speech yet
    Waiting,
    /// Speech onset seen, accumulating
    Speaking,
    /// Enough speech followed by enough silence
    Complete,
}

/// Accumulates one utterance from successive sample chunks
#[derive(Debug)]
pub struct UtteranceSegmenter {
    state: SegmenterState,
    buffer: Vec<f32>,
    silence: usize,
}

impl Default for UtteranceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl UtteranceSegmenter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SegmenterState::Waiting,
            buffer: Vec::new(),
            silence: 0,
        }
    }

    /// Feed a chunk of samples
    pub fn push(&mut self, samples: &[f32]) -> SegmenterState {
        if samples.is_empty() {
            return self.state;
        }

        let energy = rms_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            SegmenterState::Waiting => {
                if is_speech {
                    self.state = SegmenterState::Speaking;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(samples);
                    self.silence = 0;
                    tracing::trace!(energy, "speech onset");
                }
            }
            SegmenterState::Speaking => {
                self.buffer.extend_from_slice(samples);
                if is_speech {
                    self.silence = 0;
                } else {
                    self.silence += samples.len();
                }

                if self.silence > SILENCE_SAMPLES {
                    if self.buffer.len() > MIN_SPEECH_SAMPLES + self.silence {
                        tracing::debug!(samples = self.buffer.len(), "utterance complete");
                        self.state = SegmenterState::Complete;
                    } else {
                        // A click or cough, not an utterance
                        tracing::trace!("speech too short, discarding");
                        self.reset();
                    }
                }
            }
            SegmenterState::Complete => {}
        }

        self.state
    }

    /// Take whatever speech has been accumulated, if any
    ///
    /// Used both for a complete utterance and to flush on a graceful stop.
    pub fn take_utterance(&mut self) -> Option<Vec<f32>> {
        let utterance = match self.state {
            SegmenterState::Waiting => None,
            SegmenterState::Speaking | SegmenterState::Complete => {
                Some(std::mem::take(&mut self.buffer))
            }
        };
        self.reset();
        utterance
    }

    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state = SegmenterState::Waiting;
        self.buffer.clear();
        self.silence = 0;
    }
}

/// RMS energy of a chunk
#[allow(clippy::cast_precision_loss)]
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: usize = 1600;

    #[test]
    fn test_energy_calculation() {
        assert!(rms_energy(&[0.0; 100]) < 0.001);
        assert!(rms_energy(&[0.5; 100]) > 0.4);
        assert!(rms_energy(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_speech_then_silence_completes() {
        let mut segmenter = UtteranceSegmenter::new();
        assert_eq!(segmenter.push(&[0.0; CHUNK]), SegmenterState::Waiting);

        for _ in 0..5 {
            assert_eq!(segmenter.push(&[0.2; CHUNK]), SegmenterState::Speaking);
        }
        let mut state = SegmenterState::Speaking;
        for _ in 0..6 {
            state = segmenter.push(&[0.0; CHUNK]);
        }
        assert_eq!(state, SegmenterState::Complete);

        let utterance = segmenter.take_utterance().unwrap();
        assert_eq!(utterance.len(), 11 * CHUNK);
        assert_eq!(segmenter.state(), SegmenterState::Waiting);
    }

    #[test]
    fn test_short_blip_is_discarded() {
        let mut segmenter = UtteranceSegmenter::new();
        segmenter.push(&[0.2; 400]);
        for _ in 0..6 {
            segmenter.push(&[0.0; CHUNK]);
        }
        assert_eq!(segmenter.state(), SegmenterState::Waiting);
        assert!(segmenter.take_utterance().is_none());
    }

    #[test]
    fn test_flush_mid_utterance() {
        let mut segmenter = UtteranceSegmenter::new();
        segmenter.push(&[0.2; CHUNK]);
        assert_eq!(segmenter.take_utterance().map(|u| u.len()), Some(CHUNK));
    }
}
