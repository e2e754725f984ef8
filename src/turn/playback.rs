//! Speech playback with word-synchronized captions
//!
//! At most one playback is in flight. Starting a new one cancels the old one,
//! and every report carries the playback id so stale boundaries are dropped.
//! When a playback finishes, successfully or not, the caption is cleared and
//! a single re-arm signal is scheduled after the settle delay.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::event::Event;
use crate::mood::SpeechStyleProfile;
use crate::SynthesisError;

/// Words per second at rate 1.0 for caption-only pacing
const CAPTION_WORDS_PER_SEC: f32 = 2.5;

/// Text handed to a speech device
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Full text to speak
    pub text: String,
    /// Number of word boundaries the caption expects
    pub word_count: usize,
    /// Prosody to apply
    pub profile: SpeechStyleProfile,
    /// Voice picked from [`SpeechDevice::voices`]
    pub voice: String,
}

/// Host speech synthesizer
///
/// After `speak` returns `Ok`, the device reports `started`, one
/// `word_boundary` per word, and exactly one of `ended` / `failed` /
/// `degraded` through the sink.
pub trait SpeechDevice: Send {
    /// Voices this device can speak with; empty when no voice is available
    fn voices(&self) -> Vec<String>;

    /// Begin speaking
    ///
    /// # Errors
    ///
    /// Returns error if synthesis cannot start at all
    fn speak(&mut self, utterance: Utterance, sink: PlaybackSink) -> Result<(), SynthesisError>;

    /// Stop the current utterance immediately
    fn cancel(&mut self);
}

/// What a speech device reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackSignal {
    /// Audio began
    Started,
    /// The next word is about to be heard
    WordBoundary,
    /// Audio played to the end
    Ended,
    /// Audio failed mid-way
    Failed(SynthesisError),
    /// Audio unavailable; finish as a caption-only pass
    Degraded,
}

/// Channel a device reports into, tagged with the playback id
#[derive(Debug, Clone)]
pub struct PlaybackSink {
    id: u64,
    tx: mpsc::UnboundedSender<Event>,
}

impl PlaybackSink {
    /// Sink reporting into `tx` as playback `id`
    #[must_use]
    pub const fn new(id: u64, tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { id, tx }
    }

    pub fn started(&self) {
        self.send(PlaybackSignal::Started);
    }

    pub fn word_boundary(&self) {
        self.send(PlaybackSignal::WordBoundary);
    }

    pub fn ended(&self) {
        self.send(PlaybackSignal::Ended);
    }

    pub fn failed(&self, error: SynthesisError) {
        self.send(PlaybackSignal::Failed(error));
    }

    pub fn degraded(&self) {
        self.send(PlaybackSignal::Degraded);
    }

    fn send(&self, signal: PlaybackSignal) {
        let _ = self.tx.send(Event::Playback {
            id: self.id,
            signal,
        });
    }
}

/// Playback report that matters to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Audio began
    Started,
    /// Word `index` is now visible; `caption` is the text revealed so far
    Word { index: usize, caption: String },
    /// Playback is over and re-arm is scheduled
    Finished { error: Option<SynthesisError> },
}

/// Split text into caption words
#[must_use]
pub fn segment_words(text: &str) -> Vec<String> {
    text.split_whitespace().map(ToString::to_string).collect()
}

/// Interval between caption words for a profile
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn word_interval(profile: &SpeechStyleProfile) -> Duration {
    let rate = if profile.rate.is_finite() && profile.rate > 0.0 {
        profile.rate
    } else {
        1.0
    };
    let millis = (1000.0 / (CAPTION_WORDS_PER_SEC * rate)).round();
    Duration::from_millis(millis as u64)
}

/// Owns a speech device and tracks caption state
pub struct PlaybackController<D> {
    device: D,
    tx: mpsc::UnboundedSender<Event>,
    settle_delay: Duration,
    preferred_voice: Option<String>,
    id: u64,
    words: Vec<String>,
    next_word: usize,
    caption: String,
    profile: Option<SpeechStyleProfile>,
    in_flight: bool,
    rearm_pending: bool,
    caption_task: Option<JoinHandle<()>>,
    settle_task: Option<JoinHandle<()>>,
}

impl<D: SpeechDevice> PlaybackController<D> {
    /// Create a controller that reports into `tx`
    pub const fn new(device: D, settle_delay: Duration, tx: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            device,
            tx,
            settle_delay,
            preferred_voice: None,
            id: 0,
            words: Vec::new(),
            next_word: 0,
            caption: String::new(),
            profile: None,
            in_flight: false,
            rearm_pending: false,
            caption_task: None,
            settle_task: None,
        }
    }

    /// Prefer voices whose name contains `fragment` over the profile's pick
    pub fn prefer_voice(&mut self, fragment: impl Into<String>) {
        self.preferred_voice = Some(fragment.into());
    }

    /// Speak `text`, cancelling any playback in flight
    ///
    /// Returns the id of the new playback. Falls back to a silent caption-only
    /// pass when the device has no voice.
    pub fn speak(&mut self, text: &str, profile: &SpeechStyleProfile) -> u64 {
        self.cancel();

        self.id += 1;
        self.words = segment_words(text);
        self.next_word = 0;
        self.caption.clear();
        self.profile = Some(*profile);
        self.in_flight = true;

        let sink = PlaybackSink::new(self.id, self.tx.clone());
        let voices = self.device.voices();

        let preferred = self
            .preferred_voice
            .as_deref()
            .and_then(|fragment| voices.iter().find(|v| v.contains(fragment)))
            .map(String::as_str);
        let Some(voice) = preferred
            .or_else(|| profile.voice.pick(&voices))
            .map(ToString::to_string)
        else {
            tracing::debug!(id = self.id, "no voice available, captions only");
            self.start_caption_pass(sink);
            return self.id;
        };

        let utterance = Utterance {
            text: text.to_string(),
            word_count: self.words.len(),
            profile: *profile,
            voice,
        };

        tracing::debug!(
            id = self.id,
            words = utterance.word_count,
            emotion = %profile.emotion,
            voice = %utterance.voice,
            "speaking"
        );

        match self.device.speak(utterance, sink.clone()) {
            Ok(()) => {}
            Err(SynthesisError::NoVoice) => {
                tracing::debug!(id = self.id, "device has no voice, captions only");
                self.start_caption_pass(sink);
            }
            Err(e) => {
                tracing::warn!(id = self.id, error = %e, "speech failed to start");
                sink.failed(e);
            }
        }

        self.id
    }

    /// Abort playback, drop pending boundaries and clear the caption
    ///
    /// No re-arm is scheduled for a cancelled playback.
    pub fn cancel(&mut self) {
        if self.in_flight {
            self.device.cancel();
            tracing::debug!(id = self.id, "playback cancelled");
        }
        if let Some(task) = self.caption_task.take() {
            task.abort();
        }
        if let Some(task) = self.settle_task.take() {
            task.abort();
        }

        // Invalidate reports from the old playback
        self.id += 1;
        self.in_flight = false;
        self.rearm_pending = false;
        self.words.clear();
        self.next_word = 0;
        self.caption.clear();
    }

    /// Whether audio or a caption pass is in flight
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.in_flight
    }

    /// Caption revealed so far
    #[must_use]
    pub fn caption(&self) -> &str {
        &self.caption
    }

    /// Id of the current playback
    #[must_use]
    pub const fn current_id(&self) -> u64 {
        self.id
    }

    /// The wrapped device
    #[must_use]
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Filter a device report
    pub fn accept(&mut self, id: u64, signal: PlaybackSignal) -> Option<PlaybackOutcome> {
        if id != self.id || !self.in_flight {
            tracing::trace!(id, current = self.id, "stale playback report dropped");
            return None;
        }

        match signal {
            PlaybackSignal::Started => Some(PlaybackOutcome::Started),
            PlaybackSignal::WordBoundary => {
                let word = self.words.get(self.next_word)?;
                if !self.caption.is_empty() {
                    self.caption.push(' ');
                }
                self.caption.push_str(word);
                let index = self.next_word;
                self.next_word += 1;
                Some(PlaybackOutcome::Word {
                    index,
                    caption: self.caption.clone(),
                })
            }
            PlaybackSignal::Degraded => {
                if self.caption_task.is_none() {
                    tracing::debug!(id, "audio unavailable, finishing captions only");
                    self.start_caption_pass(PlaybackSink::new(id, self.tx.clone()));
                }
                None
            }
            PlaybackSignal::Ended => Some(self.finish(None)),
            PlaybackSignal::Failed(error) => {
                tracing::warn!(id, error = %error, "playback failed");
                Some(self.finish(Some(error)))
            }
        }
    }

    /// Consume the re-arm signal for playback `id`
    ///
    /// Returns `true` at most once per playback.
    pub fn take_rearm(&mut self, id: u64) -> bool {
        if id == self.id && self.rearm_pending {
            self.rearm_pending = false;
            self.settle_task = None;
            true
        } else {
            false
        }
    }

    fn finish(&mut self, error: Option<SynthesisError>) -> PlaybackOutcome {
        self.in_flight = false;
        self.caption.clear();
        if let Some(task) = self.caption_task.take() {
            task.abort();
        }

        self.rearm_pending = true;
        let id = self.id;
        let delay = self.settle_delay;
        let tx = self.tx.clone();
        self.settle_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Event::RearmDue { id });
        }));

        PlaybackOutcome::Finished { error }
    }

    /// Pace the remaining caption words without audio, then end
    fn start_caption_pass(&mut self, sink: PlaybackSink) {
        let remaining = self.words.len().saturating_sub(self.next_word);
        let interval = word_interval(&self.profile.unwrap_or(crate::mood::DEFAULT_PROFILE));

        self.caption_task = Some(tokio::spawn(async move {
            sink.started();
            for _ in 0..remaining {
                sink.word_boundary();
                tokio::time::sleep(interval).await;
            }
            sink.ended();
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mood::{Emotion, MoodTracker};

    /// Device with no voices; every playback becomes a caption pass
    struct Mute;

    impl SpeechDevice for Mute {
        fn voices(&self) -> Vec<String> {
            Vec::new()
        }

        fn speak(&mut self, _: Utterance, _: PlaybackSink) -> Result<(), SynthesisError> {
            Err(SynthesisError::NoVoice)
        }

        fn cancel(&mut self) {}
    }

    fn controller() -> (PlaybackController<Mute>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            PlaybackController::new(Mute, Duration::from_millis(100), tx),
            rx,
        )
    }

    #[test]
    fn test_segment_words() {
        assert_eq!(segment_words("  Hello,   there\nfriend "), ["Hello,", "there", "friend"]);
        assert!(segment_words("   ").is_empty());
    }

    #[test]
    fn test_word_interval_scales_with_rate() {
        let normal = word_interval(&MoodTracker::style_for(Emotion::Neutral));
        let excited = word_interval(&MoodTracker::style_for(Emotion::Excited));
        assert_eq!(normal, Duration::from_millis(400));
        assert!(excited < normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caption_pass_reveals_words_in_order() {
        let (mut playback, mut rx) = controller();
        let id = playback.speak("one two three", &MoodTracker::style_for(Emotion::Neutral));
        assert!(playback.is_speaking());

        let mut indices = Vec::new();
        let mut rearmed = 0;
        while let Some(event) = rx.recv().await {
            match event {
                Event::Playback { id, signal } => match playback.accept(id, signal) {
                    Some(PlaybackOutcome::Word { index, .. }) => indices.push(index),
                    Some(PlaybackOutcome::Finished { error }) => {
                        assert_eq!(error, None);
                        assert_eq!(playback.caption(), "");
                    }
                    _ => {}
                },
                Event::RearmDue { id: due } => {
                    assert_eq!(due, id);
                    if playback.take_rearm(due) {
                        rearmed += 1;
                    }
                    assert!(!playback.take_rearm(due));
                    break;
                }
                _ => {}
            }
        }

        assert_eq!(indices, [0, 1, 2]);
        assert_eq!(rearmed, 1);
        assert!(!playback.is_speaking());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_speak_discards_old_boundaries() {
        let (mut playback, mut rx) = controller();
        let profile = MoodTracker::style_for(Emotion::Neutral);

        let first = playback.speak("old words here", &profile);
        let second = playback.speak("new", &profile);
        assert_ne!(first, second);

        assert_eq!(playback.accept(first, PlaybackSignal::WordBoundary), None);
        assert_eq!(playback.accept(first, PlaybackSignal::Ended), None);

        // Drain until the new playback reveals its only word
        loop {
            if let Some(Event::Playback { id, signal }) = rx.recv().await {
                if let Some(PlaybackOutcome::Word { index, caption }) = playback.accept(id, signal) {
                    assert_eq!(id, second);
                    assert_eq!((index, caption.as_str()), (0, "new"));
                    break;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_clears_caption_and_rearm() {
        let (mut playback, _rx) = controller();
        let id = playback.speak("hello world", &MoodTracker::style_for(Emotion::Happy));
        assert!(playback.accept(id, PlaybackSignal::WordBoundary).is_some());
        assert_eq!(playback.caption(), "hello");

        playback.cancel();
        assert_eq!(playback.caption(), "");
        assert!(!playback.is_speaking());
        assert_eq!(playback.accept(id, PlaybackSignal::Ended), None);
        assert!(!playback.take_rearm(id));
    }

    #[tokio::test]
    async fn test_boundaries_past_last_word_are_ignored() {
        let (mut playback, _rx) = controller();
        let id = playback.speak("solo", &MoodTracker::style_for(Emotion::Neutral));
        assert!(playback.accept(id, PlaybackSignal::WordBoundary).is_some());
        assert_eq!(playback.accept(id, PlaybackSignal::WordBoundary), None);
    }
}
