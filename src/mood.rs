//! Keyword-based mood inference and speech style lookup
//!
//! Mood rules are an ordered table of `(pattern, emotion)` pairs. The first
//! pattern that matches wins and the last rule matches everything, so
//! inference is total.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Emotion driving prosody and presentation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sad,
    Angry,
    Excited,
    Playful,
    Warm,
}

impl Emotion {
    /// Every known emotion
    pub const ALL: [Self; 7] = [
        Self::Neutral,
        Self::Happy,
        Self::Sad,
        Self::Angry,
        Self::Excited,
        Self::Playful,
        Self::Warm,
    ];

    /// Lowercase label used on the wire
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Excited => "excited",
            Self::Playful => "playful",
            Self::Warm => "warm",
        }
    }

    /// Parse a label, case-insensitively
    ///
    /// `"default"` is an alias for neutral. Anything else unknown is `None`.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        if label.eq_ignore_ascii_case("default") {
            return Some(Self::Neutral);
        }
        Self::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(label))
    }

    /// Next mood for the manual mood toggle
    ///
    /// Cycles `neutral → happy → sad → angry → excited → neutral`; moods outside
    /// the cycle restart it.
    #[must_use]
    pub const fn next_in_cycle(self) -> Self {
        match self {
            Self::Neutral => Self::Happy,
            Self::Happy => Self::Sad,
            Self::Sad => Self::Angry,
            Self::Angry => Self::Excited,
            Self::Excited | Self::Playful | Self::Warm => Self::Neutral,
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which synthesis voice a profile asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceSelector {
    /// First available voice
    Any,
    /// First voice whose name contains the given fragment, else the first voice
    Prefer(&'static str),
}

impl VoiceSelector {
    /// Pick a voice from the ones a device offers
    #[must_use]
    pub fn pick<'a>(&self, voices: &'a [String]) -> Option<&'a str> {
        let preferred = match self {
            Self::Any => None,
            Self::Prefer(fragment) => voices.iter().find(|v| v.contains(fragment)),
        };
        preferred.or_else(|| voices.first()).map(String::as_str)
    }
}

/// Prosody parameters for one emotion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechStyleProfile {
    /// Emotion this profile renders
    pub emotion: Emotion,
    /// Speaking rate multiplier (1.0 = normal)
    pub rate: f32,
    /// Pitch multiplier (1.0 = normal)
    pub pitch: f32,
    /// Output volume in `0.0..=1.0`
    pub volume: f32,
    /// Voice preference
    pub voice: VoiceSelector,
}

const PREFERRED_VOICE: VoiceSelector = VoiceSelector::Prefer("Female");

const fn profile(emotion: Emotion, rate: f32, pitch: f32, volume: f32) -> SpeechStyleProfile {
    SpeechStyleProfile {
        emotion,
        rate,
        pitch,
        volume,
        voice: PREFERRED_VOICE,
    }
}

/// Profile used for neutral and for any emotion without an entry
pub const DEFAULT_PROFILE: SpeechStyleProfile = profile(Emotion::Neutral, 1.0, 1.0, 1.0);

/// Ordered mood rules; the final catch-all guarantees a match
static MOOD_RULES: LazyLock<Vec<(Regex, Emotion)>> = LazyLock::new(|| {
    [
        // Checked before "happy", which it contains
        (r"(?i)unhappy", Emotion::Sad),
        (r"(?i)happy|joy|great|wonderful|laugh", Emotion::Happy),
        (r"(?i)sad|depressed|crying|lonely", Emotion::Sad),
        (r"(?i)angry|mad|frustrated|annoyed", Emotion::Angry),
        (r"(?i)excited|wow|amazing|awesome|incredible", Emotion::Excited),
        (r"(?i)joke|funny|haha|lol", Emotion::Playful),
        (r"(?s).*", Emotion::Neutral),
    ]
    .into_iter()
    .filter_map(|(pattern, emotion)| match Regex::new(pattern) {
        Ok(re) => Some((re, emotion)),
        Err(e) => {
            tracing::error!(pattern, error = %e, "invalid mood pattern");
            None
        }
    })
    .collect()
});

/// Infers the user's mood from what they said
#[derive(Debug, Clone, Copy, Default)]
pub struct MoodTracker;

impl MoodTracker {
    /// Create a mood tracker over the built-in rule table
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Infer an emotion from text; first matching rule wins
    #[must_use]
    pub fn infer(&self, text: &str) -> Emotion {
        MOOD_RULES
            .iter()
            .find(|(pattern, _)| pattern.is_match(text))
            .map_or(Emotion::Neutral, |(_, emotion)| *emotion)
    }

    /// Speech style for an emotion
    #[must_use]
    pub const fn style_for(emotion: Emotion) -> SpeechStyleProfile {
        match emotion {
            Emotion::Neutral => DEFAULT_PROFILE,
            Emotion::Happy => profile(Emotion::Happy, 1.1, 1.2, 1.0),
            Emotion::Sad => profile(Emotion::Sad, 0.9, 0.9, 0.8),
            Emotion::Angry => profile(Emotion::Angry, 1.05, 0.95, 1.0),
            Emotion::Excited => profile(Emotion::Excited, 1.2, 1.3, 1.0),
            Emotion::Playful => profile(Emotion::Playful, 1.15, 1.05, 1.0),
            Emotion::Warm => profile(Emotion::Warm, 1.0, 1.0, 0.9),
        }
    }

    /// Speech style for a free-form label, e.g. one returned by the backend
    #[must_use]
    pub fn style_for_label(label: &str) -> SpeechStyleProfile {
        Emotion::from_label(label).map_or(DEFAULT_PROFILE, Self::style_for)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_happy() {
        assert_eq!(MoodTracker::new().infer("I am so happy today"), Emotion::Happy);
    }

    #[test]
    fn test_infer_unmatched_is_neutral() {
        let mood = MoodTracker::new();
        assert_eq!(mood.infer("tell me about the weather"), Emotion::Neutral);
        assert_eq!(mood.infer(""), Emotion::Neutral);
    }

    #[test]
    fn test_infer_rule_order() {
        let mood = MoodTracker::new();
        // happy is evaluated before excited
        assert_eq!(mood.infer("wow, what a great day"), Emotion::Happy);
        assert_eq!(mood.infer("WOW that is amazing"), Emotion::Excited);
        assert_eq!(mood.infer("I'm so frustrated"), Emotion::Angry);
        assert_eq!(mood.infer("tell me a joke"), Emotion::Playful);
    }

    #[test]
    fn test_infer_matches_inside_words() {
        let mood = MoodTracker::new();
        assert_eq!(mood.infer("I am overjoyed"), Emotion::Happy);
        assert_eq!(mood.infer("we were laughing"), Emotion::Happy);
        assert_eq!(mood.infer("so much sadness"), Emotion::Sad);
        assert_eq!(mood.infer("SUPERFUNNY"), Emotion::Playful);
    }

    #[test]
    fn test_infer_unhappy_is_sad() {
        assert_eq!(MoodTracker::new().infer("I feel unhappy"), Emotion::Sad);
        assert_eq!(MoodTracker::new().infer("Unhappy but laughing"), Emotion::Sad);
    }

    #[test]
    fn test_style_lookup_is_total() {
        for emotion in Emotion::ALL {
            assert_eq!(MoodTracker::style_for(emotion).emotion, emotion);
        }
        assert_eq!(MoodTracker::style_for_label("confused"), DEFAULT_PROFILE);
        assert_eq!(MoodTracker::style_for_label("default"), DEFAULT_PROFILE);
        assert_eq!(MoodTracker::style_for_label("SAD").emotion, Emotion::Sad);
    }

    #[test]
    fn test_mood_cycle_returns_to_neutral() {
        let mut mood = Emotion::Neutral;
        let mut seen = Vec::new();
        for _ in 0..5 {
            mood = mood.next_in_cycle();
            seen.push(mood);
        }
        assert_eq!(
            seen,
            [Emotion::Happy, Emotion::Sad, Emotion::Angry, Emotion::Excited, Emotion::Neutral]
        );
        assert_eq!(Emotion::Warm.next_in_cycle(), Emotion::Neutral);
    }

    #[test]
    fn test_voice_selector() {
        let voices = vec!["Daniel".to_string(), "Samantha Female".to_string()];
        assert_eq!(PREFERRED_VOICE.pick(&voices), Some("Samantha Female"));
        assert_eq!(VoiceSelector::Any.pick(&voices), Some("Daniel"));
        assert_eq!(PREFERRED_VOICE.pick(&voices[..1]), Some("Daniel"));
        assert_eq!(PREFERRED_VOICE.pick(&[]), None);
    }
}
