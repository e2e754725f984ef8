//! Configuration management for Nova

pub mod file;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::conversation::{DEFAULT_HISTORY_WINDOW, MAX_HISTORY_WINDOW};
use crate::{Error, Result};

/// Default backend location
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Where transcripts come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Lines typed on stdin
    #[default]
    Text,
    /// Microphone with backend transcription
    Mic,
}

impl FromStr for InputMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "mic" | "microphone" => Ok(Self::Mic),
            other => Err(Error::Config(format!("unknown input mode: {other}"))),
        }
    }
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Mic => "mic",
        })
    }
}

/// Nova configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Backend base URL
    pub backend_url: String,

    /// Deadline for each backend request
    pub request_timeout: Duration,

    /// Turns of history sent with each chat request, in `1..=50`
    pub history_window: usize,

    /// Pause between playback end and re-listening
    pub settle_delay: Duration,

    /// How long error messages stay visible
    pub error_clear_delay: Duration,

    /// Speak through the backend's text-to-speech endpoint
    pub remote_tts: bool,

    /// Voice name fragment to prefer
    pub voice: String,

    /// Transcript source
    pub input: InputMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            request_timeout: Duration::from_millis(30_000),
            history_window: DEFAULT_HISTORY_WINDOW,
            settle_delay: Duration::from_millis(100),
            error_clear_delay: Duration::from_millis(2000),
            remote_tts: true,
            voice: "Female".to_string(),
            input: InputMode::Text,
        }
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if an environment override cannot be parsed
    pub fn load() -> Result<Self> {
        Self::from_sources(&file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Assemble configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if an environment override cannot be parsed
    pub fn from_sources<F>(fc: &file::NovaConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend_url = env("NOVA_BACKEND_URL")
            .or_else(|| fc.backend.url.clone())
            .unwrap_or(defaults.backend_url);

        let timeout_ms = parse_env(&env, "NOVA_TIMEOUT_MS")?.or(fc.backend.timeout_ms);
        let requested_window =
            parse_env(&env, "NOVA_HISTORY_WINDOW")?.or(fc.conversation.history_window);
        let history_window = requested_window
            .unwrap_or(DEFAULT_HISTORY_WINDOW)
            .clamp(1, MAX_HISTORY_WINDOW);
        if requested_window.is_some_and(|w| w != history_window) {
            tracing::warn!(history_window, "history window clamped");
        }

        let remote_tts = match env("NOVA_REMOTE_TTS") {
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| Error::Config(format!("NOVA_REMOTE_TTS: not a boolean: {raw}")))?,
            None => fc.voice.remote_tts.unwrap_or(defaults.remote_tts),
        };

        let input = match env("NOVA_INPUT") {
            Some(raw) => raw.parse()?,
            None => fc.voice.input.unwrap_or_default(),
        };

        Ok(Self {
            backend_url,
            request_timeout: timeout_ms.map_or(defaults.request_timeout, Duration::from_millis),
            history_window,
            settle_delay: fc
                .timing
                .settle_delay_ms
                .map_or(defaults.settle_delay, Duration::from_millis),
            error_clear_delay: fc
                .timing
                .error_clear_delay_ms
                .map_or(defaults.error_clear_delay, Duration::from_millis),
            remote_tts,
            voice: fc.voice.preferred.clone().unwrap_or(defaults.voice),
            input,
        })
    }
}

fn parse_env<F, T>(env: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Config(format!("{key}: {e}")))
        })
        .transpose()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
