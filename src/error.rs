//! Error types for Nova

use thiserror::Error;

/// Result type alias for Nova operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Nova
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Capture device error
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Remote backend error
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Speech synthesis error
    #[error("synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Capture device failure, reported by the recognizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The host refused microphone access
    #[error("microphone permission denied")]
    PermissionDenied,

    /// No capture device is present
    #[error("no capture device available")]
    NoDevice,

    /// Recoverable hiccup (no speech, network blip in recognition)
    #[error("transient capture failure")]
    Transient,
}

impl CaptureError {
    /// Reason code as reported to front ends
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission-denied",
            Self::NoDevice => "no-device",
            Self::Transient => "transient",
        }
    }

    /// Transient errors leave the session idle instead of entering `Error`
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Remote call failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    /// Request exceeded its deadline
    #[error("request timed out")]
    Timeout,

    /// Backend could not be reached
    #[error("backend unreachable")]
    Unreachable,

    /// Backend answered with a non-success status or an unusable body
    #[error("backend returned status {0}")]
    BadStatus(u16),
}

impl NetworkError {
    /// Classify a transport error from `reqwest`
    #[must_use]
    pub fn classify(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::BadStatus(status.as_u16())
        } else {
            Self::Unreachable
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        Self::classify(&err)
    }
}

/// Speech output failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    /// No voice is available to render speech
    #[error("no synthesis voice available")]
    NoVoice,

    /// Audio started but could not be played to completion
    #[error("playback failed: {0}")]
    PlaybackFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_codes() {
        assert_eq!(CaptureError::PermissionDenied.code(), "permission-denied");
        assert_eq!(CaptureError::NoDevice.code(), "no-device");
        assert_eq!(CaptureError::Transient.code(), "transient");
        assert!(CaptureError::Transient.is_transient());
        assert!(!CaptureError::NoDevice.is_transient());
    }

    #[test]
    fn test_errors_convert_into_crate_error() {
        let err: Error = NetworkError::BadStatus(503).into();
        assert_eq!(err.to_string(), "network error: backend returned status 503");

        let err: Error = SynthesisError::NoVoice.into();
        assert!(err.to_string().contains("no synthesis voice"));
    }
}
