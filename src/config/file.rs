//! TOML configuration file loading
//!
//! Supports `~/.config/nova/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::InputMode;
use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct NovaConfigFile {
    /// Backend service location and deadlines
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Conversation history settings
    #[serde(default)]
    pub conversation: ConversationFileConfig,

    /// Turn timing
    #[serde(default)]
    pub timing: TimingFileConfig,

    /// Voice input and output
    #[serde(default)]
    pub voice: VoiceFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL (e.g. "http://localhost:8000")
    pub url: Option<String>,

    /// Per-request deadline in milliseconds
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    /// Turns of history sent with each chat request
    pub history_window: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TimingFileConfig {
    /// Pause between playback end and re-listening
    pub settle_delay_ms: Option<u64>,

    /// How long error messages stay visible
    pub error_clear_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Speak through the backend's text-to-speech endpoint
    pub remote_tts: Option<bool>,

    /// Voice name fragment to prefer (e.g. "Female")
    pub preferred: Option<String>,

    /// Where transcripts come from ("text" or "mic")
    pub input: Option<InputMode>,
}

/// Load the TOML config file from the standard path
///
/// Returns `NovaConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> NovaConfigFile {
    config_file_path().map_or_else(NovaConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_from(path: &Path) -> NovaConfigFile {
    if !path.exists() {
        return NovaConfigFile::default();
    }

    match read_config_file(path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            NovaConfigFile::default()
        }
    }
}

/// Read and parse a TOML config file
///
/// # Errors
///
/// Returns error if the file can't be read or isn't valid TOML
pub fn read_config_file(path: &Path) -> Result<NovaConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `~/.config/nova/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("nova").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_partial_file_parses() {
        let fc: NovaConfigFile = toml::from_str(
            r#"
            [backend]
            url = "http://nova.local:9000"

            [voice]
            input = "mic"
            "#,
        )
        .unwrap();

        assert_eq!(fc.backend.url.as_deref(), Some("http://nova.local:9000"));
        assert_eq!(fc.backend.timeout_ms, None);
        assert_eq!(fc.voice.input, Some(InputMode::Mic));
        assert_eq!(fc.conversation.history_window, None);
    }

    #[test]
    fn test_missing_and_broken_files_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let missing = load_from(&dir.path().join("absent.toml"));
        assert!(missing.backend.url.is_none());

        let broken = dir.path().join("config.toml");
        std::fs::write(&broken, "[backend\nurl = ").unwrap();
        assert!(load_from(&broken).backend.url.is_none());
    }

    #[test]
    fn test_read_errors_are_typed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = read_config_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, Error::Io(_)));

        let broken = dir.path().join("config.toml");
        std::fs::write(&broken, "[backend\nurl = ").unwrap();
        assert!(matches!(read_config_file(&broken).unwrap_err(), Error::Toml(_)));
    }
}
