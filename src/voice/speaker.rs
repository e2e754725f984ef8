//! Speech devices: backend-synthesized audio, and a silent fallback

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::playback::{
    AudioPlayback, PLAYBACK_SAMPLE_RATE, apply_volume, decode_audio, resample, word_offsets,
};
use crate::backend::BackendClient;
use crate::turn::{PlaybackSink, SpeechDevice, Utterance};
use crate::{Error, SynthesisError};

/// Voice name reported by the remote speaker
pub const REMOTE_VOICE: &str = "Nova Female";

/// Plays audio synthesized by the backend's text-to-speech endpoint
///
/// Word boundaries are spread evenly over the clip. If synthesis, download
/// or decoding fails, or there is no output device, the playback is
/// reported degraded and finishes as a caption-only pass.
pub struct RemoteSpeaker {
    backend: Arc<BackendClient>,
    runtime: Handle,
    current: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

impl std::fmt::Debug for RemoteSpeaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSpeaker")
            .field("speaking", &self.current.is_some())
            .finish_non_exhaustive()
    }
}

impl RemoteSpeaker {
    /// Create a speaker that synthesizes through `backend`
    ///
    /// # Errors
    ///
    /// Returns error if there is no current tokio runtime
    pub fn new(backend: Arc<BackendClient>) -> crate::Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Config(format!("no async runtime: {e}")))?;
        Ok(Self {
            backend,
            runtime,
            current: None,
        })
    }
}

/// How a blocking playback ended
enum Played {
    /// Audio could not be prepared; nothing was heard
    Unavailable(Error),
    /// Played to the end, or cancelled (`false`)
    Done(bool),
    /// Output failed after audio started
    Broken(Error),
}

fn play_blocking(
    bytes: &[u8],
    utterance: &Utterance,
    sink: &PlaybackSink,
    cancel: &AtomicBool,
) -> Played {
    let prepared = decode_audio(bytes)
        .and_then(|(samples, rate)| resample(&samples, rate, PLAYBACK_SAMPLE_RATE))
        .and_then(|samples| AudioPlayback::new().map(|playback| (playback, samples)));

    let (playback, mut samples) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => return Played::Unavailable(e),
    };
    apply_volume(&mut samples, utterance.profile.volume);
    let offsets = word_offsets(utterance.word_count, samples.len());

    sink.started();
    match playback.play_paced(samples, &offsets, cancel, |_| sink.word_boundary()) {
        Ok(completed) => Played::Done(completed),
        Err(e) => Played::Broken(e),
    }
}

impl SpeechDevice for RemoteSpeaker {
    fn voices(&self) -> Vec<String> {
        vec![REMOTE_VOICE.to_string()]
    }

    fn speak(&mut self, utterance: Utterance, sink: PlaybackSink) -> Result<(), SynthesisError> {
        self.cancel();

        let cancel = Arc::new(AtomicBool::new(false));
        let backend = Arc::clone(&self.backend);
        let flag = Arc::clone(&cancel);

        let task = self.runtime.spawn(async move {
            let emotion = utterance.profile.emotion.as_str();
            let audio = match backend.synthesize(&utterance.text, emotion).await {
                Ok(url) => backend.fetch_audio(&url).await,
                Err(e) => Err(e),
            };
            let bytes = match audio {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(error = %e, "speech synthesis unavailable");
                    sink.degraded();
                    return;
                }
            };

            let played = {
                let sink = sink.clone();
                let flag = Arc::clone(&flag);
                tokio::task::spawn_blocking(move || play_blocking(&bytes, &utterance, &sink, &flag))
                    .await
            };

            match played {
                Ok(Played::Done(true)) => sink.ended(),
                Ok(Played::Done(false)) => tracing::debug!("playback cancelled"),
                Ok(Played::Unavailable(e)) => {
                    tracing::warn!(error = %e, "audio unavailable");
                    sink.degraded();
                }
                Ok(Played::Broken(e)) => {
                    sink.failed(SynthesisError::PlaybackFailed(e.to_string()));
                }
                Err(e) => {
                    sink.failed(SynthesisError::PlaybackFailed(e.to_string()));
                }
            }
        });

        self.current = Some((cancel, task));
        Ok(())
    }

    fn cancel(&mut self) {
        if let Some((flag, task)) = self.current.take() {
            flag.store(true, Ordering::Relaxed);
            task.abort();
        }
    }
}

impl Drop for RemoteSpeaker {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Speech device with no voices; every reply becomes a caption-only pass
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSpeaker;

impl SpeechDevice for SilentSpeaker {
    fn voices(&self) -> Vec<String> {
        Vec::new()
    }

    fn speak(&mut self, _: Utterance, _: PlaybackSink) -> Result<(), SynthesisError> {
        Err(SynthesisError::NoVoice)
    }

    fn cancel(&mut self) {}
}
