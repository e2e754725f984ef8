//! Host audio devices
//!
//! Implementations of the turn capture and speech traits. The microphone
//! recognizer segments speech locally and transcribes through the backend:
//! the remote speaker plays backend-synthesized audio. Text input and a
//! silent speaker cover hosts without audio.

mod capture;
mod playback;
mod recognizer;
mod segmenter;
mod speaker;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use playback::{
    AudioPlayback, PLAYBACK_SAMPLE_RATE, apply_volume, decode_audio, resample, word_offsets,
};
pub use recognizer::{MicRecognizer, TextRecognizer};
pub use segmenter::{SegmenterState, UtteranceSegmenter, rms_energy};
pub use speaker::{REMOTE_VOICE, RemoteSpeaker, SilentSpeaker};
