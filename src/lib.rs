//! Nova - turn orchestration for a voice assistant
//!
//! This library drives one conversational turn at a time:
//! - Capture a final transcript (microphone or typed text)
//! - Classify intent and infer mood
//! - Answer locally or through the inference backend
//! - Speak the reply with word-synchronized captions, then listen again
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Front ends                        │
//! │        CLI  │  Notices (broadcast)  │  TurnHandle    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                TurnOrchestrator                      │
//! │  Capture │ Intent │ Mood │ Dispatch │ Playback       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Nova backend (HTTP)                     │
//! │   /chat  │  /text-to-speech  │  /speech-to-text     │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod intent;
pub mod monitor;
pub mod mood;
pub mod turn;
pub mod voice;

pub use backend::{BackendClient, ChatReply, SystemStatus};
pub use config::{Config, InputMode};
pub use conversation::{ConversationStore, ConversationTurn, Role};
pub use dispatch::{ActionDispatcher, InferenceBackend, Reply, ReplySource};
pub use error::{CaptureError, Error, NetworkError, Result, SynthesisError};
pub use intent::{Intent, IntentClassifier, IntentResult};
pub use monitor::{ConnectionMonitor, ConnectionStatus, StatusEndpoint};
pub use mood::{Emotion, MoodTracker, SpeechStyleProfile};
pub use turn::{
    Event, Notice, Session, SessionState, TurnHandle, TurnOptions, TurnOrchestrator,
};
