//! Intent dispatch: local handlers and remote inference
//!
//! `time`, `greeting` and `farewell` are answered locally and never reach the
//! backend. Everything else goes to the inference backend with the bounded
//! history window. Any remote failure becomes a fixed apology, so
//! [`ActionDispatcher::dispatch`] always resolves with usable text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::ChatReply;
use crate::conversation::ConversationTurn;
use crate::intent::{Intent, IntentResult};
use crate::mood::Emotion;
use crate::NetworkError;

/// Reply when the backend fails
pub const APOLOGY: &str =
    "I apologize, but I'm having trouble processing that right now. Could you try again?";

/// Reply when no backend is configured
pub const OFFLINE_REPLY: &str = "I can help you with basic tasks like telling time and greetings. \
     For more complex conversations, please set up the backend service.";

/// Local greeting
pub const GREETING: &str = "Hello! I'm here to chat and help. How can I assist you today?";

/// Local farewell
pub const FAREWELL: &str = "Goodbye! Have a great day!";

/// Remote inference service
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Produce a reply for `text` given the recent conversation
    async fn chat(
        &self,
        text: &str,
        history: &[ConversationTurn],
    ) -> Result<ChatReply, NetworkError>;
}

/// Where a reply came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    /// Built-in handler
    Local,
    /// Inference backend
    Remote,
    /// Fixed text substituted for a failed or missing backend
    Fallback,
}

/// Dispatch outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Text to speak; never empty
    pub text: String,
    /// Emotion suggested by the backend, if it named a known one
    pub emotion: Option<Emotion>,
    /// Origin of the text
    pub source: ReplySource,
}

impl Reply {
    fn local(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            emotion: None,
            source: ReplySource::Local,
        }
    }

    fn fallback(text: &str) -> Self {
        Self {
            text: text.to_string(),
            emotion: None,
            source: ReplySource::Fallback,
        }
    }
}

/// Routes classified intents to a handler
#[derive(Clone)]
pub struct ActionDispatcher {
    backend: Option<Arc<dyn InferenceBackend>>,
    timeout: Duration,
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("backend", &self.backend.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ActionDispatcher {
    /// Dispatcher with an optional backend and a per-call deadline
    #[must_use]
    pub fn new(backend: Option<Arc<dyn InferenceBackend>>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Dispatcher that answers local intents only
    #[must_use]
    pub fn offline() -> Self {
        Self::new(None, Duration::ZERO)
    }

    /// Resolve an intent to reply text
    ///
    /// Never fails; remote errors are logged and replaced by [`APOLOGY`].
    pub async fn dispatch(&self, result: &IntentResult, history: &[ConversationTurn]) -> Reply {
        match result.intent {
            Intent::Time => Reply::local(format!(
                "It's {} right now.",
                chrono::Local::now().format("%-I:%M:%S %p")
            )),
            Intent::Greeting => Reply::local(GREETING),
            Intent::Farewell => Reply::local(FAREWELL),
            Intent::Chat => self.ask_backend(&result.original_text, history).await,
        }
    }

    async fn ask_backend(&self, text: &str, history: &[ConversationTurn]) -> Reply {
        let Some(backend) = &self.backend else {
            tracing::debug!("no inference backend configured");
            return Reply::fallback(OFFLINE_REPLY);
        };

        tracing::debug!(history = history.len(), "querying inference backend");

        let outcome = tokio::time::timeout(self.timeout, backend.chat(text, history))
            .await
            .unwrap_or(Err(NetworkError::Timeout));

        match outcome {
            Ok(reply) if !reply.text.trim().is_empty() => {
                let emotion = reply.emotion.as_deref().and_then(|label| {
                    let parsed = Emotion::from_label(label);
                    if parsed.is_none() {
                        tracing::debug!(label, "backend emotion not in local table");
                    }
                    parsed
                });
                Reply {
                    text: reply.text,
                    emotion,
                    source: ReplySource::Remote,
                }
            }
            Ok(_) => {
                tracing::warn!("inference backend returned empty text");
                Reply::fallback(APOLOGY)
            }
            Err(e) => {
                tracing::warn!(error = %e, "inference backend failed");
                Reply::fallback(APOLOGY)
            }
        }
    }
}
