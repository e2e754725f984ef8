//! The single conversational session

use std::fmt;

use uuid::Uuid;

use crate::monitor::ConnectionStatus;
use crate::mood::Emotion;

/// Where the session is in the turn cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Nothing in flight
    #[default]
    Idle,
    /// Capture is armed and waiting for a final transcript
    Listening,
    /// Classifying and dispatching a transcript
    Processing,
    /// Playing the reply
    Speaking,
    /// Showing an error; clears itself after a delay
    Error,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session state owned by the orchestrator
///
/// Other components only read it through [`super::TurnOrchestrator::session`].
#[derive(Debug, Clone)]
pub struct Session {
    pub(super) id: Uuid,
    pub(super) state: SessionState,
    pub(super) mood: Emotion,
    pub(super) connection: ConnectionStatus,
    pub(super) status: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Idle,
            mood: Emotion::default(),
            connection: ConnectionStatus::default(),
            status: None,
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn mood(&self) -> Emotion {
        self.mood
    }

    #[must_use]
    pub const fn connection(&self) -> ConnectionStatus {
        self.connection
    }

    /// User-visible status message, if any
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }
}
