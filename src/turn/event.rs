//! Named events consumed by the orchestrator and notices it publishes

use std::time::Duration;

use crate::conversation::Role;
use crate::dispatch::Reply;
use crate::intent::Intent;
use crate::monitor::ConnectionStatus;
use crate::mood::Emotion;

use super::capture::CaptureSignal;
use super::playback::PlaybackSignal;
use super::session::SessionState;

/// Input to the turn state machine
///
/// User commands come from front ends; the rest are reported by controllers
/// and background tasks and carry the generation they belong to, so results
/// from a cancelled turn can be recognized and dropped.
#[derive(Debug, Clone)]
pub enum Event {
    /// Begin listening
    Start,
    /// Stop listening gracefully; a pending final result is still honored
    Pause,
    /// Abort everything and return to idle
    Cancel,
    /// Advance the manual mood toggle
    CycleMood,
    /// Probe backend liveness
    Probe,

    /// Capture device report
    Capture { epoch: u64, signal: CaptureSignal },

    /// Dispatch for a turn finished
    Dispatched {
        turn: u64,
        intent: Intent,
        reply: Reply,
        elapsed: Duration,
    },

    /// Playback device report
    Playback { id: u64, signal: PlaybackSignal },

    /// Settle delay after a playback elapsed
    RearmDue { id: u64 },

    /// Status auto-clear delay elapsed
    StatusExpired { epoch: u64 },

    /// Connection probe finished
    Probed(ConnectionStatus),
}

/// Observable change published to front ends
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Session state changed
    State(SessionState),
    /// Status line changed; `None` clears it
    Status(Option<String>),
    /// A word was revealed in the caption
    Caption { index: usize, text: String },
    /// Caption was cleared
    CaptionCleared,
    /// Session mood changed
    Mood(Emotion),
    /// A turn was appended to the conversation
    TurnRecorded { role: Role, content: String },
    /// Connection probe result
    Connection(ConnectionStatus),
}
