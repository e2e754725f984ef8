//! Turn orchestration
//!
//! One conversational turn runs capture → classify → dispatch → speak →
//! re-arm. The orchestrator owns the [`Session`] and is the only thing that
//! mutates it; controllers and background tasks report back through named
//! [`Event`]s on a single queue, which are applied one at a time.
//!
//! ```text
//!   Idle ──start──▶ Listening ──final──▶ Processing ──dispatched──▶ Speaking
//!    ▲                  ▲                                              │
//!    │                  └──────────────── re-arm (settle) ◀────────────┘
//!    └── cancel (any) / Error ──auto-clear──┘
//! ```

mod capture;
mod event;
mod playback;
mod session;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};

pub use capture::{CaptureController, CaptureDevice, CaptureOutcome, CaptureSignal, CaptureSink};
pub use event::{Event, Notice};
pub use playback::{
    PlaybackController, PlaybackOutcome, PlaybackSignal, PlaybackSink, SpeechDevice, Utterance,
    segment_words, word_interval,
};
pub use session::{Session, SessionState};

use crate::conversation::{ConversationStore, ConversationTurn, DEFAULT_HISTORY_WINDOW, Role};
use crate::dispatch::{ActionDispatcher, Reply};
use crate::intent::{Intent, IntentClassifier};
use crate::monitor::ConnectionMonitor;
use crate::mood::{Emotion, MoodTracker};
use crate::{CaptureError, Config};

/// Capacity of the notice channel
const NOTICE_CAPACITY: usize = 256;

/// Timing and history knobs for the turn cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOptions {
    /// Turns of history sent to the backend
    pub history_window: usize,
    /// Pause after playback before capture is re-armed
    pub settle_delay: Duration,
    /// How long a status message stays up
    pub error_clear_delay: Duration,
    /// Voice name fragment to prefer over the profile's choice
    pub voice: Option<String>,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            history_window: DEFAULT_HISTORY_WINDOW,
            settle_delay: Duration::from_millis(100),
            error_clear_delay: Duration::from_millis(2000),
            voice: None,
        }
    }
}

impl From<&Config> for TurnOptions {
    fn from(config: &Config) -> Self {
        Self {
            history_window: config.history_window,
            settle_delay: config.settle_delay,
            error_clear_delay: config.error_clear_delay,
            voice: Some(config.voice.clone()),
        }
    }
}

/// Sends user commands to a running orchestrator
#[derive(Debug, Clone)]
pub struct TurnHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl TurnHandle {
    /// Returns `false` if the orchestrator is gone
    pub fn start(&self) -> bool {
        self.send(Event::Start)
    }

    pub fn pause(&self) -> bool {
        self.send(Event::Pause)
    }

    pub fn cancel(&self) -> bool {
        self.send(Event::Cancel)
    }

    pub fn cycle_mood(&self) -> bool {
        self.send(Event::CycleMood)
    }

    pub fn probe(&self) -> bool {
        self.send(Event::Probe)
    }

    fn send(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// The turn state machine
pub struct TurnOrchestrator<C, S> {
    session: Session,
    capture: CaptureController<C>,
    playback: PlaybackController<S>,
    classifier: IntentClassifier,
    mood: MoodTracker,
    dispatcher: Arc<ActionDispatcher>,
    monitor: ConnectionMonitor,
    store: ConversationStore,
    options: TurnOptions,
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
    notices: broadcast::Sender<Notice>,
    /// Generation of the current turn; bumped on every new turn and on cancel
    turn: u64,
    /// User text of the turn awaiting dispatch
    pending: Option<String>,
    /// Generation of the visible status message
    status_epoch: u64,
}

impl<C: CaptureDevice, S: SpeechDevice> TurnOrchestrator<C, S> {
    /// Assemble an orchestrator around a capture and a speech device
    pub fn new(
        capture: C,
        speech: S,
        dispatcher: ActionDispatcher,
        monitor: ConnectionMonitor,
        options: TurnOptions,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let mut playback = PlaybackController::new(speech, options.settle_delay, tx.clone());
        if let Some(fragment) = &options.voice {
            playback.prefer_voice(fragment.clone());
        }

        Self {
            session: Session::new(),
            capture: CaptureController::new(capture, tx.clone()),
            playback,
            classifier: IntentClassifier::new(),
            mood: MoodTracker::new(),
            dispatcher: Arc::new(dispatcher),
            monitor,
            store: ConversationStore::new(options.history_window),
            options,
            tx,
            rx,
            notices,
            turn: 0,
            pending: None,
            status_epoch: 0,
        }
    }

    /// Handle for sending user commands
    #[must_use]
    pub fn handle(&self) -> TurnHandle {
        TurnHandle {
            tx: self.tx.clone(),
        }
    }

    /// Subscribe to state, caption and status notices
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub const fn conversation(&self) -> &ConversationStore {
        &self.store
    }

    #[must_use]
    pub const fn capture(&self) -> &CaptureController<C> {
        &self.capture
    }

    #[must_use]
    pub const fn playback(&self) -> &PlaybackController<S> {
        &self.playback
    }

    /// Process events until `shutdown` resolves
    ///
    /// Probes the backend once on entry. On shutdown, capture and playback
    /// are aborted.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tracing::info!(session = %self.session.id(), "turn orchestrator running");
        self.apply(Event::Probe);

        tokio::pin!(shutdown);
        loop {
            let event = tokio::select! {
                () = &mut shutdown => None,
                event = self.rx.recv() => event,
            };
            let Some(event) = event else { break };
            self.apply(event);
        }

        self.on_cancel();
        tracing::info!("turn orchestrator stopped");
    }

    /// Process events until `done` holds
    pub async fn run_until<F>(&mut self, mut done: F)
    where
        F: FnMut(&Self) -> bool,
    {
        while !done(self) {
            let Some(event) = self.rx.recv().await else {
                return;
            };
            self.apply(event);
        }
    }

    /// Apply every event already queued, without waiting
    pub fn drain_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.rx.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    /// Apply one event to the state machine
    pub fn apply(&mut self, event: Event) {
        match event {
            Event::Start => self.on_start(),
            Event::Pause => self.on_pause(),
            Event::Cancel => self.on_cancel(),
            Event::CycleMood => self.set_mood(self.session.mood.next_in_cycle()),
            Event::Probe => self.spawn_probe(),
            Event::Capture { epoch, signal } => {
                if let Some(outcome) = self.capture.accept(epoch, signal) {
                    self.on_capture(outcome);
                }
            }
            Event::Dispatched {
                turn,
                intent,
                reply,
                elapsed,
            } => self.on_dispatched(turn, intent, reply, elapsed),
            Event::Playback { id, signal } => {
                if let Some(outcome) = self.playback.accept(id, signal) {
                    self.on_playback(outcome);
                }
            }
            Event::RearmDue { id } => self.on_rearm(id),
            Event::StatusExpired { epoch } => self.on_status_expired(epoch),
            Event::Probed(status) => {
                self.session.connection = status;
                self.notify(Notice::Connection(status));
            }
        }

        debug_assert!(
            !(self.capture.is_active() && self.playback.is_speaking()),
            "capture active while speaking"
        );
    }

    fn on_start(&mut self) {
        match self.session.state {
            SessionState::Idle => self.listen(),
            SessionState::Listening if !self.capture.is_active() => self.listen(),
            state => tracing::debug!(%state, "start ignored"),
        }
    }

    fn on_pause(&mut self) {
        if self.session.state == SessionState::Listening && self.capture.is_active() {
            tracing::debug!("pausing capture");
            self.capture.stop();
        }
    }

    fn on_cancel(&mut self) {
        self.capture.abort();
        self.playback.cancel();

        // Results of the abandoned turn must not land
        self.turn += 1;
        if self.pending.take().is_some() {
            tracing::debug!("in-flight turn discarded");
        }

        self.status_epoch += 1;
        self.set_status(None);
        self.notify(Notice::CaptionCleared);
        self.set_state(SessionState::Idle);
    }

    fn listen(&mut self) {
        match self.capture.start() {
            Ok(_) => self.set_state(SessionState::Listening),
            Err(reason) => self.on_capture_error(reason),
        }
    }

    fn on_capture(&mut self, outcome: CaptureOutcome) {
        match outcome {
            CaptureOutcome::Final(text) => {
                if self.session.state == SessionState::Listening {
                    self.begin_turn(text);
                } else {
                    tracing::debug!(state = %self.session.state, "transcript discarded");
                }
            }
            CaptureOutcome::Ended => {
                if self.session.state == SessionState::Listening {
                    self.set_state(SessionState::Idle);
                }
            }
            CaptureOutcome::Error(reason) => self.on_capture_error(reason),
        }
    }

    fn on_capture_error(&mut self, reason: CaptureError) {
        if reason.is_transient() {
            tracing::warn!(reason = reason.code(), "transient capture error");
            self.flash_status(format!("Capture error: {}", reason.code()));
            self.set_state(SessionState::Idle);
        } else {
            tracing::error!(reason = reason.code(), "capture error");
            self.enter_error(format!("Error: {}", reason.code()));
        }
    }

    fn begin_turn(&mut self, text: String) {
        self.turn += 1;
        let turn = self.turn;

        let result = self.classifier.classify(&text);
        let mood = self.mood.infer(&text);
        self.set_mood(mood);
        self.set_state(SessionState::Processing);

        tracing::info!(turn, intent = %result.intent, %mood, "processing transcript");
        self.pending = Some(text);

        let dispatcher = Arc::clone(&self.dispatcher);
        let history = self.store.window().to_vec();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let reply = dispatcher.dispatch(&result, &history).await;
            let _ = tx.send(Event::Dispatched {
                turn,
                intent: result.intent,
                reply,
                elapsed: started.elapsed(),
            });
        });
    }

    fn on_dispatched(&mut self, turn: u64, intent: Intent, reply: Reply, elapsed: Duration) {
        if turn != self.turn || self.session.state != SessionState::Processing {
            tracing::debug!(turn, current = self.turn, "stale dispatch result discarded");
            return;
        }
        let Some(user_text) = self.pending.take() else {
            return;
        };

        let mood = reply.emotion.unwrap_or(self.session.mood);
        self.set_mood(mood);

        tracing::info!(
            turn,
            %intent,
            source = ?reply.source,
            elapsed_ms = elapsed.as_millis(),
            "reply ready"
        );

        self.store.record_exchange(
            ConversationTurn::user(user_text.clone()),
            ConversationTurn::assistant(reply.text.clone(), Some(mood)),
        );
        self.notify(Notice::TurnRecorded {
            role: Role::User,
            content: user_text,
        });
        self.notify(Notice::TurnRecorded {
            role: Role::Assistant,
            content: reply.text.clone(),
        });

        if self.capture.is_active() {
            self.capture.abort();
        }
        self.set_state(SessionState::Speaking);
        self.playback.speak(&reply.text, &MoodTracker::style_for(mood));
    }

    fn on_playback(&mut self, outcome: PlaybackOutcome) {
        match outcome {
            PlaybackOutcome::Started => tracing::trace!("playback started"),
            PlaybackOutcome::Word { index, caption } => {
                self.notify(Notice::Caption {
                    index,
                    text: caption,
                });
            }
            PlaybackOutcome::Finished { error } => {
                self.notify(Notice::CaptionCleared);
                if let Some(e) = error {
                    self.enter_error(format!("Speech error: {e}"));
                }
            }
        }
    }

    fn on_rearm(&mut self, id: u64) {
        if !self.playback.take_rearm(id) {
            return;
        }
        match self.session.state {
            SessionState::Speaking | SessionState::Error => self.listen(),
            state => tracing::debug!(%state, "re-arm ignored"),
        }
    }

    fn on_status_expired(&mut self, epoch: u64) {
        if epoch != self.status_epoch {
            return;
        }
        self.set_status(None);
        if self.session.state == SessionState::Error {
            self.set_state(SessionState::Idle);
        }
    }

    fn enter_error(&mut self, message: String) {
        self.set_state(SessionState::Error);
        self.flash_status(message);
    }

    /// Show a status message that clears itself
    fn flash_status(&mut self, message: String) {
        self.status_epoch += 1;
        let epoch = self.status_epoch;
        self.set_status(Some(message));

        let delay = self.options.error_clear_delay;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Event::StatusExpired { epoch });
        });
    }

    fn spawn_probe(&self) {
        let monitor = self.monitor.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let status = monitor.probe().await;
            let _ = tx.send(Event::Probed(status));
        });
    }

    fn set_state(&mut self, state: SessionState) {
        let previous = self.session.state;
        if previous == state {
            return;
        }
        self.session.state = state;
        tracing::debug!(from = %previous, to = %state, "session state changed");
        self.notify(Notice::State(state));
    }

    fn set_mood(&mut self, mood: Emotion) {
        if self.session.mood != mood {
            self.session.mood = mood;
            self.notify(Notice::Mood(mood));
        }
    }

    fn set_status(&mut self, status: Option<String>) {
        if self.session.status != status {
            self.session.status.clone_from(&status);
            self.notify(Notice::Status(status));
        }
    }

    fn notify(&self, notice: Notice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }
}
