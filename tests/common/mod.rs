//! Shared test utilities
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::sync::broadcast;

use nova_voice::turn::{CaptureDevice, CaptureSink, PlaybackSink, SpeechDevice, Utterance};
use nova_voice::{
    ActionDispatcher, CaptureError, ChatReply, ConnectionMonitor, ConversationTurn,
    InferenceBackend, NetworkError, Notice, SessionState, SynthesisError, TurnOptions,
    TurnOrchestrator,
};

/// Capture device driven by the test
#[derive(Clone, Default)]
pub struct ScriptedCapture {
    sink: Arc<Mutex<Option<CaptureSink>>>,
    active: Arc<AtomicBool>,
    refuse: Arc<Mutex<Option<CaptureError>>>,
    pub starts: Arc<AtomicUsize>,
    pub stops: Arc<AtomicUsize>,
    pub aborts: Arc<AtomicUsize>,
}

impl ScriptedCapture {
    /// Make every following `start` fail with `reason`
    pub fn refuse_with(&self, reason: CaptureError) {
        *self.refuse.lock().unwrap() = Some(reason);
    }

    /// Deliver a final transcript through the most recent sink
    pub fn say(&self, text: &str) {
        self.last_sink().final_result(text);
    }

    pub fn partial(&self, text: &str) {
        self.last_sink().partial(text);
    }

    pub fn fail(&self, reason: CaptureError) {
        self.last_sink().error(reason);
    }

    pub fn last_sink(&self) -> CaptureSink {
        self.sink.lock().unwrap().clone().expect("capture never started")
    }

    /// Whether the device is currently capturing
    pub fn is_listening(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl CaptureDevice for ScriptedCapture {
    fn start(&mut self, sink: CaptureSink) -> Result<(), CaptureError> {
        if let Some(reason) = *self.refuse.lock().unwrap() {
            return Err(reason);
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }

    fn abort(&mut self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }
}

/// How the scripted speaker behaves
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpeakerMode {
    /// Report every boundary and the end immediately
    Instant,
    /// Offer no voices, forcing a caption-only pass
    NoVoice,
    /// Start, reveal one word, then fail
    FailMidway,
    /// Start, reveal one word, then report the audio unavailable
    Degrade,
    /// Report nothing; the test drives the held sink
    Hold,
}

/// Speech device driven by the test
#[derive(Clone)]
pub struct ScriptedSpeaker {
    mode: SpeakerMode,
    capture: ScriptedCapture,
    pub spoken: Arc<Mutex<Vec<Utterance>>>,
    pub held: Arc<Mutex<Option<PlaybackSink>>>,
    pub cancels: Arc<AtomicUsize>,
    pub overlaps: Arc<AtomicUsize>,
}

impl ScriptedSpeaker {
    /// Speaker that records whether `capture` was live while speaking
    pub fn new(mode: SpeakerMode, capture: &ScriptedCapture) -> Self {
        Self {
            mode,
            capture: capture.clone(),
            spoken: Arc::default(),
            held: Arc::default(),
            cancels: Arc::default(),
            overlaps: Arc::default(),
        }
    }

    pub fn utterances(&self) -> Vec<Utterance> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn held_sink(&self) -> PlaybackSink {
        self.held.lock().unwrap().clone().expect("nothing held")
    }
}

impl SpeechDevice for ScriptedSpeaker {
    fn voices(&self) -> Vec<String> {
        match self.mode {
            SpeakerMode::NoVoice => Vec::new(),
            _ => vec!["Test Male".to_string(), "Test Female".to_string()],
        }
    }

    fn speak(&mut self, utterance: Utterance, sink: PlaybackSink) -> Result<(), SynthesisError> {
        if self.capture.is_listening() {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let words = utterance.word_count;
        self.spoken.lock().unwrap().push(utterance);

        match self.mode {
            SpeakerMode::Instant => {
                sink.started();
                for _ in 0..words {
                    sink.word_boundary();
                }
                sink.ended();
            }
            SpeakerMode::NoVoice => return Err(SynthesisError::NoVoice),
            SpeakerMode::FailMidway => {
                sink.started();
                sink.word_boundary();
                sink.failed(SynthesisError::PlaybackFailed("device unplugged".to_string()));
            }
            SpeakerMode::Degrade => {
                sink.started();
                sink.word_boundary();
                sink.degraded();
            }
            SpeakerMode::Hold => {
                sink.started();
                *self.held.lock().unwrap() = Some(sink);
            }
        }
        Ok(())
    }

    fn cancel(&mut self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// How the scripted backend answers
#[derive(Clone, Debug)]
pub enum BackendScript {
    /// Echo the text with an optional emotion label
    Echo(Option<&'static str>),
    /// Fail every call
    Fail(NetworkError),
    /// Sleep before echoing
    Slow(Duration),
}

/// Inference backend that counts calls and records history sizes
pub struct ScriptedBackend {
    script: BackendScript,
    pub calls: AtomicUsize,
    pub histories: Mutex<Vec<usize>>,
}

impl ScriptedBackend {
    pub fn new(script: BackendScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
            histories: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn history_sizes(&self) -> Vec<usize> {
        self.histories.lock().unwrap().clone()
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn chat(
        &self,
        text: &str,
        history: &[ConversationTurn],
    ) -> Result<ChatReply, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.histories.lock().unwrap().push(history.len());

        match &self.script {
            BackendScript::Echo(emotion) => Ok(ChatReply {
                text: format!("You said {text}"),
                emotion: emotion.map(ToString::to_string),
            }),
            BackendScript::Fail(error) => Err(error.clone()),
            BackendScript::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(ChatReply {
                    text: format!("Eventually: {text}"),
                    emotion: None,
                })
            }
        }
    }
}

pub type TestOrchestrator = TurnOrchestrator<ScriptedCapture, ScriptedSpeaker>;

/// Everything a turn test needs
pub struct Harness {
    pub orchestrator: TestOrchestrator,
    pub capture: ScriptedCapture,
    pub speaker: ScriptedSpeaker,
    pub backend: Arc<ScriptedBackend>,
    pub notices: broadcast::Receiver<Notice>,
}

impl Harness {
    pub fn new(mode: SpeakerMode, script: BackendScript) -> Self {
        Self::with_options(mode, script, TurnOptions::default())
    }

    pub fn with_options(mode: SpeakerMode, script: BackendScript, options: TurnOptions) -> Self {
        let capture = ScriptedCapture::default();
        let speaker = ScriptedSpeaker::new(mode, &capture);
        let backend = ScriptedBackend::new(script);
        let inference: Arc<dyn InferenceBackend> = backend.clone();
        let dispatcher = ActionDispatcher::new(Some(inference), Duration::from_secs(30));

        let orchestrator = TurnOrchestrator::new(
            capture.clone(),
            speaker.clone(),
            dispatcher,
            ConnectionMonitor::disabled(),
            options,
        );
        let notices = orchestrator.subscribe();

        Self {
            orchestrator,
            capture,
            speaker,
            backend,
            notices,
        }
    }

    pub fn state(&self) -> SessionState {
        self.orchestrator.session().state()
    }

    /// Process events until the session reaches `state`
    pub async fn run_until_state(&mut self, state: SessionState) {
        self.orchestrator
            .run_until(|o| o.session().state() == state)
            .await;
    }

    /// Say `text` and run the turn until capture is re-armed
    pub async fn turn(&mut self, text: &str) {
        let starts = self.capture.starts();
        self.capture.say(text);
        let capture = self.capture.clone();
        self.orchestrator
            .run_until(move |o| {
                o.session().state() == SessionState::Listening && capture.starts() > starts
            })
            .await;
    }

    /// Let timers run for `duration`, then apply whatever they produced
    pub async fn settle(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
        self.orchestrator.drain_pending();
    }

    /// Drain published notices
    pub fn notices(&mut self) -> Vec<Notice> {
        let mut seen = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            seen.push(notice);
        }
        seen
    }

    /// State changes among the published notices
    pub fn states(&mut self) -> Vec<SessionState> {
        self.notices()
            .into_iter()
            .filter_map(|n| match n {
                Notice::State(state) => Some(state),
                _ => None,
            })
            .collect()
    }
}

/// Requests seen by the mock backend
#[derive(Default)]
pub struct MockLog {
    pub chats: Mutex<Vec<Value>>,
    pub speech: Mutex<Vec<Value>>,
    pub uploads: AtomicUsize,
}

/// Spawn a mock Nova backend on an ephemeral port
pub async fn spawn_mock_backend() -> (SocketAddr, Arc<MockLog>) {
    let log = Arc::new(MockLog::default());

    let app = Router::new()
        .route("/chat", post(mock_chat))
        .route("/text-to-speech", post(mock_tts))
        .route("/speech-to-text", post(mock_stt))
        .route("/system-status", get(mock_status))
        .route("/audio/reply.wav", get(mock_audio))
        .route("/broken/chat", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route(
            "/broken/text-to-speech",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        )
        .with_state(Arc::clone(&log));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, log)
}

async fn mock_chat(State(log): State<Arc<MockLog>>, Json(body): Json<Value>) -> Json<Value> {
    let text = body["text"].as_str().unwrap_or_default().to_string();
    log.chats.lock().unwrap().push(body);
    Json(json!({ "text": format!("Backend heard: {text}"), "emotion": "happy" }))
}

async fn mock_tts(State(log): State<Arc<MockLog>>, Json(body): Json<Value>) -> Json<Value> {
    log.speech.lock().unwrap().push(body);
    Json(json!({ "audio_url": "/audio/reply.wav" }))
}

async fn mock_stt(State(log): State<Arc<MockLog>>, body: axum::body::Bytes) -> Json<Value> {
    log.uploads.fetch_add(1, Ordering::SeqCst);
    let saw_file = String::from_utf8_lossy(&body).contains("name=\"file\"");
    Json(json!({ "text": if saw_file { "hello nova" } else { "" } }))
}

async fn mock_status() -> Json<Value> {
    Json(json!({ "status": "ok", "current_emotion": "neutral" }))
}

async fn mock_audio() -> Vec<u8> {
    nova_voice::voice::samples_to_wav(&[0.0; 160], 16000).unwrap()
}
