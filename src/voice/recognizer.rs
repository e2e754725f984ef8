//! Capture devices: microphone with backend transcription, and typed text

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
use super::segmenter::{SegmenterState, UtteranceSegmenter};
use crate::backend::BackendClient;
use crate::turn::{CaptureDevice, CaptureSink};
use crate::CaptureError;

/// How often the capture thread drains the microphone buffer
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Longest `start` blocks the caller while the device opens
const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct MicControl {
    stop: AtomicBool,
    abort: AtomicBool,
}

/// Microphone recognizer
///
/// Each capture session runs on its own thread that owns the cpal stream,
/// segments one utterance by energy and hands the WAV to the backend's
/// speech-to-text endpoint. Speech onset is reported as a partial result.
pub struct MicRecognizer {
    backend: Arc<BackendClient>,
    runtime: Handle,
    control: Option<Arc<MicControl>>,
}

impl std::fmt::Debug for MicRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicRecognizer")
            .field("active", &self.control.is_some())
            .finish_non_exhaustive()
    }
}

impl MicRecognizer {
    /// Create a recognizer that transcribes through `backend`
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if there is no current runtime
    pub fn new(backend: Arc<BackendClient>) -> crate::Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| crate::Error::Config(format!("no async runtime: {e}")))?;
        Ok(Self {
            backend,
            runtime,
            control: None,
        })
    }
}

impl CaptureDevice for MicRecognizer {
    fn start(&mut self, sink: CaptureSink) -> Result<(), CaptureError> {
        self.abort();

        let control = Arc::new(MicControl::default());
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);

        let thread_control = Arc::clone(&control);
        let backend = Arc::clone(&self.backend);
        let runtime = self.runtime.clone();
        std::thread::Builder::new()
            .name("nova-mic".to_string())
            .spawn(move || {
                capture_utterance(&sink, &backend, &runtime, &thread_control, &ready_tx);
            })
            .map_err(|e| {
                tracing::warn!(error = %e, "cannot spawn capture thread");
                CaptureError::Transient
            })?;

        // Blocks the event loop for at most DEVICE_OPEN_TIMEOUT
        wait_for_device(&ready_rx, &control, DEVICE_OPEN_TIMEOUT)?;
        self.control = Some(control);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(control) = self.control.take() {
            control.stop.store(true, Ordering::Relaxed);
        }
    }

    fn abort(&mut self) {
        if let Some(control) = self.control.take() {
            control.abort.store(true, Ordering::Relaxed);
        }
    }
}

impl Drop for MicRecognizer {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Wait for the capture thread to report whether the device opened
///
/// On timeout the thread is told to abort once it gets the device.
fn wait_for_device(
    ready: &std::sync::mpsc::Receiver<Result<(), CaptureError>>,
    control: &MicControl,
    timeout: Duration,
) -> Result<(), CaptureError> {
    match ready.recv_timeout(timeout) {
        Ok(opened) => opened,
        Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
            tracing::warn!(?timeout, "capture device took too long to open");
            control.abort.store(true, Ordering::Relaxed);
            Err(CaptureError::Transient)
        }
        Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => Err(CaptureError::Transient),
    }
}

fn capture_utterance(
    sink: &CaptureSink,
    backend: &Arc<BackendClient>,
    runtime: &Handle,
    control: &MicControl,
    ready: &std::sync::mpsc::SyncSender<Result<(), CaptureError>>,
) {
    let mut capture = match AudioCapture::new().and_then(|mut c| c.start().map(|()| c)) {
        Ok(capture) => capture,
        Err(reason) => {
            let _ = ready.send(Err(reason));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut segmenter = UtteranceSegmenter::new();
    let mut onset_reported = false;

    let utterance = loop {
        if control.abort.load(Ordering::Relaxed) {
            capture.stop();
            return;
        }
        let stopping = control.stop.load(Ordering::Relaxed);

        let state = segmenter.push(&capture.take_buffer());
        if state != SegmenterState::Waiting && !onset_reported {
            sink.partial(String::new());
            onset_reported = true;
        }

        if state == SegmenterState::Complete || stopping {
            break segmenter.take_utterance();
        }
        std::thread::sleep(POLL_INTERVAL);
    };
    capture.stop();

    let Some(samples) = utterance else {
        sink.ended();
        return;
    };

    let wav = match samples_to_wav(&samples, SAMPLE_RATE) {
        Ok(wav) => wav,
        Err(e) => {
            tracing::warn!(error = %e, "cannot encode utterance");
            sink.error(CaptureError::Transient);
            return;
        }
    };

    tracing::debug!(samples = samples.len(), bytes = wav.len(), "transcribing utterance");
    let backend = Arc::clone(backend);
    let sink = sink.clone();
    runtime.spawn(async move {
        match backend.transcribe(wav).await {
            Ok(text) => sink.final_result(text),
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                sink.error(CaptureError::Transient);
            }
        }
    });
}

/// Capture device over lines of text
///
/// Each line typed while capture is armed becomes a final transcript;
/// lines typed while it is not are dropped. End of input ends capture.
pub struct TextRecognizer {
    armed: Arc<Mutex<Option<CaptureSink>>>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for TextRecognizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextRecognizer")
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl TextRecognizer {
    /// Read lines from `input`; must be called within a tokio runtime
    pub fn new<R>(input: R) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let armed: Arc<Mutex<Option<CaptureSink>>> = Arc::default();
        let closed = Arc::new(AtomicBool::new(false));

        let reader = {
            let armed = Arc::clone(&armed);
            let closed = Arc::clone(&closed);
            tokio::spawn(async move {
                let mut lines = input.lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            let sink = armed.lock().unwrap_or_else(PoisonError::into_inner).take();
                            match sink {
                                Some(sink) => sink.final_result(line),
                                None => tracing::debug!("input while not listening, dropped"),
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(error = %e, "input read failed");
                            break;
                        }
                    }
                }

                closed.store(true, Ordering::Relaxed);
                if let Some(sink) = armed.lock().unwrap_or_else(PoisonError::into_inner).take() {
                    sink.ended();
                }
                tracing::debug!("input closed");
            })
        };

        Self {
            armed,
            closed,
            reader,
        }
    }

    /// Read lines from standard input
    #[must_use]
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }

    fn take_sink(&self) -> Option<CaptureSink> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl CaptureDevice for TextRecognizer {
    fn start(&mut self, sink: CaptureSink) -> Result<(), CaptureError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(CaptureError::NoDevice);
        }
        *self.armed.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(sink) = self.take_sink() {
            sink.ended();
        }
    }

    fn abort(&mut self) {
        self.take_sink();
    }
}

impl Drop for TextRecognizer {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
