//! Capture device lifecycle and final-result filtering

use tokio::sync::mpsc;

use super::event::Event;
use crate::CaptureError;

/// Host speech recognizer
///
/// `start` receives a fresh [`CaptureSink`] for each capture session; the
/// device reports partial and final results, errors and end-of-capture
/// through it. Devices run their own I/O and must not block.
pub trait CaptureDevice: Send {
    /// Begin capturing
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    fn start(&mut self, sink: CaptureSink) -> Result<(), CaptureError>;

    /// End capture gracefully; a pending final result may still be flushed
    fn stop(&mut self);

    /// End capture immediately, dropping anything pending
    fn abort(&mut self);
}

/// What a capture device reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSignal {
    /// Interim hypothesis
    Partial(String),
    /// Complete utterance
    Final(String),
    /// Device failure
    Error(CaptureError),
    /// Capture finished without a final result
    Ended,
}

/// Channel a device reports into, tagged with its capture epoch
#[derive(Debug, Clone)]
pub struct CaptureSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<Event>,
}

impl CaptureSink {
    pub(crate) const fn new(epoch: u64, tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { epoch, tx }
    }

    pub fn partial(&self, text: impl Into<String>) {
        self.send(CaptureSignal::Partial(text.into()));
    }

    pub fn final_result(&self, text: impl Into<String>) {
        self.send(CaptureSignal::Final(text.into()));
    }

    pub fn error(&self, reason: CaptureError) {
        self.send(CaptureSignal::Error(reason));
    }

    pub fn ended(&self) {
        self.send(CaptureSignal::Ended);
    }

    fn send(&self, signal: CaptureSignal) {
        // Receiver only goes away at shutdown
        let _ = self.tx.send(Event::Capture {
            epoch: self.epoch,
            signal,
        });
    }
}

/// Capture report that matters to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// A non-empty final transcript
    Final(String),
    /// Capture failed
    Error(CaptureError),
    /// Capture ended with nothing to process
    Ended,
}

/// Owns a capture device and filters what it reports
///
/// Interim results are drained and counted but never routed further. Each
/// `start` opens a new epoch; `abort` and every accepted final result close
/// it, so late reports from an old epoch are dropped silently.
pub struct CaptureController<D> {
    device: D,
    tx: mpsc::UnboundedSender<Event>,
    epoch: u64,
    active: bool,
    partials: usize,
}

impl<D: CaptureDevice> CaptureController<D> {
    pub(crate) const fn new(device: D, tx: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            device,
            tx,
            epoch: 0,
            active: false,
            partials: 0,
        }
    }

    /// Start capturing; a no-op while already active
    ///
    /// Returns `true` if capture was started by this call.
    ///
    /// # Errors
    ///
    /// Returns error if the device refuses to start
    pub fn start(&mut self) -> Result<bool, CaptureError> {
        if self.active {
            tracing::trace!(epoch = self.epoch, "capture already active");
            return Ok(false);
        }

        self.epoch += 1;
        self.partials = 0;
        self.device
            .start(CaptureSink::new(self.epoch, self.tx.clone()))?;
        self.active = true;

        tracing::debug!(epoch = self.epoch, "capture started");
        Ok(true)
    }

    /// Stop gracefully; the current epoch stays open for a flushed result
    pub fn stop(&mut self) {
        if self.active {
            self.device.stop();
            self.active = false;
            tracing::debug!(epoch = self.epoch, "capture stopped");
        }
    }

    /// Stop immediately and suppress anything still pending
    pub fn abort(&mut self) {
        self.epoch += 1;
        if self.active {
            self.device.abort();
            self.active = false;
            tracing::debug!("capture aborted");
        }
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Interim results drained in the current epoch
    #[must_use]
    pub const fn partials(&self) -> usize {
        self.partials
    }

    /// The wrapped device
    #[must_use]
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// Filter a device report
    pub fn accept(&mut self, epoch: u64, signal: CaptureSignal) -> Option<CaptureOutcome> {
        if epoch != self.epoch {
            tracing::trace!(epoch, current = self.epoch, "stale capture report dropped");
            return None;
        }

        match signal {
            CaptureSignal::Partial(_) => {
                self.partials += 1;
                None
            }
            CaptureSignal::Final(text) => {
                // One final per utterance: close the epoch and release the device
                if self.active {
                    self.device.stop();
                }
                self.active = false;
                self.epoch += 1;

                let text = text.trim();
                if text.is_empty() {
                    Some(CaptureOutcome::Ended)
                } else {
                    Some(CaptureOutcome::Final(text.to_string()))
                }
            }
            CaptureSignal::Error(reason) => {
                self.active = false;
                self.epoch += 1;
                Some(CaptureOutcome::Error(reason))
            }
            CaptureSignal::Ended => {
                self.active = false;
                Some(CaptureOutcome::Ended)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        starts: usize,
        stops: usize,
        aborts: usize,
        sink: Option<CaptureSink>,
        refuse: Option<CaptureError>,
    }

    impl CaptureDevice for Recorder {
        fn start(&mut self, sink: CaptureSink) -> Result<(), CaptureError> {
            if let Some(reason) = self.refuse {
                return Err(reason);
            }
            self.starts += 1;
            self.sink = Some(sink);
            Ok(())
        }

        fn stop(&mut self) {
            self.stops += 1;
        }

        fn abort(&mut self) {
            self.aborts += 1;
        }
    }

    fn controller() -> (CaptureController<Recorder>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CaptureController::new(Recorder::default(), tx), rx)
    }

    fn next_capture(rx: &mut mpsc::UnboundedReceiver<Event>) -> (u64, CaptureSignal) {
        match rx.try_recv() {
            Ok(Event::Capture { epoch, signal }) => (epoch, signal),
            other => panic!("expected capture event, got {other:?}"),
        }
    }

    #[test]
    fn test_start_is_idempotent() {
        let (mut capture, _rx) = controller();
        assert_eq!(capture.start(), Ok(true));
        assert_eq!(capture.start(), Ok(false));
        assert!(capture.is_active());
        assert_eq!(capture.device().starts, 1);
    }

    #[test]
    fn test_partials_are_drained_not_routed() {
        let (mut capture, mut rx) = controller();
        capture.start().unwrap();
        let sink = capture.device().sink.clone().unwrap();

        sink.partial("hel");
        sink.partial("hello th");
        sink.final_result("hello there");

        for _ in 0..2 {
            let (epoch, signal) = next_capture(&mut rx);
            assert_eq!(capture.accept(epoch, signal), None);
        }
        assert_eq!(capture.partials(), 2);

        let (epoch, signal) = next_capture(&mut rx);
        assert_eq!(
            capture.accept(epoch, signal),
            Some(CaptureOutcome::Final("hello there".to_string()))
        );
        assert!(!capture.is_active());
    }

    #[test]
    fn test_second_final_in_epoch_is_dropped() {
        let (mut capture, mut rx) = controller();
        capture.start().unwrap();
        let sink = capture.device().sink.clone().unwrap();

        sink.final_result("one");
        sink.final_result("two");

        let (epoch, signal) = next_capture(&mut rx);
        assert!(capture.accept(epoch, signal).is_some());
        let (epoch, signal) = next_capture(&mut rx);
        assert_eq!(capture.accept(epoch, signal), None);
    }

    #[test]
    fn test_abort_suppresses_pending_final() {
        let (mut capture, mut rx) = controller();
        capture.start().unwrap();
        let sink = capture.device().sink.clone().unwrap();

        capture.abort();
        sink.final_result("too late");

        let (epoch, signal) = next_capture(&mut rx);
        assert_eq!(capture.accept(epoch, signal), None);
        assert_eq!(capture.device().aborts, 1);
    }

    #[test]
    fn test_stop_still_flushes_final() {
        let (mut capture, mut rx) = controller();
        capture.start().unwrap();
        let sink = capture.device().sink.clone().unwrap();

        capture.stop();
        sink.final_result("flushed");

        let (epoch, signal) = next_capture(&mut rx);
        assert_eq!(
            capture.accept(epoch, signal),
            Some(CaptureOutcome::Final("flushed".to_string()))
        );
        assert_eq!(capture.device().stops, 1);
    }

    #[test]
    fn test_blank_final_is_treated_as_end() {
        let (mut capture, mut rx) = controller();
        capture.start().unwrap();
        capture.device().sink.clone().unwrap().final_result("   ");

        let (epoch, signal) = next_capture(&mut rx);
        assert_eq!(capture.accept(epoch, signal), Some(CaptureOutcome::Ended));
    }

    #[test]
    fn test_refused_start_leaves_inactive() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let device = Recorder {
            refuse: Some(CaptureError::PermissionDenied),
            ..Recorder::default()
        };
        let mut capture = CaptureController::new(device, tx);

        assert_eq!(capture.start(), Err(CaptureError::PermissionDenied));
        assert!(!capture.is_active());
    }
}
