//! Capture-cycle state machine.
//!
//! Idle → Recording → Processing → {Succeeded | NotationFailed | Failed},
//! with terminal states accepting a fresh `start()`. Stopping outside
//! `Recording` is a no-op; starting while a cycle is active is rejected.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::audio::{self, AudioChunk, CaptureError, CaptureSource};
use crate::notation::{LookupKey, NotationFetcher};
use crate::recognition::Recognizer;

use super::status::{SessionEvent, SessionPhase, SessionStatus, SessionStatusHandle};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a capture cycle is already active ({})", .0.as_str())]
    AlreadyActive(SessionPhase),
    #[error(transparent)]
    Capture(#[from] CaptureError),
}

pub struct SessionController {
    capture: Box<dyn CaptureSource>,
    recognizer: Arc<dyn Recognizer>,
    notation: Arc<dyn NotationFetcher>,
    status: SessionStatusHandle,
}

impl SessionController {
    pub fn new(
        capture: Box<dyn CaptureSource>,
        recognizer: Arc<dyn Recognizer>,
        notation: Arc<dyn NotationFetcher>,
    ) -> Self {
        Self {
            capture,
            recognizer,
            notation,
            status: SessionStatusHandle::default(),
        }
    }

    pub async fn status(&self) -> SessionStatus {
        self.status.current().await
    }

    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.status.subscribe().await
    }

    /// Begin a capture cycle. Rejected while one is already recording or
    /// processing; never queued.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        let phase = self.status.current().await.phase();
        if phase.is_busy() {
            warn!("start() rejected, session is {}", phase.as_str());
            return Err(SessionError::AlreadyActive(phase));
        }

        // The device is retained across cycles; acquire() is a no-op once
        // held and only retried after an earlier failure.
        if let Err(e) = self.capture.acquire().and_then(|()| self.capture.begin()) {
            error!("Failed to start capture: {}", e);
            self.status
                .transition(SessionStatus::failed((&e).into(), &e))
                .await;
            return Err(e.into());
        }

        info!("Capture cycle started");
        self.status.transition(SessionStatus::Recording).await;
        Ok(())
    }

    /// End capture and run the processing pipeline. No-op unless recording,
    /// so a second stop never re-invokes the capture teardown.
    pub async fn stop(&mut self) -> Result<(), SessionError> {
        let phase = self.status.current().await.phase();
        if phase != SessionPhase::Recording {
            debug!("stop() ignored, session is {}", phase.as_str());
            return Ok(());
        }

        // end() resolves only after the final chunk has been appended, so
        // encoding never races chunk delivery.
        let chunks = match self.capture.end() {
            Ok(chunks) => chunks,
            Err(e) => {
                error!("Failed to stop capture: {}", e);
                self.status
                    .transition(SessionStatus::failed((&e).into(), &e))
                    .await;
                return Err(e.into());
            }
        };

        let sample_rate = self.capture.sample_rate();
        self.status.transition(SessionStatus::Processing).await;

        let recognizer = Arc::clone(&self.recognizer);
        let notation = Arc::clone(&self.notation);
        let status = self.status.clone();
        tokio::spawn(async move {
            run_pipeline(recognizer, notation, status, chunks, sample_rate).await;
        });

        Ok(())
    }
}

/// encode → recognize → derive key → fetch notation, ending in exactly one
/// terminal status. Recognition always resolves before the notation lookup
/// begins; there is no mid-flight cancellation.
async fn run_pipeline(
    recognizer: Arc<dyn Recognizer>,
    notation: Arc<dyn NotationFetcher>,
    status: SessionStatusHandle,
    chunks: Vec<AudioChunk>,
    sample_rate: u32,
) {
    let payload = match audio::encode(&chunks, sample_rate) {
        Ok(payload) => payload,
        Err(e) => {
            // Zero-duration captures never reach the network.
            error!("Encoding failed: {}", e);
            status
                .transition(SessionStatus::failed((&e).into(), &e))
                .await;
            return;
        }
    };

    let result = match recognizer.recognize(&payload).await {
        Ok(result) => result,
        Err(e) => {
            status
                .transition(SessionStatus::failed((&e).into(), &e))
                .await;
            return;
        }
    };

    let key = LookupKey::derive(&result);
    match notation.fetch_notation(&key).await {
        Ok(notation) => {
            status.transition(SessionStatus::Succeeded(result)).await;
            status.deliver_notation(notation).await;
        }
        Err(e) => {
            // Notation failure never retracts the recognition result.
            warn!("Notation unavailable for {}: {}", key, e);
            status
                .transition(SessionStatus::NotationFailed(result))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use hound::WavReader;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    use crate::audio::EncodedPayload;
    use crate::notation::{NotationError, NotationResult};
    use crate::recognition::{RecognitionError, RecognitionResult};
    use crate::session::status::ErrorKind;

    fn sample_result(song_id: &str) -> RecognitionResult {
        RecognitionResult {
            song_id: song_id.to_string(),
            title: "X".to_string(),
            artist: "Y".to_string(),
            confidence: 0.87,
        }
    }

    struct ScriptedCapture {
        chunks: Vec<AudioChunk>,
        deny_acquire: Arc<AtomicBool>,
        end_calls: Arc<AtomicUsize>,
        recording: bool,
    }

    impl ScriptedCapture {
        fn new(chunks: Vec<AudioChunk>) -> Self {
            Self {
                chunks,
                deny_acquire: Arc::new(AtomicBool::new(false)),
                end_calls: Arc::new(AtomicUsize::new(0)),
                recording: false,
            }
        }
    }

    impl CaptureSource for ScriptedCapture {
        fn acquire(&mut self) -> Result<(), CaptureError> {
            if self.deny_acquire.load(Ordering::SeqCst) {
                return Err(CaptureError::PermissionDenied("denied by user".to_string()));
            }
            Ok(())
        }

        fn begin(&mut self) -> Result<(), CaptureError> {
            self.recording = true;
            Ok(())
        }

        fn end(&mut self) -> Result<Vec<AudioChunk>, CaptureError> {
            self.end_calls.fetch_add(1, Ordering::SeqCst);
            self.recording = false;
            Ok(std::mem::take(&mut self.chunks))
        }

        fn is_recording(&self) -> bool {
            self.recording
        }

        fn sample_rate(&self) -> u32 {
            44_100
        }
    }

    #[derive(Default)]
    struct StubRecognizer {
        song_id: String,
        fail: bool,
        gate: Option<Arc<Notify>>,
        calls: AtomicUsize,
        last_payload: StdMutex<Option<String>>,
    }

    #[async_trait]
    impl Recognizer for StubRecognizer {
        async fn recognize(
            &self,
            payload: &EncodedPayload,
        ) -> Result<RecognitionResult, RecognitionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_payload.lock().unwrap() = Some(payload.as_str().to_string());

            if let Some(gate) = &self.gate {
                gate.notified().await;
            }

            if self.fail {
                return Err(RecognitionError::Unreachable(
                    "connection refused".to_string(),
                ));
            }

            Ok(sample_result(&self.song_id))
        }
    }

    #[derive(Default)]
    struct StubNotation {
        reject_status: Option<u16>,
        last_key: StdMutex<Option<String>>,
    }

    #[async_trait]
    impl NotationFetcher for StubNotation {
        async fn fetch_notation(
            &self,
            key: &LookupKey,
        ) -> Result<NotationResult, NotationError> {
            *self.last_key.lock().unwrap() = Some(key.as_str().to_string());

            if let Some(status) = self.reject_status {
                return Err(NotationError::ServerRejected { status });
            }

            Ok(NotationResult {
                title: "X".to_string(),
                notation: "e4 g4 c5".to_string(),
            })
        }
    }

    fn chunk(len: usize, value: f32) -> AudioChunk {
        vec![value; len]
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        rx.recv().await.expect("event channel closed unexpectedly")
    }

    #[tokio::test]
    async fn test_end_to_end_observer_sequence() {
        let recognizer = Arc::new(StubRecognizer {
            song_id: "42".to_string(),
            ..Default::default()
        });
        let notation = Arc::new(StubNotation::default());
        let capture = ScriptedCapture::new(vec![chunk(4, 0.1), chunk(4, 0.2), chunk(4, 0.3)]);

        let mut controller =
            SessionController::new(Box::new(capture), recognizer.clone(), notation.clone());
        let mut rx = controller.subscribe().await;

        controller.start().await.unwrap();
        controller.stop().await.unwrap();

        assert_eq!(
            next_event(&mut rx).await,
            SessionEvent::Status(SessionStatus::Recording)
        );
        assert_eq!(
            next_event(&mut rx).await,
            SessionEvent::Status(SessionStatus::Processing)
        );
        assert_eq!(
            next_event(&mut rx).await,
            SessionEvent::Status(SessionStatus::Succeeded(sample_result("42")))
        );
        assert_eq!(
            next_event(&mut rx).await,
            SessionEvent::Notation(NotationResult {
                title: "X".to_string(),
                notation: "e4 g4 c5".to_string(),
            })
        );

        assert_eq!(notation.last_key.lock().unwrap().as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn test_all_chunks_reach_the_payload() {
        let recognizer = Arc::new(StubRecognizer {
            song_id: "42".to_string(),
            ..Default::default()
        });
        let notation = Arc::new(StubNotation::default());
        let capture = ScriptedCapture::new(vec![chunk(10, 0.1), chunk(20, 0.2), chunk(30, 0.3)]);

        let mut controller =
            SessionController::new(Box::new(capture), recognizer.clone(), notation);
        let mut rx = controller.subscribe().await;

        controller.start().await.unwrap();
        controller.stop().await.unwrap();

        // Drain to the terminal status so the pipeline has finished.
        loop {
            if let SessionEvent::Status(SessionStatus::Succeeded(_)) = next_event(&mut rx).await {
                break;
            }
        }

        let payload = recognizer.last_payload.lock().unwrap().clone().unwrap();
        let bytes = BASE64.decode(payload).unwrap();
        let reader = WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.len(), 60);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let recognizer = Arc::new(StubRecognizer {
            song_id: "42".to_string(),
            gate: Some(Arc::new(Notify::new())),
            ..Default::default()
        });
        let gate = recognizer.gate.clone().unwrap();
        let notation = Arc::new(StubNotation::default());
        let capture = ScriptedCapture::new(vec![chunk(4, 0.1)]);
        let end_calls = Arc::clone(&capture.end_calls);

        let mut controller =
            SessionController::new(Box::new(capture), recognizer.clone(), notation);
        let mut rx = controller.subscribe().await;

        // Stop while idle changes nothing.
        controller.stop().await.unwrap();
        assert_eq!(controller.status().await, SessionStatus::Idle);
        assert_eq!(end_calls.load(Ordering::SeqCst), 0);

        controller.start().await.unwrap();
        controller.stop().await.unwrap();
        assert_eq!(end_calls.load(Ordering::SeqCst), 1);

        // Second stop during processing: guarded by the state check, the
        // capture teardown is not re-invoked.
        controller.stop().await.unwrap();
        assert_eq!(end_calls.load(Ordering::SeqCst), 1);

        gate.notify_one();
        loop {
            if let SessionEvent::Status(SessionStatus::Succeeded(_)) = next_event(&mut rx).await {
                break;
            }
        }

        // Stop in a terminal state is still a no-op.
        controller.stop().await.unwrap();
        assert_eq!(end_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_rejected_while_busy() {
        let recognizer = Arc::new(StubRecognizer {
            song_id: "42".to_string(),
            gate: Some(Arc::new(Notify::new())),
            ..Default::default()
        });
        let gate = recognizer.gate.clone().unwrap();
        let notation = Arc::new(StubNotation::default());
        let capture = ScriptedCapture::new(vec![chunk(4, 0.1)]);

        let mut controller =
            SessionController::new(Box::new(capture), recognizer.clone(), notation);
        let mut rx = controller.subscribe().await;

        controller.start().await.unwrap();
        match controller.start().await {
            Err(SessionError::AlreadyActive(SessionPhase::Recording)) => {}
            other => panic!("expected rejection while recording, got {:?}", other.err()),
        }

        controller.stop().await.unwrap();
        match controller.start().await {
            Err(SessionError::AlreadyActive(SessionPhase::Processing)) => {}
            other => panic!("expected rejection while processing, got {:?}", other.err()),
        }

        gate.notify_one();
        loop {
            if let SessionEvent::Status(SessionStatus::Succeeded(_)) = next_event(&mut rx).await {
                break;
            }
        }

        // Terminal state accepts a fresh start.
        controller.start().await.unwrap();
    }

    #[tokio::test]
    async fn test_acquire_failure_emits_failed_and_allows_retry() {
        let recognizer = Arc::new(StubRecognizer::default());
        let notation = Arc::new(StubNotation::default());
        let capture = ScriptedCapture::new(vec![chunk(4, 0.1)]);
        let deny = Arc::clone(&capture.deny_acquire);
        deny.store(true, Ordering::SeqCst);

        let mut controller = SessionController::new(Box::new(capture), recognizer, notation);
        let mut rx = controller.subscribe().await;

        assert!(controller.start().await.is_err());
        match next_event(&mut rx).await {
            SessionEvent::Status(SessionStatus::Failed { kind, .. }) => {
                assert_eq!(kind, ErrorKind::PermissionDenied);
            }
            other => panic!("expected Failed status, got {:?}", other),
        }

        // Permission granted later: the next start succeeds.
        deny.store(false, Ordering::SeqCst);
        controller.start().await.unwrap();
        assert_eq!(controller.status().await, SessionStatus::Recording);
    }

    #[tokio::test]
    async fn test_empty_capture_never_reaches_the_network() {
        let recognizer = Arc::new(StubRecognizer::default());
        let notation = Arc::new(StubNotation::default());
        let capture = ScriptedCapture::new(Vec::new());

        let mut controller =
            SessionController::new(Box::new(capture), recognizer.clone(), notation);
        let mut rx = controller.subscribe().await;

        controller.start().await.unwrap();
        controller.stop().await.unwrap();

        assert_eq!(
            next_event(&mut rx).await,
            SessionEvent::Status(SessionStatus::Recording)
        );
        assert_eq!(
            next_event(&mut rx).await,
            SessionEvent::Status(SessionStatus::Processing)
        );
        match next_event(&mut rx).await {
            SessionEvent::Status(SessionStatus::Failed { kind, .. }) => {
                assert_eq!(kind, ErrorKind::EmptyCapture);
            }
            other => panic!("expected Failed status, got {:?}", other),
        }

        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recognition_failure_is_terminal() {
        let recognizer = Arc::new(StubRecognizer {
            fail: true,
            ..Default::default()
        });
        let notation = Arc::new(StubNotation::default());
        let capture = ScriptedCapture::new(vec![chunk(4, 0.1)]);

        let mut controller =
            SessionController::new(Box::new(capture), recognizer, notation.clone());
        let mut rx = controller.subscribe().await;

        controller.start().await.unwrap();
        controller.stop().await.unwrap();

        loop {
            match next_event(&mut rx).await {
                SessionEvent::Status(SessionStatus::Failed { kind, message }) => {
                    assert_eq!(kind, ErrorKind::Unreachable);
                    assert!(message.contains("connection refused"));
                    break;
                }
                SessionEvent::Status(SessionStatus::Recording)
                | SessionEvent::Status(SessionStatus::Processing) => {}
                other => panic!("unexpected event {:?}", other),
            }
        }

        // Recognition failed, so no lookup was attempted.
        assert!(notation.last_key.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_notation_failure_preserves_recognition_result() {
        let recognizer = Arc::new(StubRecognizer {
            song_id: "42".to_string(),
            ..Default::default()
        });
        let notation = Arc::new(StubNotation {
            reject_status: Some(500),
            ..Default::default()
        });
        let capture = ScriptedCapture::new(vec![chunk(4, 0.1)]);

        let mut controller = SessionController::new(Box::new(capture), recognizer, notation);
        let mut rx = controller.subscribe().await;

        controller.start().await.unwrap();
        controller.stop().await.unwrap();

        loop {
            match next_event(&mut rx).await {
                SessionEvent::Status(SessionStatus::NotationFailed(result)) => {
                    assert_eq!(result, sample_result("42"));
                    break;
                }
                SessionEvent::Status(SessionStatus::Recording)
                | SessionEvent::Status(SessionStatus::Processing) => {}
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_missing_song_id_falls_back_to_slug_key() {
        let recognizer = Arc::new(StubRecognizer::default());
        let notation = Arc::new(StubNotation::default());
        let capture = ScriptedCapture::new(vec![chunk(4, 0.1)]);

        let mut controller =
            SessionController::new(Box::new(capture), recognizer, notation.clone());
        let mut rx = controller.subscribe().await;

        controller.start().await.unwrap();
        controller.stop().await.unwrap();

        loop {
            if let SessionEvent::Status(SessionStatus::Succeeded(_)) = next_event(&mut rx).await {
                break;
            }
        }

        assert_eq!(notation.last_key.lock().unwrap().as_deref(), Some("x-y"));
    }
}
