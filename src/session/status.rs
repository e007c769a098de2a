//! Session status types and the shared observer handle.

use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::audio::{CaptureError, EncodeError};
use crate::notation::NotationResult;
use crate::recognition::{RecognitionError, RecognitionResult};

/// Coarse phase of the capture cycle, used for transition guards and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Recording,
    Processing,
    Succeeded,
    NotationFailed,
    Failed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::NotationFailed => "notation_failed",
            Self::Failed => "failed",
        }
    }

    /// Busy phases reject a fresh `start()`; idle and terminal phases accept it.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Recording | Self::Processing)
    }
}

/// Failure classification surfaced to observers alongside a message, so the
/// UI can render something more specific than a generic error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PermissionDenied,
    DeviceUnavailable,
    EmptyCapture,
    EncodeFailed,
    Unreachable,
    ServerRejected,
    MalformedResponse,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::DeviceUnavailable => "device_unavailable",
            Self::EmptyCapture => "empty_capture",
            Self::EncodeFailed => "encode_failed",
            Self::Unreachable => "unreachable",
            Self::ServerRejected => "server_rejected",
            Self::MalformedResponse => "malformed_response",
        }
    }
}

impl From<&CaptureError> for ErrorKind {
    fn from(err: &CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied(_) => Self::PermissionDenied,
            CaptureError::DeviceUnavailable(_) => Self::DeviceUnavailable,
        }
    }
}

impl From<&EncodeError> for ErrorKind {
    fn from(err: &EncodeError) -> Self {
        match err {
            EncodeError::EmptyCapture => Self::EmptyCapture,
            EncodeError::Wav(_) => Self::EncodeFailed,
        }
    }
}

impl From<&RecognitionError> for ErrorKind {
    fn from(err: &RecognitionError) -> Self {
        match err {
            RecognitionError::Unreachable(_) => Self::Unreachable,
            RecognitionError::ServerRejected { .. } => Self::ServerRejected,
            RecognitionError::MalformedResponse(_) => Self::MalformedResponse,
        }
    }
}

/// Current session status. Created fresh per transition, never mutated in
/// place; the single source of truth for observers.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Recording,
    Processing,
    Succeeded(RecognitionResult),
    /// Recognition succeeded but notation is unavailable; the result is
    /// preserved, not retracted.
    NotationFailed(RecognitionResult),
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

impl SessionStatus {
    pub fn phase(&self) -> SessionPhase {
        match self {
            Self::Idle => SessionPhase::Idle,
            Self::Recording => SessionPhase::Recording,
            Self::Processing => SessionPhase::Processing,
            Self::Succeeded(_) => SessionPhase::Succeeded,
            Self::NotationFailed(_) => SessionPhase::NotationFailed,
            Self::Failed { .. } => SessionPhase::Failed,
        }
    }

    pub fn failed(kind: ErrorKind, err: impl fmt::Display) -> Self {
        Self::Failed {
            kind,
            message: err.to_string(),
        }
    }
}

/// Value delivered to subscribers: a status transition, or the notation
/// payload arriving after a successful cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(SessionStatus),
    Notation(NotationResult),
}

/// Thread-safe handle sharing session state between the controller, the
/// processing task, and observers. Events fan out in transition order.
#[derive(Clone, Default)]
pub struct SessionStatusHandle {
    status: Arc<Mutex<SessionStatus>>,
    observers: Arc<Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>>,
}

impl SessionStatusHandle {
    pub async fn current(&self) -> SessionStatus {
        self.status.lock().await.clone()
    }

    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.lock().await.push(tx);
        rx
    }

    /// Record a transition and fan it out. Observers whose receiver is gone
    /// are dropped.
    pub async fn transition(&self, status: SessionStatus) {
        {
            let mut current = self.status.lock().await;
            *current = status.clone();
        }
        self.broadcast(SessionEvent::Status(status)).await;
    }

    pub async fn deliver_notation(&self, notation: NotationResult) {
        self.broadcast(SessionEvent::Notation(notation)).await;
    }

    async fn broadcast(&self, event: SessionEvent) {
        let mut observers = self.observers.lock().await;
        observers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
