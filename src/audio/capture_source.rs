//! Capture source abstraction for the microphone seam.
//!
//! The session controller only sees this trait; the cpal-backed
//! implementation lives in `mic_capture`.

use thiserror::Error;

/// One buffer of raw samples as delivered by the input stream callback.
/// Chunks are appended in arrival order while recording.
pub type AudioChunk = Vec<f32>;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),
    #[error("no usable input device: {0}")]
    DeviceUnavailable(String),
}

pub trait CaptureSource {
    /// Open the input device. Idempotent: a held device is kept across
    /// cycles and never swapped mid-session.
    fn acquire(&mut self) -> Result<(), CaptureError>;

    /// Clear previously captured chunks and start buffering new ones.
    fn begin(&mut self) -> Result<(), CaptureError>;

    /// Stop the stream and return every captured chunk. Returns only after
    /// the final chunk has been appended. The device stays held for the
    /// next cycle. Not recording: returns an empty list immediately.
    fn end(&mut self) -> Result<Vec<AudioChunk>, CaptureError>;

    /// Whether this source is currently buffering chunks.
    fn is_recording(&self) -> bool;

    /// The sample rate of captured audio.
    fn sample_rate(&self) -> u32;
}
