pub mod capture_source;
pub mod encoder;
pub mod mic_capture;

pub use capture_source::{AudioChunk, CaptureError, CaptureSource};
pub use encoder::{encode, EncodeError, EncodedPayload};
pub use mic_capture::MicCaptureSource;
