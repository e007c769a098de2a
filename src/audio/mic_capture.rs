//! Microphone audio capture via cpal.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use super::capture_source::{AudioChunk, CaptureError, CaptureSource};

pub struct MicCaptureSource {
    device: Option<cpal::Device>,
    config: cpal::StreamConfig,
    chunks: Arc<Mutex<Vec<AudioChunk>>>,
    stream: Option<cpal::Stream>,
    recording: bool,
    sample_rate: u32,
}

impl MicCaptureSource {
    /// Create a new mic source targeting the default input device. The
    /// device itself is opened lazily on the first `acquire`.
    pub fn new(sample_rate: u32) -> Self {
        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Self {
            device: None,
            config,
            chunks: Arc::new(Mutex::new(Vec::new())),
            stream: None,
            recording: false,
            sample_rate,
        }
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> CaptureError {
    match err {
        // Permission refusals surface as backend-specific errors on every
        // host cpal supports.
        cpal::BuildStreamError::BackendSpecific { err } => {
            CaptureError::PermissionDenied(err.to_string())
        }
        other => CaptureError::DeviceUnavailable(other.to_string()),
    }
}

impl CaptureSource for MicCaptureSource {
    fn acquire(&mut self) -> Result<(), CaptureError> {
        if self.device.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            CaptureError::DeviceUnavailable("no default input device".to_string())
        })?;

        info!(
            "Using input device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        self.device = Some(device);
        Ok(())
    }

    fn begin(&mut self) -> Result<(), CaptureError> {
        if self.recording {
            warn!("begin() called while already recording");
            return Ok(());
        }

        let device = self.device.as_ref().ok_or_else(|| {
            CaptureError::DeviceUnavailable("input device not acquired".to_string())
        })?;

        // Clear chunks from the previous cycle
        {
            let mut chunks = self.chunks.lock().unwrap();
            chunks.clear();
            chunks.shrink_to_fit();
        }

        let chunks_clone = Arc::clone(&self.chunks);
        let err_fn = |err| error!("Input stream error: {}", err);

        let stream = device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut chunks) = chunks_clone.lock() {
                        chunks.push(data.to_vec());
                    }
                },
                err_fn,
                None,
            )
            .map_err(map_build_error)?;

        stream
            .play()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        self.stream = Some(stream);
        self.recording = true;

        info!("Microphone capture started");
        Ok(())
    }

    fn end(&mut self) -> Result<Vec<AudioChunk>, CaptureError> {
        if !self.recording {
            return Ok(Vec::new());
        }

        // Dropping the stream stops the callback; taking the lock afterwards
        // means any in-flight callback has finished and the final chunk has
        // landed.
        if let Some(stream) = self.stream.take() {
            debug!("Stopping input stream");
            drop(stream);
        }

        self.recording = false;

        let chunks = {
            let mut guard = self.chunks.lock().unwrap();
            std::mem::take(&mut *guard)
        };

        info!("Capture stopped, {} chunks buffered", chunks.len());
        Ok(chunks)
    }

    fn is_recording(&self) -> bool {
        self.recording
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for MicCaptureSource {
    fn drop(&mut self) {
        if self.recording {
            debug!("Dropping active MicCaptureSource, stopping stream");
            let _ = self.end();
        }
    }
}
