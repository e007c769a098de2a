//! Transport encoding for captured audio.
//!
//! Chunks are concatenated in arrival order into one mono WAV unit, then
//! base64-encoded for embedding in a JSON request body.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::io::Cursor;
use thiserror::Error;

use super::capture_source::AudioChunk;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("no audio captured")]
    EmptyCapture,
    #[error("failed to write WAV data: {0}")]
    Wav(#[from] hound::Error),
}

/// Bare base64 audio payload, ready to embed in a JSON request.
/// Downstream consumers expect the encoded bytes only, never a data URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload(String);

impl EncodedPayload {
    /// Wrap an already-encoded string, stripping any `data:*;base64,`
    /// prefix a browser-style reader may have attached.
    pub fn from_base64(encoded: impl Into<String>) -> Self {
        let encoded = encoded.into();
        match encoded.split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => Self(rest.to_string()),
            _ => Self(encoded),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(BASE64.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Encode captured chunks as one WAV unit. Zero-duration captures are
/// rejected here, before any network round trip is attempted.
pub fn encode(chunks: &[AudioChunk], sample_rate: u32) -> Result<EncodedPayload, EncodeError> {
    if chunks.iter().all(|chunk| chunk.is_empty()) {
        return Err(EncodeError::EmptyCapture);
    }

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for chunk in chunks {
            for &sample in chunk {
                writer.write_sample(sample)?;
            }
        }
        writer.finalize()?;
    }

    Ok(EncodedPayload::from_bytes(&cursor.into_inner()))
}
