//! Primary recognition call: submit the encoded capture and parse the
//! service's verdict into a typed result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::audio::EncodedPayload;

/// What the recognition service concluded about the capture.
/// Immutable once constructed; `song_id` may be empty.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecognitionResult {
    pub song_id: String,
    pub title: String,
    pub artist: String,
    pub confidence: f32,
}

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("recognition service unreachable: {0}")]
    Unreachable(String),
    #[error("recognition service returned {status}: {body}")]
    ServerRejected { status: u16, body: String },
    #[error("malformed recognition response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Serialize)]
struct RecognizeRequest<'a> {
    data: &'a str,
}

#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(
        &self,
        payload: &EncodedPayload,
    ) -> Result<RecognitionResult, RecognitionError>;
}

pub struct HttpRecognitionClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRecognitionClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        info!("Recognition client targeting {}", endpoint);

        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

/// Validate a recognition response, independent of transport.
fn parse_response(status: u16, body: &str) -> Result<RecognitionResult, RecognitionError> {
    if !(200..300).contains(&status) {
        return Err(RecognitionError::ServerRejected {
            status,
            body: body.to_string(),
        });
    }

    let result: RecognitionResult =
        serde_json::from_str(body).map_err(|e| RecognitionError::MalformedResponse(e.to_string()))?;

    if !result.confidence.is_finite() || !(0.0..=1.0).contains(&result.confidence) {
        return Err(RecognitionError::MalformedResponse(format!(
            "confidence {} outside [0, 1]",
            result.confidence
        )));
    }

    Ok(result)
}

#[async_trait]
impl Recognizer for HttpRecognitionClient {
    async fn recognize(
        &self,
        payload: &EncodedPayload,
    ) -> Result<RecognitionResult, RecognitionError> {
        debug!(
            "Submitting {} encoded bytes for recognition",
            payload.as_str().len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&RecognizeRequest {
                data: payload.as_str(),
            })
            .send()
            .await
            .map_err(|e| RecognitionError::Unreachable(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| RecognitionError::Unreachable(e.to_string()))?;

        match parse_response(status, &body) {
            Ok(result) => {
                info!(
                    "Recognized \"{}\" by {} (confidence {:.2})",
                    result.title, result.artist, result.confidence
                );
                Ok(result)
            }
            Err(e) => {
                error!("Recognition failed: {}", e);
                Err(e)
            }
        }
    }
}
