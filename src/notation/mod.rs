//! Secondary lookup: staff notation for a recognized track.
//!
//! The lookup key prefers the server-provided id; when the recognition
//! service omits one, a deterministic slug from title and artist stands in
//! so the lookup is never skipped.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use tracing::{error, info};

use crate::recognition::RecognitionResult;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NotationResult {
    pub title: String,
    /// Opaque serialized notation payload; rendering is someone else's job.
    pub notation: String,
}

#[derive(Debug, Error)]
pub enum NotationError {
    #[error("notation service unreachable: {0}")]
    Unreachable(String),
    #[error("notation service returned {status}")]
    ServerRejected { status: u16 },
    #[error("malformed notation response: {0}")]
    MalformedResponse(String),
}

/// Identifier used to request notation for a recognized track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupKey(String);

impl LookupKey {
    /// Prefer the server id; fall back to `slug(title)-slug(artist)`.
    pub fn derive(result: &RecognitionResult) -> Self {
        if !result.song_id.is_empty() {
            return Self(result.song_id.clone());
        }

        Self(format!("{}-{}", slug(&result.title), slug(&result.artist)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn slug(text: &str) -> String {
    text.to_lowercase().replace(' ', "-")
}

#[async_trait]
pub trait NotationFetcher: Send + Sync {
    async fn fetch_notation(&self, key: &LookupKey) -> Result<NotationResult, NotationError>;
}

pub struct HttpNotationClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotationClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        info!("Notation client targeting {}", endpoint);

        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

fn parse_response(status: u16, body: &str) -> Result<NotationResult, NotationError> {
    if !(200..300).contains(&status) {
        return Err(NotationError::ServerRejected { status });
    }

    serde_json::from_str(body).map_err(|e| NotationError::MalformedResponse(e.to_string()))
}

#[async_trait]
impl NotationFetcher for HttpNotationClient {
    async fn fetch_notation(&self, key: &LookupKey) -> Result<NotationResult, NotationError> {
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), key);
        info!("Fetching staff notation for {}", key);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| NotationError::Unreachable(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| NotationError::Unreachable(e.to_string()))?;

        match parse_response(status, &body) {
            Ok(notation) => {
                info!("Received notation for \"{}\"", notation.title);
                Ok(notation)
            }
            Err(e) => {
                error!("Notation fetch failed: {}", e);
                Err(e)
            }
        }
    }
}
