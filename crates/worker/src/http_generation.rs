//! [`GenerationOperation`] backed by an HTTP generation service.
//!
//! Each attempt is one JSON `POST` of the [`GenerationRequest`]. A 2xx
//! response body is the job result; anything else fails the attempt with
//! the status and (truncated) body as the reason.

use std::time::Duration;

use async_trait::async_trait;
use easel_core::generation::{GenerationError, GenerationOperation, GenerationRequest};

/// Response bodies longer than this are cut in failure reasons.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Connect timeout. The overall deadline is enforced by the worker.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpGenerationClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGenerationClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl GenerationOperation for HttpGenerationClient {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<serde_json::Value, GenerationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Failed(format!("Generation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Failed(format!(
                "Generation service returned HTTP {}: {}",
                status.as_u16(),
                truncate(&body, MAX_ERROR_BODY_CHARS),
            )));
        }

        response.json::<serde_json::Value>().await.map_err(|e| {
            GenerationError::Failed(format!("Generation service returned invalid JSON: {e}"))
        })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
