//! HTTP-backed collaborator clients
//!
//! Thin reqwest clients for the remote inference and embedding services.
//! Wire shapes are small JSON envelopes; any transport or decode failure
//! maps to [`CollaboratorError::Transport`] and surfaces as a structured
//! error at the API boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{CollaboratorError, EmbeddingProvider, InferredSymptoms, SymptomInference};

/// Request timeout for collaborator calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct TextRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    symptoms: BTreeMap<String, u8>,
    #[serde(default)]
    cause: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f64>,
}

fn build_client() -> Result<reqwest::Client, CollaboratorError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| CollaboratorError::Transport(e.to_string()))
}

/// Remote text-to-symptoms inference service.
pub struct HttpSymptomInference {
    client: reqwest::Client,
    url: String,
}

impl HttpSymptomInference {
    pub fn new(url: impl Into<String>) -> Result<Self, CollaboratorError> {
        Ok(Self {
            client: build_client()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl SymptomInference for HttpSymptomInference {
    async fn infer(&self, text: &str) -> Result<InferredSymptoms, CollaboratorError> {
        let response = self
            .client
            .post(&self.url)
            .json(&TextRequest { text })
            .send()
            .await
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;

        let body: InferenceResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;
        Ok(InferredSymptoms {
            symptoms: body.symptoms,
            cause: body.cause,
        })
    }
}

/// Remote embedding service.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    url: String,
}

impl HttpEmbeddingProvider {
    pub fn new(url: impl Into<String>) -> Result<Self, CollaboratorError> {
        Ok(Self {
            client: build_client()?,
            url: url.into(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, CollaboratorError> {
        let response = self
            .client
            .post(&self.url)
            .json(&TextRequest { text })
            .send()
            .await
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;
        Ok(body.embedding)
    }
}
