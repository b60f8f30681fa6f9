//! Abstractions over the model-backed capabilities the pipeline consumes.
//!
//! Two capability traits are exposed: [`TextInference`] (text plus instruction in, text out)
//! and [`VisionInference`] (image bytes in, OCR text or caption out). Both are served by one
//! of two interchangeable adapters picked from configuration: [`RemoteInferenceClient`] talks
//! to a hosted inference API with a bearer token, [`OllamaClient`] talks to a local Ollama
//! runtime. Adapters are constructed once at startup by [`build_backends`] and injected into
//! the pipeline.

mod ollama;
mod remote;
mod retry;

pub use ollama::OllamaClient;
pub use remote::RemoteInferenceClient;
pub use retry::RetryPolicy;

use crate::config::{Config, ConfigError, InferenceProvider};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by inference providers.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Provider could not be reached.
    #[error("Inference provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider answered with a non-success status.
    #[error("Inference provider returned {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code returned by the provider.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
    /// Call did not finish within its deadline.
    #[error("Inference call timed out after {0:?}")]
    Timeout(Duration),
}

impl InferenceError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ProviderUnavailable(_) | Self::Timeout(_) => true,
            Self::UnexpectedStatus { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            Self::InvalidResponse(_) => false,
        }
    }
}

/// A single text-to-text request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Model identifier understood by the provider.
    pub model: String,
    /// Instruction and input text, already assembled.
    pub prompt: String,
    /// Ceiling on the generated output.
    pub max_output_tokens: u32,
}

/// Image payload handed to a vision capability.
#[derive(Debug, Clone)]
pub struct ImageInput {
    /// Raw image bytes.
    pub bytes: Vec<u8>,
    /// Media type of the bytes (for example `image/png`).
    pub media_type: String,
}

/// Text-to-text inference capability used by summarization and question generation.
#[async_trait]
pub trait TextInference: Send + Sync {
    /// Generate text for the supplied request.
    async fn generate(&self, request: GenerationRequest) -> Result<String, InferenceError>;
}

/// Image-to-text capabilities used by the image extractor.
#[async_trait]
pub trait VisionInference: Send + Sync {
    /// Read the literal text visible in the image.
    async fn recognize_text(&self, image: &ImageInput) -> Result<String, InferenceError>;

    /// Describe the image in natural language.
    async fn caption(&self, image: &ImageInput) -> Result<String, InferenceError>;
}

/// Provider handles shared by every request.
#[derive(Clone)]
pub struct InferenceBackends {
    /// Text-to-text capability.
    pub text: Arc<dyn TextInference>,
    /// OCR and captioning capabilities.
    pub vision: Arc<dyn VisionInference>,
}

/// Build the configured inference adapters.
pub fn build_backends(config: &Config) -> Result<InferenceBackends, ConfigError> {
    let retry = RetryPolicy::new(
        config.inference_max_retries,
        Duration::from_millis(config.inference_retry_backoff_ms),
    );
    // The HTTP deadline sits above the pipeline deadlines so the pipeline timeout fires first.
    let request_timeout = config.stage_timeout().max(config.extraction_timeout()) + Duration::from_secs(5);

    match config.inference_provider {
        InferenceProvider::Remote => {
            let token = config
                .inference_api_token
                .clone()
                .ok_or_else(|| ConfigError::MissingVariable("INFERENCE_API_TOKEN".into()))?;
            let client = Arc::new(RemoteInferenceClient::new(
                &config.inference_api_url,
                token,
                config.models.ocr.clone(),
                config.models.caption.clone(),
                request_timeout,
                retry,
            )?);
            tracing::info!(url = %config.inference_api_url, "Remote inference client initialized");
            Ok(InferenceBackends {
                text: client.clone(),
                vision: client,
            })
        }
        InferenceProvider::Ollama => {
            let client = Arc::new(OllamaClient::new(
                &config.ollama_url,
                config.models.ocr.clone(),
                config.models.caption.clone(),
                request_timeout,
                retry,
            )?);
            tracing::info!(url = %config.ollama_url, "Ollama inference client initialized");
            Ok(InferenceBackends {
                text: client.clone(),
                vision: client,
            })
        }
    }
}

/// Truncate an error body so provider responses never flood the logs.
pub(crate) fn clip_body(body: &str) -> String {
    const LIMIT: usize = 512;
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}
