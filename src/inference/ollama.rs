//! Local Ollama adapter.
//!
//! Text generation and both vision capabilities go through `/api/generate` with streaming
//! disabled. Vision requests attach the image as base64 and rely on a multimodal model
//! (`llava` by default) steered by a task-specific prompt.

use super::{
    GenerationRequest, ImageInput, InferenceError, RetryPolicy, TextInference, VisionInference,
    clip_body,
};
use crate::config::ConfigError;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const OCR_PROMPT: &str = "Transcribe all legible text in this image exactly as written. \
Return only the text. If there is no text, return nothing.";
const CAPTION_PROMPT: &str = "Describe this image in one or two plain sentences.";

/// Client for a local Ollama runtime.
pub struct OllamaClient {
    http: Client,
    base_url: String,
    ocr_model: String,
    caption_model: String,
    timeout: Duration,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

impl OllamaClient {
    /// Build a client for the Ollama runtime at `base_url`.
    pub fn new(
        base_url: &str,
        ocr_model: String,
        caption_model: String,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let http = Client::builder()
            .user_agent("quickprep/ollama")
            .timeout(timeout)
            .build()
            .map_err(|error| ConfigError::ClientInit {
                provider: "ollama",
                reason: error.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            ocr_model,
            caption_model,
            timeout,
            retry,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    async fn post_generate(&self, payload: &Value) -> Result<String, InferenceError> {
        let response = self
            .http
            .post(self.endpoint())
            .json(payload)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    InferenceError::Timeout(self.timeout)
                } else {
                    InferenceError::ProviderUnavailable(format!(
                        "failed to reach Ollama at {}: {error}",
                        self.base_url
                    ))
                }
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(InferenceError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404 (is the model pulled?)",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::UnexpectedStatus {
                status: status.as_u16(),
                body: clip_body(&body),
            });
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            InferenceError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(InferenceError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }

    async fn describe_image(
        &self,
        model: &str,
        prompt: &str,
        image: &ImageInput,
    ) -> Result<String, InferenceError> {
        let payload = json!({
            "model": model,
            "prompt": prompt,
            "images": [STANDARD.encode(&image.bytes)],
            "stream": false,
            "options": {
                "temperature": 0.0,
            }
        });
        let payload = &payload;
        self.retry
            .run("ollama.vision", move || self.post_generate(payload))
            .await
    }
}

#[async_trait]
impl TextInference for OllamaClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, InferenceError> {
        let payload = json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                // Lower temperature for deterministic study material.
                "temperature": 0.1,
                "num_predict": request.max_output_tokens,
            }
        });
        let payload = &payload;
        self.retry
            .run("ollama.generate", move || self.post_generate(payload))
            .await
    }
}

#[async_trait]
impl VisionInference for OllamaClient {
    async fn recognize_text(&self, image: &ImageInput) -> Result<String, InferenceError> {
        self.describe_image(&self.ocr_model, OCR_PROMPT, image).await
    }

    async fn caption(&self, image: &ImageInput) -> Result<String, InferenceError> {
        self.describe_image(&self.caption_model, CAPTION_PROMPT, image)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn client(base_url: &str) -> OllamaClient {
        OllamaClient::new(
            base_url,
            "llava".into(),
            "llava".into(),
            Duration::from_secs(5),
            RetryPolicy::none(),
        )
        .expect("client")
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            model: "llama".into(),
            prompt: "Summarize".into(),
            max_output_tokens: 100,
        }
    }

    #[tokio::test]
    async fn ollama_client_handles_successful_response() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(r#"{"model":"llama","stream":false,"options":{"num_predict":100}}"#);
                then.status(200).json_body(json!({
                    "response": "Summary text\n",
                    "done": true
                }));
            })
            .await;

        let summary = client(&server.base_url())
            .generate(request())
            .await
            .expect("summary");

        mock.assert_async().await;
        assert_eq!(summary, "Summary text");
    }

    #[tokio::test]
    async fn ollama_client_handles_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500).body("boom");
            })
            .await;

        let error = client(&server.base_url())
            .generate(request())
            .await
            .expect_err("error response");

        assert!(matches!(error, InferenceError::UnexpectedStatus { status: 500, ref body } if body == "boom"));
    }

    #[tokio::test]
    async fn incomplete_response_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200).json_body(json!({ "response": "partial", "done": false }));
            })
            .await;

        let error = client(&server.base_url())
            .generate(request())
            .await
            .expect_err("incomplete");
        assert!(matches!(error, InferenceError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn vision_requests_attach_base64_image() {
        let server = MockServer::start_async().await;
        let encoded = STANDARD.encode(b"IMG");
        let mock = server
            .mock_async(move |when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .json_body_partial(format!(r#"{{"model":"llava","images":["{encoded}"]}}"#));
                then.status(200).json_body(json!({ "response": "a cat", "done": true }));
            })
            .await;

        let caption = client(&server.base_url())
            .caption(&ImageInput {
                bytes: b"IMG".to_vec(),
                media_type: "image/jpeg".into(),
            })
            .await
            .expect("caption");

        mock.assert_async().await;
        assert_eq!(caption, "a cat");
    }
}
