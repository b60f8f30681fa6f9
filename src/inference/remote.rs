//! Hosted inference API adapter.
//!
//! Every capability is a `POST {base}/models/{model}` call authenticated with a bearer token.
//! Text requests send JSON (`inputs` plus generation parameters); image requests send the raw
//! bytes with their media type. Responses are arrays (occasionally bare objects) carrying one
//! of `generated_text`, `summary_text`, or `translation_text`.

use super::{
    GenerationRequest, ImageInput, InferenceError, RetryPolicy, TextInference, VisionInference,
    clip_body,
};
use crate::config::ConfigError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, header::CONTENT_TYPE};
use serde_json::{Value, json};
use std::time::Duration;

const TEXT_KEYS: [&str; 3] = ["generated_text", "summary_text", "translation_text"];

/// Client for a hosted inference API that serves text and vision models.
pub struct RemoteInferenceClient {
    http: Client,
    base_url: String,
    token: String,
    ocr_model: String,
    caption_model: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl RemoteInferenceClient {
    /// Build a client for `base_url`, authenticating with `token`.
    pub fn new(
        base_url: &str,
        token: String,
        ocr_model: String,
        caption_model: String,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let http = Client::builder()
            .user_agent("quickprep/remote")
            .timeout(timeout)
            .build()
            .map_err(|error| ConfigError::ClientInit {
                provider: "remote",
                reason: error.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            ocr_model,
            caption_model,
            timeout,
            retry,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}", self.base_url, model.trim_matches('/'))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Value, InferenceError> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    InferenceError::Timeout(self.timeout)
                } else {
                    InferenceError::ProviderUnavailable(format!(
                        "failed to reach inference API at {}: {error}",
                        self.base_url
                    ))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::UnexpectedStatus {
                status: status.as_u16(),
                body: clip_body(&body),
            });
        }

        response.json().await.map_err(|error| {
            InferenceError::InvalidResponse(format!("failed to decode inference response: {error}"))
        })
    }

    async fn generate_text(&self, request: &GenerationRequest) -> Result<String, InferenceError> {
        let payload = json!({
            "inputs": request.prompt,
            "parameters": {
                "max_new_tokens": request.max_output_tokens,
            },
            "options": {
                "wait_for_model": true,
            }
        });
        let body = self
            .execute(self.http.post(self.endpoint(&request.model)).json(&payload))
            .await?;
        extract_generated_text(&body)
    }

    async fn describe_image(&self, model: &str, image: &ImageInput) -> Result<String, InferenceError> {
        let body = self
            .execute(
                self.http
                    .post(self.endpoint(model))
                    .header(CONTENT_TYPE, image.media_type.as_str())
                    .body(image.bytes.clone()),
            )
            .await?;
        extract_generated_text(&body)
    }
}

/// Pull the generated text out of a hosted inference response body.
fn extract_generated_text(body: &Value) -> Result<String, InferenceError> {
    if let Some(message) = body.get("error").and_then(Value::as_str) {
        return Err(InferenceError::InvalidResponse(format!(
            "provider reported an error: {message}"
        )));
    }

    let candidate = match body {
        Value::Array(items) => items.first(),
        Value::Object(_) => Some(body),
        _ => None,
    };

    candidate
        .and_then(|item| {
            TEXT_KEYS
                .iter()
                .find_map(|key| item.get(*key).and_then(Value::as_str))
        })
        .map(|text| text.trim().to_string())
        .ok_or_else(|| {
            InferenceError::InvalidResponse(format!(
                "response did not contain generated text: {}",
                clip_body(&body.to_string())
            ))
        })
}

#[async_trait]
impl TextInference for RemoteInferenceClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, InferenceError> {
        let request = &request;
        self.retry
            .run("remote.generate", move || self.generate_text(request))
            .await
    }
}

#[async_trait]
impl VisionInference for RemoteInferenceClient {
    async fn recognize_text(&self, image: &ImageInput) -> Result<String, InferenceError> {
        let model = self.ocr_model.as_str();
        self.retry
            .run("remote.ocr", move || self.describe_image(model, image))
            .await
    }

    async fn caption(&self, image: &ImageInput) -> Result<String, InferenceError> {
        let model = self.caption_model.as_str();
        self.retry
            .run("remote.caption", move || self.describe_image(model, image))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn client(base_url: &str) -> RemoteInferenceClient {
        RemoteInferenceClient::new(
            base_url,
            "test-token".into(),
            "ocr/model".into(),
            "caption/model".into(),
            Duration::from_secs(5),
            RetryPolicy::none(),
        )
        .expect("client")
    }

    #[tokio::test]
    async fn generate_sends_bearer_token_and_parses_summary_text() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/models/acme/summarizer")
                    .header("authorization", "Bearer test-token")
                    .json_body_partial(r#"{"parameters":{"max_new_tokens":64}}"#);
                then.status(200)
                    .json_body(json!([{ "summary_text": "  A short summary. " }]));
            })
            .await;

        let text = client(&server.base_url())
            .generate(GenerationRequest {
                model: "acme/summarizer".into(),
                prompt: "Summarize this".into(),
                max_output_tokens: 64,
            })
            .await
            .expect("generated text");

        mock.assert_async().await;
        assert_eq!(text, "A short summary.");
    }

    #[tokio::test]
    async fn non_success_status_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/models/acme/summarizer");
                then.status(503).body("loading");
            })
            .await;

        let error = client(&server.base_url())
            .generate(GenerationRequest {
                model: "acme/summarizer".into(),
                prompt: "Summarize this".into(),
                max_output_tokens: 64,
            })
            .await
            .expect_err("status error");

        assert!(matches!(error, InferenceError::UnexpectedStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn image_calls_post_raw_bytes_to_configured_models() {
        let server = MockServer::start_async().await;
        let ocr = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/models/ocr/model")
                    .header("content-type", "image/png")
                    .body("PNGDATA");
                then.status(200)
                    .json_body(json!([{ "generated_text": "INVOICE 42" }]));
            })
            .await;
        let caption = server
            .mock_async(|when, then| {
                when.method(POST).path("/models/caption/model");
                then.status(200)
                    .json_body(json!([{ "generated_text": "a printed invoice" }]));
            })
            .await;

        let client = client(&server.base_url());
        let image = ImageInput {
            bytes: b"PNGDATA".to_vec(),
            media_type: "image/png".into(),
        };

        assert_eq!(client.recognize_text(&image).await.expect("ocr"), "INVOICE 42");
        assert_eq!(client.caption(&image).await.expect("caption"), "a printed invoice");
        ocr.assert_async().await;
        caption.assert_async().await;
    }

    #[test]
    fn provider_error_payload_is_invalid_response() {
        let error = extract_generated_text(&json!({ "error": "Model is loading" }))
            .expect_err("error payload");
        assert!(matches!(error, InferenceError::InvalidResponse(message) if message.contains("loading")));
    }

    #[test]
    fn bare_object_response_is_accepted() {
        let text = extract_generated_text(&json!({ "generated_text": "hello" })).expect("text");
        assert_eq!(text, "hello");
    }
}
