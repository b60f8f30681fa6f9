//! HTTP surface for QuickPrep.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /extract-summarize` – Multipart upload of a PDF or image. Returns
//!   `{ "extractedText", "summary", "keypoints" }`; `400` for a missing file or unsupported
//!   media type, `413` past the body limit, `500` when extraction fails.
//! - `POST /generate-mcq` – Same upload as above. Returns `{ "questions": [...] }` with four
//!   lettered options and the correct letter per question; `400` when the document has too
//!   little text.
//! - `POST /generate-questions` – JSON `{ "text": "..." }` or a raw text body. Returns
//!   `{ "questions": "..." }`.
//! - `GET /metrics` – Pipeline counters.
//! - `GET /health` – Liveness plus the configured inference provider.
//!
//! Every error body has the shape `{ "error": "<message>" }`.

use crate::pipeline::{
    PipelineApi, PipelineError, PipelineResponse, QuizQuestion, UploadedDocument,
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        DefaultBodyLimit, Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

const FALLBACK_MEDIA_TYPE: &str = "application/octet-stream";

/// Build the HTTP router exposing the pipeline.
///
/// `max_upload_bytes` bounds every request body.
pub fn create_router<S>(service: Arc<S>, max_upload_bytes: usize) -> Router
where
    S: PipelineApi + 'static,
{
    Router::new()
        .route("/extract-summarize", post(extract_summarize::<S>))
        .route("/generate-mcq", post(generate_mcq::<S>))
        .route("/generate-questions", post(generate_questions::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/health", get(health::<S>))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

/// Extract text from an uploaded document and derive its summary and key points.
///
/// The first multipart field carrying a non-empty file name and body is taken as the
/// upload; its part `Content-Type` is the declared media type.
async fn extract_summarize<S>(
    State(service): State<Arc<S>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PipelineResponse>, AppError>
where
    S: PipelineApi,
{
    let document = read_upload(multipart).await?;
    let response = service.extract_and_summarize(document).await?;
    Ok(Json(response))
}

/// Success response for `POST /generate-mcq`.
#[derive(Serialize)]
struct QuizResponse {
    questions: Vec<QuizQuestion>,
}

/// Build a multiple-choice quiz from an uploaded document.
async fn generate_mcq<S>(
    State(service): State<Arc<S>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<QuizResponse>, AppError>
where
    S: PipelineApi,
{
    let document = read_upload(multipart).await?;
    let questions = service.generate_quiz(document).await?;
    Ok(Json(QuizResponse { questions }))
}

async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<UploadedDocument, PipelineError> {
    let mut multipart = multipart.map_err(|rejection| {
        tracing::debug!(error = %rejection, "Request is not a multipart upload");
        PipelineError::NoFile
    })?;

    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        // Browsers send an empty part with `filename=""` when no file was chosen.
        if file_name.is_empty() {
            continue;
        }
        let media_type = field
            .content_type()
            .unwrap_or(FALLBACK_MEDIA_TYPE)
            .to_string();
        let bytes = field.bytes().await.map_err(upload_error)?;
        if bytes.is_empty() {
            continue;
        }
        return Ok(UploadedDocument::new(bytes.to_vec(), media_type, Some(file_name)));
    }
    Err(PipelineError::NoFile)
}

fn upload_error(error: MultipartError) -> PipelineError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        PipelineError::PayloadTooLarge
    } else {
        PipelineError::MalformedUpload(error.body_text())
    }
}

/// Request body for `POST /generate-questions`.
#[derive(Deserialize)]
struct QuestionsRequest {
    /// Text to derive questions from.
    #[serde(default)]
    text: String,
}

/// Success response for `POST /generate-questions`.
#[derive(Serialize)]
struct QuestionsResponse {
    questions: String,
}

/// Derive study questions from JSON `{ "text" }` or a raw text body.
async fn generate_questions<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<QuestionsResponse>, AppError>
where
    S: PipelineApi,
{
    let text = if is_json(&headers) {
        serde_json::from_slice::<QuestionsRequest>(&body)
            .map_err(|error| PipelineError::MalformedRequest(error.to_string()))?
            .text
    } else {
        String::from_utf8(body.to_vec())
            .map_err(|error| PipelineError::MalformedRequest(error.to_string()))?
    };
    let questions = service.generate_questions(text).await?;
    Ok(Json(QuestionsResponse { questions }))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .split(';')
                .next()
                .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("application/json"))
        })
}

/// Return the pipeline counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<crate::metrics::MetricsSnapshot>
where
    S: PipelineApi,
{
    Json(service.metrics_snapshot())
}

/// Report liveness and the configured inference provider.
async fn health<S>(State(service): State<Arc<S>>) -> Json<serde_json::Value>
where
    S: PipelineApi,
{
    Json(json!({ "status": "ok", "provider": service.provider_name() }))
}

struct AppError(PipelineError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if matches!(self.0, PipelineError::PayloadTooLarge) {
            StatusCode::PAYLOAD_TOO_LARGE
        } else if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            tracing::error!(error = %self.0, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self(inner)
    }
}
