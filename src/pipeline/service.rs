//! Orchestrator coordinating storage, classification, extraction, and enrichment.

use super::classify::classify;
use super::enrich::{EnrichmentStage, StageKind, StageSet, StageSettings};
use super::extract::Extractors;
use super::quiz::{QuizQuestion, parse_quiz};
use super::scratch::{ScratchGuard, ScratchStore, TempDirStore};
use super::types::{
    EnrichmentOutcome, ExtractionResult, PipelineError, PipelineResponse, PipelineState, StageError,
    UploadedDocument,
};
use crate::config::{Config, ConfigError};
use crate::inference::{TextInference, build_backends};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

/// Abstraction over the pipeline used by the HTTP surface.
#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// Store, classify, and extract an upload, then derive its summary and key points.
    async fn extract_and_summarize(
        &self,
        document: UploadedDocument,
    ) -> Result<PipelineResponse, PipelineError>;

    /// Derive study questions from plain text.
    async fn generate_questions(&self, text: String) -> Result<String, PipelineError>;

    /// Store, classify, and extract an upload, then build a multiple-choice quiz from it.
    async fn generate_quiz(
        &self,
        document: UploadedDocument,
    ) -> Result<Vec<QuizQuestion>, PipelineError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;

    /// Name of the inference provider backing the pipeline.
    fn provider_name(&self) -> &str;
}

/// The document pipeline.
///
/// Holds long-lived handles to the scratch store, the extractors, and the text inference
/// adapter; build it once at startup and share it through an `Arc`. Every request owns its
/// scratch file through a [`ScratchGuard`], so release happens on every exit path.
pub struct PipelineService {
    store: Arc<dyn ScratchStore>,
    extractors: Extractors,
    text: Arc<dyn TextInference>,
    stages: StageSet,
    metrics: Arc<PipelineMetrics>,
    provider: String,
    quiz_min_chars: usize,
}

const DEFAULT_QUIZ_MIN_CHARS: usize = 100;

impl PipelineService {
    /// Assemble a service from already-constructed collaborators.
    pub fn new(
        store: Arc<dyn ScratchStore>,
        extractors: Extractors,
        text: Arc<dyn TextInference>,
        stages: StageSet,
    ) -> Self {
        Self {
            store,
            extractors,
            text,
            stages,
            metrics: Arc::new(PipelineMetrics::new()),
            provider: "custom".into(),
            quiz_min_chars: DEFAULT_QUIZ_MIN_CHARS,
        }
    }

    /// Shortest extracted text a quiz is generated from.
    pub fn with_quiz_min_chars(mut self, min_chars: usize) -> Self {
        self.quiz_min_chars = min_chars;
        self
    }

    /// Label reported by `/health`.
    pub fn with_provider_name(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Build the service and its adapters from configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let backends = build_backends(config)?;
        let store: Arc<dyn ScratchStore> = match &config.upload_dir {
            Some(dir) => Arc::new(TempDirStore::new(dir).map_err(|error| {
                ConfigError::InvalidValue(format!("UPLOAD_DIR ({}): {error}", dir.display()))
            })?),
            None => Arc::new(TempDirStore::system()),
        };
        let extractors = Extractors::standard(backends.vision, config.extraction_timeout());
        let stages = StageSet::new(&StageSettings::from_config(config));

        Ok(Self::new(store, extractors, backends.text, stages)
            .with_provider_name(config.inference_provider.as_str())
            .with_quiz_min_chars(config.quiz_min_chars))
    }

    /// Move an upload from `Received` to `Extracted`.
    ///
    /// The returned guard keeps the scratch file alive until the caller drops it; on the
    /// rejection and extraction-failure branches it is released here.
    async fn ingest(
        &self,
        document: &UploadedDocument,
    ) -> Result<(ScratchGuard, ExtractionResult), PipelineError> {
        advance(PipelineState::Received);
        let digest = hex::encode(Sha256::digest(&document.bytes));
        tracing::info!(
            size = document.size(),
            media_type = %document.media_type,
            file_name = ?document.file_name,
            sha256 = %digest,
            "Upload received"
        );

        let handle = self.store.store(&document.bytes).await?;
        let guard = ScratchGuard::new(self.store.clone(), self.metrics.clone(), handle);
        advance(PipelineState::Stored);

        let Some(kind) = classify(&document.media_type).source_kind() else {
            advance(PipelineState::RejectedFormat);
            self.metrics.record_rejected();
            drop(guard);
            advance(PipelineState::Released);
            tracing::info!(media_type = %document.media_type, "Rejected unsupported upload");
            return Err(PipelineError::UnsupportedMediaType {
                media_type: document.media_type.clone(),
            });
        };
        advance(PipelineState::Classified);

        let extraction = match self
            .extractors
            .extract(guard.handle(), kind, &document.media_type)
            .await
        {
            Ok(extraction) => extraction,
            Err(error) => {
                advance(PipelineState::FailedExtraction);
                self.metrics.record_extraction_failure();
                drop(guard);
                advance(PipelineState::Released);
                tracing::warn!(source = kind.as_str(), error = %error, "Text extraction failed");
                return Err(error.into());
            }
        };
        advance(PipelineState::Extracted);
        tracing::debug!(
            source = extraction.source.as_str(),
            chars = extraction.text.chars().count(),
            "Text extracted"
        );
        Ok((guard, extraction))
    }

    async fn run_upload(
        &self,
        document: UploadedDocument,
    ) -> Result<PipelineResponse, PipelineError> {
        let (guard, extraction) = self.ingest(&document).await?;

        advance(PipelineState::Enriching);
        let text: Arc<str> = Arc::from(extraction.text.as_str());
        let (summary, keypoints) = self.enrich_concurrently(text).await;

        for (stage, outcome) in [
            (StageKind::Summary, &summary),
            (StageKind::KeyPoints, &keypoints),
        ] {
            if outcome.is_degraded() {
                self.metrics.record_stage_failure(stage);
            }
        }

        advance(PipelineState::Completed);
        self.metrics.record_completed();
        drop(guard);
        advance(PipelineState::Released);
        tracing::info!(
            summary_degraded = summary.is_degraded(),
            keypoints_degraded = keypoints.is_degraded(),
            "Document processed"
        );

        Ok(PipelineResponse {
            extracted_text: extraction.text,
            summary: summary.into_text(),
            keypoints: keypoints.into_text(),
        })
    }

    async fn run_quiz(
        &self,
        document: UploadedDocument,
    ) -> Result<Vec<QuizQuestion>, PipelineError> {
        let (guard, extraction) = self.ingest(&document).await?;

        advance(PipelineState::Enriching);
        let chars = extraction.text.trim().chars().count();
        let quiz = if chars < self.quiz_min_chars {
            tracing::info!(chars, required = self.quiz_min_chars, "Too little text for a quiz");
            Err(PipelineError::InsufficientText {
                chars,
                required: self.quiz_min_chars,
            })
        } else {
            self.stages
                .quiz
                .generate(self.text.as_ref(), &extraction.text)
                .await
                .and_then(|raw| parse_quiz(&raw))
                .map_err(|error| {
                    self.metrics.record_stage_failure(StageKind::Quiz);
                    tracing::warn!(error = %error, "Quiz generation failed");
                    PipelineError::from(error)
                })
        };

        if let Ok(questions) = &quiz {
            advance(PipelineState::Completed);
            self.metrics.record_completed();
            tracing::info!(count = questions.len(), "Quiz generated");
        }
        drop(guard);
        advance(PipelineState::Released);
        quiz
    }

    /// Run summary and key points as independent tasks and join them.
    ///
    /// Dropping the join set aborts whatever is still running, so a cancelled request does not
    /// leave stage calls behind.
    async fn enrich_concurrently(&self, text: Arc<str>) -> (EnrichmentOutcome, EnrichmentOutcome) {
        let mut tasks = JoinSet::new();
        for stage in [self.stages.summary.clone(), self.stages.keypoints.clone()] {
            tasks.spawn(run_stage(stage, self.text.clone(), text.clone()).in_current_span());
        }

        let mut summary = None;
        let mut keypoints = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((StageKind::Summary, outcome)) => summary = Some(outcome),
                Ok((StageKind::KeyPoints, outcome)) => keypoints = Some(outcome),
                Ok((StageKind::Questions | StageKind::Quiz, _)) => {}
                Err(error) => {
                    tracing::warn!(error = %error, "Enrichment task ended abnormally");
                }
            }
        }

        (
            summary.unwrap_or_else(|| lost_stage(StageKind::Summary)),
            keypoints.unwrap_or_else(|| lost_stage(StageKind::KeyPoints)),
        )
    }
}

async fn run_stage(
    stage: EnrichmentStage,
    client: Arc<dyn TextInference>,
    text: Arc<str>,
) -> (StageKind, EnrichmentOutcome) {
    let outcome = stage.enrich(client.as_ref(), &text).await;
    (stage.kind(), outcome)
}

fn lost_stage(kind: StageKind) -> EnrichmentOutcome {
    EnrichmentOutcome::Degraded {
        reason: StageError::Task("stage task did not complete".into()).to_string(),
        fallback: kind.fallback().to_string(),
    }
}

fn advance(state: PipelineState) {
    tracing::debug!(%state, "Pipeline state");
}

#[async_trait]
impl PipelineApi for PipelineService {
    async fn extract_and_summarize(
        &self,
        document: UploadedDocument,
    ) -> Result<PipelineResponse, PipelineError> {
        let request_id = Uuid::new_v4();
        self.run_upload(document)
            .instrument(tracing::info_span!("extract_summarize", %request_id))
            .await
    }

    async fn generate_questions(&self, text: String) -> Result<String, PipelineError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("generate_questions", %request_id);
        async {
            if text.trim().is_empty() {
                return Err(PipelineError::NoText);
            }
            match self.stages.questions.generate(self.text.as_ref(), &text).await {
                Ok(questions) => {
                    tracing::info!(count = questions.lines().count(), "Questions generated");
                    Ok(questions)
                }
                Err(error) => {
                    self.metrics.record_stage_failure(StageKind::Questions);
                    tracing::warn!(error = %error, "Question generation failed");
                    Err(error.into())
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn generate_quiz(
        &self,
        document: UploadedDocument,
    ) -> Result<Vec<QuizQuestion>, PipelineError> {
        let request_id = Uuid::new_v4();
        self.run_quiz(document)
            .instrument(tracing::info_span!("generate_quiz", %request_id))
            .await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }
}
