//! Enrichment stages: summary, key points, and study questions derived from extracted text.
//!
//! A stage is a thin adapter over [`TextInference`]: it normalizes whitespace, prefixes a
//! stage-specific instruction, bounds every provider call with a timeout, and post-processes the
//! raw output. The summarizer splits long text into sentence-aligned chunks and merges the
//! per-chunk results; the other stages make a single call over input capped in length.
//! [`EnrichmentStage::enrich`] never fails; it degrades to the stage's fallback string instead.

use super::format::{
    bullet_points, chunk_sentences, normalize_whitespace, question_list, truncate_chars,
};
use super::types::{EnrichmentOutcome, StageError};
use crate::config::Config;
use crate::inference::{GenerationRequest, TextInference};
use std::time::Duration;
use tokio::time::timeout;

/// Placeholder returned when summarization fails.
pub const SUMMARY_FALLBACK: &str = "Unable to summarize";
/// Placeholder returned when key-point generation fails.
pub const KEYPOINTS_FALLBACK: &str = "Unable to generate key points";
/// Placeholder reported when question generation fails.
pub const QUESTIONS_FALLBACK: &str = "Unable to generate questions";
/// Placeholder reported when quiz generation fails.
pub const QUIZ_FALLBACK: &str = "Unable to generate quiz";

/// Which artifact a stage derives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Bullet-point summary.
    Summary,
    /// Key points.
    KeyPoints,
    /// Study questions.
    Questions,
    /// Multiple-choice quiz as JSON.
    Quiz,
}

impl StageKind {
    /// Label used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::KeyPoints => "keypoints",
            Self::Questions => "questions",
            Self::Quiz => "quiz",
        }
    }

    /// Fixed placeholder for a failed stage.
    pub const fn fallback(self) -> &'static str {
        match self {
            Self::Summary => SUMMARY_FALLBACK,
            Self::KeyPoints => KEYPOINTS_FALLBACK,
            Self::Questions => QUESTIONS_FALLBACK,
            Self::Quiz => QUIZ_FALLBACK,
        }
    }

    fn format(self, raw: &str) -> String {
        match self {
            Self::Summary | Self::KeyPoints => bullet_points(raw),
            Self::Questions => question_list(raw),
            Self::Quiz => raw.trim().to_string(),
        }
    }
}

/// Limits and model choices shared by the stages.
#[derive(Debug, Clone)]
pub struct StageSettings {
    /// Summarization model.
    pub summary_model: String,
    /// Key-point model.
    pub keypoints_model: String,
    /// Question model.
    pub questions_model: String,
    /// Quiz model.
    pub quiz_model: String,
    /// Output ceiling for summaries.
    pub summary_max_tokens: u32,
    /// Output ceiling for key points.
    pub keypoints_max_tokens: u32,
    /// Output ceiling for questions.
    pub questions_max_tokens: u32,
    /// Output ceiling for quizzes.
    pub quiz_max_tokens: u32,
    /// How many multiple-choice questions to request.
    pub quiz_question_count: usize,
    /// How many key points to request.
    pub keypoint_count: usize,
    /// Input ceiling in characters for single-pass stages.
    pub max_input_chars: usize,
    /// Target chunk size for summarization.
    pub summary_chunk_chars: usize,
    /// Most chunks summarized per document.
    pub summary_max_chunks: usize,
    /// Deadline for one provider call.
    pub timeout: Duration,
}

impl StageSettings {
    /// Derive stage settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            summary_model: config.models.summary.clone(),
            keypoints_model: config.models.keypoints.clone(),
            questions_model: config.models.questions.clone(),
            quiz_model: config.models.quiz.clone(),
            summary_max_tokens: config.summary_max_tokens,
            keypoints_max_tokens: config.keypoints_max_tokens,
            questions_max_tokens: config.questions_max_tokens,
            quiz_max_tokens: config.quiz_max_tokens,
            quiz_question_count: config.quiz_question_count,
            keypoint_count: config.keypoint_count,
            max_input_chars: config.max_input_chars,
            summary_chunk_chars: config.summary_chunk_chars,
            summary_max_chunks: config.summary_max_chunks,
            timeout: config.stage_timeout(),
        }
    }
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            summary_model: "summary-model".into(),
            keypoints_model: "keypoints-model".into(),
            questions_model: "questions-model".into(),
            quiz_model: "quiz-model".into(),
            summary_max_tokens: 180,
            keypoints_max_tokens: 256,
            questions_max_tokens: 128,
            quiz_max_tokens: 1024,
            quiz_question_count: 10,
            keypoint_count: 5,
            max_input_chars: 6000,
            summary_chunk_chars: 800,
            summary_max_chunks: 16,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Chunking {
    chunk_chars: usize,
    max_chunks: usize,
}

/// One derivation step run against extracted text.
#[derive(Debug, Clone)]
pub struct EnrichmentStage {
    kind: StageKind,
    model: String,
    instruction: String,
    max_output_tokens: u32,
    max_input_chars: usize,
    chunking: Option<Chunking>,
    timeout: Duration,
}

impl EnrichmentStage {
    /// Build a stage of `kind` from shared settings.
    pub fn new(kind: StageKind, settings: &StageSettings) -> Self {
        let (model, instruction, max_output_tokens) = match kind {
            StageKind::Summary => (
                settings.summary_model.clone(),
                "Summarize the following text into clear bullet points:".to_string(),
                settings.summary_max_tokens,
            ),
            StageKind::KeyPoints => (
                settings.keypoints_model.clone(),
                format!("Write {} bullet points for:", settings.keypoint_count),
                settings.keypoints_max_tokens,
            ),
            StageKind::Questions => (
                settings.questions_model.clone(),
                "Write exam-style study questions, one per line, for:".to_string(),
                settings.questions_max_tokens,
            ),
            StageKind::Quiz => (
                settings.quiz_model.clone(),
                quiz_instruction(settings.quiz_question_count),
                settings.quiz_max_tokens,
            ),
        };
        let chunking = (kind == StageKind::Summary).then_some(Chunking {
            chunk_chars: settings.summary_chunk_chars,
            max_chunks: settings.summary_max_chunks.max(1),
        });
        Self {
            kind,
            model,
            instruction,
            max_output_tokens,
            max_input_chars: settings.max_input_chars,
            chunking,
            timeout: settings.timeout,
        }
    }

    /// Artifact this stage derives.
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Instruction followed by one input segment.
    pub fn prompt(&self, segment: &str) -> String {
        format!("{}\n{}", self.instruction, segment)
    }

    /// Input segments sent to the provider, one call each.
    ///
    /// The summarizer covers the whole text in sentence-aligned chunks, up to its chunk budget;
    /// other stages send one segment capped at the input ceiling.
    pub fn segments(&self, text: &str) -> Vec<String> {
        let input = normalize_whitespace(text);
        if input.is_empty() {
            return Vec::new();
        }
        match self.chunking {
            Some(chunking) => {
                let mut chunks = chunk_sentences(&input, chunking.chunk_chars);
                if chunks.len() > chunking.max_chunks {
                    tracing::warn!(
                        stage = self.kind.as_str(),
                        chunks = chunks.len(),
                        kept = chunking.max_chunks,
                        "Document exceeds chunk budget; summarizing the leading chunks"
                    );
                    chunks.truncate(chunking.max_chunks);
                }
                chunks
            }
            None => vec![truncate_chars(&input, self.max_input_chars).to_string()],
        }
    }

    async fn call(&self, client: &dyn TextInference, segment: &str) -> Result<String, StageError> {
        let request = GenerationRequest {
            model: self.model.clone(),
            prompt: self.prompt(segment),
            max_output_tokens: self.max_output_tokens,
        };
        Ok(timeout(self.timeout, client.generate(request))
            .await
            .map_err(|_| StageError::Timeout(self.timeout))??)
    }

    /// Run the stage, surfacing failures to the caller.
    pub async fn generate(
        &self,
        client: &dyn TextInference,
        text: &str,
    ) -> Result<String, StageError> {
        let segments = self.segments(text);
        if segments.is_empty() {
            return Err(StageError::EmptyInput);
        }

        let mut outputs = Vec::with_capacity(segments.len());
        for segment in &segments {
            outputs.push(self.call(client, segment).await?);
        }
        if segments.len() > 1 {
            tracing::debug!(stage = self.kind.as_str(), passes = segments.len(), "Merged chunk outputs");
        }

        let formatted = self.kind.format(&outputs.join("\n"));
        if formatted.is_empty() {
            return Err(StageError::EmptyOutput);
        }
        Ok(formatted)
    }

    /// Run the stage, degrading to the fallback string on any failure.
    pub async fn enrich(&self, client: &dyn TextInference, text: &str) -> EnrichmentOutcome {
        match self.generate(client, text).await {
            Ok(artifact) => EnrichmentOutcome::Produced(artifact),
            Err(error) => {
                tracing::warn!(
                    stage = self.kind.as_str(),
                    model = %self.model,
                    error = %error,
                    "Enrichment stage degraded"
                );
                EnrichmentOutcome::Degraded {
                    reason: error.to_string(),
                    fallback: self.kind.fallback().to_string(),
                }
            }
        }
    }
}

/// The stages the orchestrator runs.
#[derive(Debug, Clone)]
pub struct StageSet {
    /// Summarizer.
    pub summary: EnrichmentStage,
    /// Key-point generator.
    pub keypoints: EnrichmentStage,
    /// Question generator.
    pub questions: EnrichmentStage,
    /// Multiple-choice quiz generator.
    pub quiz: EnrichmentStage,
}

fn quiz_instruction(count: usize) -> String {
    format!(
        "Generate {count} exam-level multiple-choice questions from the content below.\n\
Rules:\n\
- 4 options (A, B, C, D)\n\
- One correct answer\n\
- Output ONLY valid JSON\n\
- No explanations\n\
JSON format:\n\
[{{\"question\": \"...\", \"options\": {{\"A\": \"...\", \"B\": \"...\", \"C\": \"...\", \"D\": \"...\"}}, \"answer\": \"A\"}}]\n\
Content:"
    )
}

impl StageSet {
    /// Build every stage from shared settings.
    pub fn new(settings: &StageSettings) -> Self {
        Self {
            summary: EnrichmentStage::new(StageKind::Summary, settings),
            keypoints: EnrichmentStage::new(StageKind::KeyPoints, settings),
            questions: EnrichmentStage::new(StageKind::Questions, settings),
            quiz: EnrichmentStage::new(StageKind::Quiz, settings),
        }
    }
}
