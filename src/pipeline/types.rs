//! Core data types and error definitions for the document pipeline.

use crate::inference::InferenceError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A file received from a caller, owned by the pipeline for one request.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    /// Raw file contents.
    pub bytes: Vec<u8>,
    /// Media type declared by the caller.
    pub media_type: String,
    /// Original file name, when supplied.
    pub file_name: Option<String>,
}

impl UploadedDocument {
    /// Build a document from its parts.
    pub fn new(bytes: Vec<u8>, media_type: impl Into<String>, file_name: Option<String>) -> Self {
        Self {
            bytes,
            media_type: media_type.into(),
            file_name,
        }
    }

    /// Size of the upload in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Extraction strategy chosen for a supported document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Structured PDF text.
    Pdf,
    /// OCR plus caption.
    Image,
}

impl SourceKind {
    /// Lowercase label used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Image => "image",
        }
    }
}

/// Result of classifying a declared media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaClass {
    /// `application/pdf`.
    Pdf,
    /// Any `image/*` type.
    Image,
    /// Everything else.
    Unsupported,
}

impl MediaClass {
    /// Extraction strategy for a supported class.
    pub const fn source_kind(self) -> Option<SourceKind> {
        match self {
            Self::Pdf => Some(SourceKind::Pdf),
            Self::Image => Some(SourceKind::Image),
            Self::Unsupported => None,
        }
    }
}

/// Plain text obtained from an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    /// Extracted text; empty when the document carries none.
    pub text: String,
    /// Which extractor produced the text.
    pub source: SourceKind,
}

/// Outcome of a single enrichment stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichmentOutcome {
    /// The stage produced its artifact.
    Produced(String),
    /// The stage failed and the fallback string stands in for the artifact.
    Degraded {
        /// Why the stage failed.
        reason: String,
        /// Placeholder returned to the caller.
        fallback: String,
    },
}

impl EnrichmentOutcome {
    /// Whether the stage fell back to its placeholder.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    /// Text to place in the response.
    pub fn into_text(self) -> String {
        match self {
            Self::Produced(text) => text,
            Self::Degraded { fallback, .. } => fallback,
        }
    }
}

/// Aggregated result returned for an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResponse {
    /// Text obtained by the extractor.
    pub extracted_text: String,
    /// Summary, or its placeholder.
    pub summary: String,
    /// Key points, or their placeholder.
    pub keypoints: String,
}

/// Steps a request moves through inside the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Upload accepted by the orchestrator.
    Received,
    /// Upload persisted to scratch storage.
    Stored,
    /// Media type inspected.
    Classified,
    /// Text obtained.
    Extracted,
    /// Enrichment stages in flight.
    Enriching,
    /// Response assembled.
    Completed,
    /// Media type not supported.
    RejectedFormat,
    /// Extraction failed.
    FailedExtraction,
    /// Scratch file released.
    Released,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Received => "received",
            Self::Stored => "stored",
            Self::Classified => "classified",
            Self::Extracted => "extracted",
            Self::Enriching => "enriching",
            Self::Completed => "completed",
            Self::RejectedFormat => "rejected_format",
            Self::FailedExtraction => "failed_extraction",
            Self::Released => "released",
        };
        f.write_str(label)
    }
}

/// Errors raised by the scratch store.
#[derive(Debug, Error)]
pub enum ScratchError {
    /// Upload bytes could not be written.
    #[error("failed to persist upload: {0}")]
    Write(#[source] std::io::Error),
    /// Scratch file could not be removed.
    #[error("failed to remove scratch file {path}: {source}")]
    Remove {
        /// File that was left behind.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Background write task ended abnormally.
    #[error("scratch write task failed: {0}")]
    Task(String),
}

/// Fatal extractor failures.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Stored bytes could not be read back.
    #[error("failed to read stored upload: {0}")]
    Read(#[source] std::io::Error),
    /// Upload declared as PDF but lacks the PDF header.
    #[error("file is not a valid PDF (first bytes: {0:?})")]
    NotAPdf(Vec<u8>),
    /// PDF structure could not be parsed.
    #[error("PDF could not be parsed: {0}")]
    CorruptPdf(String),
    /// Both image sub-extractions failed.
    #[error("image text extraction failed: OCR: {ocr}; caption: {caption}")]
    ImageUnreadable {
        /// OCR failure.
        ocr: String,
        /// Captioning failure.
        caption: String,
    },
    /// Extractor exceeded its deadline.
    #[error("text extraction timed out after {0:?}")]
    Timeout(Duration),
    /// Blocking parse task ended abnormally.
    #[error("extraction task failed: {0}")]
    Task(String),
}

/// Failure of a single enrichment stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// There was no text to work from.
    #[error("no extracted text to work from")]
    EmptyInput,
    /// Provider call failed.
    #[error(transparent)]
    Inference(#[from] InferenceError),
    /// Stage exceeded its deadline.
    #[error("stage timed out after {0:?}")]
    Timeout(Duration),
    /// Provider output was empty after post-processing.
    #[error("model returned no usable output")]
    EmptyOutput,
    /// Provider output did not have the required structure.
    #[error("model returned malformed output: {0}")]
    MalformedOutput(String),
    /// Stage task ended abnormally.
    #[error("stage task failed: {0}")]
    Task(String),
}

/// Errors that cross the pipeline boundary.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Request carried no file.
    #[error("No file provided")]
    NoFile,
    /// Request body could not be read as an upload.
    #[error("Malformed upload: {0}")]
    MalformedUpload(String),
    /// Declared media type is not handled.
    #[error("Unsupported file type")]
    UnsupportedMediaType {
        /// Declared media type.
        media_type: String,
    },
    /// Question generation called without text.
    #[error("No text provided")]
    NoText,
    /// Document carries too little text to build a quiz from.
    #[error("Document has insufficient text")]
    InsufficientText {
        /// Characters extracted.
        chars: usize,
        /// Characters required.
        required: usize,
    },
    /// JSON request body could not be parsed.
    #[error("Malformed request body: {0}")]
    MalformedRequest(String),
    /// Upload could not be written to scratch storage.
    #[error("Failed to store upload: {0}")]
    Storage(#[from] ScratchError),
    /// Extraction failed.
    #[error("Text extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    /// Question or quiz generation failed.
    #[error("Question generation failed: {0}")]
    Generation(#[from] StageError),
    /// Upload exceeded the body limit.
    #[error("File too large")]
    PayloadTooLarge,
}

impl PipelineError {
    /// Whether the caller is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NoFile
                | Self::MalformedUpload(_)
                | Self::UnsupportedMediaType { .. }
                | Self::NoText
                | Self::InsufficientText { .. }
                | Self::MalformedRequest(_)
                | Self::PayloadTooLarge
        )
    }
}
