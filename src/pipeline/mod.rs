//! Document pipeline: scratch storage, classification, extraction, enrichment, orchestration.

pub mod classify;
pub mod enrich;
pub mod extract;
pub mod format;
pub mod quiz;
pub mod scratch;
pub mod service;
pub mod types;

pub use classify::classify;
pub use enrich::{EnrichmentStage, StageKind, StageSet, StageSettings};
pub use extract::{Extractors, ImageTextExtractor, PdfTextExtractor, TextExtractor};
pub use quiz::{AnswerKey, QuizOptions, QuizQuestion, parse_quiz};
pub use scratch::{ScratchGuard, ScratchHandle, ScratchStore, TempDirStore};
pub use service::{PipelineApi, PipelineService};
pub use types::{
    EnrichmentOutcome, ExtractionError, ExtractionResult, MediaClass, PipelineError,
    PipelineResponse, PipelineState, ScratchError, SourceKind, StageError, UploadedDocument,
};
