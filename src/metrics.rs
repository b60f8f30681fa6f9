use std::sync::atomic::{AtomicU64, Ordering};

use crate::pipeline::StageKind;

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_processed: AtomicU64,
    uploads_rejected: AtomicU64,
    extraction_failures: AtomicU64,
    summary_degraded: AtomicU64,
    keypoints_degraded: AtomicU64,
    questions_failed: AtomicU64,
    quizzes_failed: AtomicU64,
    cleanup_failures: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request that reached the `Completed` state.
    pub fn record_completed(&self) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an upload rejected because of its media type.
    pub fn record_rejected(&self) {
        self.uploads_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fatal extraction failure.
    pub fn record_extraction_failure(&self) {
        self.extraction_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stage that fell back to its placeholder (or failed outright for questions).
    pub fn record_stage_failure(&self, stage: StageKind) {
        let counter = match stage {
            StageKind::Summary => &self.summary_degraded,
            StageKind::KeyPoints => &self.keypoints_degraded,
            StageKind::Questions => &self.questions_failed,
            StageKind::Quiz => &self.quizzes_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a temp file that could not be removed.
    pub fn record_cleanup_failure(&self) {
        self.cleanup_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_processed: self.documents_processed.load(Ordering::Relaxed),
            uploads_rejected: self.uploads_rejected.load(Ordering::Relaxed),
            extraction_failures: self.extraction_failures.load(Ordering::Relaxed),
            summary_degraded: self.summary_degraded.load(Ordering::Relaxed),
            keypoints_degraded: self.keypoints_degraded.load(Ordering::Relaxed),
            questions_failed: self.questions_failed.load(Ordering::Relaxed),
            quizzes_failed: self.quizzes_failed.load(Ordering::Relaxed),
            cleanup_failures: self.cleanup_failures.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Uploads that produced a response since startup.
    pub documents_processed: u64,
    /// Uploads rejected for an unsupported media type.
    pub uploads_rejected: u64,
    /// Uploads whose text extraction failed.
    pub extraction_failures: u64,
    /// Summaries replaced by the fallback string.
    pub summary_degraded: u64,
    /// Key-point lists replaced by the fallback string.
    pub keypoints_degraded: u64,
    /// Question-generation requests that failed.
    pub questions_failed: u64,
    /// Quiz-generation requests that failed.
    pub quizzes_failed: u64,
    /// Temp files that could not be deleted.
    pub cleanup_failures: u64,
}
