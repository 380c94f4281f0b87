//! Domain error taxonomy.
//!
//! Per-file and per-window failures are values the pipeline absorbs;
//! these variants are what it surfaces to callers. Routing outcomes
//! such as "consent required" and rejected duplicate starts are not
//! errors and live in [`crate::routing`] and the orchestrator instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Ingestion could not extract any message from a file.
    #[error("unsupported format for '{filename}': {reason}")]
    UnsupportedFormat { filename: String, reason: String },

    /// A recomputed report hash disagrees with the stored one.
    #[error("integrity mismatch: stored hash {stored}, recomputed {computed}")]
    IntegrityMismatch { stored: String, computed: String },

    #[error("'{filename}' is {size} bytes, over the {limit} byte upload limit")]
    FileTooLarge {
        filename: String,
        size: usize,
        limit: usize,
    },

    #[error("case not found: {0}")]
    CaseNotFound(String),

    /// An analysis was requested for a case with no parsed messages.
    #[error("case {0} has no messages to analyze")]
    NothingToAnalyze(String),

    /// The operation needs a settled case but an analysis run is live.
    #[error("case {0} is being analyzed")]
    AnalysisInProgress(String),

    #[error("invalid window plan: {0}")]
    InvalidWindowPlan(String),
}

impl AnalysisError {
    /// Machine-readable code used by the HTTP error contract.
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::UnsupportedFormat { .. } => "unsupported_format",
            AnalysisError::IntegrityMismatch { .. } => "integrity_mismatch",
            AnalysisError::FileTooLarge { .. } => "payload_too_large",
            AnalysisError::CaseNotFound(_) => "not_found",
            AnalysisError::NothingToAnalyze(_) => "bad_request",
            AnalysisError::AnalysisInProgress(_) => "conflict",
            AnalysisError::InvalidWindowPlan(_) => "bad_request",
        }
    }
}
