//! # Doc Analyst Core
//!
//! Runtime-free logic for the Confidential Document Analyst: data models,
//! format detection, message windowing, the per-case job lifecycle, the
//! local/cloud routing policy, finding classification, STIM scoring and
//! deterministic report synthesis.
//!
//! This crate contains no tokio, sqlx, HTTP clients or filesystem I/O.
//! Collaborators the pipeline depends on (the inference runtime and the
//! case store) are expressed as traits: [`inference::InferenceService`] and
//! [`store::CaseStore`].
//!
//! ## Pipeline
//!
//! ```text
//! raw bytes ──▶ ingest ──▶ [Message] ──▶ chunk ──▶ [Window]
//!                                                     │
//!                      inference + routing ◀──────────┘
//!                               │
//!                               ▼
//!                           classify ──▶ [Finding] ──▶ scoring ──▶ report
//! ```

pub mod chunk;
pub mod classify;
pub mod error;
pub mod inference;
pub mod ingest;
pub mod keywords;
pub mod lifecycle;
pub mod models;
pub mod report;
pub mod routing;
pub mod scoring;
pub mod store;

pub use error::AnalysisError;
