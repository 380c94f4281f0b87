//! Case storage abstraction.
//!
//! The [`CaseStore`] trait is everything the pipeline needs from
//! persistence. The app crate implements it over SQLite; [`memory`]
//! provides an in-process implementation for tests and embedding.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! Operations on a case that does not exist return `Ok(false)` /
//! `Ok(None)` for lookups and toggles, and an
//! [`AnalysisError::CaseNotFound`](crate::AnalysisError::CaseNotFound)
//! error for writes that need an owning case.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Case, CaseFile, CaseStatus, Finding, Message, Report, RiskLevel};

/// Abstract storage backend for cases, files, findings and reports.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_case`](CaseStore::create_case) | Open a new case |
/// | [`get_case`](CaseStore::get_case) | Case with its files and all findings |
/// | [`add_file`](CaseStore::add_file) | Attach a parsed file and its messages |
/// | [`begin_run`](CaseStore::begin_run) | Claim a case for a new run |
/// | [`finish_run`](CaseStore::finish_run) | Record the run outcome |
/// | [`save_report`](CaseStore::save_report) | Persist a synthesized report |
#[async_trait]
pub trait CaseStore: Send + Sync {
    async fn create_case(&self, name: &str) -> Result<Case>;

    /// All cases, oldest first.
    async fn list_cases(&self) -> Result<Vec<Case>>;

    async fn get_case(&self, case_id: &str) -> Result<Option<Case>>;

    async fn rename_case(&self, case_id: &str, name: &str) -> Result<bool>;

    async fn set_cloud_consent(&self, case_id: &str, consent: bool) -> Result<bool>;

    /// Current consent flag, or `None` if the case no longer exists.
    async fn cloud_consent(&self, case_id: &str) -> Result<Option<bool>>;

    /// Delete a case and everything it owns.
    async fn delete_case(&self, case_id: &str) -> Result<bool>;

    async fn add_file(&self, file: &CaseFile, messages: &[Message]) -> Result<()>;

    /// Files of a case in upload order.
    async fn list_files(&self, case_id: &str) -> Result<Vec<CaseFile>>;

    /// Messages of one file in sequence order.
    async fn list_messages(&self, file_id: &str) -> Result<Vec<Message>>;

    async fn add_findings(&self, findings: &[Finding]) -> Result<()>;

    /// Drop every finding of a case, including history.
    async fn clear_findings(&self, case_id: &str) -> Result<()>;

    /// Every finding of a case across all runs.
    async fn list_findings(&self, case_id: &str) -> Result<Vec<Finding>>;

    /// Claim the case for a new run: set it `analyzing`, clear its risk
    /// level, make `run_id` current and drop any stored report.
    ///
    /// The claim is atomic. It returns `Ok(false)` and changes nothing when
    /// the case is already `analyzing`, unless `takeover` is set, which
    /// replaces a run abandoned by a process that died.
    async fn begin_run(&self, case_id: &str, run_id: &str, takeover: bool) -> Result<bool>;

    /// Record the outcome of `run_id`. `risk_level` is only kept when
    /// `status` is `Complete`.
    ///
    /// Returns `Ok(false)` without writing when `run_id` is no longer the
    /// case's current run.
    async fn finish_run(
        &self,
        case_id: &str,
        run_id: &str,
        status: CaseStatus,
        risk_level: Option<RiskLevel>,
    ) -> Result<bool>;

    async fn save_report(&self, report: &Report) -> Result<()>;

    async fn get_report(&self, case_id: &str) -> Result<Option<Report>>;
}

/// Enforce the `risk_level iff complete` invariant on a run outcome.
pub fn outcome_risk(status: CaseStatus, risk_level: Option<RiskLevel>) -> Option<RiskLevel> {
    match status {
        CaseStatus::Complete => risk_level,
        _ => None,
    }
}
