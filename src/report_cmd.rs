//! Report generation, export and verification.
//!
//! Reports are derived from a case's current findings (the latest run) and
//! cached in the store until the case changes. Used by `analyst report`,
//! `analyst verify` and the `/api/cases/{id}/report*` and
//! `/api/reports/verify` endpoints.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use doc_analyst_core::models::{CaseStatus, Report};
use doc_analyst_core::report::{synthesize, verify_artifact, ReportInput};
use doc_analyst_core::scoring::score_findings;
use doc_analyst_core::store::CaseStore;
use doc_analyst_core::AnalysisError;

use crate::config::Config;
use crate::db;

/// Return the stored report for a case, synthesizing and saving it first
/// if none is stored.
///
/// Fails with [`AnalysisError::AnalysisInProgress`] while the case is
/// being analyzed.
pub async fn generate_report(store: &dyn CaseStore, case_id: &str) -> Result<Report> {
    let case = store
        .get_case(case_id)
        .await?
        .ok_or_else(|| AnalysisError::CaseNotFound(case_id.to_string()))?;
    if case.status == CaseStatus::Analyzing {
        return Err(AnalysisError::AnalysisInProgress(case_id.to_string()).into());
    }

    if let Some(report) = store.get_report(case_id).await? {
        if report.verify().is_ok() {
            return Ok(report);
        }
    }

    let findings = case.current_findings();
    let scores = score_findings(&findings);
    let report = synthesize(&ReportInput {
        case_id: case.id.clone(),
        case_name: case.name.clone(),
        files: case.files.clone(),
        findings,
        scores,
    });
    store.save_report(&report).await?;

    info!(case_id, hash = %report.integrity_hash, "report generated");
    Ok(report)
}

/// File name used when exporting a case report.
pub fn export_filename(case_id: &str) -> String {
    format!("report-{}.md", case_id)
}

/// Verify an exported artifact on disk. Returns the confirmed hash.
pub fn verify_file(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read report: {}", path.display()))?;
    Ok(verify_artifact(&text)?)
}

/// `analyst report <case> [--output <path>]`
///
/// Without `--output` the artifact is printed to stdout.
pub async fn run_report(config: &Config, case_id: &str, output: Option<&Path>) -> Result<()> {
    let store = db::open_store(config).await?;
    let report = generate_report(&store, case_id).await;
    store.pool().close().await;
    let report = report?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(path, report.artifact())
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            println!("report {}", case_id);
            println!("  written: {}", path.display());
            println!("  integrity hash: {}", report.integrity_hash);
            println!("ok");
        }
        None => print!("{}", report.artifact()),
    }
    Ok(())
}

/// `analyst verify <file>`
pub fn run_verify(path: &Path) -> Result<()> {
    let hash = verify_file(path)?;
    println!("verified {}", path.display());
    println!("  integrity hash: {}", hash);
    println!("ok");
    Ok(())
}
