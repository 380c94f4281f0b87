//! Case management commands (`analyst case ...`, `analyst findings`).
//!
//! Thin CLI wrappers over [`SqliteStore`]. Human output goes to stdout in
//! the same plain column layout as the other commands.

use anyhow::Result;

use doc_analyst_core::models::Case;
use doc_analyst_core::report::sort_findings;
use doc_analyst_core::store::CaseStore;
use doc_analyst_core::AnalysisError;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

async fn require_case(store: &SqliteStore, case_id: &str) -> Result<Case> {
    store
        .get_case(case_id)
        .await?
        .ok_or_else(|| AnalysisError::CaseNotFound(case_id.to_string()).into())
}

fn risk_label(case: &Case) -> &'static str {
    case.risk_level.map(|r| r.as_str()).unwrap_or("-")
}

pub async fn run_create(config: &Config, name: &str) -> Result<()> {
    let store = db::open_store(config).await?;
    let case = store.create_case(name).await?;
    println!("{}", case.id);
    store.pool().close().await;
    Ok(())
}

pub async fn run_list(config: &Config) -> Result<()> {
    let store = db::open_store(config).await?;
    let cases = store.list_cases().await?;
    store.pool().close().await;

    if cases.is_empty() {
        println!("No cases.");
        return Ok(());
    }
    for case in &cases {
        println!(
            "{}  {:<10} {:<8} files={:<3} {}",
            case.id,
            case.status,
            risk_label(case),
            case.files.len(),
            case.name
        );
    }
    Ok(())
}

pub async fn run_show(config: &Config, case_id: &str) -> Result<()> {
    let store = db::open_store(config).await?;
    let case = require_case(&store, case_id).await;
    store.pool().close().await;
    let case = case?;

    println!("--- Case ---");
    println!("id:            {}", case.id);
    println!("name:          {}", case.name);
    println!("status:        {}", case.status);
    println!("risk_level:    {}", risk_label(&case));
    println!("cloud_consent: {}", case.cloud_consent);
    println!("created_at:    {}", case.created_at);
    println!(
        "last_run:      {}",
        case.last_run_id.as_deref().unwrap_or("-")
    );
    println!();
    println!("--- Files ({}) ---", case.files.len());
    for file in &case.files {
        println!(
            "{}  {:<11} {:>5} msgs  {}",
            file.id, file.format, file.message_count, file.filename
        );
        println!("    {}", file.preview);
    }
    println!();
    println!(
        "findings: {} current, {} total",
        case.current_findings().len(),
        case.findings.len()
    );
    Ok(())
}

pub async fn run_rename(config: &Config, case_id: &str, name: &str) -> Result<()> {
    let store = db::open_store(config).await?;
    let renamed = store.rename_case(case_id, name).await;
    store.pool().close().await;
    if !renamed? {
        return Err(AnalysisError::CaseNotFound(case_id.to_string()).into());
    }
    println!("ok");
    Ok(())
}

pub async fn run_consent(config: &Config, case_id: &str, consent: bool) -> Result<()> {
    let store = db::open_store(config).await?;
    let updated = store.set_cloud_consent(case_id, consent).await;
    store.pool().close().await;
    if !updated? {
        return Err(AnalysisError::CaseNotFound(case_id.to_string()).into());
    }
    println!("cloud_consent: {}", consent);
    Ok(())
}

pub async fn run_delete(config: &Config, case_id: &str) -> Result<()> {
    let store = db::open_store(config).await?;
    let deleted = store.delete_case(case_id).await;
    store.pool().close().await;
    if !deleted? {
        return Err(AnalysisError::CaseNotFound(case_id.to_string()).into());
    }
    println!("deleted {}", case_id);
    Ok(())
}

/// Print the current findings of a case in report order.
pub async fn run_findings(config: &Config, case_id: &str, all: bool) -> Result<()> {
    let store = db::open_store(config).await?;
    let case = require_case(&store, case_id).await;
    store.pool().close().await;
    let case = case?;

    let mut findings = if all {
        case.findings.clone()
    } else {
        case.current_findings()
    };
    sort_findings(&mut findings);

    if findings.is_empty() {
        println!("No findings.");
        return Ok(());
    }
    for (i, f) in findings.iter().enumerate() {
        let pillars: Vec<&str> = f.pillars.iter().map(|p| p.short()).collect();
        let flag = if f.reduced_confidence {
            " (reduced confidence)"
        } else {
            ""
        };
        println!(
            "{}. [{}] {}  window {}  source {}{}",
            i + 1,
            f.severity,
            f.category,
            f.window_index,
            f.source,
            flag
        );
        if !pillars.is_empty() {
            println!("    pillars: {}", pillars.join(", "));
        }
        if let Some(quote) = &f.quote {
            println!("    quote: \"{}\"", quote);
        }
        println!("    {}", f.explanation);
        println!();
    }
    Ok(())
}
