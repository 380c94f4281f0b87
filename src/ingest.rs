//! File upload into a case.
//!
//! Validates the target case and the upload size, runs format detection
//! and normalization on a blocking thread, then persists the [`CaseFile`]
//! together with its message sequence so analysis never re-parses raw
//! bytes. Used by both `analyst upload` and `POST /api/cases/{id}/files`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use doc_analyst_core::ingest::{parse_file, preview, TextExtractor};
use doc_analyst_core::models::CaseFile;
use doc_analyst_core::store::CaseStore;
use doc_analyst_core::AnalysisError;

use crate::config::Config;
use crate::db;
use crate::extract::PdfExtractor;

/// Parse `bytes` and attach the result to `case_id`.
pub async fn ingest_upload(
    store: &dyn CaseStore,
    extractor: Arc<dyn TextExtractor>,
    case_id: &str,
    filename: &str,
    bytes: Vec<u8>,
    max_file_bytes: usize,
) -> Result<CaseFile> {
    if store.get_case(case_id).await?.is_none() {
        return Err(AnalysisError::CaseNotFound(case_id.to_string()).into());
    }
    if bytes.len() > max_file_bytes {
        return Err(AnalysisError::FileTooLarge {
            filename: filename.to_string(),
            size: bytes.len(),
            limit: max_file_bytes,
        }
        .into());
    }

    let file_id = Uuid::new_v4().to_string();
    let ingested = {
        let filename = filename.to_string();
        let file_id = file_id.clone();
        tokio::task::spawn_blocking(move || {
            parse_file(&bytes, &filename, &file_id, extractor.as_ref())
        })
        .await
        .context("ingestion task failed")??
    };

    let file = CaseFile {
        id: file_id,
        case_id: case_id.to_string(),
        filename: filename.to_string(),
        format: ingested.format,
        message_count: ingested.messages.len(),
        preview: preview(&ingested.messages),
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    store.add_file(&file, &ingested.messages).await?;

    info!(
        case_id,
        file_id = %file.id,
        format = %file.format,
        messages = file.message_count,
        "ingested file"
    );
    Ok(file)
}

/// `analyst upload <case> <path>...`
///
/// Per-file failures are reported and skipped; the command fails only when
/// no file could be ingested.
pub async fn run_upload(config: &Config, case_id: &str, paths: &[PathBuf]) -> Result<()> {
    let store = db::open_store(config).await?;
    let extractor: Arc<dyn TextExtractor> = Arc::new(PdfExtractor);

    let mut ingested = 0usize;
    for path in paths {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read upload");
                println!("  skipped {}: {}", path.display(), e);
                continue;
            }
        };

        match ingest_upload(
            &store,
            extractor.clone(),
            case_id,
            &filename,
            bytes,
            config.ingest.max_file_bytes,
        )
        .await
        {
            Ok(file) => {
                ingested += 1;
                println!(
                    "  {}  {}  {} messages  {}",
                    file.id, file.format, file.message_count, file.filename
                );
            }
            Err(e) => match e.downcast_ref::<AnalysisError>() {
                Some(AnalysisError::CaseNotFound(_)) => {
                    store.pool().close().await;
                    return Err(e);
                }
                _ => println!("  skipped {}: {}", path.display(), e),
            },
        }
    }

    store.pool().close().await;

    if ingested == 0 {
        bail!("no files ingested");
    }
    println!("upload {}", case_id);
    println!("  files ingested: {} of {}", ingested, paths.len());
    println!("ok");
    Ok(())
}
