//! SQLite-backed [`CaseStore`] implementation.
//!
//! Maps each [`CaseStore`] operation onto the schema created by
//! [`migrate`](crate::migrate): `cases`, `case_files`, `messages`,
//! `findings` and `reports`. Enum columns hold the lowercase labels from
//! [`doc_analyst_core::models`]; pillar sets are stored comma-separated.

use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use doc_analyst_core::models::{
    Case, CaseFile, CaseStatus, Finding, Message, Pillar, Report, RiskLevel,
};
use doc_analyst_core::store::{outcome_risk, CaseStore};
use doc_analyst_core::AnalysisError;

/// SQLite implementation of the [`CaseStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn case_exists(&self, case_id: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM cases WHERE id = ?")
            .bind(case_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn require_case(&self, case_id: &str) -> Result<()> {
        if self.case_exists(case_id).await? {
            Ok(())
        } else {
            Err(AnalysisError::CaseNotFound(case_id.to_string()).into())
        }
    }

    async fn load_case(&self, row: &SqliteRow) -> Result<Case> {
        let mut case = case_from_row(row)?;
        case.files = self.list_files(&case.id).await?;
        case.findings = self.list_findings(&case.id).await?;
        Ok(case)
    }
}

fn parse_label<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse::<T>().map_err(|e| anyhow!(e))
}

fn pillars_to_column(pillars: &BTreeSet<Pillar>) -> String {
    pillars
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn pillars_from_column(value: &str) -> Result<BTreeSet<Pillar>> {
    value
        .split(',')
        .filter(|s| !s.is_empty())
        .map(parse_label)
        .collect()
}

fn case_from_row(row: &SqliteRow) -> Result<Case> {
    let status: String = row.get("status");
    let risk_level: Option<String> = row.get("risk_level");
    let cloud_consent: i64 = row.get("cloud_consent");
    Ok(Case {
        id: row.get("id"),
        name: row.get("name"),
        status: parse_label(&status)?,
        risk_level: risk_level.as_deref().map(parse_label).transpose()?,
        cloud_consent: cloud_consent != 0,
        created_at: row.get("created_at"),
        last_run_id: row.get("last_run_id"),
        files: Vec::new(),
        findings: Vec::new(),
    })
}

fn file_from_row(row: &SqliteRow) -> Result<CaseFile> {
    let format: String = row.get("format");
    let message_count: i64 = row.get("message_count");
    Ok(CaseFile {
        id: row.get("id"),
        case_id: row.get("case_id"),
        filename: row.get("filename"),
        format: parse_label(&format)?,
        message_count: message_count as usize,
        preview: row.get("preview"),
        created_at: row.get("created_at"),
    })
}

fn finding_from_row(row: &SqliteRow) -> Result<Finding> {
    let window_index: i64 = row.get("window_index");
    let ordinal: i64 = row.get("ordinal");
    let category: String = row.get("category");
    let severity: String = row.get("severity");
    let source: String = row.get("source");
    let reduced_confidence: i64 = row.get("reduced_confidence");
    let pillars: String = row.get("pillars");
    Ok(Finding {
        id: row.get("id"),
        case_id: row.get("case_id"),
        file_id: row.get("file_id"),
        run_id: row.get("run_id"),
        window_index: window_index as usize,
        ordinal: ordinal as usize,
        category: parse_label(&category)?,
        severity: parse_label(&severity)?,
        source: parse_label(&source)?,
        reduced_confidence: reduced_confidence != 0,
        quote: row.get("quote"),
        explanation: row.get("explanation"),
        pillars: pillars_from_column(&pillars)?,
        created_at: row.get("created_at"),
    })
}

const CASE_COLUMNS: &str =
    "id, name, status, risk_level, cloud_consent, last_run_id, created_at";

#[async_trait]
impl CaseStore for SqliteStore {
    async fn create_case(&self, name: &str) -> Result<Case> {
        let case = Case {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            status: CaseStatus::Open,
            risk_level: None,
            cloud_consent: false,
            created_at: chrono::Utc::now().to_rfc3339(),
            last_run_id: None,
            files: Vec::new(),
            findings: Vec::new(),
        };

        sqlx::query(
            "INSERT INTO cases (id, name, status, cloud_consent, created_at) VALUES (?, ?, ?, 0, ?)",
        )
        .bind(&case.id)
        .bind(&case.name)
        .bind(case.status.as_str())
        .bind(&case.created_at)
        .execute(&self.pool)
        .await?;

        Ok(case)
    }

    async fn list_cases(&self) -> Result<Vec<Case>> {
        let rows = sqlx::query(&format!("SELECT {} FROM cases ORDER BY rowid ASC", CASE_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        let mut cases = Vec::with_capacity(rows.len());
        for row in &rows {
            cases.push(self.load_case(row).await?);
        }
        Ok(cases)
    }

    async fn get_case(&self, case_id: &str) -> Result<Option<Case>> {
        let row = sqlx::query(&format!("SELECT {} FROM cases WHERE id = ?", CASE_COLUMNS))
            .bind(case_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.load_case(&row).await?)),
            None => Ok(None),
        }
    }

    async fn rename_case(&self, case_id: &str, name: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE cases SET name = ? WHERE id = ?")
            .bind(name)
            .bind(case_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        // The case name is rendered into the report body.
        sqlx::query("DELETE FROM reports WHERE case_id = ?")
            .bind(case_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(updated > 0)
    }

    async fn set_cloud_consent(&self, case_id: &str, consent: bool) -> Result<bool> {
        let updated = sqlx::query("UPDATE cases SET cloud_consent = ? WHERE id = ?")
            .bind(consent as i64)
            .bind(case_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated > 0)
    }

    async fn cloud_consent(&self, case_id: &str) -> Result<Option<bool>> {
        let consent: Option<i64> =
            sqlx::query_scalar("SELECT cloud_consent FROM cases WHERE id = ?")
                .bind(case_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(consent.map(|c| c != 0))
    }

    async fn delete_case(&self, case_id: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM cases WHERE id = ?")
            .bind(case_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn add_file(&self, file: &CaseFile, messages: &[Message]) -> Result<()> {
        self.require_case(&file.case_id).await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO case_files (id, case_id, filename, format, message_count, preview, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.id)
        .bind(&file.case_id)
        .bind(&file.filename)
        .bind(file.format.as_str())
        .bind(file.message_count as i64)
        .bind(&file.preview)
        .bind(&file.created_at)
        .execute(&mut *tx)
        .await?;

        for message in messages {
            sqlx::query(
                r#"
                INSERT INTO messages (file_id, seq_index, sender, timestamp, text, line)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&file.id)
            .bind(message.index as i64)
            .bind(&message.sender)
            .bind(&message.timestamp)
            .bind(&message.text)
            .bind(message.line as i64)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM reports WHERE case_id = ?")
            .bind(&file.case_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_files(&self, case_id: &str) -> Result<Vec<CaseFile>> {
        let rows = sqlx::query(
            r#"
            SELECT id, case_id, filename, format, message_count, preview, created_at
            FROM case_files
            WHERE case_id = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(file_from_row).collect()
    }

    async fn list_messages(&self, file_id: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT file_id, seq_index, sender, timestamp, text, line
            FROM messages
            WHERE file_id = ?
            ORDER BY seq_index ASC
            "#,
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let index: i64 = row.get("seq_index");
                let line: i64 = row.get("line");
                Message {
                    index: index as usize,
                    file_id: row.get("file_id"),
                    sender: row.get("sender"),
                    timestamp: row.get("timestamp"),
                    text: row.get("text"),
                    line: line as usize,
                }
            })
            .collect())
    }

    async fn add_findings(&self, findings: &[Finding]) -> Result<()> {
        if findings.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;

        for finding in findings {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM cases WHERE id = ?")
                .bind(&finding.case_id)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(AnalysisError::CaseNotFound(finding.case_id.clone()).into());
            }

            sqlx::query(
                r#"
                INSERT INTO findings (id, case_id, file_id, run_id, window_index, ordinal,
                                      category, severity, source, reduced_confidence,
                                      quote, explanation, pillars, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&finding.id)
            .bind(&finding.case_id)
            .bind(&finding.file_id)
            .bind(&finding.run_id)
            .bind(finding.window_index as i64)
            .bind(finding.ordinal as i64)
            .bind(finding.category.as_str())
            .bind(finding.severity.as_str())
            .bind(finding.source.as_str())
            .bind(finding.reduced_confidence as i64)
            .bind(&finding.quote)
            .bind(&finding.explanation)
            .bind(pillars_to_column(&finding.pillars))
            .bind(&finding.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn clear_findings(&self, case_id: &str) -> Result<()> {
        self.require_case(case_id).await?;
        sqlx::query("DELETE FROM findings WHERE case_id = ?")
            .bind(case_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_findings(&self, case_id: &str) -> Result<Vec<Finding>> {
        let rows = sqlx::query(
            r#"
            SELECT id, case_id, file_id, run_id, window_index, ordinal, category, severity,
                   source, reduced_confidence, quote, explanation, pillars, created_at
            FROM findings
            WHERE case_id = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(finding_from_row).collect()
    }

    async fn begin_run(&self, case_id: &str, run_id: &str, takeover: bool) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE cases SET status = ?, risk_level = NULL, last_run_id = ?
            WHERE id = ? AND (status != ? OR ?)
            "#,
        )
        .bind(CaseStatus::Analyzing.as_str())
        .bind(run_id)
        .bind(case_id)
        .bind(CaseStatus::Analyzing.as_str())
        .bind(takeover)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM cases WHERE id = ?")
                .bind(case_id)
                .fetch_optional(&mut *tx)
                .await?;
            return match found {
                Some(_) => Ok(false),
                None => Err(AnalysisError::CaseNotFound(case_id.to_string()).into()),
            };
        }

        sqlx::query("DELETE FROM reports WHERE case_id = ?")
            .bind(case_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn finish_run(
        &self,
        case_id: &str,
        run_id: &str,
        status: CaseStatus,
        risk_level: Option<RiskLevel>,
    ) -> Result<bool> {
        let risk_level = outcome_risk(status, risk_level);
        let updated = sqlx::query(
            "UPDATE cases SET status = ?, risk_level = ? WHERE id = ? AND last_run_id = ?",
        )
        .bind(status.as_str())
        .bind(risk_level.map(|r| r.as_str()))
        .bind(case_id)
        .bind(run_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            self.require_case(case_id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn save_report(&self, report: &Report) -> Result<()> {
        self.require_case(&report.case_id).await?;
        sqlx::query(
            r#"
            INSERT INTO reports (case_id, markdown, integrity_hash)
            VALUES (?, ?, ?)
            ON CONFLICT(case_id) DO UPDATE SET
                markdown = excluded.markdown,
                integrity_hash = excluded.integrity_hash
            "#,
        )
        .bind(&report.case_id)
        .bind(&report.markdown)
        .bind(&report.integrity_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_report(&self, case_id: &str) -> Result<Option<Report>> {
        let row = sqlx::query("SELECT case_id, markdown, integrity_hash FROM reports WHERE case_id = ?")
            .bind(case_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Report {
            case_id: r.get("case_id"),
            markdown: r.get("markdown"),
            integrity_hash: r.get("integrity_hash"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::{db, migrate};
    use doc_analyst_core::models::{FileFormat, FindingCategory, InferenceSource, Severity};
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let config: Config = toml::from_str(&format!(
            "[db]\npath = \"{}/analyst.sqlite\"\n\n[server]\nbind = \"127.0.0.1:0\"\n",
            tmp.path().display()
        ))
        .unwrap();
        migrate::run_migrations(&config).await.unwrap();
        let pool = db::connect(&config).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn file(case_id: &str, id: &str) -> CaseFile {
        CaseFile {
            id: id.into(),
            case_id: case_id.into(),
            filename: format!("{}.txt", id),
            format: FileFormat::Whatsapp,
            message_count: 2,
            preview: "Alex: hi".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    fn message(file_id: &str, index: usize, timestamp: Option<&str>) -> Message {
        Message {
            index,
            file_id: file_id.into(),
            sender: "Alex".into(),
            timestamp: timestamp.map(String::from),
            text: format!("message {}", index),
            line: index + 1,
        }
    }

    fn finding(case_id: &str, run_id: &str, window_index: usize) -> Finding {
        Finding {
            id: Uuid::new_v4().to_string(),
            case_id: case_id.into(),
            file_id: "f1".into(),
            run_id: run_id.into(),
            window_index,
            ordinal: 0,
            category: FindingCategory::Abuse,
            severity: Severity::High,
            source: InferenceSource::Local,
            reduced_confidence: true,
            quote: Some("message 1".into()),
            explanation: "Sender demands obedience and isolation.".into(),
            pillars: [Pillar::Control, Pillar::Isolation].into_iter().collect(),
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn case_round_trip() {
        let (_tmp, store) = store().await;
        let a = store.create_case("Alpha").await.unwrap();
        let b = store.create_case("Beta").await.unwrap();

        let cases = store.list_cases().await.unwrap();
        assert_eq!(
            cases.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            vec![a.id.as_str(), b.id.as_str()]
        );

        assert!(store.rename_case(&a.id, "Gamma").await.unwrap());
        assert!(store.set_cloud_consent(&a.id, true).await.unwrap());
        let got = store.get_case(&a.id).await.unwrap().unwrap();
        assert_eq!(got.name, "Gamma");
        assert!(got.cloud_consent);
        assert_eq!(got.status, CaseStatus::Open);

        assert!(!store.rename_case("missing", "x").await.unwrap());
        assert_eq!(store.cloud_consent("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn files_messages_and_findings_persist() {
        let (_tmp, store) = store().await;
        let case = store.create_case("c").await.unwrap();
        store
            .add_file(
                &file(&case.id, "f1"),
                &[message("f1", 0, Some("01/02/2024, 10:00")), message("f1", 1, None)],
            )
            .await
            .unwrap();

        let messages = store.list_messages("f1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].timestamp.as_deref(), Some("01/02/2024, 10:00"));
        assert_eq!(messages[1].timestamp, None);

        let f = finding(&case.id, "r1", 3);
        store.add_findings(&[f.clone()]).await.unwrap();
        let got = store.get_case(&case.id).await.unwrap().unwrap();
        assert_eq!(got.files.len(), 1);
        assert_eq!(got.files[0].format, FileFormat::Whatsapp);
        assert_eq!(got.findings, vec![f]);

        store.clear_findings(&case.id).await.unwrap();
        assert!(store.list_findings(&case.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn add_file_to_missing_case_is_not_found() {
        let (_tmp, store) = store().await;
        let err = store.add_file(&file("missing", "f1"), &[]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::CaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn run_outcome_controls_risk_level() {
        let (_tmp, store) = store().await;
        let case = store.create_case("c").await.unwrap();
        assert!(store.begin_run(&case.id, "r1", false).await.unwrap());
        let got = store.get_case(&case.id).await.unwrap().unwrap();
        assert_eq!(got.status, CaseStatus::Analyzing);
        assert_eq!(got.last_run_id.as_deref(), Some("r1"));

        assert!(store
            .finish_run(&case.id, "r1", CaseStatus::Complete, Some(RiskLevel::Medium))
            .await
            .unwrap());
        let got = store.get_case(&case.id).await.unwrap().unwrap();
        assert_eq!(got.risk_level, Some(RiskLevel::Medium));

        assert!(store.begin_run(&case.id, "r2", false).await.unwrap());
        store
            .finish_run(&case.id, "r2", CaseStatus::Failed, Some(RiskLevel::High))
            .await
            .unwrap();
        let got = store.get_case(&case.id).await.unwrap().unwrap();
        assert_eq!(got.status, CaseStatus::Failed);
        assert_eq!(got.risk_level, None);
    }

    #[tokio::test]
    async fn only_one_run_can_claim_a_case() {
        let (_tmp, store) = store().await;
        let case = store.create_case("c").await.unwrap();

        assert!(store.begin_run(&case.id, "r1", false).await.unwrap());
        assert!(!store.begin_run(&case.id, "r2", false).await.unwrap());
        let got = store.get_case(&case.id).await.unwrap().unwrap();
        assert_eq!(got.last_run_id.as_deref(), Some("r1"));

        // Taking over a stale run fences the old one out.
        assert!(store.begin_run(&case.id, "r3", true).await.unwrap());
        assert!(!store
            .finish_run(&case.id, "r1", CaseStatus::Complete, Some(RiskLevel::Low))
            .await
            .unwrap());
        let got = store.get_case(&case.id).await.unwrap().unwrap();
        assert_eq!(got.status, CaseStatus::Analyzing);
        assert_eq!(got.risk_level, None);

        assert!(store
            .finish_run(&case.id, "r3", CaseStatus::Complete, Some(RiskLevel::Low))
            .await
            .unwrap());
        assert!(store.begin_run(&case.id, "r4", false).await.unwrap());

        let err = store.begin_run("missing", "r5", false).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::CaseNotFound(_))
        ));
        let err = store
            .finish_run("missing", "r5", CaseStatus::Failed, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::CaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_cascades_and_drops_report() {
        let (_tmp, store) = store().await;
        let case = store.create_case("c").await.unwrap();
        store
            .add_file(&file(&case.id, "f1"), &[message("f1", 0, None)])
            .await
            .unwrap();
        store.add_findings(&[finding(&case.id, "r1", 0)]).await.unwrap();
        store
            .save_report(&Report {
                case_id: case.id.clone(),
                markdown: "# r\n".into(),
                integrity_hash: "abc".into(),
            })
            .await
            .unwrap();
        assert!(store.get_report(&case.id).await.unwrap().is_some());

        assert!(store.delete_case(&case.id).await.unwrap());
        assert!(store.get_case(&case.id).await.unwrap().is_none());
        assert!(store.list_messages("f1").await.unwrap().is_empty());
        assert!(store.list_findings(&case.id).await.unwrap().is_empty());
        assert!(store.get_report(&case.id).await.unwrap().is_none());
        assert!(!store.delete_case(&case.id).await.unwrap());
    }
}
