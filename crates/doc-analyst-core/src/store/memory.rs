//! In-memory [`CaseStore`] implementation for tests and embedding.
//!
//! All state sits behind one `std::sync::RwLock`; no guard is held across
//! an await point.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AnalysisError;
use crate::models::{Case, CaseFile, CaseStatus, Finding, Message, Report, RiskLevel};

use super::{outcome_risk, CaseStore};

#[derive(Default)]
struct Inner {
    /// Insertion order doubles as creation order.
    cases: Vec<Case>,
    messages: HashMap<String, Vec<Message>>,
    reports: HashMap<String, Report>,
}

impl Inner {
    fn case_mut(&mut self, case_id: &str) -> Result<&mut Case> {
        self.cases
            .iter_mut()
            .find(|c| c.id == case_id)
            .ok_or_else(|| AnalysisError::CaseNotFound(case_id.to_string()).into())
    }
}

/// In-memory case store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl CaseStore for InMemoryStore {
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
        self.write()?.cases.push(case.clone());
        Ok(case)
    }

    async fn list_cases(&self) -> Result<Vec<Case>> {
        Ok(self.read()?.cases.clone())
    }

    async fn get_case(&self, case_id: &str) -> Result<Option<Case>> {
        Ok(self.read()?.cases.iter().find(|c| c.id == case_id).cloned())
    }

    async fn rename_case(&self, case_id: &str, name: &str) -> Result<bool> {
        let mut guard = self.write()?;
        let inner = &mut *guard;
        match inner.cases.iter_mut().find(|c| c.id == case_id) {
            Some(case) => {
                case.name = name.to_string();
                inner.reports.remove(case_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_cloud_consent(&self, case_id: &str, consent: bool) -> Result<bool> {
        let mut inner = self.write()?;
        Ok(match inner.cases.iter_mut().find(|c| c.id == case_id) {
            Some(case) => {
                case.cloud_consent = consent;
                true
            }
            None => false,
        })
    }

    async fn cloud_consent(&self, case_id: &str) -> Result<Option<bool>> {
        Ok(self
            .read()?
            .cases
            .iter()
            .find(|c| c.id == case_id)
            .map(|c| c.cloud_consent))
    }

    async fn delete_case(&self, case_id: &str) -> Result<bool> {
        let mut inner = self.write()?;
        let Some(pos) = inner.cases.iter().position(|c| c.id == case_id) else {
            return Ok(false);
        };
        let case = inner.cases.remove(pos);
        for file in &case.files {
            inner.messages.remove(&file.id);
        }
        inner.reports.remove(case_id);
        Ok(true)
    }

    async fn add_file(&self, file: &CaseFile, messages: &[Message]) -> Result<()> {
        let mut inner = self.write()?;
        inner.case_mut(&file.case_id)?.files.push(file.clone());
        inner.messages.insert(file.id.clone(), messages.to_vec());
        inner.reports.remove(&file.case_id);
        Ok(())
    }

    async fn list_files(&self, case_id: &str) -> Result<Vec<CaseFile>> {
        Ok(self
            .read()?
            .cases
            .iter()
            .find(|c| c.id == case_id)
            .map(|c| c.files.clone())
            .unwrap_or_default())
    }

    async fn list_messages(&self, file_id: &str) -> Result<Vec<Message>> {
        Ok(self.read()?.messages.get(file_id).cloned().unwrap_or_default())
    }

    async fn add_findings(&self, findings: &[Finding]) -> Result<()> {
        let mut inner = self.write()?;
        for f in findings {
            inner.case_mut(&f.case_id)?.findings.push(f.clone());
        }
        Ok(())
    }

    async fn clear_findings(&self, case_id: &str) -> Result<()> {
        self.write()?.case_mut(case_id)?.findings.clear();
        Ok(())
    }

    async fn list_findings(&self, case_id: &str) -> Result<Vec<Finding>> {
        Ok(self
            .read()?
            .cases
            .iter()
            .find(|c| c.id == case_id)
            .map(|c| c.findings.clone())
            .unwrap_or_default())
    }

    async fn begin_run(&self, case_id: &str, run_id: &str, takeover: bool) -> Result<bool> {
        let mut inner = self.write()?;
        let case = inner.case_mut(case_id)?;
        if case.status == CaseStatus::Analyzing && !takeover {
            return Ok(false);
        }
        case.status = CaseStatus::Analyzing;
        case.risk_level = None;
        case.last_run_id = Some(run_id.to_string());
        inner.reports.remove(case_id);
        Ok(true)
    }

    async fn finish_run(
        &self,
        case_id: &str,
        run_id: &str,
        status: CaseStatus,
        risk_level: Option<RiskLevel>,
    ) -> Result<bool> {
        let mut inner = self.write()?;
        let case = inner.case_mut(case_id)?;
        if case.last_run_id.as_deref() != Some(run_id) {
            return Ok(false);
        }
        case.status = status;
        case.risk_level = outcome_risk(status, risk_level);
        Ok(true)
    }

    async fn save_report(&self, report: &Report) -> Result<()> {
        let mut inner = self.write()?;
        inner.case_mut(&report.case_id)?;
        inner.reports.insert(report.case_id.clone(), report.clone());
        Ok(())
    }

    async fn get_report(&self, case_id: &str) -> Result<Option<Report>> {
        Ok(self.read()?.reports.get(case_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileFormat;

    fn file(case_id: &str, id: &str) -> CaseFile {
        CaseFile {
            id: id.into(),
            case_id: case_id.into(),
            filename: format!("{}.txt", id),
            format: FileFormat::PlainText,
            message_count: 1,
            preview: "hi".into(),
            created_at: String::new(),
        }
    }

    fn message(file_id: &str) -> Message {
        Message {
            index: 0,
            file_id: file_id.into(),
            sender: String::new(),
            timestamp: None,
            text: "hi".into(),
            line: 1,
        }
    }

    #[tokio::test]
    async fn case_crud() {
        let store = InMemoryStore::new();
        let case = store.create_case("Alpha").await.unwrap();
        assert_eq!(case.status, CaseStatus::Open);
        assert!(!case.cloud_consent);

        assert!(store.rename_case(&case.id, "Beta").await.unwrap());
        assert!(store.set_cloud_consent(&case.id, true).await.unwrap());
        assert_eq!(store.cloud_consent(&case.id).await.unwrap(), Some(true));
        let got = store.get_case(&case.id).await.unwrap().unwrap();
        assert_eq!(got.name, "Beta");

        assert!(store.delete_case(&case.id).await.unwrap());
        assert!(store.get_case(&case.id).await.unwrap().is_none());
        assert_eq!(store.cloud_consent(&case.id).await.unwrap(), None);
        assert!(!store.rename_case(&case.id, "x").await.unwrap());
    }

    #[tokio::test]
    async fn files_and_messages() {
        let store = InMemoryStore::new();
        let case = store.create_case("c").await.unwrap();
        store
            .add_file(&file(&case.id, "f1"), &[message("f1")])
            .await
            .unwrap();
        assert_eq!(store.list_files(&case.id).await.unwrap().len(), 1);
        assert_eq!(store.list_messages("f1").await.unwrap().len(), 1);

        let err = store
            .add_file(&file("missing", "f2"), &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::CaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn risk_level_only_kept_on_completion() {
        let store = InMemoryStore::new();
        let case = store.create_case("c").await.unwrap();
        assert!(store.begin_run(&case.id, "r1", false).await.unwrap());
        assert!(store
            .finish_run(&case.id, "r1", CaseStatus::Failed, Some(RiskLevel::High))
            .await
            .unwrap());
        let got = store.get_case(&case.id).await.unwrap().unwrap();
        assert_eq!(got.status, CaseStatus::Failed);
        assert_eq!(got.risk_level, None);
        assert_eq!(got.last_run_id.as_deref(), Some("r1"));

        store
            .finish_run(&case.id, "r1", CaseStatus::Complete, Some(RiskLevel::High))
            .await
            .unwrap();
        let got = store.get_case(&case.id).await.unwrap().unwrap();
        assert_eq!(got.risk_level, Some(RiskLevel::High));
    }

    #[tokio::test]
    async fn begin_run_drops_stored_report() {
        let store = InMemoryStore::new();
        let case = store.create_case("c").await.unwrap();
        let report = Report {
            case_id: case.id.clone(),
            markdown: "# r\n".into(),
            integrity_hash: "h".into(),
        };
        store.save_report(&report).await.unwrap();
        assert!(store.get_report(&case.id).await.unwrap().is_some());
        store.begin_run(&case.id, "r2", false).await.unwrap();
        assert!(store.get_report(&case.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn begin_run_refuses_a_case_already_analyzing() {
        let store = InMemoryStore::new();
        let case = store.create_case("c").await.unwrap();
        assert!(store.begin_run(&case.id, "r1", false).await.unwrap());
        assert!(!store.begin_run(&case.id, "r2", false).await.unwrap());
        let got = store.get_case(&case.id).await.unwrap().unwrap();
        assert_eq!(got.last_run_id.as_deref(), Some("r1"));

        assert!(store.begin_run(&case.id, "r3", true).await.unwrap());
        // The replaced run can no longer record its outcome.
        assert!(!store
            .finish_run(&case.id, "r1", CaseStatus::Complete, Some(RiskLevel::Low))
            .await
            .unwrap());
        let got = store.get_case(&case.id).await.unwrap().unwrap();
        assert_eq!(got.status, CaseStatus::Analyzing);
        assert_eq!(got.last_run_id.as_deref(), Some("r3"));

        let err = store.begin_run("missing", "r4", false).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AnalysisError>(),
            Some(AnalysisError::CaseNotFound(_))
        ));
    }
}
