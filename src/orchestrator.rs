//! Per-case analysis orchestration.
//!
//! [`Analyzer`] owns the job lifecycle of every case. Starting a run builds
//! the case's windows up front, marks the case `analyzing` under a fresh
//! run id and spawns one tokio task for the run:
//!
//! ```text
//! dispatcher ──(local slot, consent sample)──▶ worker per window ──mpsc──▶ collector
//!                                                                        │
//!                                           watch<AnalysisProgress> ◀────┘ (single writer)
//! ```
//!
//! - The **dispatcher** walks windows in order. Before each window it
//!   checks the run's [`CancellationToken`], waits for an on-device model
//!   slot and samples the case's cloud consent from the store.
//! - A **worker** runs local inference, applies the [`RoutingPolicy`],
//!   optionally escalates to the cloud tier under its own semaphore and
//!   classifies the output.
//! - The **collector** persists each window's findings, bumps progress
//!   exactly once per window and decides the run outcome.
//!
//! Cancelling (or deleting the case) stops dispatch immediately; windows
//! already in flight finish but their results are dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Deserialize;
use tokio::sync::{mpsc, watch, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use doc_analyst_core::chunk::WindowPlan;
use doc_analyst_core::classify::{classify, Provenance};
use doc_analyst_core::inference::{InferenceOutput, InferenceService};
use doc_analyst_core::lifecycle::{case_status, stored_progress, transition, JobEvent, Transition};
use doc_analyst_core::models::{
    AnalysisProgress, CaseStatus, Finding, InferenceSource, JobState, Window,
};
use doc_analyst_core::routing::{RouteDecision, RoutingPolicy};
use doc_analyst_core::scoring::score_findings;
use doc_analyst_core::store::CaseStore;
use doc_analyst_core::AnalysisError;

use crate::config::{AnalysisConfig, Config};
use crate::inference::{create_cloud, create_local};
use crate::progress::ProgressMode;

/// Options for one analysis run.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AnalyzeOptions {
    /// Drop every prior finding of the case instead of keeping it as history.
    #[serde(default)]
    pub reset_findings: bool,
    /// Take over a case the store still marks `analyzing` although no
    /// process is running it any more. A run live in this analyzer is
    /// never replaced.
    #[serde(default)]
    pub force: bool,
}

/// Result of [`Analyzer::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { run_id: String, total: usize },
    /// A run is already live; nothing was changed.
    AlreadyRunning { progress: AnalysisProgress },
}

/// How long a settled run's handle is kept for progress queries.
const SETTLED_RUN_RETENTION: Duration = Duration::from_secs(15 * 60);

/// Window geometry, routing and concurrency limits for an [`Analyzer`].
#[derive(Debug, Clone, Copy)]
pub struct AnalyzerSettings {
    pub plan: WindowPlan,
    pub routing: RoutingPolicy,
    pub local_concurrency: usize,
    pub cloud_concurrency: usize,
    /// Settled runs older than this are forgotten; their progress is then
    /// read back from the store.
    pub settled_retention: Duration,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            plan: WindowPlan::default(),
            routing: RoutingPolicy::default(),
            local_concurrency: 1,
            cloud_concurrency: 4,
            settled_retention: SETTLED_RUN_RETENTION,
        }
    }
}

impl AnalyzerSettings {
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        Ok(Self {
            plan: config.window_plan()?,
            routing: config.routing_policy(),
            local_concurrency: config.local_concurrency.max(1),
            cloud_concurrency: config.cloud_concurrency.max(1),
            settled_retention: SETTLED_RUN_RETENTION,
        })
    }
}

struct RunHandle {
    progress: watch::Receiver<AnalysisProgress>,
    cancel: CancellationToken,
    started_at: Instant,
}

impl RunHandle {
    fn state(&self) -> JobState {
        self.progress.borrow().status
    }

    fn run_id(&self) -> Option<String> {
        self.progress.borrow().run_id.clone()
    }
}

/// Owns every case's analysis job.
pub struct Analyzer {
    store: Arc<dyn CaseStore>,
    local: Arc<dyn InferenceService>,
    cloud: Option<Arc<dyn InferenceService>>,
    settings: AnalyzerSettings,
    local_slots: Arc<Semaphore>,
    cloud_slots: Arc<Semaphore>,
    runs: Mutex<HashMap<String, RunHandle>>,
}

impl Analyzer {
    pub fn new(
        store: Arc<dyn CaseStore>,
        local: Arc<dyn InferenceService>,
        cloud: Option<Arc<dyn InferenceService>>,
        settings: AnalyzerSettings,
    ) -> Self {
        Self {
            store,
            local,
            cloud,
            local_slots: Arc::new(Semaphore::new(settings.local_concurrency)),
            cloud_slots: Arc::new(Semaphore::new(settings.cloud_concurrency)),
            settings,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Build an analyzer with the inference tiers named in `config`.
    pub fn from_config(config: &Config, store: Arc<dyn CaseStore>) -> Result<Self> {
        let local = create_local(&config.inference.local)?;
        let cloud = create_cloud(&config.inference.cloud)?;
        let settings = AnalyzerSettings::from_config(&config.analysis)?;
        Ok(Self::new(store, local, cloud, settings))
    }

    pub fn store(&self) -> &Arc<dyn CaseStore> {
        &self.store
    }

    /// Start analyzing a case.
    ///
    /// Fails with [`AnalysisError::CaseNotFound`] for an unknown case and
    /// [`AnalysisError::NothingToAnalyze`] when the case has no messages.
    /// A second start while a run is live is not an error: it returns
    /// [`StartOutcome::AlreadyRunning`] and changes nothing. This holds
    /// across analyzers sharing one store, since the run is claimed through
    /// [`CaseStore::begin_run`].
    pub async fn start(&self, case_id: &str, options: AnalyzeOptions) -> Result<StartOutcome> {
        if let Some(progress) = self.live_progress(case_id).await {
            debug!(case_id, "analysis already running");
            return Ok(StartOutcome::AlreadyRunning { progress });
        }

        let case = self
            .store
            .get_case(case_id)
            .await?
            .ok_or_else(|| AnalysisError::CaseNotFound(case_id.to_string()))?;

        let mut windows: Vec<Window> = Vec::new();
        for file in &case.files {
            let messages = self.store.list_messages(&file.id).await?;
            let first_index = windows.len();
            windows.extend(self.settings.plan.windows(&file.id, &messages, first_index));
        }
        if windows.is_empty() {
            return Err(AnalysisError::NothingToAnalyze(case_id.to_string()).into());
        }

        let run_id = Uuid::new_v4().to_string();
        if !self.store.begin_run(case_id, &run_id, options.force).await? {
            let progress = match self.live_progress(case_id).await {
                Some(progress) => progress,
                None => self
                    .store
                    .get_case(case_id)
                    .await?
                    .map(|case| stored_progress(&case))
                    .ok_or_else(|| AnalysisError::CaseNotFound(case_id.to_string()))?,
            };
            debug!(case_id, "case already claimed by another run");
            return Ok(StartOutcome::AlreadyRunning { progress });
        }
        if options.force && case.status == CaseStatus::Analyzing {
            warn!(
                case_id,
                stale_run_id = ?case.last_run_id,
                "taking over a run left analyzing"
            );
        }
        if options.reset_findings {
            self.store.clear_findings(case_id).await?;
        }

        let total = windows.len();
        let (progress_tx, progress_rx) = watch::channel(AnalysisProgress::started(&run_id, total));
        let cancel = CancellationToken::new();

        let run = Run {
            case_id: case_id.to_string(),
            run_id: run_id.clone(),
            store: self.store.clone(),
            local: self.local.clone(),
            cloud: self.cloud.clone(),
            routing: self.settings.routing,
            local_slots: self.local_slots.clone(),
            cloud_slots: self.cloud_slots.clone(),
            cancel: cancel.clone(),
        };
        info!(
            case_id,
            run_id = %run_id,
            windows = total,
            reset_findings = options.reset_findings,
            "analysis started"
        );

        let mut runs = self.runs.lock().await;
        self.prune_settled(&mut runs);
        runs.insert(
            case_id.to_string(),
            RunHandle {
                progress: progress_rx,
                cancel,
                started_at: Instant::now(),
            },
        );
        drop(runs);

        tokio::spawn(run.execute(windows, progress_tx));
        Ok(StartOutcome::Started { run_id, total })
    }

    /// Snapshot of a run live in this analyzer.
    async fn live_progress(&self, case_id: &str) -> Option<AnalysisProgress> {
        let runs = self.runs.lock().await;
        let handle = runs.get(case_id)?;
        match transition(handle.state(), JobEvent::Start) {
            Transition::Rejected { .. } => Some(handle.progress.borrow().clone()),
            Transition::Moved { .. } => None,
        }
    }

    /// Forget settled runs past the retention window.
    fn prune_settled(&self, runs: &mut HashMap<String, RunHandle>) {
        let retention = self.settings.settled_retention;
        runs.retain(|_, h| {
            h.state() == JobState::Analyzing || h.started_at.elapsed() < retention
        });
    }

    /// Snapshot of the case's latest run, or `None` if no run of it is
    /// tracked by this analyzer.
    pub async fn progress(&self, case_id: &str) -> Option<AnalysisProgress> {
        let runs = self.runs.lock().await;
        runs.get(case_id).map(|h| h.progress.borrow().clone())
    }

    /// Progress of the case's current run wherever it runs.
    ///
    /// Prefers this analyzer's own record. Falls back to the store's status
    /// when the run was started elsewhere or its handle has been pruned.
    /// `None` means the case does not exist.
    pub async fn snapshot(&self, case_id: &str) -> Result<Option<AnalysisProgress>> {
        let tracked = {
            let runs = self.runs.lock().await;
            runs.get(case_id)
                .map(|h| (h.state(), h.run_id(), h.progress.borrow().clone()))
        };
        if let Some((JobState::Analyzing, _, progress)) = &tracked {
            return Ok(Some(progress.clone()));
        }

        let Some(case) = self.store.get_case(case_id).await? else {
            return Ok(None);
        };
        match tracked {
            Some((_, run_id, progress)) if run_id == case.last_run_id => Ok(Some(progress)),
            _ => Ok(Some(stored_progress(&case))),
        }
    }

    /// Stream of progress snapshots for the case's latest run.
    pub async fn subscribe(&self, case_id: &str) -> Option<watch::Receiver<AnalysisProgress>> {
        let runs = self.runs.lock().await;
        runs.get(case_id).map(|h| h.progress.clone())
    }

    /// Wait until the case's latest run leaves `analyzing`.
    pub async fn wait(&self, case_id: &str) -> Option<AnalysisProgress> {
        let mut rx = self.subscribe(case_id).await?;
        let settled = rx
            .wait_for(|p| p.status != JobState::Analyzing)
            .await
            .map(|p| p.clone());
        Some(settled.unwrap_or_else(|_| rx.borrow().clone()))
    }

    /// Request cancellation of a live run. Returns `false` when nothing was
    /// running.
    pub async fn cancel(&self, case_id: &str) -> bool {
        let runs = self.runs.lock().await;
        match runs.get(case_id) {
            Some(handle) if handle.state() == JobState::Analyzing => {
                info!(case_id, "analysis cancel requested");
                handle.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Delete a case, cancelling its run and dropping its progress record.
    pub async fn delete_case(&self, case_id: &str) -> Result<bool> {
        if let Some(handle) = self.runs.lock().await.remove(case_id) {
            handle.cancel.cancel();
        }
        let deleted = self.store.delete_case(case_id).await?;
        if deleted {
            info!(case_id, "case deleted");
        }
        Ok(deleted)
    }
}

// ============ Run task ============

/// What one window produced.
enum WindowOutcome {
    Analyzed(Vec<Finding>),
    Failed(String),
}

struct WindowResult {
    window_index: usize,
    outcome: WindowOutcome,
}

/// Everything a run task needs, detached from the [`Analyzer`].
#[derive(Clone)]
struct Run {
    case_id: String,
    run_id: String,
    store: Arc<dyn CaseStore>,
    local: Arc<dyn InferenceService>,
    cloud: Option<Arc<dyn InferenceService>>,
    routing: RoutingPolicy,
    local_slots: Arc<Semaphore>,
    cloud_slots: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Run {
    async fn execute(self, windows: Vec<Window>, progress: watch::Sender<AnalysisProgress>) {
        let total = windows.len();
        let (tx, mut rx) = mpsc::channel::<WindowResult>(total.max(1));
        tokio::spawn(self.clone().dispatch(windows, tx));

        let mut run_findings: Vec<Finding> = Vec::new();
        let mut received = 0usize;
        let mut failed = 0usize;
        let mut store_error: Option<anyhow::Error> = None;

        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = rx.recv() => match result {
                    Some(result) => result,
                    None => break,
                },
            };
            received += 1;

            let window_failed = match result.outcome {
                WindowOutcome::Analyzed(findings) => {
                    if let Err(e) = self.store.add_findings(&findings).await {
                        store_error = Some(e);
                        break;
                    }
                    debug!(
                        case_id = %self.case_id,
                        window = result.window_index,
                        findings = findings.len(),
                        "window analyzed"
                    );
                    run_findings.extend(findings);
                    false
                }
                WindowOutcome::Failed(reason) => {
                    warn!(
                        case_id = %self.case_id,
                        window = result.window_index,
                        reason = %reason,
                        "window inference failed"
                    );
                    true
                }
            };
            if window_failed {
                failed += 1;
            }
            progress.send_modify(|p| {
                p.completed += 1;
                if window_failed {
                    p.failed_windows += 1;
                }
            });
        }
        drop(rx);

        let event = if self.cancel.is_cancelled() {
            JobEvent::Cancel
        } else if let Some(e) = &store_error {
            warn!(case_id = %self.case_id, error = %e, "store rejected findings");
            JobEvent::Fail
        } else if received < total {
            warn!(
                case_id = %self.case_id,
                missing = total - received,
                "windows ended without a result"
            );
            if failed + (total - received) == total {
                JobEvent::Fail
            } else {
                JobEvent::Finish
            }
        } else if failed == total {
            JobEvent::Fail
        } else {
            JobEvent::Finish
        };
        // Stops the dispatcher if the run ended on a store error.
        self.cancel.cancel();

        let mut state = transition(JobState::Analyzing, event).state();
        let risk_level = if state == JobState::Complete {
            Some(score_findings(&run_findings).risk_level)
        } else {
            None
        };

        match self
            .store
            .finish_run(&self.case_id, &self.run_id, case_status(state), risk_level)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    case_id = %self.case_id,
                    run_id = %self.run_id,
                    "run was taken over, outcome not recorded"
                );
            }
            Err(e) => match e.downcast_ref::<AnalysisError>() {
                Some(AnalysisError::CaseNotFound(_)) => {
                    debug!(case_id = %self.case_id, "case deleted before run settled");
                }
                _ => {
                    warn!(case_id = %self.case_id, error = %e, "could not record run outcome");
                    state = JobState::Failed;
                }
            },
        }

        progress.send_modify(|p| p.status = state);
        info!(
            case_id = %self.case_id,
            run_id = %self.run_id,
            status = %state,
            windows = total,
            failed_windows = failed,
            findings = run_findings.len(),
            risk_level = ?risk_level,
            "analysis finished"
        );
    }

    async fn dispatch(self, windows: Vec<Window>, tx: mpsc::Sender<WindowResult>) {
        for window in windows {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = self.local_slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let consent = match self.store.cloud_consent(&self.case_id).await {
                Ok(Some(consent)) => consent,
                Ok(None) => {
                    debug!(case_id = %self.case_id, "case gone, stopping dispatch");
                    self.cancel.cancel();
                    break;
                }
                Err(e) => {
                    warn!(case_id = %self.case_id, error = %e, "could not read cloud consent");
                    false
                }
            };
            if self.cancel.is_cancelled() {
                break;
            }

            let run = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let window_index = window.index;
                let outcome = run.process_window(&window, consent, permit).await;
                // The collector is gone once the run is cancelled.
                let _ = tx
                    .send(WindowResult {
                        window_index,
                        outcome,
                    })
                    .await;
            });
        }
    }

    async fn process_window(
        &self,
        window: &Window,
        consent: bool,
        local_permit: OwnedSemaphorePermit,
    ) -> WindowOutcome {
        let local = self.local.infer(window, InferenceSource::Local).await;
        drop(local_permit);

        if let Err(e) = &local {
            debug!(case_id = %self.case_id, window = window.index, error = %e, "local inference failed");
        }
        let decision = self
            .routing
            .decide(local.as_ref().ok().map(|o| o.confidence), consent);

        let (output, source, reduced_confidence) = match decision {
            RouteDecision::AcceptLocal => (local, InferenceSource::Local, false),
            RouteDecision::ConsentRequired => (local, InferenceSource::Local, true),
            RouteDecision::EscalateCloud => match self.escalate(window).await {
                Ok(output) => (Ok(output), InferenceSource::Cloud, false),
                Err(reason) => {
                    warn!(
                        case_id = %self.case_id,
                        window = window.index,
                        reason = %reason,
                        "cloud escalation failed, keeping local output"
                    );
                    (local, InferenceSource::Local, true)
                }
            },
        };

        match output {
            Ok(output) => {
                let provenance = Provenance {
                    case_id: self.case_id.clone(),
                    run_id: self.run_id.clone(),
                    source,
                    reduced_confidence,
                    created_at: chrono::Utc::now().to_rfc3339(),
                };
                WindowOutcome::Analyzed(classify(window, &output, &provenance))
            }
            Err(e) => WindowOutcome::Failed(e.to_string()),
        }
    }

    async fn escalate(&self, window: &Window) -> Result<InferenceOutput, String> {
        let cloud = self
            .cloud
            .as_ref()
            .ok_or_else(|| "cloud inference provider is disabled".to_string())?;
        let _permit = self
            .cloud_slots
            .acquire()
            .await
            .map_err(|e| e.to_string())?;
        debug!(case_id = %self.case_id, window = window.index, source = "cloud", "escalating window");
        cloud
            .infer(window, InferenceSource::Cloud)
            .await
            .map_err(|e| e.to_string())
    }
}

// ============ CLI ============

/// `analyst analyze <case>`: run one analysis in-process and wait for it.
pub async fn run_analyze(
    config: &Config,
    case_id: &str,
    options: AnalyzeOptions,
    mode: ProgressMode,
) -> Result<()> {
    let sqlite = crate::db::open_store(config).await?;
    let pool = sqlite.pool().clone();
    let store: Arc<dyn CaseStore> = Arc::new(sqlite);
    let analyzer = Analyzer::from_config(config, store)?;
    let reporter = mode.reporter();

    let outcome = analyzer.start(case_id, options).await;
    let (run_id, total) = match outcome {
        Ok(StartOutcome::Started { run_id, total }) => (run_id, total),
        Ok(StartOutcome::AlreadyRunning { .. }) => {
            pool.close().await;
            anyhow::bail!(
                "case {} is already being analyzed (use --force if that run is stale)",
                case_id
            );
        }
        Err(e) => {
            pool.close().await;
            return Err(e);
        }
    };

    let mut final_progress = None;
    if let Some(mut rx) = analyzer.subscribe(case_id).await {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            reporter.report(case_id, &snapshot);
            if snapshot.status != JobState::Analyzing {
                final_progress = Some(snapshot);
                break;
            }
            if rx.changed().await.is_err() {
                final_progress = Some(rx.borrow().clone());
                break;
            }
        }
    }

    let case = analyzer.store().get_case(case_id).await;
    pool.close().await;
    let case = case?;

    let progress = final_progress.unwrap_or_else(AnalysisProgress::idle);
    println!("analyze {}", case_id);
    println!("  run: {}", run_id);
    println!("  windows: {} ({} failed)", total, progress.failed_windows);
    if let Some(case) = &case {
        println!("  findings: {}", case.current_findings().len());
        if let Some(risk) = case.risk_level {
            println!("  risk level: {}", risk);
        }
    }
    println!("  status: {}", progress.status);

    match progress.status {
        JobState::Complete => {
            println!("ok");
            Ok(())
        }
        status => anyhow::bail!("analysis ended {}", status),
    }
}
