//! Per-case analysis job state machine.
//!
//! The legal moves are enumerated in [`transition`]; any other
//! `(state, event)` pair is a defined no-op that reports the current state.

use serde::Serialize;

use crate::models::{AnalysisProgress, Case, CaseStatus, JobState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEvent {
    Start,
    Finish,
    Fail,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Moved { from: JobState, to: JobState },
    Rejected { current: JobState },
}

impl Transition {
    /// The state after applying the transition.
    pub fn state(&self) -> JobState {
        match *self {
            Transition::Moved { to, .. } => to,
            Transition::Rejected { current } => current,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Transition::Rejected { .. })
    }
}

pub fn transition(state: JobState, event: JobEvent) -> Transition {
    use JobEvent::*;
    use JobState::*;

    let to = match (state, event) {
        (Idle | Complete | Failed | Cancelled, Start) => Analyzing,
        (Analyzing, Finish) => Complete,
        (Analyzing, Fail) => Failed,
        (Analyzing, Cancel) => Cancelled,
        (current, _) => return Transition::Rejected { current },
    };
    Transition::Moved { from: state, to }
}

pub fn is_terminal(state: JobState) -> bool {
    matches!(
        state,
        JobState::Complete | JobState::Failed | JobState::Cancelled
    )
}

/// The case status a job state is persisted as. A cancelled run leaves
/// the case `failed`.
pub fn case_status(state: JobState) -> CaseStatus {
    match state {
        JobState::Idle => CaseStatus::Open,
        JobState::Analyzing => CaseStatus::Analyzing,
        JobState::Complete => CaseStatus::Complete,
        JobState::Failed | JobState::Cancelled => CaseStatus::Failed,
    }
}

/// Progress as far as the store can tell it, for a run this process does
/// not track. Window counts are unknown and reported as zero.
pub fn stored_progress(case: &Case) -> AnalysisProgress {
    let status = match case.status {
        CaseStatus::Open => JobState::Idle,
        CaseStatus::Analyzing => JobState::Analyzing,
        CaseStatus::Complete => JobState::Complete,
        CaseStatus::Failed => JobState::Failed,
    };
    AnalysisProgress {
        run_id: case.last_run_id.clone(),
        status,
        ..AnalysisProgress::idle()
    }
}
