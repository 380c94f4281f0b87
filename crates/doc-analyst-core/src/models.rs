//! Core data models shared by the analysis pipeline.
//!
//! Every enum carries a stable snake_case label (used for serde, SQLite
//! columns and report text) via [`as_str`](CaseStatus::as_str) and
//! [`FromStr`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// All variants in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok($name::$variant),)+
                    other => Err(format!("unknown {}: '{}'", stringify!($name), other)),
                }
            }
        }
    };
}

labelled_enum! {
    /// Lifecycle status of a case as persisted by the case store.
    pub enum CaseStatus {
        Open => "open",
        Analyzing => "analyzing",
        Complete => "complete",
        Failed => "failed",
    }
}

labelled_enum! {
    /// Overall risk bucket, derived from the STIM probability.
    pub enum RiskLevel {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

labelled_enum! {
    /// Format variant detected by the ingestion layer.
    pub enum FileFormat {
        Whatsapp => "whatsapp",
        Email => "email",
        Pdf => "pdf",
        Imessage => "imessage",
        Transcript => "transcript",
        PlainText => "plain_text",
    }
}

labelled_enum! {
    pub enum FindingCategory {
        Threat => "threat",
        Scam => "scam",
        Abuse => "abuse",
        Pattern => "pattern",
        TimelineEvent => "timeline_event",
        Communication => "communication",
    }
}

labelled_enum! {
    /// Finding severity. Variants are ordered, so `max` picks the worst.
    pub enum Severity {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
}

labelled_enum! {
    /// Which inference tier produced a finding (and, as a request, which tier to call).
    pub enum InferenceSource {
        Local => "local",
        Cloud => "cloud",
    }
}

labelled_enum! {
    /// The four STIM risk pillars.
    pub enum Pillar {
        Vulnerability => "vulnerability",
        Control => "control",
        Isolation => "isolation",
        Financial => "financial",
    }
}

labelled_enum! {
    /// State of a per-case analysis job.
    pub enum JobState {
        Idle => "idle",
        Analyzing => "analyzing",
        Complete => "complete",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl Pillar {
    /// Full pillar name as printed in reports.
    pub fn title(&self) -> &'static str {
        match self {
            Pillar::Vulnerability => "Language-Based Vulnerability",
            Pillar::Control => "Third-Party Control",
            Pillar::Isolation => "Psychological Isolation",
            Pillar::Financial => "Financial Coercion",
        }
    }

    /// Short label used in finding lines.
    pub fn short(&self) -> &'static str {
        match self {
            Pillar::Vulnerability => "Vulnerability",
            Pillar::Control => "Control",
            Pillar::Isolation => "Isolation",
            Pillar::Financial => "Financial",
        }
    }
}

/// A case under analysis, with its files and every finding recorded so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: String,
    pub name: String,
    pub status: CaseStatus,
    /// Present iff `status == Complete`.
    pub risk_level: Option<RiskLevel>,
    pub cloud_consent: bool,
    pub created_at: String,
    /// The run whose findings are current. Older findings are history.
    pub last_run_id: Option<String>,
    pub files: Vec<CaseFile>,
    pub findings: Vec<Finding>,
}

impl Case {
    /// Findings produced by the latest analysis run.
    pub fn current_findings(&self) -> Vec<Finding> {
        match &self.last_run_id {
            Some(run_id) => self
                .findings
                .iter()
                .filter(|f| &f.run_id == run_id)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseFile {
    pub id: String,
    pub case_id: String,
    pub filename: String,
    pub format: FileFormat,
    pub message_count: usize,
    pub preview: String,
    pub created_at: String,
}

/// One normalized message, produced once by ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Position within the originating file's message sequence.
    pub index: usize,
    pub file_id: String,
    pub sender: String,
    pub timestamp: Option<String>,
    pub text: String,
    /// 1-based source line (or paragraph) number; 0 when unknown.
    pub line: usize,
}

/// A bounded, overlapping slice of one file's messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    /// Dispatch position of this window within its analysis run.
    pub index: usize,
    pub file_id: String,
    /// Offset of the first message within the file's sequence.
    pub start: usize,
    pub messages: Vec<Message>,
}

impl Window {
    /// Render the window as `[timestamp] sender: text` lines.
    ///
    /// This is both the text sent to the inference collaborator and the
    /// content a quote must be a substring of.
    pub fn render(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let ts = m
                    .timestamp
                    .as_deref()
                    .map(|t| format!("[{}] ", t))
                    .unwrap_or_default();
                if m.sender.is_empty() {
                    format!("{}{}", ts, m.text)
                } else {
                    format!("{}{}: {}", ts, m.sender, m.text)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Message bodies only, joined by spaces.
    pub fn plain_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A structured, evidenced observation extracted from one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub case_id: String,
    pub file_id: String,
    pub run_id: String,
    pub window_index: usize,
    /// Position of this finding within its window's output.
    pub ordinal: usize,
    pub category: FindingCategory,
    pub severity: Severity,
    pub source: InferenceSource,
    /// Set when the window wanted cloud escalation that did not happen.
    pub reduced_confidence: bool,
    pub quote: Option<String>,
    pub explanation: String,
    pub pillars: BTreeSet<Pillar>,
    pub created_at: String,
}

/// Live progress of one analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisProgress {
    pub run_id: Option<String>,
    pub total: usize,
    pub completed: usize,
    pub failed_windows: usize,
    pub status: JobState,
}

impl AnalysisProgress {
    pub fn idle() -> Self {
        Self {
            run_id: None,
            total: 0,
            completed: 0,
            failed_windows: 0,
            status: JobState::Idle,
        }
    }

    pub fn started(run_id: &str, total: usize) -> Self {
        Self {
            run_id: Some(run_id.to_string()),
            total,
            completed: 0,
            failed_windows: 0,
            status: JobState::Analyzing,
        }
    }
}

/// A synthesized forensic report and its integrity hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub case_id: String,
    pub markdown: String,
    /// Hex-encoded SHA-256 over `markdown`.
    pub integrity_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip_through_from_str() {
        for f in FileFormat::ALL {
            assert_eq!(f.as_str().parse::<FileFormat>().unwrap(), *f);
        }
        assert!("bogus".parse::<Severity>().is_err());
    }

    #[test]
    fn severity_orders_from_low_to_critical() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn serde_uses_snake_case_labels() {
        let json = serde_json::to_string(&FindingCategory::TimelineEvent).unwrap();
        assert_eq!(json, "\"timeline_event\"");
    }

    #[test]
    fn window_render_includes_timestamp_and_sender() {
        let w = Window {
            index: 0,
            file_id: "f".into(),
            start: 0,
            messages: vec![
                Message {
                    index: 0,
                    file_id: "f".into(),
                    sender: "Sam".into(),
                    timestamp: Some("1/2/24, 10:00".into()),
                    text: "hello".into(),
                    line: 1,
                },
                Message {
                    index: 1,
                    file_id: "f".into(),
                    sender: String::new(),
                    timestamp: None,
                    text: "bare line".into(),
                    line: 2,
                },
            ],
        };
        assert_eq!(w.render(), "[1/2/24, 10:00] Sam: hello\nbare line");
        assert_eq!(w.plain_text(), "hello bare line");
    }
}
