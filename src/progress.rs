//! Analysis progress reporting for the CLI.
//!
//! `analyst analyze` runs the orchestrator in-process and prints a line
//! per progress change so users see how many windows are done and how many
//! failed. Progress is emitted on **stderr** so stdout stays parseable.

use std::io::Write;

use doc_analyst_core::models::AnalysisProgress;

/// Reports analysis progress. Implementations write to stderr (human or JSON).
pub trait AnalysisProgressReporter: Send + Sync {
    /// Emit one progress snapshot for `case_id`.
    fn report(&self, case_id: &str, progress: &AnalysisProgress);
}

/// Human-friendly progress: "analyze <case>  analyzing  3 / 10 windows".
pub struct StderrProgress;

impl AnalysisProgressReporter for StderrProgress {
    fn report(&self, case_id: &str, progress: &AnalysisProgress) {
        let mut line = format!(
            "analyze {}  {}  {} / {} windows",
            case_id,
            progress.status,
            format_number(progress.completed as u64),
            format_number(progress.total as u64)
        );
        if progress.failed_windows > 0 {
            line.push_str(&format!(" ({} failed)", progress.failed_windows));
        }
        line.push('\n');
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl AnalysisProgressReporter for JsonProgress {
    fn report(&self, case_id: &str, progress: &AnalysisProgress) {
        let obj = serde_json::json!({
            "event": "progress",
            "case_id": case_id,
            "run_id": progress.run_id,
            "status": progress.status,
            "completed": progress.completed,
            "total": progress.total,
            "failed_windows": progress.failed_windows,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl AnalysisProgressReporter for NoProgress {
    fn report(&self, _case_id: &str, _progress: &AnalysisProgress) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn AnalysisProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
