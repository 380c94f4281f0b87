//! Forensic report synthesis and tamper evidence.
//!
//! [`synthesize`] renders a deterministic markdown report from a case's
//! current findings and STIM scores. The SHA-256 of the markdown bytes is
//! the report's integrity hash; [`Report::artifact`] appends it as a
//! trailer line and [`verify_artifact`] checks an exported copy.
//!
//! The body contains no wall-clock time, so identical input always yields
//! byte-identical markdown.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::error::AnalysisError;
use crate::models::{CaseFile, Finding, FindingCategory, InferenceSource, Pillar, Report};
use crate::scoring::{pillar_rating, StimScores};

/// Prefix of the trailer line carrying the integrity hash.
pub const TRAILER_PREFIX: &str = "Integrity-Hash (SHA-256): ";

const DISCLAIMER: &str = "*This report was generated by the Confidential Document Analyst using the \
Sheffield STIM Matrix methodology. It is intended as a preliminary analysis aid and should not \
replace professional legal advice.*";

/// Everything the synthesizer needs.
#[derive(Debug, Clone)]
pub struct ReportInput {
    pub case_id: String,
    pub case_name: String,
    pub files: Vec<CaseFile>,
    /// Current findings (the latest run only).
    pub findings: Vec<Finding>,
    pub scores: StimScores,
}

/// Hex-encoded SHA-256 of `markdown`.
pub fn integrity_hash(markdown: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(markdown.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Report {
    /// Markdown followed by the integrity trailer.
    pub fn artifact(&self) -> String {
        format!("{}{}{}\n", self.markdown, TRAILER_PREFIX, self.integrity_hash)
    }

    /// Recompute the hash of the stored markdown.
    pub fn verify(&self) -> Result<(), AnalysisError> {
        let computed = integrity_hash(&self.markdown);
        if computed == self.integrity_hash {
            Ok(())
        } else {
            Err(AnalysisError::IntegrityMismatch {
                stored: self.integrity_hash.clone(),
                computed,
            })
        }
    }
}

/// Verify an exported artifact. Returns the confirmed hash.
pub fn verify_artifact(artifact: &str) -> Result<String, AnalysisError> {
    let trimmed = artifact.strip_suffix('\n').unwrap_or(artifact);
    let split = trimmed.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let (markdown, trailer) = trimmed.split_at(split);
    let computed = integrity_hash(markdown);
    let stored = match trailer.strip_prefix(TRAILER_PREFIX) {
        Some(hash) => hash.trim().to_string(),
        None => {
            return Err(AnalysisError::IntegrityMismatch {
                stored: "<missing trailer>".to_string(),
                computed,
            })
        }
    };
    if stored.eq_ignore_ascii_case(&computed) {
        Ok(computed)
    } else {
        Err(AnalysisError::IntegrityMismatch { stored, computed })
    }
}

/// Canonical finding order: severity desc, then window, ordinal and id.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        (Reverse(a.severity), a.window_index, a.ordinal, &a.id).cmp(&(
            Reverse(b.severity),
            b.window_index,
            b.ordinal,
            &b.id,
        ))
    });
}

fn category_label(category: FindingCategory) -> &'static str {
    match category {
        FindingCategory::Threat => "Threat / Intimidation",
        FindingCategory::Scam => "Financial Fraud / Scam",
        FindingCategory::Abuse => "Abuse / Control",
        FindingCategory::Pattern => "Behavioural Pattern",
        FindingCategory::TimelineEvent => "Timeline Event",
        FindingCategory::Communication => "Communication Concern",
    }
}

fn category_phrase(category: FindingCategory) -> Option<&'static str> {
    match category {
        FindingCategory::Threat => Some("direct threats or intimidation"),
        FindingCategory::Scam => Some("financial fraud or scam indicators"),
        FindingCategory::Abuse => Some("abusive or controlling behaviour"),
        FindingCategory::Pattern => Some("concerning behavioural patterns"),
        _ => None,
    }
}

fn score_bar(score: u8) -> String {
    let filled = usize::from(score.min(10));
    format!("{}{}", "█".repeat(filled), "░".repeat(10 - filled))
}

/// Escape a value for a markdown table cell.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn processing_method(findings: &[Finding]) -> &'static str {
    if findings.iter().any(|f| f.source == InferenceSource::Cloud) {
        "Hybrid: local on-device inference with consented cloud escalation"
    } else {
        "Local on-device inference (no data exfiltration)"
    }
}

fn risk_label(scores: &StimScores) -> String {
    format!("{}% ({} RISK)", scores.probability, scores.risk_level.as_str().to_uppercase())
}

fn recommended_actions(scores: &StimScores, findings: &[Finding]) -> Vec<&'static str> {
    use crate::models::RiskLevel;

    let mut actions = Vec::new();
    match scores.risk_level {
        RiskLevel::Critical => {
            actions.push(
                "**URGENT:** Refer to law enforcement immediately. Evidence suggests imminent risk \
                 of harm or active exploitation.",
            );
            actions.push(
                "Preserve all original communications as digital evidence (do not modify or \
                 delete source files).",
            );
        }
        RiskLevel::High => {
            actions.push(
                "Escalate to a trained safeguarding professional or legal advisor for further \
                 assessment.",
            );
            actions.push("Preserve all original communications as potential evidence.");
        }
        RiskLevel::Medium | RiskLevel::Low => {}
    }

    let has = |c: FindingCategory| findings.iter().any(|f| f.category == c);
    if has(FindingCategory::Threat) {
        actions.push(
            "Document all threats with timestamps and report to police. Consider emergency \
             safeguarding measures.",
        );
    }
    if has(FindingCategory::Scam) {
        actions.push(
            "Report suspected financial fraud to the relevant financial crime authority. Advise \
             the account holder to freeze any compromised accounts.",
        );
    }
    if has(FindingCategory::Abuse) {
        actions.push(
            "Refer to specialist domestic abuse or exploitation support services (e.g., National \
             Domestic Abuse Helpline, Modern Slavery Helpline).",
        );
    }

    if actions.is_empty() {
        actions.push("Continue monitoring. No immediate escalation required based on current indicators.");
        actions.push("Consider periodic re-analysis if new communications are received.");
    }
    actions
}

/// Render the report for `input`.
pub fn synthesize(input: &ReportInput) -> Report {
    let mut findings = input.findings.clone();
    sort_findings(&mut findings);
    let mut files = input.files.clone();
    files.sort_by(|a, b| (&a.filename, &a.id).cmp(&(&b.filename, &b.id)));
    let file_names: HashMap<&str, &str> = files
        .iter()
        .map(|f| (f.id.as_str(), f.filename.as_str()))
        .collect();
    let scores = &input.scores;
    let all_local = findings.iter().all(|f| f.source == InferenceSource::Local);

    let mut md = String::new();

    // Header
    md.push_str("# PRIVATE & CONFIDENTIAL: FORENSIC ANALYSIS REPORT\n\n");
    md.push_str("| | |\n|---|---|\n");
    let _ = writeln!(md, "| **Case Reference** | {} |", cell(&input.case_name));
    let _ = writeln!(md, "| **Case ID** | {} |", cell(&input.case_id));
    let _ = writeln!(md, "| **STIM Rating** | {} |", risk_label(scores));
    let _ = writeln!(md, "| **Inference** | {} |", processing_method(&findings));
    md.push('\n');

    // 1. Executive summary
    md.push_str("## 1. EXECUTIVE SUMMARY\n\n");
    if findings.is_empty() {
        let _ = writeln!(
            md,
            "Analysis of case \"{}\" found no concerning indicators across {} file(s). \
             STIM probability: {}.",
            input.case_name,
            files.len(),
            risk_label(scores)
        );
    } else {
        let _ = write!(
            md,
            "Analysis of {} file(s) in case \"{}\" identified {} indicator(s) of concern. \
             STIM probability rating: {}.",
            files.len(),
            input.case_name,
            findings.len(),
            risk_label(scores)
        );
        if all_local {
            md.push_str(" All analysis performed on-device.");
        }
        md.push('\n');
    }
    md.push('\n');
    let detected: Vec<&str> = [
        FindingCategory::Threat,
        FindingCategory::Scam,
        FindingCategory::Abuse,
        FindingCategory::Pattern,
    ]
    .into_iter()
    .filter(|c| findings.iter().any(|f| f.category == *c))
    .filter_map(category_phrase)
    .collect();
    if !detected.is_empty() {
        let _ = writeln!(md, "The analysis detected: {}.\n", detected.join(", "));
    }

    // 2. Pillar table
    md.push_str("## 2. STIM ANALYSIS (Sheffield STIM Matrix)\n\n");
    md.push_str("| # | Pillar | Score | Rating |\n|---|--------|-------|--------|\n");
    for (i, (pillar, score)) in scores.pillars.iter().enumerate() {
        let _ = writeln!(
            md,
            "| {} | {} | {} {}/10 | {} |",
            i + 1,
            pillar.title(),
            score_bar(*score),
            score,
            pillar_rating(*score)
        );
    }
    md.push('\n');

    // 3. Key findings
    md.push_str("## 3. KEY FINDINGS\n\n");
    if findings.is_empty() {
        md.push_str("No findings to report.\n\n");
    }
    for (i, f) in findings.iter().enumerate() {
        let pillars = if f.pillars.is_empty() {
            "General".to_string()
        } else {
            f.pillars
                .iter()
                .map(Pillar::short)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut line = format!(
            "**Finding {}**: {} | Risk: **{}** | Pillars: {} | Source: _{}_",
            i + 1,
            category_label(f.category),
            f.severity.as_str().to_uppercase(),
            pillars,
            file_names.get(f.file_id.as_str()).copied().unwrap_or("unknown")
        );
        if f.reduced_confidence {
            line.push_str(" | Reduced confidence");
        }
        let _ = writeln!(md, "{}", line);
        match &f.quote {
            Some(q) => {
                for (j, part) in q.lines().enumerate() {
                    if j == 0 {
                        let _ = write!(md, "> \"{}", part);
                    } else {
                        let _ = write!(md, "\n> {}", part);
                    }
                }
                md.push_str("\"\n\n");
            }
            None => md.push_str("> _No verbatim quote retained._\n\n"),
        }
    }

    // 4. Chain of custody
    md.push_str("## 4. CHAIN OF CUSTODY\n\n");
    md.push_str("| | |\n|---|---|\n");
    let names: Vec<String> = files.iter().map(|f| cell(&f.filename)).collect();
    let _ = writeln!(
        md,
        "| **Source Data** | {} file(s): {} |",
        files.len(),
        names.join(", ")
    );
    for f in &files {
        let _ = writeln!(
            md,
            "| {} | {}, {} message(s) |",
            cell(&f.filename),
            f.format,
            f.message_count
        );
    }
    let _ = writeln!(md, "| **Processing** | {} |", processing_method(&findings));
    let _ = writeln!(md, "| **Findings** | {} indicator(s) extracted |", findings.len());
    let reduced = findings.iter().filter(|f| f.reduced_confidence).count();
    if reduced > 0 {
        let _ = writeln!(
            md,
            "| **Reduced Confidence** | {} finding(s) kept local without cloud consent |",
            reduced
        );
    }
    md.push('\n');

    // 5. Recommended actions
    md.push_str("## 5. RECOMMENDED ACTIONS\n\n");
    for (i, action) in recommended_actions(scores, &findings).iter().enumerate() {
        let _ = writeln!(md, "{}. {}", i + 1, action);
    }
    md.push('\n');

    // Appendix
    md.push_str("---\n\n## APPENDIX: DETAILED ANALYSIS\n\n");
    md.push_str(
        "*Model elaborations for each finding. These are raw analytical outputs and may contain \
         imprecise language.*\n\n",
    );
    for (i, f) in findings.iter().enumerate() {
        let _ = writeln!(md, "### A{}. {}\n", i + 1, category_label(f.category));
        if let Some(q) = &f.quote {
            let _ = writeln!(md, "**Evidence:** \"{}\"\n", q.replace('\n', " "));
        }
        let _ = writeln!(md, "{}\n", f.explanation);
    }

    md.push_str("---\n\n");
    md.push_str(DISCLAIMER);
    md.push('\n');

    let integrity_hash = integrity_hash(&md);
    Report {
        case_id: input.case_id.clone(),
        markdown: md,
        integrity_hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileFormat, Severity};
    use crate::scoring::score_findings;
    use std::collections::BTreeSet;

    fn finding(id: &str, window: usize, severity: Severity) -> Finding {
        Finding {
            id: id.into(),
            case_id: "case-1".into(),
            file_id: "file-1".into(),
            run_id: "run".into(),
            window_index: window,
            ordinal: 0,
            category: FindingCategory::Abuse,
            severity,
            source: InferenceSource::Local,
            reduced_confidence: false,
            quote: Some("you must obey".into()),
            explanation: "Direct demand for obedience.".into(),
            pillars: [Pillar::Control].into_iter().collect::<BTreeSet<_>>(),
            created_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    fn input(findings: Vec<Finding>) -> ReportInput {
        let scores = score_findings(&findings);
        ReportInput {
            case_id: "case-1".into(),
            case_name: "Case | One".into(),
            files: vec![CaseFile {
                id: "file-1".into(),
                case_id: "case-1".into(),
                filename: "chat.txt".into(),
                format: FileFormat::Whatsapp,
                message_count: 8,
                preview: "A: hi".into(),
                created_at: "2024-01-01T00:00:00Z".into(),
            }],
            findings,
            scores,
        }
    }

    #[test]
    fn identical_input_gives_identical_report() {
        let a = synthesize(&input(vec![finding("a", 0, Severity::High)]));
        let b = synthesize(&input(vec![finding("a", 0, Severity::High)]));
        assert_eq!(a, b);
        assert_eq!(a.integrity_hash, integrity_hash(&a.markdown));
    }

    #[test]
    fn input_order_does_not_matter() {
        let x = finding("x", 0, Severity::Low);
        let y = finding("y", 1, Severity::Critical);
        let a = synthesize(&input(vec![x.clone(), y.clone()]));
        let b = synthesize(&input(vec![y, x]));
        assert_eq!(a.integrity_hash, b.integrity_hash);
        let first = a.markdown.find("Risk: **CRITICAL**").unwrap();
        let second = a.markdown.find("Risk: **LOW**").unwrap();
        assert!(first < second);
    }

    #[test]
    fn changing_a_severity_changes_the_hash() {
        let a = synthesize(&input(vec![finding("a", 0, Severity::High)]));
        let b = synthesize(&input(vec![finding("a", 0, Severity::Medium)]));
        assert_ne!(a.integrity_hash, b.integrity_hash);
    }

    #[test]
    fn artifact_round_trips_and_detects_tampering() {
        let report = synthesize(&input(vec![finding("a", 0, Severity::High)]));
        let artifact = report.artifact();
        assert_eq!(verify_artifact(&artifact).unwrap(), report.integrity_hash);

        let tampered = artifact.replace("Risk: **HIGH**", "Risk: **LOW**");
        assert!(matches!(
            verify_artifact(&tampered),
            Err(AnalysisError::IntegrityMismatch { .. })
        ));
        assert!(verify_artifact(&report.markdown).is_err());
    }

    #[test]
    fn stored_report_verification() {
        let mut report = synthesize(&input(vec![]));
        assert!(report.verify().is_ok());
        report.markdown.push('x');
        assert!(report.verify().is_err());
    }

    #[test]
    fn sections_appear_in_order_and_cells_are_escaped() {
        let md = synthesize(&input(vec![finding("a", 0, Severity::High)])).markdown;
        let order = [
            "## 1. EXECUTIVE SUMMARY",
            "## 2. STIM ANALYSIS",
            "## 3. KEY FINDINGS",
            "## 4. CHAIN OF CUSTODY",
            "## 5. RECOMMENDED ACTIONS",
            "## APPENDIX",
        ];
        let positions: Vec<usize> = order.iter().map(|h| md.find(h).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(md.contains("| **Case Reference** | Case \\| One |"));
        assert!(md.contains("> \"you must obey\""));
        assert!(md.contains("Third-Party Control | ████░░░░░░ 4/10 | MEDIUM"));
    }

    #[test]
    fn empty_case_recommends_monitoring() {
        let md = synthesize(&input(vec![])).markdown;
        assert!(md.contains("No findings to report."));
        assert!(md.contains("1. Continue monitoring."));
        assert!(md.contains("0% (LOW RISK)"));
    }
}
