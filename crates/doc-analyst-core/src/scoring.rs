//! STIM scoring engine.
//!
//! Each pillar scores `min(10, Σ weight)` over the findings tagging it.
//! The overall probability is the pillar total as a percentage of 40,
//! rounded half up, and is bucketed into a [`RiskLevel`].

use serde::Serialize;

use crate::models::{Finding, Pillar, RiskLevel, Severity};

pub const MAX_PILLAR_SCORE: u8 = 10;

pub fn severity_weight(severity: Severity) -> u32 {
    match severity {
        Severity::Low => 1,
        Severity::Medium => 2,
        Severity::High => 4,
        Severity::Critical => 6,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StimScores {
    /// One entry per pillar, in pillar order.
    pub pillars: Vec<(Pillar, u8)>,
    /// Overall probability, 0–100.
    pub probability: u8,
    pub risk_level: RiskLevel,
}

impl StimScores {
    pub fn pillar(&self, pillar: Pillar) -> u8 {
        self.pillars
            .iter()
            .find(|(p, _)| *p == pillar)
            .map(|(_, s)| *s)
            .unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.pillars.iter().map(|(_, s)| u32::from(*s)).sum()
    }
}

/// Score a set of findings. Order-independent.
pub fn score_findings(findings: &[Finding]) -> StimScores {
    let pillars: Vec<(Pillar, u8)> = Pillar::ALL
        .iter()
        .map(|&pillar| {
            let raw: u32 = findings
                .iter()
                .filter(|f| f.pillars.contains(&pillar))
                .map(|f| severity_weight(f.severity))
                .sum();
            (pillar, raw.min(u32::from(MAX_PILLAR_SCORE)) as u8)
        })
        .collect();
    let total: u32 = pillars.iter().map(|(_, s)| u32::from(*s)).sum();
    let probability = probability(total);
    StimScores {
        pillars,
        probability,
        risk_level: bucket(probability),
    }
}

/// `round_half_up(total * 100 / 40)`, capped at 100.
pub fn probability(total: u32) -> u8 {
    ((total * 100 + 20) / 40).min(100) as u8
}

pub fn bucket(probability: u8) -> RiskLevel {
    match probability {
        p if p >= 70 => RiskLevel::Critical,
        p if p >= 50 => RiskLevel::High,
        p if p >= 30 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

/// Per-pillar rating shown in the report table.
pub fn pillar_rating(score: u8) -> &'static str {
    match score {
        s if s >= 7 => "CRITICAL",
        s if s >= 5 => "HIGH",
        s if s >= 3 => "MEDIUM",
        _ => "LOW",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FindingCategory, InferenceSource};
    use std::collections::BTreeSet;

    fn finding(severity: Severity, pillars: &[Pillar]) -> Finding {
        Finding {
            id: "f".into(),
            case_id: "c".into(),
            file_id: "file".into(),
            run_id: "r".into(),
            window_index: 0,
            ordinal: 0,
            category: FindingCategory::Abuse,
            severity,
            source: InferenceSource::Local,
            reduced_confidence: false,
            quote: None,
            explanation: "x".into(),
            pillars: pillars.iter().copied().collect::<BTreeSet<_>>(),
            created_at: String::new(),
        }
    }

    #[test]
    fn bucket_cutpoints() {
        assert_eq!(bucket(69), RiskLevel::High);
        assert_eq!(bucket(70), RiskLevel::Critical);
        assert_eq!(bucket(49), RiskLevel::Medium);
        assert_eq!(bucket(50), RiskLevel::High);
        assert_eq!(bucket(29), RiskLevel::Low);
        assert_eq!(bucket(30), RiskLevel::Medium);
    }

    #[test]
    fn probability_rounds_half_up() {
        assert_eq!(probability(0), 0);
        assert_eq!(probability(1), 3); // 2.5
        assert_eq!(probability(3), 8); // 7.5
        assert_eq!(probability(12), 30);
        assert_eq!(probability(40), 100);
    }

    #[test]
    fn pillar_scores_saturate_at_ten() {
        let findings = vec![
            finding(Severity::Critical, &[Pillar::Financial]),
            finding(Severity::Critical, &[Pillar::Financial]),
        ];
        let s = score_findings(&findings);
        assert_eq!(s.pillar(Pillar::Financial), 10);
        assert_eq!(s.pillar(Pillar::Control), 0);
        assert_eq!(s.probability, 25);
        assert_eq!(s.risk_level, RiskLevel::Low);
    }

    #[test]
    fn single_critical_on_two_pillars_is_medium() {
        let s = score_findings(&[finding(
            Severity::Critical,
            &[Pillar::Control, Pillar::Isolation],
        )]);
        assert_eq!(s.pillar(Pillar::Control), 6);
        assert_eq!(s.pillar(Pillar::Isolation), 6);
        assert_eq!(s.total(), 12);
        assert_eq!(s.probability, 30);
        assert_eq!(s.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn empty_findings_score_zero() {
        let s = score_findings(&[]);
        assert_eq!(s.total(), 0);
        assert_eq!(s.risk_level, RiskLevel::Low);
    }

    #[test]
    fn pillar_ratings() {
        assert_eq!(pillar_rating(7), "CRITICAL");
        assert_eq!(pillar_rating(5), "HIGH");
        assert_eq!(pillar_rating(3), "MEDIUM");
        assert_eq!(pillar_rating(2), "LOW");
    }
}
