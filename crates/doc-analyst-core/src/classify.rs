//! Finding classifier.
//!
//! Turns one window's [`InferenceOutput`] into zero or more [`Finding`]s by
//! cleaning the model rationale and combining the model's own labels with
//! the keyword tables in [`crate::keywords`].

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::inference::InferenceOutput;
use crate::keywords;
use crate::models::{Finding, FindingCategory, InferenceSource, Severity, Window};

const MIN_RATIONALE_CHARS: usize = 20;
const MAX_RATIONALE_CHARS: usize = 500;
/// A sentence seen this many times marks degenerate output.
const REPEAT_LIMIT: usize = 3;
const SENTENCE_KEY_CHARS: usize = 60;
const QUOTE_MARKS: &[char] = &['"', '\'', '“', '”', '‘', '’', '«', '»', '`'];

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("valid regex"));
static THINK_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<think>.*").expect("valid regex"));
static MD_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,4}\s+.*$").expect("valid regex"));
static EMOJI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x{1F300}-\x{1F9FF}\x{2600}-\x{27BF}\x{FE00}-\x{FE0F}\x{1FA00}-\x{1FAFF}]")
        .expect("valid regex")
});
static EMPHASIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*{1,3}([^*]+)\*{1,3}").expect("valid regex"));
static RULE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^-{3,}\s*$").expect("valid regex"));
static NO_CONCERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)no\s+concern|nothing\s+wrong|normal\s+conversation|no\s+red\s+flag|no\s+issue")
        .expect("valid regex")
});

/// Where a window's output came from.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub case_id: String,
    pub run_id: String,
    pub source: InferenceSource,
    pub reduced_confidence: bool,
    pub created_at: String,
}

/// Strip reasoning traces and markdown noise, collapse whitespace and cut
/// degenerate repetition. The result is at most 500 chars.
pub fn clean_rationale(text: &str) -> String {
    let text = THINK_BLOCK.replace_all(text, "");
    let text = THINK_OPEN.replace_all(&text, "");
    let text = MD_HEADER.replace_all(&text, "");
    let text = EMOJI.replace_all(&text, "");
    let text = EMPHASIS.replace_all(&text, "$1");
    let text = RULE.replace_all(&text, "");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut kept: Vec<&str> = Vec::new();
    let mut seen: Vec<(String, usize)> = Vec::new();
    for sentence in split_sentences(&text) {
        let key: String = sentence.to_lowercase().chars().take(SENTENCE_KEY_CHARS).collect();
        let count = match seen.iter_mut().find(|(k, _)| *k == key) {
            Some((_, n)) => {
                *n += 1;
                *n
            }
            None => {
                seen.push((key, 1));
                1
            }
        };
        if count >= REPEAT_LIMIT {
            break;
        }
        kept.push(sentence);
    }
    kept.join(" ").chars().take(MAX_RATIONALE_CHARS).collect::<String>().trim().to_string()
}

/// Split whitespace-collapsed text after `.`, `!` or `?` followed by a space.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | '!' | '?') && bytes.get(i + 1) == Some(&b' ') {
            out.push(&text[start..=i]);
            start = i + 2;
        }
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out.into_iter().filter(|s| !s.trim().is_empty()).collect()
}

/// Whether a cleaned rationale carries no reportable concern.
pub fn is_dismissal(rationale: &str) -> bool {
    rationale.chars().count() < MIN_RATIONALE_CHARS || NO_CONCERN.is_match(rationale)
}

/// A quote counts as evidence only if one message body contains it.
/// Sender labels, timestamps and message boundaries are prompt framing.
fn is_verbatim(window: &Window, quote: &str) -> bool {
    window.messages.iter().any(|m| m.text.contains(quote))
}

/// Classify one window's inference output into findings.
pub fn classify(window: &Window, output: &InferenceOutput, provenance: &Provenance) -> Vec<Finding> {
    if output.no_findings {
        return Vec::new();
    }
    let explanation = clean_rationale(&output.rationale);
    if is_dismissal(&explanation) {
        return Vec::new();
    }

    let window_text = window.plain_text();
    let category = match output.category {
        Some(c) if c != FindingCategory::Communication => c,
        _ => keywords::category_hint(&explanation)
            .or_else(|| keywords::category_hint(&window_text))
            .unwrap_or(FindingCategory::Communication),
    };

    let base = output.severity_hint.unwrap_or(if keywords::mentions_low_severity(&explanation) {
        Severity::Low
    } else {
        Severity::Medium
    });
    let floor = [
        keywords::severity_floor(&window_text),
        keywords::severity_floor(&explanation),
    ]
    .into_iter()
    .flatten()
    .max();
    let severity = floor.map_or(base, |f| base.max(f));

    let quote = output
        .quote
        .as_deref()
        .map(|q| q.trim().trim_matches(QUOTE_MARKS).trim().to_string())
        .filter(|q| !q.is_empty() && is_verbatim(window, q));

    let evidence = format!("{} {}", quote.as_deref().unwrap_or(""), explanation);
    let mut pillars: BTreeSet<_> = keywords::pillar_signals(&evidence).into_iter().collect();
    if pillars.is_empty() {
        pillars.extend(keywords::default_pillars(category).iter().copied());
    }

    vec![Finding {
        id: Uuid::new_v4().to_string(),
        case_id: provenance.case_id.clone(),
        file_id: window.file_id.clone(),
        run_id: provenance.run_id.clone(),
        window_index: window.index,
        ordinal: 0,
        category,
        severity,
        source: provenance.source,
        reduced_confidence: provenance.reduced_confidence,
        quote,
        explanation,
        pillars,
        created_at: provenance.created_at.clone(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, Pillar};

    fn window(lines: &[(&str, &str)]) -> Window {
        Window {
            index: 3,
            file_id: "file".into(),
            start: 0,
            messages: lines
                .iter()
                .enumerate()
                .map(|(i, (s, t))| Message {
                    index: i,
                    file_id: "file".into(),
                    sender: s.to_string(),
                    timestamp: None,
                    text: t.to_string(),
                    line: i + 1,
                })
                .collect(),
        }
    }

    fn prov() -> Provenance {
        Provenance {
            case_id: "case".into(),
            run_id: "run".into(),
            source: InferenceSource::Local,
            reduced_confidence: false,
            created_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    fn output(rationale: &str) -> InferenceOutput {
        InferenceOutput {
            rationale: rationale.into(),
            confidence: 0.9,
            ..InferenceOutput::default()
        }
    }

    #[test]
    fn cleaning_strips_markup_and_reasoning() {
        let raw = "<think>internal notes</think>\n### Assessment\n**Strong** pressure applied.\n---\nSecond   line 🚩.";
        assert_eq!(clean_rationale(raw), "Strong pressure applied. Second line .");
    }

    #[test]
    fn cleaning_cuts_repetition() {
        let raw = "He demands money. He demands money. He demands money. Extra.";
        assert_eq!(clean_rationale(raw), "He demands money. He demands money.");
    }

    #[test]
    fn cleaning_caps_length() {
        let raw = "word ".repeat(300);
        assert!(clean_rationale(&raw).chars().count() <= 500);
    }

    #[test]
    fn short_or_dismissive_rationale_yields_nothing() {
        let w = window(&[("A", "hi")]);
        assert!(classify(&w, &output("Fine."), &prov()).is_empty());
        assert!(classify(&w, &output("There is no concern in this exchange at all."), &prov()).is_empty());
        let mut o = output("The sender demands obedience and cuts contact.");
        o.no_findings = true;
        assert!(classify(&w, &o, &prov()).is_empty());
    }

    #[test]
    fn keyword_floor_raises_model_severity() {
        let w = window(&[("A", "bring your passport tomorrow")]);
        let mut o = output("The sender is arranging a meeting with documents.");
        o.severity_hint = Some(Severity::Low);
        let f = &classify(&w, &o, &prov())[0];
        assert_eq!(f.severity, Severity::High);
    }

    #[test]
    fn model_severity_above_floor_is_kept() {
        let w = window(&[("A", "bring your passport tomorrow")]);
        let mut o = output("The sender is arranging a meeting with documents.");
        o.severity_hint = Some(Severity::Critical);
        assert_eq!(classify(&w, &o, &prov())[0].severity, Severity::Critical);
    }

    #[test]
    fn category_falls_back_to_keywords() {
        let w = window(&[("A", "send the wire today")]);
        let f = &classify(&w, &output("The message pushes for an urgent transfer."), &prov())[0];
        assert_eq!(f.category, FindingCategory::Scam);

        let mut o = output("This is a blackmail attempt against the recipient.");
        o.category = Some(FindingCategory::Communication);
        assert_eq!(classify(&w, &o, &prov())[0].category, FindingCategory::Threat);

        let w = window(&[("A", "see you at noon")]);
        let f = &classify(&w, &output("Logistics are being arranged between them."), &prov())[0];
        assert_eq!(f.category, FindingCategory::Communication);
        assert_eq!(f.severity, Severity::Medium);
        assert!(f.pillars.is_empty());
    }

    #[test]
    fn quote_must_appear_in_window() {
        let w = window(&[("Alex", "you must obey me")]);
        let mut o = output("A direct instruction to comply is given.");
        o.quote = Some("“you must obey me”".into());
        let f = &classify(&w, &o, &prov())[0];
        assert_eq!(f.quote.as_deref(), Some("you must obey me"));
        assert!(f.pillars.contains(&Pillar::Control));

        o.quote = Some("something never said".into());
        assert_eq!(classify(&w, &o, &prov())[0].quote, None);
    }

    #[test]
    fn quote_made_of_prompt_framing_is_dropped() {
        let mut w = window(&[("Alex", "see you at ten"), ("Jordan", "ok")]);
        w.messages[1].timestamp = Some("03/05/2024, 09:01".into());
        assert!(w.render().contains("ten\n[03/05/2024, 09:01] Jordan:"));

        let mut o = output("The sender is arranging a meeting time.");
        for framing in ["ten\n[03/05/2024, 09:01] Jordan:", "Alex:", "Jordan: ok"] {
            o.quote = Some(framing.into());
            assert_eq!(classify(&w, &o, &prov())[0].quote, None, "{:?}", framing);
        }

        o.quote = Some("at ten".into());
        assert_eq!(classify(&w, &o, &prov())[0].quote.as_deref(), Some("at ten"));
    }

    #[test]
    fn pillars_fall_back_to_category_defaults() {
        let w = window(&[("A", "hello")]);
        let mut o = output("Signs of abuse are present in the exchange.");
        o.category = Some(FindingCategory::Abuse);
        let f = &classify(&w, &o, &prov())[0];
        assert_eq!(
            f.pillars.iter().copied().collect::<Vec<_>>(),
            vec![Pillar::Vulnerability, Pillar::Control, Pillar::Isolation]
        );
    }

    #[test]
    fn provenance_is_copied_onto_findings() {
        let w = window(&[("A", "hello")]);
        let p = Provenance {
            source: InferenceSource::Cloud,
            reduced_confidence: true,
            ..prov()
        };
        let f = &classify(&w, &output("Signs of a pattern of pressure emerging."), &p)[0];
        assert_eq!(f.source, InferenceSource::Cloud);
        assert!(f.reduced_confidence);
        assert_eq!(f.window_index, 3);
        assert_eq!(f.file_id, "file");
        assert_eq!(f.run_id, "run");
    }
}
