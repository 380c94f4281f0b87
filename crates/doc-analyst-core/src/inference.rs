//! Inference collaborator contract.
//!
//! The pipeline treats the model runtime as an opaque service: it receives
//! one [`Window`] plus the tier to use and returns an [`InferenceOutput`].
//! Concrete HTTP clients live in the app crate.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{FindingCategory, InferenceSource, Severity, Window};

/// Instruction sent with every window.
pub const FORENSIC_INSTRUCTION: &str = "You are a forensic analyst reviewing communications for trafficking and exploitation risk \
using the STIM framework. Evaluate four indicators: \
1) Language-based vulnerability (grooming, flattery, false promises, emotional manipulation), \
2) Third-party control (instructions, demands, restricting movement), \
3) Psychological isolation (cutting off support networks, secrecy), \
4) Financial coercion (debt traps, withholding pay, threats over money). \
Quote the exact concerning text and explain which STIM indicator it triggers. \
Reply with a single JSON object: {\"category\": \"threat|scam|abuse|pattern|timeline_event|communication\", \
\"severity\": \"low|medium|high|critical\", \"quote\": \"...\", \"rationale\": \"...\", \
\"confidence\": 0.0-1.0, \"no_findings\": false}. Set no_findings to true when nothing is concerning.";

/// Structured output of one inference call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InferenceOutput {
    pub category: Option<FindingCategory>,
    pub severity_hint: Option<Severity>,
    pub rationale: String,
    pub quote: Option<String>,
    /// Self-reported confidence in `[0, 1]`.
    pub confidence: f64,
    /// The model explicitly reported nothing concerning.
    pub no_findings: bool,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    /// Transient: network failure, timeout, 429 or 5xx after retries.
    #[error("inference unavailable: {0}")]
    Unavailable(String),
    /// The runtime rejected the request (4xx other than 429).
    #[error("inference request rejected: {0}")]
    Rejected(String),
    #[error("malformed inference response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Short identifier used in logs and the report's processing method.
    fn name(&self) -> &str;

    async fn infer(
        &self,
        window: &Window,
        mode: InferenceSource,
    ) -> Result<InferenceOutput, InferenceError>;
}

/// User prompt for a window.
pub fn build_prompt(window: &Window) -> String {
    format!(
        "Analyse this conversation for trafficking and exploitation risk.\n\n{}",
        window.render()
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelReply {
    category: Option<String>,
    #[serde(alias = "severity_hint")]
    severity: Option<String>,
    #[serde(alias = "explanation")]
    rationale: Option<String>,
    quote: Option<String>,
    confidence: Option<f64>,
    no_findings: Option<bool>,
}

/// Interpret a raw model reply.
///
/// The first balanced JSON object in the reply is read as structured
/// output. Replies without one are treated as free-text rationale with
/// `default_confidence`. Unknown category or severity labels are dropped
/// rather than rejected.
pub fn parse_model_reply(raw: &str, default_confidence: f64) -> InferenceOutput {
    let reply = first_json_object(raw).and_then(|obj| serde_json::from_str::<ModelReply>(obj).ok());
    match reply {
        Some(r) => InferenceOutput {
            category: r.category.as_deref().and_then(parse_category),
            severity_hint: r
                .severity
                .as_deref()
                .and_then(|s| s.trim().to_ascii_lowercase().parse().ok()),
            rationale: r.rationale.unwrap_or_default(),
            quote: r.quote.filter(|q| !q.trim().is_empty()),
            confidence: r.confidence.unwrap_or(default_confidence).clamp(0.0, 1.0),
            no_findings: r.no_findings.unwrap_or(false),
        },
        None => InferenceOutput {
            rationale: raw.trim().to_string(),
            confidence: default_confidence.clamp(0.0, 1.0),
            ..InferenceOutput::default()
        },
    }
}

fn parse_category(label: &str) -> Option<FindingCategory> {
    label
        .trim()
        .to_ascii_lowercase()
        .replace([' ', '-'], "_")
        .parse()
        .ok()
}

/// Slice of the first `{...}` object, honouring JSON string escapes.
fn first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
