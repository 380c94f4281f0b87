//! Keyword tables used by the classifier.
//!
//! All lexical heuristics live here as data: category hints, severity
//! floors, low-severity markers and STIM pillar signals. Each row is
//! compiled once into a single case-insensitive alternation.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{FindingCategory, Pillar, Severity};

/// A tag and the patterns that signal it.
pub struct KeywordRule<T> {
    pub tag: T,
    pattern: Regex,
}

impl<T: Copy> KeywordRule<T> {
    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

fn compile<T: Copy>(rows: &[(T, &[&str])]) -> Vec<KeywordRule<T>> {
    rows.iter()
        .map(|(tag, patterns)| KeywordRule {
            tag: *tag,
            pattern: Regex::new(&format!("(?i)(?:{})", patterns.join("|")))
                .expect("valid keyword table"),
        })
        .collect()
}

const CATEGORY_ROWS: &[(FindingCategory, &[&str])] = &[
    (
        FindingCategory::Threat,
        &[
            r"\bthreat", r"\bviolence", r"\bintimid", r"\bharm\b", r"\bkill\b",
            r"\bhurt\b", r"\battack\b", r"\bdanger\b", r"\bblackmail",
            r"\bcoerce\b", r"\bextort",
        ],
    ),
    (
        FindingCategory::Scam,
        &[
            r"\bscam", r"\bfraud", r"\bphish", r"\bmoney\b", r"\binvestment\b",
            r"\bwire\b", r"\badvance.fee", r"\bdecepti", r"\bponzi",
            r"\bfinancial\s+(?:harm|loss|exploit)",
        ],
    ),
    (
        FindingCategory::Abuse,
        &[
            r"\babuse", r"\bcontrol\w*\b", r"\bisolat", r"\bdomestic",
            r"\bcoercive", r"\bmanipulat", r"\bgaslight", r"\bexploit",
            r"\bduress\b", r"\bpower\s+imbalance",
        ],
    ),
    (
        FindingCategory::Pattern,
        &[
            r"\bpattern", r"\bescalat", r"\brepeat", r"\bcycle", r"\bbehavior",
            r"\bdynamic\b", r"\brecurring",
        ],
    ),
];

const SEVERITY_FLOOR_ROWS: &[(Severity, &[&str])] = &[
    (
        Severity::Critical,
        &[r"\bkill\b", r"\bimminent", r"\bweapon", r"\bgun\b", r"\bknife\b"],
    ),
    (
        Severity::High,
        &[
            r"\bcritical", r"\bsevere\b", r"\bdanger\b", r"\bhurt\b", r"\bviolence",
            r"\bextort", r"\bblackmail", r"\bimmedi", r"\bcriminal", r"\bpassport\b",
        ],
    ),
];

const LOW_SEVERITY_PATTERNS: &[&str] = &[r"\bminor\b", r"\bmild\b", r"\bnormal\b", r"\bno concern"];

const PILLAR_ROWS: &[(Pillar, &[&str])] = &[
    (
        Pillar::Vulnerability,
        &[
            r"\btrust me\b", r"\bonly one\b", r"\bspecial\b", r"\bpromise\b",
            r"\bopportunit", r"\bflatter", r"\bgroom", r"\blove\b", r"\bcare about\b",
            r"\bchosen\b", r"\bdeserve\b", r"\bbeautiful\b", r"\btalent",
            r"\bpotential\b", r"\bmentor", r"\bprotect\b", r"\bstunning\b",
            r"\bexclusive\b", r"\bhigh.value\b", r"\bcareer\b", r"\bvulnerab",
            r"\bmanipulat", r"\bexploit",
        ],
    ),
    (
        Pillar::Control,
        &[
            r"\bcontrol\b", r"\bdemand", r"\binstruct", r"\border\b", r"\bmust\b",
            r"\bhave to\b", r"\bpassport\b", r"\btravel\b", r"\bpermission\b",
            r"\brestrict", r"\bcooperat", r"\bobey\b", r"\bdo as\b",
            r"\bdon't question\b", r"\bconfidential\b", r"\bsecret\b",
        ],
    ),
    (
        Pillar::Isolation,
        &[
            r"\bisolat", r"\bdon'?t tell\b", r"\bdelete\b", r"\bsecre",
            r"\bno one\b.*\bunderstand", r"\bonly I\b", r"\bfamily\b",
            r"\bfriends\b", r"\balone\b", r"\bno contact\b", r"\bcut off\b",
            r"\bgaslight", r"\broommate", r"\bdon'?t talk\b", r"\bstay away\b",
        ],
    ),
    (
        Pillar::Financial,
        &[
            r"\bdebt\b", r"\bowe\b", r"\bmoney\b", r"\bpay\b", r"\bwire\b",
            r"\binvest", r"\bfund", r"\bfee\b", r"\bfinancial\b", r"\bexpens",
            r"\bcost\b", r"\btransfer\b", r"\baccount\b", r"\bsalary\b",
            r"\bwithhold", r"\btrap\b",
        ],
    ),
];

/// Category hints, most specific first.
pub static CATEGORY_RULES: Lazy<Vec<KeywordRule<FindingCategory>>> =
    Lazy::new(|| compile(CATEGORY_ROWS));

/// Severity floors, worst first.
pub static SEVERITY_FLOORS: Lazy<Vec<KeywordRule<Severity>>> =
    Lazy::new(|| compile(SEVERITY_FLOOR_ROWS));

static LOW_SEVERITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("(?i)(?:{})", LOW_SEVERITY_PATTERNS.join("|")))
        .expect("valid keyword table")
});

pub static PILLAR_RULES: Lazy<Vec<KeywordRule<Pillar>>> = Lazy::new(|| compile(PILLAR_ROWS));

/// First category whose keywords appear in `text`.
pub fn category_hint(text: &str) -> Option<FindingCategory> {
    CATEGORY_RULES
        .iter()
        .find(|r| r.is_match(text))
        .map(|r| r.tag)
}

/// Highest severity floor triggered by `text`.
pub fn severity_floor(text: &str) -> Option<Severity> {
    SEVERITY_FLOORS
        .iter()
        .filter(|r| r.is_match(text))
        .map(|r| r.tag)
        .max()
}

pub fn mentions_low_severity(text: &str) -> bool {
    LOW_SEVERITY.is_match(text)
}

/// Pillars whose keywords appear in `text`, in pillar order.
pub fn pillar_signals(text: &str) -> Vec<Pillar> {
    PILLAR_RULES
        .iter()
        .filter(|r| r.is_match(text))
        .map(|r| r.tag)
        .collect()
}

/// Pillars a category contributes to when no pillar keyword matched.
pub fn default_pillars(category: FindingCategory) -> &'static [Pillar] {
    match category {
        FindingCategory::Threat => &[Pillar::Control, Pillar::Financial],
        FindingCategory::Scam => &[Pillar::Financial],
        FindingCategory::Abuse => &[Pillar::Vulnerability, Pillar::Control, Pillar::Isolation],
        FindingCategory::Pattern => &[Pillar::Vulnerability, Pillar::Isolation],
        FindingCategory::TimelineEvent | FindingCategory::Communication => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_hint_follows_table_order() {
        assert_eq!(
            category_hint("a threat to wire money"),
            Some(FindingCategory::Threat)
        );
        assert_eq!(category_hint("Wire the MONEY"), Some(FindingCategory::Scam));
        assert_eq!(category_hint("hello"), None);
    }

    #[test]
    fn severity_floor_picks_the_worst_match() {
        assert_eq!(severity_floor("I will kill you, it is a danger"), Some(Severity::Critical));
        assert_eq!(severity_floor("give me your passport"), Some(Severity::High));
        assert_eq!(severity_floor("see you later"), None);
    }

    #[test]
    fn pillar_signals_match_whole_words() {
        assert_eq!(pillar_signals("you must obey"), vec![Pillar::Control]);
        assert_eq!(
            pillar_signals("pay the debt or be cut off from family"),
            vec![Pillar::Isolation, Pillar::Financial]
        );
        assert!(pillar_signals("repayment").is_empty());
    }

    #[test]
    fn low_severity_markers() {
        assert!(mentions_low_severity("a minor disagreement"));
        assert!(!mentions_low_severity("a major disagreement"));
    }
}
