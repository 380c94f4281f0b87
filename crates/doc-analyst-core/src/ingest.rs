//! Format detection and message normalization.
//!
//! [`parse_file`] classifies raw bytes into a [`FileFormat`] and produces
//! the ordered [`Message`] sequence every later stage works from.
//!
//! # Detection order
//!
//! Detectors live in the [`DETECTORS`] table and are tried first-match:
//!
//! | Format | Signal |
//! |--------|--------|
//! | `whatsapp` | a `date, time - sender: text` line in the first 2 KB |
//! | `email` | `.eml` extension, or a MIME header block |
//! | `pdf` | `%PDF-` signature |
//! | `imessage` | two or more `From:` / `Date:` header lines |
//! | `transcript` | at least half of the lines are `label: text` |
//! | `plain_text` | fallback: one message per non-empty line |
//!
//! When a non-PDF detector matches but yields no messages, the file falls
//! back to plain text. A PDF that yields no text is rejected.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::AnalysisError;
use crate::models::{FileFormat, Message};

/// How far into a file the chat and email detectors look.
const SNIFF_BYTES: usize = 2048;
/// Body cap for email messages and PDF paragraphs.
const MAX_BODY_CHARS: usize = 500;
const MIN_PARAGRAPH_CHARS: usize = 10;
const PREVIEW_CHARS: usize = 100;
/// Sender label attached to PDF paragraphs.
pub const DOCUMENT_SENDER: &str = "Document";

static CHAT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{1,2}/\d{1,2}/\d{2,4},?\s+\d{1,2}[:.]\d{2}(?:[:.]\d{2})?\s*(?:AM|PM|am|pm)?)\s*[-–]\s*(.+?):\s(.+)",
    )
    .expect("valid chat regex")
});

static CHAT_LINE_BRACKETED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\[(\d{1,2}/\d{1,2}/\d{2,4},?\s+\d{1,2}[:.]\d{2}(?:[:.]\d{2})?\s*(?:AM|PM|am|pm)?)\]\s*(.+?):\s(.+)",
    )
    .expect("valid bracketed chat regex")
});

/// Chat system notices (`date, time - Messages are end-to-end encrypted`).
static CHAT_SYSTEM_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[?\d{1,2}/\d{1,2}/\d{2,4},?\s+\d{1,2}[:.]\d{2}(?:[:.]\d{2})?\s*(?:AM|PM|am|pm)?\]?\s*[-–]?\s")
        .expect("valid chat system regex")
});

static MAIL_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(From|To|Subject|MIME-Version|Content-Type|Date):").expect("valid header regex")
});

static TRANSCRIPT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][\w\s]{0,20}):\s+(.+)").expect("valid transcript regex"));

static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("valid paragraph regex"));

/// Extracts text from PDF bytes. The app backs this with `pdf-extract`.
pub trait TextExtractor: Send + Sync {
    fn extract_pdf(&self, bytes: &[u8]) -> Result<String, String>;
}

/// Extractor used where no PDF backend is wired in; every PDF is rejected.
pub struct NoPdfExtractor;

impl TextExtractor for NoPdfExtractor {
    fn extract_pdf(&self, _bytes: &[u8]) -> Result<String, String> {
        Err("PDF extraction is not available".to_string())
    }
}

/// Result of a successful ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested {
    pub format: FileFormat,
    pub messages: Vec<Message>,
}

/// Everything a detector may look at.
pub struct Sample<'a> {
    pub bytes: &'a [u8],
    pub text: &'a str,
    pub filename: &'a str,
}

/// A message before its index and file id are assigned.
#[derive(Debug, Default)]
struct Draft {
    sender: String,
    timestamp: Option<String>,
    text: String,
    line: usize,
}

type ParseFn = fn(&Sample<'_>, &dyn TextExtractor) -> Result<Vec<Draft>, String>;

/// One row of the detector table.
pub struct Detector {
    pub format: FileFormat,
    matches: fn(&Sample<'_>) -> bool,
    parse: ParseFn,
}

/// Detectors in precedence order. Plain text is the fallback and is not listed.
pub static DETECTORS: &[Detector] = &[
    Detector {
        format: FileFormat::Whatsapp,
        matches: looks_like_chat,
        parse: parse_chat,
    },
    Detector {
        format: FileFormat::Email,
        matches: looks_like_email,
        parse: parse_email,
    },
    Detector {
        format: FileFormat::Pdf,
        matches: looks_like_pdf,
        parse: parse_pdf,
    },
    Detector {
        format: FileFormat::Imessage,
        matches: looks_like_imessage,
        parse: parse_imessage,
    },
    Detector {
        format: FileFormat::Transcript,
        matches: looks_like_transcript,
        parse: parse_transcript,
    },
];

/// Decode bytes as lossy UTF-8 with normalized line endings.
pub fn decode_text(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.strip_prefix('\u{feff}').unwrap_or(text.as_ref());
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Detect the format of `bytes` and normalize it into messages.
pub fn parse_file(
    bytes: &[u8],
    filename: &str,
    file_id: &str,
    extractor: &dyn TextExtractor,
) -> Result<Ingested, AnalysisError> {
    let text = decode_text(bytes);
    let sample = Sample {
        bytes,
        text: &text,
        filename,
    };

    if let Some(detector) = DETECTORS.iter().find(|d| (d.matches)(&sample)) {
        match (detector.parse)(&sample, extractor) {
            Ok(drafts) if !drafts.is_empty() => {
                return Ok(Ingested {
                    format: detector.format,
                    messages: finish(file_id, drafts),
                });
            }
            Ok(_) if detector.format == FileFormat::Pdf => {
                return Err(unsupported(filename, "no text could be extracted from the PDF"));
            }
            Err(reason) if detector.format == FileFormat::Pdf => {
                return Err(unsupported(filename, &reason));
            }
            _ => {}
        }
    }

    let drafts = parse_plain(&text);
    if drafts.is_empty() {
        return Err(unsupported(filename, "no non-empty lines"));
    }
    Ok(Ingested {
        format: FileFormat::PlainText,
        messages: finish(file_id, drafts),
    })
}

/// `"<sender>: <first 100 chars>"` of the first message, for file listings.
pub fn preview(messages: &[Message]) -> String {
    match messages.first() {
        Some(m) => {
            let text = truncate_chars(&m.text, PREVIEW_CHARS);
            if m.sender.is_empty() {
                text
            } else {
                format!("{}: {}", m.sender, text)
            }
        }
        None => String::new(),
    }
}

fn unsupported(filename: &str, reason: &str) -> AnalysisError {
    AnalysisError::UnsupportedFormat {
        filename: filename.to_string(),
        reason: reason.to_string(),
    }
}

fn finish(file_id: &str, drafts: Vec<Draft>) -> Vec<Message> {
    drafts
        .into_iter()
        .enumerate()
        .map(|(index, d)| Message {
            index,
            file_id: file_id.to_string(),
            sender: d.sender,
            timestamp: d.timestamp,
            text: d.text,
            line: d.line,
        })
        .collect()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn sniff(text: &str) -> &str {
    if text.len() <= SNIFF_BYTES {
        return text;
    }
    let mut end = SNIFF_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn append(draft: &mut Draft, more: &str) {
    if draft.text.is_empty() {
        draft.text = more.to_string();
    } else {
        draft.text.push(' ');
        draft.text.push_str(more);
    }
}

// ============ Chat export ============

fn chat_captures(line: &str) -> Option<regex::Captures<'_>> {
    CHAT_LINE
        .captures(line)
        .or_else(|| CHAT_LINE_BRACKETED.captures(line))
}

fn looks_like_chat(sample: &Sample<'_>) -> bool {
    sniff(sample.text)
        .lines()
        .any(|line| chat_captures(line.trim_start()).is_some())
}

fn parse_chat(sample: &Sample<'_>, _: &dyn TextExtractor) -> Result<Vec<Draft>, String> {
    let mut drafts: Vec<Draft> = Vec::new();
    for (i, raw) in sample.text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = chat_captures(line) {
            drafts.push(Draft {
                timestamp: Some(caps[1].trim().to_string()),
                sender: caps[2].trim().to_string(),
                text: caps[3].trim().to_string(),
                line: i + 1,
            });
        } else if CHAT_SYSTEM_LINE.is_match(line) {
            continue;
        } else if let Some(last) = drafts.last_mut() {
            append(last, line);
        }
    }
    Ok(drafts)
}

// ============ Email ============

fn header_name(line: &str) -> Option<String> {
    MAIL_HEADER
        .captures(line)
        .map(|c| c[1].to_ascii_lowercase())
}

fn header_value(line: &str) -> String {
    line.split_once(':')
        .map(|(_, v)| v.trim().to_string())
        .unwrap_or_default()
}

fn looks_like_email(sample: &Sample<'_>) -> bool {
    if sample.filename.to_ascii_lowercase().ends_with(".eml") {
        return true;
    }
    let mut seen: Vec<String> = Vec::new();
    for line in sniff(sample.text).lines() {
        if let Some(name) = header_name(line) {
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
    }
    let has = |h: &str| seen.iter().any(|s| s == h);
    seen.len() >= 3 && has("from") && (has("to") || has("subject"))
}

fn is_from_line(line: &str) -> bool {
    line.get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("from:"))
}

/// Split text into blocks, each starting at a `From:` line.
fn from_blocks(text: &str) -> Vec<(usize, Vec<&str>)> {
    let mut blocks: Vec<(usize, Vec<&str>)> = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if is_from_line(line) {
            blocks.push((i + 1, vec![line]));
        } else if let Some((_, lines)) = blocks.last_mut() {
            lines.push(line);
        }
    }
    blocks
}

fn parse_email(sample: &Sample<'_>, _: &dyn TextExtractor) -> Result<Vec<Draft>, String> {
    let mut drafts = Vec::new();
    for (line_no, lines) in from_blocks(sample.text) {
        let mut draft = Draft {
            line: line_no,
            ..Draft::default()
        };
        let mut subject = String::new();
        let mut body_start = lines.len();
        for (j, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                body_start = j + 1;
                break;
            }
            match header_name(line).as_deref() {
                Some("from") => draft.sender = header_value(line),
                Some("date") => draft.timestamp = Some(header_value(line)),
                Some("subject") => subject = header_value(line),
                _ => {}
            }
        }
        let body = collapse_whitespace(&lines[body_start.min(lines.len())..].join("\n"));
        let body = if body.is_empty() { subject } else { body };
        if body.is_empty() {
            continue;
        }
        draft.text = truncate_chars(&body, MAX_BODY_CHARS);
        drafts.push(draft);
    }
    Ok(drafts)
}

// ============ PDF ============

fn looks_like_pdf(sample: &Sample<'_>) -> bool {
    sample.bytes.starts_with(b"%PDF-")
}

fn parse_pdf(sample: &Sample<'_>, extractor: &dyn TextExtractor) -> Result<Vec<Draft>, String> {
    let text = extractor.extract_pdf(sample.bytes)?;
    let text = text.replace("\r\n", "\n");
    Ok(PARAGRAPH_BREAK
        .split(&text)
        .map(collapse_whitespace)
        .filter(|p| p.chars().count() >= MIN_PARAGRAPH_CHARS)
        .enumerate()
        .map(|(i, p)| Draft {
            sender: DOCUMENT_SENDER.to_string(),
            timestamp: None,
            text: truncate_chars(&p, MAX_BODY_CHARS),
            line: i + 1,
        })
        .collect())
}

// ============ Message export ============

fn looks_like_imessage(sample: &Sample<'_>) -> bool {
    let mut from = 0;
    let mut date = 0;
    for line in sample.text.lines() {
        match header_name(line.trim_start()).as_deref() {
            Some("from") => from += 1,
            Some("date") => date += 1,
            _ => {}
        }
    }
    from >= 1 && from + date >= 2
}

fn parse_imessage(sample: &Sample<'_>, _: &dyn TextExtractor) -> Result<Vec<Draft>, String> {
    let mut drafts = Vec::new();
    for (line_no, lines) in from_blocks(sample.text) {
        let mut draft = Draft {
            line: line_no,
            ..Draft::default()
        };
        let mut body: Vec<&str> = Vec::new();
        for line in lines {
            let trimmed = line.trim();
            match header_name(trimmed).as_deref() {
                Some("from") => draft.sender = header_value(trimmed),
                Some("date") => draft.timestamp = Some(header_value(trimmed)),
                Some("to") | Some("subject") => {}
                _ if !trimmed.is_empty() => body.push(trimmed),
                _ => {}
            }
        }
        if body.is_empty() {
            continue;
        }
        draft.text = body.join(" ");
        drafts.push(draft);
    }
    Ok(drafts)
}

// ============ Transcript ============

fn looks_like_transcript(sample: &Sample<'_>) -> bool {
    let mut total = 0usize;
    let mut labelled = 0usize;
    for line in sample.text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        total += 1;
        if TRANSCRIPT_LINE.is_match(line) {
            labelled += 1;
        }
    }
    labelled > 0 && labelled * 2 >= total
}

fn parse_transcript(sample: &Sample<'_>, _: &dyn TextExtractor) -> Result<Vec<Draft>, String> {
    let mut drafts: Vec<Draft> = Vec::new();
    for (i, raw) in sample.text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = TRANSCRIPT_LINE.captures(line) {
            drafts.push(Draft {
                sender: caps[1].trim().to_string(),
                timestamp: None,
                text: caps[2].trim().to_string(),
                line: i + 1,
            });
        } else if let Some(last) = drafts.last_mut() {
            append(last, line);
        } else {
            drafts.push(Draft {
                text: line.to_string(),
                line: i + 1,
                ..Draft::default()
            });
        }
    }
    Ok(drafts)
}

// ============ Plain text ============

fn parse_plain(text: &str) -> Vec<Draft> {
    text.lines()
        .enumerate()
        .filter_map(|(i, raw)| {
            let line = raw.trim();
            (!line.is_empty()).then(|| Draft {
                text: line.to_string(),
                line: i + 1,
                ..Draft::default()
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPdf(&'static str);

    impl TextExtractor for FixedPdf {
        fn extract_pdf(&self, _bytes: &[u8]) -> Result<String, String> {
            Ok(self.0.to_string())
        }
    }

    fn parse(text: &str, filename: &str) -> Ingested {
        parse_file(text.as_bytes(), filename, "file-1", &NoPdfExtractor).unwrap()
    }

    #[test]
    fn chat_export_with_continuation_lines() {
        let text = "12/03/2024, 21:15 - Alex: you need to send it tonight\n\
                    or else\n\
                    12/03/2024, 21:16 - Jordan: I can't\n";
        let out = parse(text, "chat.txt");
        assert_eq!(out.format, FileFormat::Whatsapp);
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].sender, "Alex");
        assert_eq!(out.messages[0].text, "you need to send it tonight or else");
        assert_eq!(out.messages[0].timestamp.as_deref(), Some("12/03/2024, 21:15"));
        assert_eq!(out.messages[1].index, 1);
        assert_eq!(out.messages[1].line, 3);
        assert_eq!(out.messages[1].file_id, "file-1");
    }

    #[test]
    fn bracketed_chat_variant() {
        let out = parse("[1/2/24, 9:05:11 PM] Sam: hello there\n", "x.txt");
        assert_eq!(out.format, FileFormat::Whatsapp);
        assert_eq!(out.messages[0].sender, "Sam");
        assert_eq!(out.messages[0].timestamp.as_deref(), Some("1/2/24, 9:05:11 PM"));
    }

    #[test]
    fn chat_system_notices_are_skipped() {
        let text = "1/2/24, 10:00 - Messages are end-to-end encrypted.\n\
                    1/2/24, 10:01 - Sam: hi\n";
        let out = parse(text, "chat.txt");
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].text, "hi");
    }

    #[test]
    fn email_header_block() {
        let text = "From: a@example.com\nTo: b@example.com\nSubject: Payment\nDate: Mon, 1 Jan 2024\n\nWire the money now.\nNo delays.\n";
        let out = parse(text, "message.txt");
        assert_eq!(out.format, FileFormat::Email);
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].sender, "a@example.com");
        assert_eq!(out.messages[0].text, "Wire the money now. No delays.");
        assert_eq!(out.messages[0].timestamp.as_deref(), Some("Mon, 1 Jan 2024"));
    }

    #[test]
    fn email_body_is_capped() {
        let body = "x".repeat(900);
        let text = format!("From: a\nTo: b\nSubject: s\n\n{}\n", body);
        let out = parse(&text, "m.eml");
        assert_eq!(out.messages[0].text.chars().count(), 500);
    }

    #[test]
    fn eml_extension_without_from_falls_back_to_plain_text() {
        let out = parse("just some words\nand more\n", "odd.eml");
        assert_eq!(out.format, FileFormat::PlainText);
        assert_eq!(out.messages.len(), 2);
    }

    #[test]
    fn pdf_paragraphs_become_document_messages() {
        let out = parse_file(
            b"%PDF-1.7 binary",
            "doc.pdf",
            "f",
            &FixedPdf("First paragraph of the statement.\n\nshort\n\nSecond   paragraph\nwraps here."),
        )
        .unwrap();
        assert_eq!(out.format, FileFormat::Pdf);
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].sender, DOCUMENT_SENDER);
        assert_eq!(out.messages[1].text, "Second paragraph wraps here.");
    }

    #[test]
    fn pdf_extraction_failure_is_unsupported() {
        let err = parse_file(b"%PDF-1.4", "doc.pdf", "f", &NoPdfExtractor).unwrap_err();
        assert!(matches!(err, AnalysisError::UnsupportedFormat { .. }));
    }

    #[test]
    fn imessage_blocks() {
        let text = "From: +15550001\nDate: 2024-01-02 10:00\nwhere are you\nanswer me\n\nFrom: +15550002\nDate: 2024-01-02 10:05\nat work\n";
        let out = parse(text, "export.txt");
        assert_eq!(out.format, FileFormat::Imessage);
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].text, "where are you answer me");
        assert_eq!(out.messages[1].sender, "+15550002");
    }

    #[test]
    fn transcript_needs_half_labelled_lines() {
        let out = parse("Officer: state your name\nWitness: Pat\nand that is all\n", "t.txt");
        assert_eq!(out.format, FileFormat::Transcript);
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[1].text, "Pat and that is all");

        let out = parse("Note: one\nline two\nline three\nline four\n", "t.txt");
        assert_eq!(out.format, FileFormat::PlainText);
        assert_eq!(out.messages.len(), 4);
        assert_eq!(out.messages[0].sender, "");
    }

    #[test]
    fn empty_input_is_unsupported() {
        let err = parse_file(b"  \n\n \r\n", "blank.txt", "f", &NoPdfExtractor).unwrap_err();
        assert!(matches!(err, AnalysisError::UnsupportedFormat { .. }));
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let out = parse_file(b"caf\xff latte\n", "x.txt", "f", &NoPdfExtractor).unwrap();
        assert_eq!(out.messages[0].text, "caf\u{fffd} latte");
    }

    #[test]
    fn preview_uses_first_message() {
        let out = parse("12/03/2024, 21:15 - Alex: hello\n", "c.txt");
        assert_eq!(preview(&out.messages), "Alex: hello");
        assert_eq!(preview(&[]), "");
    }
}
