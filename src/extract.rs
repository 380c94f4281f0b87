//! PDF text extraction backing the ingestion layer.
//!
//! [`PdfExtractor`] implements the core [`TextExtractor`] seam with
//! `pdf-extract`. Extraction never panics out of this module: malformed
//! documents surface as [`ExtractError`] and the upload is rejected as an
//! unsupported format.

use thiserror::Error;

use doc_analyst_core::ingest::TextExtractor;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("PDF extraction aborted on a malformed document")]
    Aborted,
}

/// Extracts plain UTF-8 text from PDF bytes.
pub fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Aborted),
    }
}

/// [`TextExtractor`] backed by `pdf-extract`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract_pdf(&self, bytes: &[u8]) -> Result<String, String> {
        extract_pdf(bytes).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_analyst_core::ingest::parse_file;
    use doc_analyst_core::AnalysisError;

    #[test]
    fn garbage_pdf_is_an_error_not_a_panic() {
        let result = extract_pdf(b"%PDF-1.4\nthis is not really a pdf");
        assert!(result.is_err());
    }

    #[test]
    fn broken_pdf_upload_is_unsupported() {
        let err = parse_file(b"%PDF-1.7\n\x00\x01garbage", "scan.pdf", "f1", &PdfExtractor)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::UnsupportedFormat { .. }));
    }
}
