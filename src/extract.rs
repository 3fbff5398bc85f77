//! PDF text extraction.
//!
//! Uploaded files are validated as PDFs before they are stored; this module
//! turns their bytes into plain UTF-8 text. Parsing runs on the blocking
//! thread pool because `pdf-extract` is synchronous and CPU-bound.

use std::path::Path;

use crate::error::{Error, Result};

/// The only accepted upload type.
pub const MIME_PDF: &str = "application/pdf";

/// Checks the declared file name and MIME type of an upload.
///
/// Both must identify a PDF: the extension `.pdf` (any case) and a
/// content type of `application/pdf` (parameters such as `; charset=`
/// are ignored).
pub fn validate_pdf_upload(filename: &str, content_type: Option<&str>) -> Result<()> {
    let has_pdf_extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
    if !has_pdf_extension {
        return Err(Error::UnsupportedMedia(format!(
            "only PDF files are accepted, got {}",
            filename
        )));
    }

    let mime = content_type
        .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .unwrap_or_default();
    if mime != MIME_PDF {
        return Err(Error::UnsupportedMedia(format!(
            "expected content type {}, got {}",
            MIME_PDF,
            if mime.is_empty() { "none" } else { &mime }
        )));
    }

    Ok(())
}

/// Extracts the text of every page, trimmed.
///
/// # Errors
///
/// [`Error::Extraction`] when the bytes cannot be parsed or contain no text.
pub async fn extract_pdf_text(bytes: Vec<u8>) -> Result<String> {
    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|e| Error::Extraction(format!("extraction task failed: {}", e)))?
        .map_err(|e| Error::Extraction(e.to_string()))?;

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(Error::Extraction(
            "no extractable text in document".to_string(),
        ));
    }
    Ok(text)
}
