//! Error types for the pdf2raster library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Pdf2RasterError`] — **Fatal**: the run cannot proceed at all (bad
//!   input file, wrong password, no pdfium library). Returned as
//!   `Err(Pdf2RasterError)` from the top-level `rasterize*` functions before
//!   any work unit is dispatched.
//!
//! * [`PageError`] — **Non-fatal**: a single page or work unit failed
//!   (render glitch, transform error, disk full) but all other units are
//!   fine. Converted into a `Failed` [`crate::report::PageStatus`] at the
//!   unit boundary so callers can inspect partial success.
//!
//! Nothing is retried: a failed unit is reported once and never reattempted.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf2raster library.
///
/// Per-unit failures use [`PageError`] and are stored in
/// [`crate::report::PageOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Pdf2RasterError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    DocumentNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Selected page numbers exceed the actual page count.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create the output directory before dispatch.
    #[error("Failed to create output directory '{path}': {source}")]
    OutputDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set --pdfium-dir (or PDF2RASTER_PDFIUM_DIR) to the directory containing\n\
libpdfium, or install pdfium as a system library.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page or work unit.
///
/// Converted into [`crate::report::PageStatus::Failed`] at the unit boundary.
/// The overall run continues regardless of how many units fail.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Rasterisation of a page (or the unit containing it) failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The tensor transform failed on both the configured device and the
    /// CPU fallback.
    #[error("Page {page}: transform failed: {detail}")]
    TransformFailed { page: usize, detail: String },

    /// Encoding or writing the output image failed.
    #[error("Page {page}: write failed for '{path}': {detail}")]
    WriteFailed {
        page: usize,
        path: PathBuf,
        detail: String,
    },
}

impl PageError {
    /// The 1-indexed page this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. } => *page,
            PageError::TransformFailed { page, .. } => *page,
            PageError::WriteFailed { page, .. } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_out_of_range_display() {
        let e = Pdf2RasterError::PageOutOfRange { page: 12, total: 4 };
        let msg = e.to_string();
        assert!(msg.contains("Page 12"), "got: {msg}");
        assert!(msg.contains("4 pages"), "got: {msg}");
    }

    #[test]
    fn render_failed_display() {
        let e = PageError::RenderFailed {
            page: 3,
            detail: "backend unavailable".into(),
        };
        assert!(e.to_string().contains("Page 3"));
        assert!(e.to_string().contains("backend unavailable"));
    }

    #[test]
    fn write_failed_carries_path() {
        let e = PageError::WriteFailed {
            page: 2,
            path: PathBuf::from("/out/page_2.png"),
            detail: "disk full".into(),
        };
        assert!(e.to_string().contains("page_2.png"));
        assert_eq!(e.page(), 2);
    }

    #[test]
    fn page_error_serialises_for_worker_ipc() {
        let e = PageError::TransformFailed {
            page: 7,
            detail: "shape mismatch".into(),
        };
        let json = serde_json::to_string(&e).expect("serialise");
        let back: PageError = serde_json::from_str(&json).expect("deserialise");
        assert_eq!(back.page(), 7);
    }
}
