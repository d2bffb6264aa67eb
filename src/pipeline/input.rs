//! Input resolution: validate a user-supplied path or spill bytes to disk.
//!
//! ## Why a tempfile for byte input?
//!
//! pdfium opens documents by file-system path, and so do process-pool
//! workers, which cannot share memory with the controller. Writing caller
//! bytes to a `TempDir` gives every consumer a path to re-open while
//! ensuring cleanup happens automatically when `ResolvedInput` is dropped,
//! even if the process panics. We validate the PDF magic bytes (`%PDF`)
//! before returning so callers get a meaningful error rather than a pdfium
//! crash.

use crate::error::Pdf2RasterError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// The resolved input — either a local path or a tempfile holding caller bytes.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input arrived as raw bytes, written to a temp directory.
    /// The `TempDir` is kept alive to prevent cleanup until the run completes.
    Spilled { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the PDF file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Spilled { path, .. } => path,
        }
    }
}

/// Resolve a local file path, validating existence, readability, and PDF
/// magic bytes.
pub fn resolve_path(path: impl AsRef<Path>) -> Result<ResolvedInput, Pdf2RasterError> {
    let path = path.as_ref().to_path_buf();

    if !path.exists() {
        return Err(Pdf2RasterError::DocumentNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(Pdf2RasterError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pdf2RasterError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(Pdf2RasterError::DocumentNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Write raw PDF bytes to a managed tempfile and return its path.
///
/// The magic check happens on the in-memory bytes before anything touches
/// the disk.
pub fn resolve_bytes(bytes: &[u8]) -> Result<ResolvedInput, Pdf2RasterError> {
    if bytes.len() >= 4 && &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(Pdf2RasterError::NotAPdf {
            path: PathBuf::from("<bytes>"),
            magic,
        });
    }

    let temp_dir = TempDir::new().map_err(|e| Pdf2RasterError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join("input.pdf");
    std::fs::write(&file_path, bytes)
        .map_err(|e| Pdf2RasterError::Internal(format!("Failed to write temp file: {e}")))?;

    debug!("Spilled {} PDF bytes to {}", bytes.len(), file_path.display());

    Ok(ResolvedInput::Spilled {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_document_not_found() {
        let err = resolve_path("/definitely/not/a/real/file.pdf").unwrap_err();
        assert!(matches!(err, Pdf2RasterError::DocumentNotFound { .. }));
    }

    #[test]
    fn non_pdf_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"PK\x03\x04 not a pdf").unwrap();

        let err = resolve_path(&path).unwrap_err();
        assert!(matches!(err, Pdf2RasterError::NotAPdf { .. }));
    }

    #[test]
    fn pdf_magic_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.pdf");
        std::fs::write(&path, b"%PDF-1.7\n%...").unwrap();

        let resolved = resolve_path(&path).expect("magic check should pass");
        assert_eq!(resolved.path(), path);
    }

    #[test]
    fn bytes_are_spilled_and_kept_alive() {
        let resolved = resolve_bytes(b"%PDF-1.4\nminimal").expect("valid header");
        let path = resolved.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4\nminimal");

        drop(resolved);
        assert!(!path.exists(), "tempdir must clean up on drop");
    }

    #[test]
    fn non_pdf_bytes_are_rejected() {
        let err = resolve_bytes(b"GIF89a....").unwrap_err();
        assert!(matches!(err, Pdf2RasterError::NotAPdf { .. }));
    }
}
