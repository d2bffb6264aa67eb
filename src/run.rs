//! Run orchestration: resolve input, enumerate pages, dispatch units,
//! assemble the report.
//!
//! A run moves through fixed phases (resolve → enumerate → dispatch →
//! collect → report); each phase is logged so a stalled run can be located
//! from the trace alone. Fatal errors can only occur before dispatch
//! begins; once units are in flight every failure is per-page.

use crate::config::{PageSelection, RasterConfig};
use crate::device::DeviceHandle;
use crate::dispatch::{self, UnitJob};
use crate::error::Pdf2RasterError;
use crate::pipeline::input::{self, ResolvedInput};
use crate::pipeline::render::{self, DocumentMetadata};
use crate::pipeline::enumerate;
use crate::report::ExecutionReport;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Rasterise a PDF file into per-page images.
///
/// This is the main library entry point.
///
/// # Example
/// ```rust,no_run
/// use pdf2raster::{DispatchStrategy, RasterConfig};
///
/// # async fn demo() -> Result<(), pdf2raster::Pdf2RasterError> {
/// let config = RasterConfig::builder()
///     .output_dir("out")
///     .strategy(DispatchStrategy::ThreadPool { workers: 4 })
///     .build()?;
/// let report = pdf2raster::rasterize("input.pdf", &config).await?;
/// println!("saved {} pages", report.stats.saved_pages);
/// # Ok(())
/// # }
/// ```
pub async fn rasterize(
    pdf_path: impl AsRef<Path>,
    config: &RasterConfig,
) -> Result<ExecutionReport, Pdf2RasterError> {
    let resolved = input::resolve_path(pdf_path)?;
    run_resolved(resolved, config, None).await
}

/// Rasterise a PDF supplied as raw bytes. The bytes are spilled to a managed
/// tempfile because both pdfium and process-pool workers open documents by
/// path.
pub async fn rasterize_bytes(
    bytes: &[u8],
    config: &RasterConfig,
) -> Result<ExecutionReport, Pdf2RasterError> {
    let resolved = input::resolve_bytes(bytes)?;
    run_resolved(resolved, config, None).await
}

/// Rasterise with a caller-constructed device handle, reusing it across
/// multiple runs instead of probing the device each time.
pub async fn rasterize_with_device(
    pdf_path: impl AsRef<Path>,
    config: &RasterConfig,
    device: Arc<DeviceHandle>,
) -> Result<ExecutionReport, Pdf2RasterError> {
    let resolved = input::resolve_path(pdf_path)?;
    run_resolved(resolved, config, Some(device)).await
}

/// Blocking wrapper for callers without a tokio runtime.
pub fn rasterize_sync(
    pdf_path: impl AsRef<Path>,
    config: &RasterConfig,
) -> Result<ExecutionReport, Pdf2RasterError> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2RasterError::Internal(format!("Failed to start runtime: {e}")))?;
    runtime.block_on(rasterize(pdf_path, config))
}

/// Read document metadata without rendering any page.
pub async fn inspect(
    pdf_path: impl AsRef<Path>,
    config: &RasterConfig,
) -> Result<DocumentMetadata, Pdf2RasterError> {
    let resolved = input::resolve_path(pdf_path)?;
    let path = resolved.path().to_path_buf();
    let pdfium_dir = config.pdfium_dir.clone();
    let password = config.password.clone();

    tokio::task::spawn_blocking(move || {
        render::extract_metadata_blocking(&path, pdfium_dir.as_deref(), password.as_deref())
    })
    .await
    .map_err(|e| Pdf2RasterError::Internal(format!("Inspect task panicked: {e}")))?
}

async fn run_resolved(
    resolved: ResolvedInput,
    config: &RasterConfig,
    device: Option<Arc<DeviceHandle>>,
) -> Result<ExecutionReport, Pdf2RasterError> {
    let start = Instant::now();
    let pdf_path = resolved.path().to_path_buf();

    std::fs::create_dir_all(&config.output_dir).map_err(|e| {
        Pdf2RasterError::OutputDirFailed {
            path: config.output_dir.clone(),
            source: e,
        }
    })?;

    info!("Enumerating {}", pdf_path.display());
    let total_pages = enumerate::page_count(&pdf_path, config).await?;
    let pages = config.pages.to_pages(total_pages);
    if pages.is_empty() {
        return Err(Pdf2RasterError::PageOutOfRange {
            page: first_requested_page(&config.pages),
            total: total_pages,
        });
    }

    let units = enumerate::partition(&pages, config.batch_size);
    let unit_count = units.len();
    debug!(
        "{} of {} pages selected, {} units at batch size {}",
        pages.len(),
        total_pages,
        unit_count,
        config.batch_size
    );

    let device = device.unwrap_or_else(|| Arc::new(DeviceHandle::new(config.device)));
    let job = UnitJob::from_config(pdf_path, config, device, total_pages);

    if let Some(cb) = &config.progress_callback {
        cb.on_run_start(pages.len());
    }

    let outcomes = dispatch::dispatch(units, job, config.strategy).await?;

    let report = ExecutionReport::from_outcomes(
        outcomes,
        total_pages,
        unit_count,
        start.elapsed().as_millis() as u64,
    );

    if let Some(cb) = &config.progress_callback {
        cb.on_run_complete(report.stats.selected_pages, report.stats.saved_pages);
    }
    info!(
        "Run complete: {}/{} pages saved in {:.2}s",
        report.stats.saved_pages,
        report.stats.selected_pages,
        report.stats.total_secs()
    );

    Ok(report)
}

/// The page number to blame when a selection matches nothing.
fn first_requested_page(selection: &PageSelection) -> usize {
    match selection {
        PageSelection::All => 1,
        PageSelection::Single(p) => *p,
        PageSelection::Range(start, _) => *start,
        PageSelection::Set(set) => set.iter().copied().min().unwrap_or(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_document_is_fatal() {
        let config = RasterConfig::default();
        let err = rasterize("/no/such/file.pdf", &config).await.unwrap_err();
        assert!(matches!(err, Pdf2RasterError::DocumentNotFound { .. }));
    }

    #[tokio::test]
    async fn non_pdf_bytes_are_fatal() {
        let config = RasterConfig::default();
        let err = rasterize_bytes(b"not a pdf at all", &config)
            .await
            .unwrap_err();
        assert!(matches!(err, Pdf2RasterError::NotAPdf { .. }));
    }

    #[test]
    fn blame_page_for_empty_selection() {
        assert_eq!(first_requested_page(&PageSelection::Single(12)), 12);
        assert_eq!(first_requested_page(&PageSelection::Range(5, 9)), 5);
        assert_eq!(first_requested_page(&PageSelection::Set(vec![8, 3])), 3);
        assert_eq!(first_requested_page(&PageSelection::All), 1);
    }

    #[test]
    fn sync_wrapper_reports_missing_file() {
        let config = RasterConfig::default();
        let err = rasterize_sync("/no/such/file.pdf", &config).unwrap_err();
        assert!(matches!(err, Pdf2RasterError::DocumentNotFound { .. }));
    }
}
