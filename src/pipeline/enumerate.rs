//! Page enumeration: discover the page count and partition the selected
//! pages into bounded work units.
//!
//! A [`WorkUnit`] is a contiguous, inclusive, 1-indexed page range that one
//! pdfium invocation rasterises in a single pass. Units never overlap and
//! together cover every selected page exactly once; a contiguous N-page
//! selection at batch size B yields `ceil(N/B)` units.

use crate::config::RasterConfig;
use crate::error::Pdf2RasterError;
use crate::pipeline::render;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::Path;
use tracing::debug;

/// One page or contiguous page range processed as an atomic task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// First page, 1-indexed, inclusive.
    pub start_page: usize,
    /// Last page, 1-indexed, inclusive. Always >= `start_page`.
    pub end_page: usize,
}

impl WorkUnit {
    pub fn new(start_page: usize, end_page: usize) -> Self {
        debug_assert!(start_page >= 1 && start_page <= end_page);
        Self {
            start_page,
            end_page,
        }
    }

    /// The pages covered by this unit, in order.
    pub fn pages(&self) -> RangeInclusive<usize> {
        self.start_page..=self.end_page
    }

    pub fn len(&self) -> usize {
        self.end_page - self.start_page + 1
    }

    pub fn is_empty(&self) -> bool {
        false // start <= end is an invariant; a unit always has a page
    }
}

/// Query the document's page count, opening it via pdfium.
///
/// Runs under `spawn_blocking` because pdfium calls are blocking and
/// CPU-bound. Fatal on failure: no unit is dispatched if the document
/// cannot be opened.
pub async fn page_count(
    pdf_path: &Path,
    config: &RasterConfig,
) -> Result<usize, Pdf2RasterError> {
    let path = pdf_path.to_path_buf();
    let pdfium_dir = config.pdfium_dir.clone();
    let password = config.password.clone();

    tokio::task::spawn_blocking(move || {
        render::page_count_blocking(&path, pdfium_dir.as_deref(), password.as_deref())
    })
    .await
    .map_err(|e| Pdf2RasterError::Internal(format!("Page-count task panicked: {e}")))?
}

/// Partition a sorted, deduplicated list of 1-indexed pages into work units
/// of at most `batch_size` pages each.
///
/// Non-contiguous selections (e.g. pages 1,2,5,6) split at the gaps first,
/// then each run of consecutive pages is chunked at `batch_size`, so every
/// unit is a genuinely contiguous range that pdfium can rasterise in one
/// pass.
pub fn partition(pages: &[usize], batch_size: usize) -> Vec<WorkUnit> {
    debug_assert!(batch_size >= 1);
    let mut units = Vec::with_capacity(pages.len().div_ceil(batch_size));

    let mut i = 0;
    while i < pages.len() {
        let start = pages[i];
        let mut end = start;
        let mut taken = 1;
        // Extend while consecutive and under the batch cap.
        while taken < batch_size && i + taken < pages.len() && pages[i + taken] == end + 1 {
            end += 1;
            taken += 1;
        }
        units.push(WorkUnit::new(start, end));
        i += taken;
    }

    debug!(
        "Partitioned {} pages into {} units (batch size {})",
        pages.len(),
        units.len(),
        batch_size
    );
    units
}
