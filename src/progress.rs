//! Progress-callback trait for per-page run events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::RasterConfigBuilder::progress_callback`] to receive
//! real-time events as the dispatcher works through each page.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a channel, a log, or a terminal progress bar without the
//! library knowing anything about how the host application communicates. The
//! trait is `Send + Sync` because pooled strategies fire events from worker
//! threads.

use crate::report::PageStatus;
use std::sync::Arc;

/// Called by the pipeline as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
///
/// # Thread safety
///
/// Under `ThreadPool` and `CooperativeTasks` dispatch, `on_page_done` may be
/// called concurrently. Implementations must protect shared mutable state
/// with appropriate synchronisation primitives.
pub trait RunProgressCallback: Send + Sync {
    /// Called once after enumeration, before any unit is dispatched.
    ///
    /// # Arguments
    /// * `total_pages` — number of pages that will be processed
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page's render begins. Not fired for
    /// process-pool workers (the controller only sees completed pages).
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page finishes, successfully or not.
    fn on_page_done(&self, page_num: usize, total_pages: usize, status: &PageStatus) {
        let _ = (page_num, total_pages, status);
    }

    /// Called once after all units have been collected.
    fn on_run_complete(&self, total_pages: usize, saved_count: usize) {
        let _ = (total_pages, saved_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::RasterConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;
