//! # pdf2raster
//!
//! Convert PDF documents to per-page raster images with a tensor transform
//! stage, under four interchangeable dispatch strategies built for
//! benchmarking against each other.
//!
//! ## Pipeline
//!
//! ```text
//! PDF ─▶ enumerate ─▶ render ─▶ transform ─▶ write ─▶ page_<n>.png
//!        (WorkUnits)  (pdfium)  (candle)     (image)
//! ```
//!
//! Every page flows through the same stages; the [`DispatchStrategy`] only
//! decides how work units are scheduled:
//!
//! * [`DispatchStrategy::Sequential`] — one unit at a time, page order
//! * [`DispatchStrategy::ThreadPool`] — fixed thread pool, arrival order
//! * [`DispatchStrategy::ProcessPool`] — isolated worker processes
//! * [`DispatchStrategy::CooperativeTasks`] — async tasks, overlapped writes
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use pdf2raster::{DispatchStrategy, RasterConfig};
//!
//! # async fn demo() -> Result<(), pdf2raster::Pdf2RasterError> {
//! let config = RasterConfig::builder()
//!     .dpi(150)
//!     .output_dir("out")
//!     .strategy(DispatchStrategy::ThreadPool { workers: 4 })
//!     .build()?;
//!
//! let report = pdf2raster::rasterize("document.pdf", &config).await?;
//! for outcome in &report.outcomes {
//!     println!("{}", outcome.status_line());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure model
//!
//! Errors before dispatch (missing file, wrong password, no pdfium) are
//! fatal and surface as [`Pdf2RasterError`]. Once units are in flight, a
//! failing page never aborts the run: it becomes a
//! [`PageStatus::Failed`] entry in the [`ExecutionReport`] and every other
//! page proceeds.

pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod run;

pub use config::{
    DevicePolicy, DispatchStrategy, Normalize, OutputFormat, PageSelection, Precision,
    RasterConfig, RasterConfigBuilder,
};
pub use device::DeviceHandle;
pub use dispatch::maybe_run_worker;
pub use error::{PageError, Pdf2RasterError};
pub use pipeline::enumerate::WorkUnit;
pub use pipeline::render::DocumentMetadata;
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use report::{ExecutionReport, PageOutcome, PageStatus, RunStats};
pub use run::{inspect, rasterize, rasterize_bytes, rasterize_sync, rasterize_with_device};
