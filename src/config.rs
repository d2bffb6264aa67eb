//! Configuration types for the rasterisation pipeline.
//!
//! All run behaviour is controlled through [`RasterConfig`], built via its
//! [`RasterConfigBuilder`]. Keeping every knob in one struct makes it trivial
//! to share configs across threads, serialise the relevant subset to worker
//! processes, and diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::error::Pdf2RasterError;
use crate::progress::RunProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for one rasterisation run.
///
/// Built via [`RasterConfig::builder()`] or [`RasterConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2raster::{DispatchStrategy, RasterConfig};
///
/// let config = RasterConfig::builder()
///     .dpi(150)
///     .batch_size(2)
///     .strategy(DispatchStrategy::ThreadPool { workers: 4 })
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct RasterConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–600. Default: 150.
    ///
    /// The raw render resolution only matters up to the transform stage: the
    /// bilinear resize scales every page to `target_width × target_height`
    /// regardless. Higher DPI preserves more detail through the resize at the
    /// cost of render time and memory.
    pub dpi: u32,

    /// Target width of the transformed image in pixels. Default: 1920.
    pub target_width: u32,

    /// Target height of the transformed image in pixels. Default: 1080.
    pub target_height: u32,

    /// Pages per work unit. Default: 1.
    ///
    /// A unit is rasterised with a single pdfium invocation, so larger
    /// batches amortise the per-unit document-open cost at the price of
    /// coarser failure isolation: a render error fails the whole unit.
    pub batch_size: usize,

    /// How work units are distributed. Default: [`DispatchStrategy::Sequential`].
    pub strategy: DispatchStrategy,

    /// Which device the transform runs on. Default: [`DevicePolicy::Auto`].
    pub device: DevicePolicy,

    /// Floating-point precision of the transform. Default: [`Precision::F32`].
    ///
    /// F16 halves device memory per page; on CPU it is usually slower than
    /// F32 and exists mainly to mirror what a GPU run would compute.
    pub precision: Precision,

    /// Invert colours before resizing. Default: false.
    pub invert: bool,

    /// Mean/std normalisation applied after the resize, or None to keep raw
    /// intensities. Default: `Some(Normalize::default())` (mean 0.5, std 0.5).
    ///
    /// The normalised values are clamped back to [0, 1] before the 8-bit
    /// quantisation, so the visible effect is a contrast stretch.
    pub normalize: Option<Normalize>,

    /// Directory the `page_<n>.<ext>` files are written to. Default: `"."`.
    pub output_dir: PathBuf,

    /// Output image container format. Default: [`OutputFormat::Png`].
    pub format: OutputFormat,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// Directory containing the pdfium shared library, or None to use the
    /// system library. Default: None.
    ///
    /// This is the moral equivalent of pdf2image's `poppler_path`: an
    /// explicit pointer at the external rasteriser's binaries.
    pub pdfium_dir: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Optional per-page progress callback.
    pub progress_callback: Option<Arc<dyn RunProgressCallback>>,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            target_width: 1920,
            target_height: 1080,
            batch_size: 1,
            strategy: DispatchStrategy::Sequential,
            device: DevicePolicy::Auto,
            precision: Precision::F32,
            invert: false,
            normalize: Some(Normalize::default()),
            output_dir: PathBuf::from("."),
            format: OutputFormat::Png,
            pages: PageSelection::default(),
            pdfium_dir: None,
            password: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RasterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterConfig")
            .field("dpi", &self.dpi)
            .field("target_width", &self.target_width)
            .field("target_height", &self.target_height)
            .field("batch_size", &self.batch_size)
            .field("strategy", &self.strategy)
            .field("device", &self.device)
            .field("precision", &self.precision)
            .field("invert", &self.invert)
            .field("normalize", &self.normalize)
            .field("output_dir", &self.output_dir)
            .field("format", &self.format)
            .field("pages", &self.pages)
            .field("pdfium_dir", &self.pdfium_dir)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RunProgressCallback>"),
            )
            .finish()
    }
}

impl RasterConfig {
    /// Create a new builder for `RasterConfig`.
    pub fn builder() -> RasterConfigBuilder {
        RasterConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`RasterConfig`].
#[derive(Debug)]
pub struct RasterConfigBuilder {
    config: RasterConfig,
}

impl RasterConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn target_resolution(mut self, width: u32, height: u32) -> Self {
        self.config.target_width = width.max(1);
        self.config.target_height = height.max(1);
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.max(1);
        self
    }

    pub fn strategy(mut self, strategy: DispatchStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn device(mut self, policy: DevicePolicy) -> Self {
        self.config.device = policy;
        self
    }

    pub fn precision(mut self, precision: Precision) -> Self {
        self.config.precision = precision;
        self
    }

    pub fn invert(mut self, v: bool) -> Self {
        self.config.invert = v;
        self
    }

    pub fn normalize(mut self, normalize: Option<Normalize>) -> Self {
        self.config.normalize = normalize;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn pdfium_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_dir = Some(dir.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn RunProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RasterConfig, Pdf2RasterError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(Pdf2RasterError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.batch_size == 0 {
            return Err(Pdf2RasterError::InvalidConfig(
                "Batch size must be ≥ 1".into(),
            ));
        }
        if let Some(workers) = c.strategy.workers() {
            if workers == 0 {
                return Err(Pdf2RasterError::InvalidConfig(
                    "Worker count must be ≥ 1".into(),
                ));
            }
        }
        if let Some(ref n) = c.normalize {
            if n.std == 0.0 {
                return Err(Pdf2RasterError::InvalidConfig(
                    "Normalisation std must be non-zero".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How work units are distributed across execution contexts.
///
/// The four strategies are interchangeable — same input, same set of output
/// files — and exist so runs can be benchmarked against each other. They are
/// never mixed within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchStrategy {
    /// Single thread of control; results in page order.
    Sequential,
    /// Fixed-size pool of worker threads; results in arrival order.
    ThreadPool { workers: usize },
    /// Fixed-size pool of worker processes, each re-opening the document
    /// independently; results in arrival order. Highest per-unit overhead,
    /// strongest isolation.
    ///
    /// Workers are spawned by re-executing the current binary, so the host
    /// executable must call [`crate::dispatch::maybe_run_worker`] before
    /// anything else in `main` (the bundled CLI does). Without that hook
    /// every page of the run is reported as failed.
    ProcessPool { workers: usize },
    /// Cooperative tokio tasks. Render and transform remain blocking; only
    /// the final file write is awaited, so `tasks` bounds concurrent writes.
    CooperativeTasks { tasks: usize },
}

impl DispatchStrategy {
    /// Pool size, if this strategy has one.
    pub fn workers(&self) -> Option<usize> {
        match self {
            DispatchStrategy::Sequential => None,
            DispatchStrategy::ThreadPool { workers } => Some(*workers),
            DispatchStrategy::ProcessPool { workers } => Some(*workers),
            DispatchStrategy::CooperativeTasks { tasks } => Some(*tasks),
        }
    }

    /// True when results are collected in completion order rather than
    /// page order.
    pub fn arrival_order(&self) -> bool {
        !matches!(self, DispatchStrategy::Sequential)
    }
}

/// Which device the transform stage targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DevicePolicy {
    /// Use CUDA device 0 when available, otherwise CPU. (default)
    #[default]
    Auto,
    /// Force CPU even when a GPU is present.
    Cpu,
    /// Request a specific CUDA device; falls back to CPU with a warning if
    /// the device cannot be initialised.
    Cuda(usize),
}

/// Floating-point precision of the tensor transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Precision {
    #[default]
    F32,
    F16,
}

/// Mean/std normalisation parameters, applied per channel uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalize {
    pub mean: f32,
    pub std: f32,
}

impl Default for Normalize {
    fn default() -> Self {
        // Matches torchvision's Normalize((0.5,), (0.5,)) convention.
        Self { mean: 0.5, std: 0.5 }
    }
}

/// Output image container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Lossless; larger files. (default)
    #[default]
    Png,
    /// Lossy; matches the original scripts' `page_<n>.jpg` output.
    Jpeg,
}

impl OutputFormat {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }

    /// The matching `image` crate format.
    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            OutputFormat::Png => image::ImageFormat::Png,
            OutputFormat::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

/// Specifies which pages of the PDF to process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Process all pages (default).
    #[default]
    All,
    /// Process a single page (1-indexed).
    Single(usize),
    /// Process a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Process specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 1-indexed
    /// page numbers, clipped to the document's page count.
    pub fn to_pages(&self, total_pages: usize) -> Vec<usize> {
        let mut pages: Vec<usize> = match self {
            PageSelection::All => (1..=total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![*p]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1);
                let e = (*end).min(total_pages);
                (s..=e).collect()
            }
            PageSelection::Set(set) => set
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .copied()
                .collect(),
        };
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_defaults() {
        let config = RasterConfig::builder().build().unwrap();
        assert_eq!(config.dpi, 150);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.strategy, DispatchStrategy::Sequential);
        assert_eq!(config.format, OutputFormat::Png);
        assert!(config.normalize.is_some());
    }

    #[test]
    fn builder_clamps_dpi() {
        let config = RasterConfig::builder().dpi(10_000).build().unwrap();
        assert_eq!(config.dpi, 600);
        let config = RasterConfig::builder().dpi(1).build().unwrap();
        assert_eq!(config.dpi, 72);
    }

    #[test]
    fn builder_rejects_zero_std() {
        let err = RasterConfig::builder()
            .normalize(Some(Normalize { mean: 0.0, std: 0.0 }))
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn strategy_workers() {
        assert_eq!(DispatchStrategy::Sequential.workers(), None);
        assert_eq!(
            DispatchStrategy::ThreadPool { workers: 4 }.workers(),
            Some(4)
        );
        assert!(DispatchStrategy::ProcessPool { workers: 2 }.arrival_order());
        assert!(!DispatchStrategy::Sequential.arrival_order());
    }

    #[test]
    fn page_selection_to_pages() {
        assert_eq!(PageSelection::All.to_pages(3), vec![1, 2, 3]);
        assert_eq!(PageSelection::Single(2).to_pages(3), vec![2]);
        assert_eq!(PageSelection::Single(9).to_pages(3), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 10).to_pages(4), vec![2, 3, 4]);
        assert_eq!(
            PageSelection::Set(vec![3, 1, 3]).to_pages(5),
            vec![1, 3] // deduplicated and sorted
        );
    }

    #[test]
    fn output_format_extension() {
        assert_eq!(OutputFormat::Png.extension(), "png");
        assert_eq!(OutputFormat::Jpeg.extension(), "jpg");
    }
}
