//! pdf2raster CLI: rasterise a PDF into per-page images.
//!
//! The same binary doubles as the process-pool worker: when the controller
//! spawns it with the worker-spec environment variable set, it processes its
//! assigned units and exits before any argument parsing happens.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use pdf2raster::{
    DevicePolicy, DispatchStrategy, Normalize, OutputFormat, PageSelection, PageStatus, Precision,
    RasterConfig, RunProgressCallback,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = "\
EXAMPLES:
    # All pages, sequentially, into the current directory
    pdf2raster input.pdf

    # Thread pool with 8 workers, two pages per unit
    pdf2raster input.pdf --strategy threads --workers 8 --batch-size 2

    # Process pool with isolated pdfium instances, JPEG output
    pdf2raster input.pdf --strategy processes --workers 4 --format jpg -o out/

    # Pages 2-5 only, inverted, no normalisation
    pdf2raster input.pdf --pages 2-5 --invert --no-normalize

    # Document metadata without rendering
    pdf2raster input.pdf --inspect
";

#[derive(Parser, Debug)]
#[command(
    name = "pdf2raster",
    version,
    about = "Rasterise PDF pages to images through a tensor transform pipeline",
    long_about = "Renders each selected PDF page with pdfium, applies an \
optional invert / bilinear-resize / normalise transform, and writes \
page_<n>.png (or .jpg) files. Four dispatch strategies are available so \
their wall-clock cost can be compared on the same document.",
    after_help = AFTER_HELP
)]
struct Cli {
    /// Input PDF file
    input: PathBuf,

    /// Output directory for page_<n>.<ext> files
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Render DPI (72-600)
    #[arg(long, default_value_t = 150)]
    dpi: u32,

    /// Target width after the transform resize
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// Target height after the transform resize
    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// Pages per work unit
    #[arg(long, default_value_t = 1)]
    batch_size: usize,

    /// Dispatch strategy
    #[arg(long, value_enum, default_value_t = StrategyArg::Sequential)]
    strategy: StrategyArg,

    /// Pool size for threads / processes / tasks (default: CPU count)
    #[arg(long)]
    workers: Option<usize>,

    /// Output image format
    #[arg(long, value_enum, default_value_t = FormatArg::Png)]
    format: FormatArg,

    /// Pages to process: "all", "3", "2-5", or "1,3,7"
    #[arg(long, default_value = "all")]
    pages: String,

    /// Invert colours before resizing
    #[arg(long)]
    invert: bool,

    /// Skip the mean/std normalisation step
    #[arg(long)]
    no_normalize: bool,

    /// Force the transform onto the CPU
    #[arg(long, conflicts_with = "gpu")]
    cpu: bool,

    /// Request a specific CUDA device
    #[arg(long, value_name = "ORDINAL")]
    gpu: Option<usize>,

    /// Transform float precision
    #[arg(long, value_enum, default_value_t = PrecisionArg::F32)]
    precision: PrecisionArg,

    /// Directory containing the pdfium shared library
    #[arg(long, env = "PDF2RASTER_PDFIUM_DIR")]
    pdfium_dir: Option<PathBuf>,

    /// Password for encrypted PDFs
    #[arg(long)]
    password: Option<String>,

    /// Print document metadata as JSON and exit without rendering
    #[arg(long)]
    inspect: bool,

    /// Emit the execution report as JSON instead of status lines
    #[arg(long)]
    json: bool,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,

    /// Suppress per-page status lines
    #[arg(short, long)]
    quiet: bool,

    /// Increase log verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    Sequential,
    Threads,
    Processes,
    Tasks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Png,
    Jpg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PrecisionArg {
    F32,
    F16,
}

/// Bridges run events onto an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::hidden();
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} pages {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
        );
        Self { bar }
    }
}

impl RunProgressCallback for CliProgress {
    fn on_run_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar
            .set_draw_target(indicatif::ProgressDrawTarget::stderr());
    }

    fn on_page_done(&self, page_num: usize, _total_pages: usize, status: &PageStatus) {
        self.bar.inc(1);
        if !status.is_saved() {
            self.bar.set_message(format!("(page {page_num} failed)"));
        }
    }

    fn on_run_complete(&self, _total_pages: usize, saved_count: usize) {
        self.bar
            .finish_with_message(format!("{saved_count} saved"));
    }
}

fn parse_pages(spec: &str) -> Result<PageSelection> {
    let spec = spec.trim();
    if spec.eq_ignore_ascii_case("all") {
        return Ok(PageSelection::All);
    }
    if let Some((start, end)) = spec.split_once('-') {
        let start: usize = start.trim().parse().context("invalid range start")?;
        let end: usize = end.trim().parse().context("invalid range end")?;
        if start == 0 || end < start {
            bail!("page range must be 1-indexed and ascending: {spec}");
        }
        return Ok(PageSelection::Range(start, end));
    }
    if spec.contains(',') {
        let pages = spec
            .split(',')
            .map(|p| p.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("invalid page list: {spec}"))?;
        if pages.iter().any(|&p| p == 0) {
            bail!("pages are 1-indexed: {spec}");
        }
        return Ok(PageSelection::Set(pages));
    }
    let page: usize = spec.parse().with_context(|| format!("invalid page: {spec}"))?;
    if page == 0 {
        bail!("pages are 1-indexed: {spec}");
    }
    Ok(PageSelection::Single(page))
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn resolve_strategy(arg: StrategyArg, workers: Option<usize>) -> DispatchStrategy {
    let n = workers.unwrap_or_else(default_workers).max(1);
    match arg {
        StrategyArg::Sequential => DispatchStrategy::Sequential,
        StrategyArg::Threads => DispatchStrategy::ThreadPool { workers: n },
        StrategyArg::Processes => DispatchStrategy::ProcessPool { workers: n },
        StrategyArg::Tasks => DispatchStrategy::CooperativeTasks { tasks: n },
    }
}

fn build_config(cli: &Cli, progress: Option<Arc<dyn RunProgressCallback>>) -> Result<RasterConfig> {
    let device = if cli.cpu {
        DevicePolicy::Cpu
    } else if let Some(ordinal) = cli.gpu {
        DevicePolicy::Cuda(ordinal)
    } else {
        DevicePolicy::Auto
    };

    let mut builder = RasterConfig::builder()
        .dpi(cli.dpi)
        .target_resolution(cli.width, cli.height)
        .batch_size(cli.batch_size)
        .strategy(resolve_strategy(cli.strategy, cli.workers))
        .device(device)
        .precision(match cli.precision {
            PrecisionArg::F32 => Precision::F32,
            PrecisionArg::F16 => Precision::F16,
        })
        .invert(cli.invert)
        .normalize(if cli.no_normalize {
            None
        } else {
            Some(Normalize::default())
        })
        .output_dir(&cli.output_dir)
        .format(match cli.format {
            FormatArg::Png => OutputFormat::Png,
            FormatArg::Jpg => OutputFormat::Jpeg,
        })
        .pages(parse_pages(&cli.pages)?);

    if let Some(dir) = &cli.pdfium_dir {
        builder = builder.pdfium_dir(dir);
    }
    if let Some(pwd) = &cli.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    Ok(builder.build()?)
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // A spawned worker carries its work order in the environment and never
    // parses CLI arguments. Its subscriber goes up first so worker
    // diagnostics reach the inherited stderr.
    if std::env::var_os(pdf2raster::dispatch::WORKER_SPEC_ENV).is_some() {
        init_tracing(0);
        pdf2raster::maybe_run_worker();
        return Ok(());
    }

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.inspect {
        let config = build_config(&cli, None)?;
        let meta = pdf2raster::inspect(&cli.input, &config).await?;
        println!("{}", serde_json::to_string_pretty(&meta)?);
        return Ok(());
    }

    let progress: Option<Arc<dyn RunProgressCallback>> = if cli.no_progress || cli.json {
        None
    } else {
        Some(Arc::new(CliProgress::new()))
    };
    let config = build_config(&cli, progress)?;

    let mut report = pdf2raster::rasterize(&cli.input, &config).await?;
    report.sort_by_page();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        if !cli.quiet {
            for outcome in &report.outcomes {
                println!("{}", outcome.status_line());
            }
        }
        println!(
            "Total execution time: {:.2} seconds",
            report.stats.total_secs()
        );
        println!(
            "Average time per page: {:.2} seconds",
            report.stats.avg_secs_per_page()
        );
    }

    if report.stats.saved_pages == 0 && report.stats.selected_pages > 0 {
        bail!(
            "all {} selected pages failed",
            report.stats.selected_pages
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_all_variants() {
        assert!(matches!(parse_pages("all").unwrap(), PageSelection::All));
        assert!(matches!(parse_pages("ALL").unwrap(), PageSelection::All));
        assert!(matches!(
            parse_pages("7").unwrap(),
            PageSelection::Single(7)
        ));
        assert!(matches!(
            parse_pages("2-5").unwrap(),
            PageSelection::Range(2, 5)
        ));
        match parse_pages("1, 3, 7").unwrap() {
            PageSelection::Set(v) => assert_eq!(v, vec![1, 3, 7]),
            other => panic!("expected Set, got {other:?}"),
        }
    }

    #[test]
    fn pages_rejects_garbage() {
        assert!(parse_pages("0").is_err());
        assert!(parse_pages("5-2").is_err());
        assert!(parse_pages("a,b").is_err());
        assert!(parse_pages("").is_err());
    }

    #[test]
    fn strategy_resolution() {
        assert_eq!(
            resolve_strategy(StrategyArg::Sequential, Some(8)),
            DispatchStrategy::Sequential
        );
        assert_eq!(
            resolve_strategy(StrategyArg::Threads, Some(3)),
            DispatchStrategy::ThreadPool { workers: 3 }
        );
        assert_eq!(
            resolve_strategy(StrategyArg::Processes, Some(2)),
            DispatchStrategy::ProcessPool { workers: 2 }
        );
        assert_eq!(
            resolve_strategy(StrategyArg::Tasks, Some(0)),
            DispatchStrategy::CooperativeTasks { tasks: 1 }
        );
    }

    #[test]
    fn cli_parses_minimal_invocation() {
        let cli = Cli::try_parse_from(["pdf2raster", "input.pdf"]).unwrap();
        assert_eq!(cli.input, PathBuf::from("input.pdf"));
        assert_eq!(cli.dpi, 150);
        assert_eq!(cli.strategy, StrategyArg::Sequential);
        assert!(!cli.invert);
    }

    #[test]
    fn cli_parses_full_invocation() {
        let cli = Cli::try_parse_from([
            "pdf2raster",
            "doc.pdf",
            "--output-dir",
            "out",
            "--strategy",
            "processes",
            "--workers",
            "4",
            "--batch-size",
            "2",
            "--format",
            "jpg",
            "--pages",
            "1-10",
            "--invert",
            "--cpu",
        ])
        .unwrap();
        assert_eq!(cli.workers, Some(4));
        assert_eq!(cli.strategy, StrategyArg::Processes);
        assert_eq!(cli.format, FormatArg::Jpg);
        assert!(cli.cpu);
    }
}
