//! Work dispatch: run the render → transform → write pipeline over a set of
//! work units under one of four interchangeable strategies.
//!
//! All strategies produce the same set of output files for the same input;
//! they differ only in how units are scheduled, which is the whole point of
//! having them side by side for benchmarking:
//!
//! - **Sequential**   — one unit at a time on a blocking thread; outcomes in
//!   page order.
//! - **ThreadPool**   — a fixed rayon pool; outcomes in arrival order.
//! - **ProcessPool**  — worker processes spawned from the current executable,
//!   each with its own pdfium instance and device handle; no shared state
//!   with the controller. Outcomes stream back as JSON lines on stdout.
//! - **CooperativeTasks** — tokio tasks where render and transform stay
//!   serialised behind a gate and only the file writes overlap.

use crate::config::{DevicePolicy, DispatchStrategy, OutputFormat, RasterConfig};
use crate::device::DeviceHandle;
use crate::error::{PageError, Pdf2RasterError};
use crate::pipeline::enumerate::WorkUnit;
use crate::pipeline::transform::{self, TransformSpec};
use crate::pipeline::{render, write};
use crate::progress::RunProgressCallback;
use crate::report::{PageOutcome, PageStatus};
use futures::stream::{self, StreamExt};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncBufReadExt;
use tracing::{debug, error, info, warn};

/// Environment variable carrying the JSON work order for a spawned worker
/// process. Its presence is what turns an invocation of the binary into a
/// worker instead of a controller.
pub const WORKER_SPEC_ENV: &str = "PDF2RASTER_WORKER_SPEC";

/// Everything a unit needs to be processed, independent of strategy.
#[derive(Clone)]
pub struct UnitJob {
    pub pdf_path: PathBuf,
    pub pdfium_dir: Option<PathBuf>,
    pub password: Option<String>,
    pub dpi: u32,
    pub transform: TransformSpec,
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    pub total_pages: usize,
    pub device: Arc<DeviceHandle>,
    pub progress: Option<Arc<dyn RunProgressCallback>>,
}

impl UnitJob {
    pub fn from_config(
        pdf_path: PathBuf,
        config: &RasterConfig,
        device: Arc<DeviceHandle>,
        total_pages: usize,
    ) -> Self {
        Self {
            pdf_path,
            pdfium_dir: config.pdfium_dir.clone(),
            password: config.password.clone(),
            dpi: config.dpi,
            transform: TransformSpec {
                target_width: config.target_width,
                target_height: config.target_height,
                invert: config.invert,
                normalize: config.normalize,
                precision: config.precision,
            },
            output_dir: config.output_dir.clone(),
            format: config.format,
            total_pages,
            device,
            progress: config.progress_callback.clone(),
        }
    }
}

/// The serialisable work order sent to a worker process. Deliberately a
/// subset of [`UnitJob`]: the worker reconstructs its own device handle and
/// has no progress callback (the controller reports progress as outcomes
/// arrive).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub pdf_path: PathBuf,
    pub pdfium_dir: Option<PathBuf>,
    pub password: Option<String>,
    pub dpi: u32,
    pub transform: TransformSpec,
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    pub total_pages: usize,
    pub device: DevicePolicy,
    pub units: Vec<WorkUnit>,
}

impl WorkerSpec {
    fn from_job(job: &UnitJob, device: DevicePolicy, units: Vec<WorkUnit>) -> Self {
        Self {
            pdf_path: job.pdf_path.clone(),
            pdfium_dir: job.pdfium_dir.clone(),
            password: job.password.clone(),
            dpi: job.dpi,
            transform: job.transform,
            output_dir: job.output_dir.clone(),
            format: job.format,
            total_pages: job.total_pages,
            device,
            units,
        }
    }

    fn into_job(self) -> (UnitJob, Vec<WorkUnit>) {
        let device = Arc::new(DeviceHandle::new(self.device));
        (
            UnitJob {
                pdf_path: self.pdf_path,
                pdfium_dir: self.pdfium_dir,
                password: self.password,
                dpi: self.dpi,
                transform: self.transform,
                output_dir: self.output_dir,
                format: self.format,
                total_pages: self.total_pages,
                device,
                progress: None,
            },
            self.units,
        )
    }
}

/// Dispatch every unit under the chosen strategy and collect the outcomes.
///
/// Sequential outcomes are in page order; pooled strategies return arrival
/// order. The caller decides whether to re-sort.
pub async fn dispatch(
    units: Vec<WorkUnit>,
    job: UnitJob,
    strategy: DispatchStrategy,
) -> Result<Vec<PageOutcome>, Pdf2RasterError> {
    info!(
        "Dispatching {} units over {:?}",
        units.len(),
        strategy
    );
    match strategy {
        DispatchStrategy::Sequential => dispatch_sequential(units, job).await,
        DispatchStrategy::ThreadPool { workers } => {
            dispatch_thread_pool(units, job, workers).await
        }
        DispatchStrategy::ProcessPool { workers } => {
            dispatch_process_pool(units, job, workers).await
        }
        DispatchStrategy::CooperativeTasks { tasks } => {
            dispatch_cooperative(units, job, tasks).await
        }
    }
}

// ── Unit processing (shared by sequential, thread pool, workers) ─────────

struct PreparedPage {
    page_num: usize,
    buffer: Result<RgbImage, PageError>,
    /// Render share plus transform time; the write stage adds its own.
    elapsed_ms: u64,
}

/// Render a unit and transform each page. Transform failures stay per-page;
/// a render failure poisons every page of the unit (they were rasterised in
/// one pdfium pass and there is nothing to salvage).
fn prepare_unit_blocking(job: &UnitJob, unit: WorkUnit) -> Vec<PreparedPage> {
    let render_start = Instant::now();
    let rendered = render::render_unit_blocking(
        &job.pdf_path,
        job.pdfium_dir.as_deref(),
        job.password.as_deref(),
        unit,
        job.dpi,
    );
    let render_ms = render_start.elapsed().as_millis() as u64;

    match rendered {
        Err(e) => {
            warn!("Unit {}–{} failed to render: {e}", unit.start_page, unit.end_page);
            let share = render_ms / unit.len() as u64;
            unit.pages()
                .map(|page_num| PreparedPage {
                    page_num,
                    buffer: Err(PageError::RenderFailed {
                        page: page_num,
                        detail: e.to_string(),
                    }),
                    elapsed_ms: share,
                })
                .collect()
        }
        Ok(pages) => {
            let share = render_ms / pages.len().max(1) as u64;
            pages
                .into_iter()
                .map(|(page_num, image)| {
                    let t = Instant::now();
                    let buffer = transform::apply(&image, &job.transform, &job.device)
                        .map_err(|e| PageError::TransformFailed {
                            page: page_num,
                            detail: e.to_string(),
                        });
                    PreparedPage {
                        page_num,
                        buffer,
                        elapsed_ms: share + t.elapsed().as_millis() as u64,
                    }
                })
                .collect()
        }
    }
}

/// Process one unit end to end on the current thread.
pub fn process_unit_blocking(job: &UnitJob, unit: WorkUnit) -> Vec<PageOutcome> {
    prepare_unit_blocking(job, unit)
        .into_iter()
        .map(|prepared| {
            if let Some(cb) = &job.progress {
                cb.on_page_start(prepared.page_num, job.total_pages);
            }

            let t = Instant::now();
            let status = match prepared.buffer {
                Ok(image) => {
                    match write::write_page_blocking(
                        &image,
                        prepared.page_num,
                        &job.output_dir,
                        job.format,
                    ) {
                        Ok(path) => PageStatus::Saved { path },
                        Err(e) => e.into(),
                    }
                }
                Err(e) => e.into(),
            };

            let outcome = PageOutcome {
                page_num: prepared.page_num,
                status,
                duration_ms: prepared.elapsed_ms + t.elapsed().as_millis() as u64,
            };
            if let Some(cb) = &job.progress {
                cb.on_page_done(outcome.page_num, job.total_pages, &outcome.status);
            }
            debug!("{}", outcome.status_line());
            outcome
        })
        .collect()
}

// ── Sequential ───────────────────────────────────────────────────────────

async fn dispatch_sequential(
    units: Vec<WorkUnit>,
    job: UnitJob,
) -> Result<Vec<PageOutcome>, Pdf2RasterError> {
    tokio::task::spawn_blocking(move || {
        units
            .into_iter()
            .flat_map(|unit| process_unit_blocking(&job, unit))
            .collect()
    })
    .await
    .map_err(|e| Pdf2RasterError::Internal(format!("Sequential dispatch panicked: {e}")))
}

// ── Thread pool ──────────────────────────────────────────────────────────

async fn dispatch_thread_pool(
    units: Vec<WorkUnit>,
    job: UnitJob,
    workers: usize,
) -> Result<Vec<PageOutcome>, Pdf2RasterError> {
    tokio::task::spawn_blocking(move || {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("raster-worker-{i}"))
            .build()
            .map_err(|e| Pdf2RasterError::Internal(format!("Thread pool build failed: {e}")))?;

        let (tx, rx) = std::sync::mpsc::channel();
        pool.scope(|scope| {
            for unit in units {
                let tx = tx.clone();
                let job = &job;
                scope.spawn(move |_| {
                    // Send failure means the collector is gone; nothing to do.
                    let _ = tx.send(process_unit_blocking(job, unit));
                });
            }
        });
        drop(tx);

        // Arrival order: whichever worker finishes first reports first.
        Ok(rx.into_iter().flatten().collect())
    })
    .await
    .map_err(|e| Pdf2RasterError::Internal(format!("Thread-pool dispatch panicked: {e}")))?
}

// ── Cooperative tasks ────────────────────────────────────────────────────

async fn dispatch_cooperative(
    units: Vec<WorkUnit>,
    job: UnitJob,
    tasks: usize,
) -> Result<Vec<PageOutcome>, Pdf2RasterError> {
    let job = Arc::new(job);
    // CPU stages run one at a time; only the awaited writes interleave.
    let cpu_gate = Arc::new(tokio::sync::Mutex::new(()));

    let outcomes: Vec<Vec<PageOutcome>> = stream::iter(units)
        .map(|unit| {
            let job = Arc::clone(&job);
            let gate = Arc::clone(&cpu_gate);
            async move {
                let prepared = {
                    let _cpu = gate.lock().await;
                    let job_ref = Arc::clone(&job);
                    match tokio::task::spawn_blocking(move || {
                        prepare_unit_blocking(&job_ref, unit)
                    })
                    .await
                    {
                        Ok(p) => p,
                        Err(e) => unit
                            .pages()
                            .map(|page_num| PreparedPage {
                                page_num,
                                buffer: Err(PageError::RenderFailed {
                                    page: page_num,
                                    detail: format!("render task panicked: {e}"),
                                }),
                                elapsed_ms: 0,
                            })
                            .collect(),
                    }
                };

                let mut outcomes = Vec::with_capacity(prepared.len());
                for page in prepared {
                    if let Some(cb) = &job.progress {
                        cb.on_page_start(page.page_num, job.total_pages);
                    }
                    let t = Instant::now();
                    let status = match page.buffer {
                        Ok(image) => {
                            match write::write_page(
                                &image,
                                page.page_num,
                                &job.output_dir,
                                job.format,
                            )
                            .await
                            {
                                Ok(path) => PageStatus::Saved { path },
                                Err(e) => e.into(),
                            }
                        }
                        Err(e) => e.into(),
                    };
                    let outcome = PageOutcome {
                        page_num: page.page_num,
                        status,
                        duration_ms: page.elapsed_ms + t.elapsed().as_millis() as u64,
                    };
                    if let Some(cb) = &job.progress {
                        cb.on_page_done(outcome.page_num, job.total_pages, &outcome.status);
                    }
                    outcomes.push(outcome);
                }
                outcomes
            }
        })
        .buffer_unordered(tasks.max(1))
        .collect()
        .await;

    Ok(outcomes.into_iter().flatten().collect())
}

// ── Process pool ─────────────────────────────────────────────────────────

/// Split units across `workers` contiguous chunks, front-loaded so chunk
/// sizes differ by at most one.
pub fn chunk_units(units: &[WorkUnit], workers: usize) -> Vec<Vec<WorkUnit>> {
    let workers = workers.max(1).min(units.len().max(1));
    let base = units.len() / workers;
    let extra = units.len() % workers;

    let mut chunks = Vec::with_capacity(workers);
    let mut i = 0;
    for w in 0..workers {
        let take = base + usize::from(w < extra);
        chunks.push(units[i..i + take].to_vec());
        i += take;
    }
    chunks
}

async fn dispatch_process_pool(
    units: Vec<WorkUnit>,
    job: UnitJob,
    workers: usize,
) -> Result<Vec<PageOutcome>, Pdf2RasterError> {
    let exe = std::env::current_exe()
        .map_err(|e| Pdf2RasterError::Internal(format!("Cannot locate own executable: {e}")))?;
    let device_policy = if job.device.is_gpu() {
        DevicePolicy::Auto
    } else {
        DevicePolicy::Cpu
    };

    let chunks: Vec<Vec<WorkUnit>> = chunk_units(&units, workers)
        .into_iter()
        .filter(|c| !c.is_empty())
        .collect();

    let handles = chunks.into_iter().enumerate().map(|(worker_id, chunk)| {
        let exe = exe.clone();
        let spec = WorkerSpec::from_job(&job, device_policy, chunk.clone());
        let progress = job.progress.clone();
        let total_pages = job.total_pages;

        async move {
            match run_worker_process(&exe, worker_id, spec, chunk.clone()).await {
                Ok(outcomes) => {
                    if let Some(cb) = &progress {
                        for o in &outcomes {
                            cb.on_page_done(o.page_num, total_pages, &o.status);
                        }
                    }
                    outcomes
                }
                Err(e) => {
                    // Spawn or wait failure: every page of this chunk fails,
                    // the rest of the run is unaffected.
                    error!("Worker {worker_id} failed: {e}");
                    chunk
                        .iter()
                        .flat_map(|u| u.pages())
                        .map(|page_num| PageOutcome {
                            page_num,
                            status: PageStatus::Failed {
                                reason: format!("worker process failed: {e}"),
                            },
                            duration_ms: 0,
                        })
                        .collect()
                }
            }
        }
    });

    let collected: Vec<Vec<PageOutcome>> = futures::future::join_all(handles).await;
    Ok(collected.into_iter().flatten().collect())
}

/// Spawn one worker, stream its stdout outcome lines, and fill in failure
/// outcomes for any page it never reported.
async fn run_worker_process(
    exe: &std::path::Path,
    worker_id: usize,
    spec: WorkerSpec,
    chunk: Vec<WorkUnit>,
) -> Result<Vec<PageOutcome>, Pdf2RasterError> {
    let payload = serde_json::to_string(&spec)
        .map_err(|e| Pdf2RasterError::Internal(format!("Worker spec encode failed: {e}")))?;

    debug!(
        "Spawning worker {worker_id} for {} units",
        spec.units.len()
    );
    let mut child = tokio::process::Command::new(exe)
        .env(WORKER_SPEC_ENV, payload)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::inherit())
        .stdin(std::process::Stdio::null())
        .spawn()
        .map_err(|e| Pdf2RasterError::Internal(format!("spawn failed: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Pdf2RasterError::Internal("worker stdout not captured".into()))?;

    let mut outcomes = Vec::new();
    let mut reported = HashSet::new();
    let mut lines = tokio::io::BufReader::new(stdout).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| Pdf2RasterError::Internal(format!("worker stdout read failed: {e}")))?
    {
        match serde_json::from_str::<PageOutcome>(&line) {
            Ok(outcome) => {
                reported.insert(outcome.page_num);
                outcomes.push(outcome);
            }
            Err(e) => warn!("Worker {worker_id} emitted unparsable line ({e}): {line}"),
        }
    }

    let status = child
        .wait()
        .await
        .map_err(|e| Pdf2RasterError::Internal(format!("worker wait failed: {e}")))?;
    if !status.success() {
        warn!("Worker {worker_id} exited with {status}");
    }

    // A crashed worker reports nothing for its remaining pages.
    for page_num in chunk.iter().flat_map(|u| u.pages()) {
        if !reported.contains(&page_num) {
            outcomes.push(PageOutcome {
                page_num,
                status: PageStatus::Failed {
                    reason: format!("worker process exited ({status}) before reporting"),
                },
                duration_ms: 0,
            });
        }
    }

    Ok(outcomes)
}

/// Worker-mode entry point, called first thing from the binary's `main`.
///
/// Returns false immediately in a normal (controller) invocation. In a
/// worker invocation it processes its units sequentially, prints one JSON
/// outcome per line, and returns true so `main` can exit.
pub fn maybe_run_worker() -> bool {
    let payload = match std::env::var(WORKER_SPEC_ENV) {
        Ok(p) => p,
        Err(_) => return false,
    };

    let spec: WorkerSpec = match serde_json::from_str(&payload) {
        Ok(s) => s,
        Err(e) => {
            error!("Invalid worker spec: {e}");
            std::process::exit(2);
        }
    };

    let (job, units) = spec.into_job();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for unit in units {
        for outcome in process_unit_blocking(&job, unit) {
            match serde_json::to_string(&outcome) {
                Ok(line) => {
                    if writeln!(out, "{line}").is_err() {
                        // Controller hung up; stop producing.
                        std::process::exit(1);
                    }
                }
                Err(e) => error!("Outcome encode failed: {e}"),
            }
        }
    }
    let _ = out.flush();
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(n: usize) -> Vec<WorkUnit> {
        (1..=n).map(|p| WorkUnit::new(p, p)).collect()
    }

    #[test]
    fn chunks_cover_all_units_in_order() {
        let all = units(10);
        let chunks = chunk_units(&all, 3);
        assert_eq!(chunks.len(), 3);
        let flattened: Vec<WorkUnit> = chunks.into_iter().flatten().collect();
        assert_eq!(flattened, all);
    }

    #[test]
    fn chunk_sizes_differ_by_at_most_one() {
        let chunks = chunk_units(&units(11), 4);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![3, 3, 3, 2]);
    }

    #[test]
    fn more_workers_than_units_shrinks_pool() {
        let chunks = chunk_units(&units(2), 8);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn empty_units_yield_single_empty_chunk() {
        let chunks = chunk_units(&[], 4);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }

    #[test]
    fn worker_spec_roundtrips_through_json() {
        let spec = WorkerSpec {
            pdf_path: PathBuf::from("/tmp/doc.pdf"),
            pdfium_dir: None,
            password: None,
            dpi: 150,
            transform: TransformSpec {
                target_width: 1920,
                target_height: 1080,
                invert: false,
                normalize: None,
                precision: crate::config::Precision::F32,
            },
            output_dir: PathBuf::from("/tmp/out"),
            format: OutputFormat::Png,
            total_pages: 9,
            device: DevicePolicy::Cpu,
            units: vec![WorkUnit::new(1, 3), WorkUnit::new(4, 5)],
        };

        let json = serde_json::to_string(&spec).unwrap();
        let back: WorkerSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back.units, spec.units);
        assert_eq!(back.total_pages, 9);
        assert_eq!(back.device, DevicePolicy::Cpu);
    }

    #[test]
    fn worker_spec_reconstructs_a_job() {
        let spec = WorkerSpec {
            pdf_path: PathBuf::from("/tmp/doc.pdf"),
            pdfium_dir: None,
            password: Some("secret".into()),
            dpi: 200,
            transform: TransformSpec {
                target_width: 640,
                target_height: 480,
                invert: true,
                normalize: None,
                precision: crate::config::Precision::F32,
            },
            output_dir: PathBuf::from("/tmp/out"),
            format: OutputFormat::Jpeg,
            total_pages: 2,
            device: DevicePolicy::Cpu,
            units: vec![WorkUnit::new(1, 2)],
        };

        let (job, units) = spec.into_job();
        assert_eq!(job.dpi, 200);
        assert!(!job.device.is_gpu());
        assert!(job.progress.is_none());
        assert_eq!(units, vec![WorkUnit::new(1, 2)]);
    }

    #[test]
    fn controller_mode_without_env_var() {
        // The env var is absent in the test harness, so this must be a no-op.
        assert!(!maybe_run_worker());
    }
}
