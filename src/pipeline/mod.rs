//! Pipeline stages for PDF-to-image rasterisation.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. switch rendering backend) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ enumerate ──▶ render ──▶ transform ──▶ write
//! (path)    (WorkUnits)   (pdfium)   (candle)      (page_<n>.png)
//! ```
//!
//! 1. [`input`]     — validate the user-supplied path (or spill raw bytes to
//!    a managed tempfile)
//! 2. [`enumerate`] — discover the page count and partition the selection
//!    into bounded [`enumerate::WorkUnit`]s
//! 3. [`render`]    — rasterise one unit per pdfium invocation; blocking,
//!    run under `spawn_blocking` on async paths
//! 4. [`transform`] — invert / bilinear-resize / normalise on the configured
//!    device, CPU fallback on device failure
//! 5. [`write`]     — encode to PNG/JPEG and write `page_<n>.<ext>`

pub mod enumerate;
pub mod input;
pub mod render;
pub mod transform;
pub mod write;
