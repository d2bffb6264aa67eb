//! PDF rasterisation: render work units to `DynamicImage`s via pdfium.
//!
//! ## Why blocking functions?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async
//! contexts. Async callers go through `tokio::task::spawn_blocking`;
//! thread-pool and process-pool workers call the blocking functions
//! directly on their own threads.
//!
//! ## Why one pdfium invocation per unit?
//!
//! Opening the document dominates the cost of rendering a single page.
//! Rasterising a whole unit (up to `batch_size` consecutive pages) against
//! one open document amortises that cost, which is exactly why units exist.

use crate::error::{PageError, Pdf2RasterError};
use crate::pipeline::enumerate::WorkUnit;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::debug;

/// Document metadata, extractable without rendering any page.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}

/// Bind to the pdfium library, preferring an explicit directory when given.
///
/// `pdfium_dir` is the analogue of pdf2image's `poppler_path`: the caller
/// points at the external rasteriser's binaries instead of trusting the
/// loader search path.
pub fn bind_pdfium(pdfium_dir: Option<&Path>) -> Result<Pdfium, Pdf2RasterError> {
    let bindings = match pdfium_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| Pdf2RasterError::PdfiumBindingFailed(format!("{e:?}")))?;

    Ok(Pdfium::new(bindings))
}

/// Open a document, mapping pdfium errors onto the fatal error taxonomy.
fn open_document<'a>(
    pdfium: &'a Pdfium,
    pdf_path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, Pdf2RasterError> {
    pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{e:?}");
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                Pdf2RasterError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                Pdf2RasterError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            Pdf2RasterError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

/// Count pages by opening the document. Fatal on failure — page-count
/// discovery happens before any unit is dispatched.
pub fn page_count_blocking(
    pdf_path: &Path,
    pdfium_dir: Option<&Path>,
    password: Option<&str>,
) -> Result<usize, Pdf2RasterError> {
    let pdfium = bind_pdfium(pdfium_dir)?;
    let document = open_document(&pdfium, pdf_path, password)?;
    Ok(document.pages().len() as usize)
}

/// Rasterise one work unit: one document open, one render per page, buffers
/// returned in page order.
///
/// Failure here is non-fatal to the run: the dispatcher converts the error
/// into a `Failed` outcome for every page in the unit.
pub fn render_unit_blocking(
    pdf_path: &Path,
    pdfium_dir: Option<&Path>,
    password: Option<&str>,
    unit: WorkUnit,
    dpi: u32,
) -> Result<Vec<(usize, DynamicImage)>, PageError> {
    let pdfium = bind_pdfium(pdfium_dir).map_err(|e| PageError::RenderFailed {
        page: unit.start_page,
        detail: e.to_string(),
    })?;

    let document =
        open_document(&pdfium, pdf_path, password).map_err(|e| PageError::RenderFailed {
            page: unit.start_page,
            detail: e.to_string(),
        })?;

    let pages = document.pages();
    let total = pages.len() as usize;

    if unit.end_page > total {
        return Err(PageError::RenderFailed {
            page: unit.end_page,
            detail: format!("page out of range (document has {total} pages)"),
        });
    }

    let mut buffers = Vec::with_capacity(unit.len());

    for page_num in unit.pages() {
        let page = pages
            .get((page_num - 1) as u16)
            .map_err(|e| PageError::RenderFailed {
                page: page_num,
                detail: format!("{e:?}"),
            })?;

        // Points are 1/72", so width_px = width_pts * dpi / 72.
        let width_px = (page.width().value * dpi as f32 / 72.0).round() as i32;
        let render_config = PdfRenderConfig::new().set_target_width(width_px.max(1));

        let bitmap =
            page.render_with_config(&render_config)
                .map_err(|e| PageError::RenderFailed {
                    page: page_num,
                    detail: format!("{e:?}"),
                })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_num,
            image.width(),
            image.height()
        );

        buffers.push((page_num, image));
    }

    Ok(buffers)
}

/// Extract document metadata without rendering pages. Blocking.
pub fn extract_metadata_blocking(
    pdf_path: &Path,
    pdfium_dir: Option<&Path>,
    password: Option<&str>,
) -> Result<DocumentMetadata, Pdf2RasterError> {
    let pdfium = bind_pdfium(pdfium_dir)?;
    let document = open_document(&pdfium, pdf_path, password)?;

    let metadata = document.metadata();
    let pages = document.pages();

    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    Ok(DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        page_count: pages.len() as usize,
        pdf_version: format!("{:?}", document.version()),
    })
}
