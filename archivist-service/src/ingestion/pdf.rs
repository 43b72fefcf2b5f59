//! PDF text extraction, one fragment per page.

use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, warn};

use super::{FragmentSink, corrupt};
use crate::error::ProcessingError;

/// Create a new Pdfium instance (dynamically linked).
///
/// Searches for libpdfium in:
/// 1. Current directory (./libpdfium.so)
/// 2. vendor/pdfium/lib/
/// 3. System library paths
pub fn create_pdfium() -> Result<Pdfium, ProcessingError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "./vendor/pdfium/lib/",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| ProcessingError::TextExtraction {
            page: 0,
            source: Box::new(std::io::Error::other(format!(
                "Failed to load PDFium library: {:?}",
                e
            ))),
        })?;

    Ok(Pdfium::new(bindings))
}

pub fn extract(path: &Path, sink: &mut FragmentSink) -> Result<(), ProcessingError> {
    let pdfium = create_pdfium()?;

    let document = pdfium
        .load_pdf_from_file(path, None)
        .map_err(|e| corrupt(path, format!("failed to load PDF: {:?}", e)))?;

    let page_count = document.pages().len();
    debug!(pages = page_count, "Extracting PDF pages");

    for (page_index, page) in document.pages().iter().enumerate() {
        let page_num = page_index as u32 + 1;

        let text = page.text().map_err(|e| {
            warn!(page = page_num, error = ?e, "Failed to get text object for page");
            ProcessingError::TextExtraction {
                page: page_num,
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Failed to extract text from page {}: {:?}", page_num, e),
                )),
            }
        })?;

        if !sink.emit(format!("{}\n", text.all())) {
            return Ok(());
        }
    }

    Ok(())
}
