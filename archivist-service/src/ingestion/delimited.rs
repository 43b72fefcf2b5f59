//! Comma-separated tables.

use std::path::Path;

use super::{FragmentSink, corrupt};
use crate::error::ProcessingError;

const BATCH_ROWS: usize = 1000;

/// Emit the table in batches of rows. Each batch repeats the header line so
/// a fragment reads on its own.
pub fn extract(path: &Path, sink: &mut FragmentSink) -> Result<(), ProcessingError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| match e.into_kind() {
            csv::ErrorKind::Io(io) => ProcessingError::Io(io),
            other => corrupt(path, format!("{:?}", other)),
        })?;

    let header = reader
        .headers()
        .map_err(|e| corrupt(path, e))?
        .iter()
        .collect::<Vec<_>>()
        .join(", ");

    let mut batch = String::new();
    let mut rows = 0usize;

    for record in reader.records() {
        let record = record.map_err(|e| corrupt(path, e))?;
        batch.push_str(&record.iter().collect::<Vec<_>>().join(", "));
        batch.push('\n');
        rows += 1;

        if rows == BATCH_ROWS {
            if !sink.emit(format!("{}\n{}", header, batch)) {
                return Ok(());
            }
            batch.clear();
            rows = 0;
        }
    }

    if rows > 0 {
        sink.emit(format!("{}\n{}", header, batch));
    } else if batch.is_empty() && !header.trim().is_empty() && sink.fragments == 0 {
        // Header-only file
        sink.emit(format!("{}\n", header));
    }

    Ok(())
}
