//! Excel workbooks (`.xlsx`).
//!
//! Sheets are read cell by cell through calamine's streaming reader, so a
//! large sheet is never materialized as a whole range.

use calamine::{DataRef, DataType, Reader, Xlsx, open_workbook};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::{FragmentSink, corrupt};
use crate::error::ProcessingError;

pub fn extract(path: &Path, sink: &mut FragmentSink) -> Result<(), ProcessingError> {
    let mut workbook: Xlsx<BufReader<File>> =
        open_workbook(path).map_err(|e| corrupt(path, e))?;

    for sheet in workbook.sheet_names() {
        let mut cells = workbook
            .worksheet_cells_reader(&sheet)
            .map_err(|e| corrupt(path, e))?;

        // Sent with the sheet's first non-empty row; empty sheets stay silent
        let mut header = Some(format!("--- Sheet: {} ---\n", sheet));
        let mut current_row: Option<u32> = None;
        let mut values: Vec<String> = Vec::new();

        while let Some(cell) = cells.next_cell().map_err(|e| corrupt(path, e))? {
            let (row, _) = cell.get_position();
            if current_row != Some(row) {
                if !emit_row(sink, &mut header, &mut values) {
                    return Ok(());
                }
                current_row = Some(row);
            }
            if let Some(text) = cell_text(cell.get_value()) {
                values.push(text);
            }
        }

        if !emit_row(sink, &mut header, &mut values) {
            return Ok(());
        }
    }

    Ok(())
}

fn emit_row(sink: &mut FragmentSink, header: &mut Option<String>, values: &mut Vec<String>) -> bool {
    if values.is_empty() {
        return true;
    }
    if let Some(header) = header.take()
        && !sink.emit(header)
    {
        return false;
    }
    let line = format!("{}\n", values.join(", "));
    values.clear();
    sink.emit(line)
}

/// Display text of a cell, or `None` for empty cells
fn cell_text(value: &DataRef<'_>) -> Option<String> {
    let text = match value {
        DataRef::Empty => return None,
        DataRef::String(s) => s.clone(),
        DataRef::SharedString(s) => s.to_string(),
        DataRef::Int(i) => i.to_string(),
        DataRef::Float(f) => f.to_string(),
        DataRef::Bool(b) => b.to_string(),
        DataRef::DateTimeIso(s) | DataRef::DurationIso(s) => s.clone(),
        DataRef::Error(e) => format!("#{:?}", e),
        other => other
            .as_string()
            .or_else(|| other.as_f64().map(|f| f.to_string()))?,
    };

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
