//! Word documents (`.docx`).
//!
//! Body paragraphs are emitted ten at a time, joined by newlines. Each table
//! row becomes its own fragment with the cell texts joined by spaces. Text is
//! read straight from `word/document.xml` inside the zip container.

use quick_xml::Reader;
use quick_xml::events::Event;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::{FragmentSink, corrupt};
use crate::error::ProcessingError;

const PARAGRAPHS_PER_FRAGMENT: usize = 10;

#[derive(Default)]
struct DocxWalker {
    paragraphs: Vec<String>,
    paragraph: String,
    in_text_run: bool,
    table_depth: usize,
    row: Vec<String>,
    cell: String,
}

impl DocxWalker {
    fn flush_paragraphs(&mut self, sink: &mut FragmentSink) -> bool {
        if self.paragraphs.is_empty() {
            return true;
        }
        let fragment = format!("{}\n", self.paragraphs.join("\n"));
        self.paragraphs.clear();
        sink.emit(fragment)
    }

    fn end_paragraph(&mut self, sink: &mut FragmentSink) -> bool {
        let text = std::mem::take(&mut self.paragraph);
        if self.table_depth > 0 {
            if !text.is_empty() {
                if !self.cell.is_empty() {
                    self.cell.push(' ');
                }
                self.cell.push_str(&text);
            }
            return true;
        }

        self.paragraphs.push(text);
        if self.paragraphs.len() >= PARAGRAPHS_PER_FRAGMENT {
            return self.flush_paragraphs(sink);
        }
        true
    }

    fn end_row(&mut self, sink: &mut FragmentSink) -> bool {
        let cells: Vec<String> = std::mem::take(&mut self.row)
            .into_iter()
            .filter(|c| !c.trim().is_empty())
            .collect();
        if cells.is_empty() {
            return true;
        }
        sink.emit(format!("{}\n", cells.join(" ")))
    }
}

pub fn extract(path: &Path, sink: &mut FragmentSink) -> Result<(), ProcessingError> {
    let file = File::open(path).map_err(ProcessingError::Io)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| corrupt(path, e))?;
    let document = archive
        .by_name("word/document.xml")
        .map_err(|e| corrupt(path, e))?;

    let mut reader = Reader::from_reader(BufReader::new(document));
    let mut buf = Vec::new();
    let mut walker = DocxWalker::default();

    loop {
        let keep_going = match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                match e.local_name().as_ref() {
                    b"tbl" => {
                        // Keep document order: paragraphs before the table go out first
                        if walker.table_depth == 0 && !walker.flush_paragraphs(sink) {
                            return Ok(());
                        }
                        walker.table_depth += 1;
                    }
                    b"tr" => walker.row.clear(),
                    b"tc" => walker.cell.clear(),
                    b"t" => walker.in_text_run = true,
                    _ => {}
                }
                true
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => {
                    walker.paragraph.push('\t');
                    true
                }
                b"br" | b"cr" => {
                    walker.paragraph.push('\n');
                    true
                }
                // <w:p/> is an empty paragraph
                b"p" => walker.end_paragraph(sink),
                _ => true,
            },
            Ok(Event::Text(t)) if walker.in_text_run => {
                let text = t.unescape().map_err(|e| corrupt(path, e))?;
                walker.paragraph.push_str(&text);
                true
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => {
                    walker.in_text_run = false;
                    true
                }
                b"p" => walker.end_paragraph(sink),
                b"tc" => {
                    let cell = std::mem::take(&mut walker.cell);
                    walker.row.push(cell);
                    true
                }
                b"tr" => walker.end_row(sink),
                b"tbl" => {
                    walker.table_depth = walker.table_depth.saturating_sub(1);
                    true
                }
                _ => true,
            },
            Ok(Event::Eof) => break,
            Ok(_) => true,
            Err(e) => return Err(corrupt(path, e)),
        };

        if !keep_going {
            return Ok(());
        }
        buf.clear();
    }

    walker.flush_paragraphs(sink);
    Ok(())
}
