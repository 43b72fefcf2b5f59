//! Text extraction from uploaded files.
//!
//! [`TextExtractor::extract`] opens a file on a blocking thread and streams
//! its text out as fragments through a bounded channel. The format readers
//! never hold the whole document in memory; the consumer decides whether to
//! accumulate fragments or process them as they arrive.

pub mod delimited;
pub mod docx;
pub mod pdf;
pub mod spreadsheet;
pub mod text;

use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::{ProcessingError, ServiceError, ServiceResult};

const FRAGMENT_CHANNEL_CAPACITY: usize = 16;

/// Supported document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Docx,
    Xlsx,
    Csv,
    Text,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Docx => "docx",
            FileKind::Xlsx => "xlsx",
            FileKind::Csv => "csv",
            FileKind::Text => "text",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            FileKind::Pdf => "application/pdf",
            FileKind::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            FileKind::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            FileKind::Csv => "text/csv",
            FileKind::Text => "text/plain",
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.trim_start_matches('.').to_lowercase().as_str() {
            "pdf" => Some(FileKind::Pdf),
            "docx" => Some(FileKind::Docx),
            "xlsx" | "xlsm" => Some(FileKind::Xlsx),
            "csv" => Some(FileKind::Csv),
            "txt" | "text" | "md" | "markdown" => Some(FileKind::Text),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_lowercase();
        match essence.as_str() {
            "application/pdf" => Some(FileKind::Pdf),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(FileKind::Docx)
            }
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                Some(FileKind::Xlsx)
            }
            "text/csv" | "application/csv" => Some(FileKind::Csv),
            "text/plain" | "text/markdown" | "text/x-markdown" => Some(FileKind::Text),
            _ => None,
        }
    }

    /// Detect the kind from a declared type (MIME or extension), falling back
    /// to the file's extension.
    pub fn detect(declared: Option<&str>, path: &Path) -> ServiceResult<Self> {
        let declared = declared.map(str::trim).filter(|d| !d.is_empty());

        if let Some(kind) = declared.and_then(|d| Self::from_mime(d).or_else(|| Self::from_extension(d)))
        {
            return Ok(kind);
        }

        let extension = path.extension().and_then(|e| e.to_str());
        if let Some(kind) = extension.and_then(Self::from_extension) {
            return Ok(kind);
        }

        let format = declared
            .map(String::from)
            .or_else(|| extension.map(String::from))
            .unwrap_or_else(|| "unknown".to_string());
        Err(ProcessingError::UnsupportedFormat { format }.into())
    }
}

/// Producer side of a fragment stream, used by the format readers
pub struct FragmentSink {
    tx: mpsc::Sender<Result<String, ProcessingError>>,
    saw_text: bool,
    fragments: usize,
}

impl FragmentSink {
    fn new(tx: mpsc::Sender<Result<String, ProcessingError>>) -> Self {
        Self {
            tx,
            saw_text: false,
            fragments: 0,
        }
    }

    /// Send one fragment, blocking while the channel is full.
    ///
    /// Returns `false` once the consumer has gone away; readers should stop.
    pub fn emit(&mut self, fragment: String) -> bool {
        if fragment.is_empty() {
            return true;
        }
        if !fragment.trim().is_empty() {
            self.saw_text = true;
        }
        self.fragments += 1;
        self.tx.blocking_send(Ok(fragment)).is_ok()
    }

    fn fail(&self, error: ProcessingError) {
        let _ = self.tx.blocking_send(Err(error));
    }
}

/// Lazy, finite, non-restartable sequence of text fragments
pub struct FragmentStream {
    inner: ReceiverStream<Result<String, ProcessingError>>,
    /// Awaited once the channel closes; a crashed reader must not pass as EOF
    reader: Option<JoinHandle<()>>,
    file: String,
}

impl FragmentStream {
    /// Next fragment, or `None` once the file is exhausted
    pub async fn next_fragment(&mut self) -> Option<ServiceResult<String>> {
        if let Some(fragment) = self.inner.next().await {
            return Some(fragment.map_err(ServiceError::from));
        }

        let reader = self.reader.take()?;
        match reader.await {
            Ok(()) => None,
            Err(e) => {
                warn!(file = %self.file, error = %e, "Format reader aborted");
                Some(Err(ProcessingError::ExtractionFailed {
                    file: self.file.clone(),
                    reason: format!("reader aborted: {}", e),
                }
                .into()))
            }
        }
    }

    /// Concatenate every fragment
    pub async fn collect_text(mut self) -> ServiceResult<String> {
        let mut text = String::new();
        while let Some(fragment) = self.next_fragment().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

/// Streams text out of supported document formats
#[derive(Debug, Clone)]
pub struct TextExtractor {
    channel_capacity: usize,
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TextExtractor {
    pub fn new() -> Self {
        Self {
            channel_capacity: FRAGMENT_CHANNEL_CAPACITY,
        }
    }

    /// Start extracting `path` as `kind`.
    ///
    /// A file that parses but contains no non-whitespace text ends the stream
    /// with `ExtractionFailed`.
    pub fn extract(&self, path: &Path, kind: FileKind) -> FragmentStream {
        self.spawn_reader(path, kind, move |path, sink| match kind {
            FileKind::Pdf => pdf::extract(path, sink),
            FileKind::Docx => docx::extract(path, sink),
            FileKind::Xlsx => spreadsheet::extract(path, sink),
            FileKind::Csv => delimited::extract(path, sink),
            FileKind::Text => text::extract(path, sink),
        })
    }

    fn spawn_reader<F>(&self, path: &Path, kind: FileKind, read: F) -> FragmentStream
    where
        F: FnOnce(&Path, &mut FragmentSink) -> Result<(), ProcessingError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let path: PathBuf = path.to_path_buf();
        let file = file_label(&path);

        let reader = tokio::task::spawn_blocking(move || {
            let mut sink = FragmentSink::new(tx);
            match read(&path, &mut sink) {
                Ok(()) if !sink.saw_text => {
                    warn!(path = %path.display(), kind = kind.as_str(), "No text found in document");
                    sink.fail(ProcessingError::ExtractionFailed {
                        file: file_label(&path),
                        reason: "document contains no extractable text".to_string(),
                    });
                }
                Ok(()) => {
                    debug!(
                        path = %path.display(),
                        kind = kind.as_str(),
                        fragments = sink.fragments,
                        "Extraction finished"
                    );
                }
                Err(e) => {
                    warn!(path = %path.display(), kind = kind.as_str(), error = %e, "Extraction failed");
                    sink.fail(e);
                }
            }
        });

        FragmentStream {
            inner: ReceiverStream::new(rx),
            reader: Some(reader),
            file,
        }
    }
}

/// File name for error messages
pub(crate) fn file_label(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document")
        .to_string()
}

/// Error for files that cannot be opened or parsed
pub(crate) fn corrupt(path: &Path, reason: impl std::fmt::Display) -> ProcessingError {
    ProcessingError::ExtractionFailed {
        file: file_label(path),
        reason: reason.to_string(),
    }
}
