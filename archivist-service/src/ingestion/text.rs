//! Plain text and Markdown.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::{FragmentSink, corrupt};
use crate::error::ProcessingError;

const READ_SIZE: usize = 4096;

/// Read the file in fixed-size blocks, emitting each as a fragment.
///
/// A UTF-8 sequence cut by a block boundary is carried into the next block.
pub fn extract(path: &Path, sink: &mut FragmentSink) -> Result<(), ProcessingError> {
    let mut file = File::open(path).map_err(ProcessingError::Io)?;
    let mut buffer = vec![0u8; READ_SIZE];
    let mut pending: Vec<u8> = Vec::with_capacity(READ_SIZE + 4);

    loop {
        let read = file.read(&mut buffer).map_err(ProcessingError::Io)?;
        if read == 0 {
            break;
        }
        pending.extend_from_slice(&buffer[..read]);

        let valid_up_to = match std::str::from_utf8(&pending) {
            Ok(_) => pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => return Err(corrupt(path, format!("invalid UTF-8: {}", e))),
        };

        let rest = pending.split_off(valid_up_to);
        let fragment = String::from_utf8(std::mem::replace(&mut pending, rest))
            .map_err(|e| corrupt(path, e))?;
        if !sink.emit(fragment) {
            return Ok(());
        }
    }

    if !pending.is_empty() {
        return Err(corrupt(path, "file ends inside a UTF-8 sequence"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::ingestion::{FileKind, TextExtractor};
    use std::io::Write;

    #[tokio::test]
    async fn test_multibyte_text_survives_block_boundaries() {
        // 4095 ASCII bytes push the first 'é' across the 4096-byte boundary
        let original = format!("{}{}", "a".repeat(4095), "é".repeat(3000));
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all(original.as_bytes()).unwrap();

        let mut stream = TextExtractor::new().extract(file.path(), FileKind::Text);
        let mut fragments = Vec::new();
        while let Some(fragment) = stream.next_fragment().await {
            fragments.push(fragment.unwrap());
        }

        assert!(fragments.len() > 1);
        assert_eq!(fragments.concat(), original);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all(b"hello \xff\xfe world").unwrap();

        let result = TextExtractor::new()
            .extract(file.path(), FileKind::Text)
            .collect_text()
            .await;
        assert!(result.is_err());
    }
}
