//! Resolving document sources to local files.
//!
//! Local paths are used in place. `gs://bucket/object` references and plain
//! `http(s)://` URLs are downloaded into a private scratch file that is
//! removed when the returned [`ResolvedSource`] is dropped, whichever way the
//! caller exits.

use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::BlobConfig;
use crate::error::{ProcessingError, ServiceError, ServiceResult};

/// Where a document's bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Local(PathBuf),
    Remote { url: String, suffix: String },
}

/// A readable local copy of a document source
#[derive(Debug)]
pub struct ResolvedSource {
    path: PathBuf,
    scratch: Option<NamedTempFile>,
}

impl ResolvedSource {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file is a downloaded scratch copy
    pub fn is_scratch(&self) -> bool {
        self.scratch.is_some()
    }
}

/// Downloads blobs referenced by URI
pub struct BlobClient {
    client: Client,
    endpoint: String,
    bearer_token: Option<String>,
    scratch_dir: PathBuf,
}

impl BlobClient {
    pub fn new(config: &BlobConfig, scratch_dir: PathBuf) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ServiceError::Config {
                message: format!("failed to build blob HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token.clone(),
            scratch_dir,
        })
    }

    /// Classify a source URI
    pub fn locate(&self, uri: &str) -> ServiceResult<SourceLocation> {
        if let Some(rest) = uri.strip_prefix("gs://") {
            let (bucket, object) = rest
                .split_once('/')
                .filter(|(bucket, object)| !bucket.is_empty() && !object.is_empty())
                .ok_or_else(|| {
                    ServiceError::invalid_request(format!(
                        "blob reference must look like gs://bucket/object: {}",
                        uri
                    ))
                })?;
            return Ok(SourceLocation::Remote {
                url: format!("{}/{}/{}", self.endpoint, bucket, object),
                suffix: suffix_of(object),
            });
        }

        if uri.starts_with("http://") || uri.starts_with("https://") {
            let object = uri.split(['?', '#']).next().unwrap_or(uri);
            return Ok(SourceLocation::Remote {
                url: uri.to_string(),
                suffix: suffix_of(object),
            });
        }

        let path = uri.strip_prefix("file://").unwrap_or(uri);
        if path.trim().is_empty() {
            return Err(ServiceError::invalid_request("source_uri must not be empty"));
        }
        Ok(SourceLocation::Local(PathBuf::from(path)))
    }

    /// Produce a local file for `uri`, downloading it if needed
    pub async fn resolve(&self, uri: &str) -> ServiceResult<ResolvedSource> {
        match self.locate(uri)? {
            SourceLocation::Local(path) => {
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    return Err(ProcessingError::SourceNotFound {
                        path: path.display().to_string(),
                    }
                    .into());
                }
                Ok(ResolvedSource {
                    path,
                    scratch: None,
                })
            }
            SourceLocation::Remote { url, suffix } => self.download(uri, &url, &suffix).await,
        }
    }

    async fn download(&self, uri: &str, url: &str, suffix: &str) -> ServiceResult<ResolvedSource> {
        tokio::fs::create_dir_all(&self.scratch_dir)
            .await
            .map_err(ProcessingError::Io)?;

        let scratch = tempfile::Builder::new()
            .prefix("archivist-")
            .suffix(suffix)
            .tempfile_in(&self.scratch_dir)
            .map_err(ProcessingError::Io)?;

        let mut request = self.client.get(url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        debug!(uri = %uri, url = %url, "Downloading source");
        let response = request
            .send()
            .await
            .map_err(|e| download_failed(uri, e.to_string(), true))?;

        let status = response.status();
        if !status.is_success() {
            let transient = status.is_server_error()
                || status == StatusCode::TOO_MANY_REQUESTS
                || status == StatusCode::REQUEST_TIMEOUT;
            return Err(download_failed(uri, format!("status {}", status), transient));
        }

        let mut file = tokio::fs::File::from_std(scratch.reopen().map_err(ProcessingError::Io)?);
        let mut body = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk: Bytes = chunk.map_err(|e| download_failed(uri, e.to_string(), true))?;
            file.write_all(&chunk).await.map_err(ProcessingError::Io)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(ProcessingError::Io)?;

        info!(
            uri = %uri,
            bytes = written,
            path = %scratch.path().display(),
            "Downloaded source to scratch file"
        );

        Ok(ResolvedSource {
            path: scratch.path().to_path_buf(),
            scratch: Some(scratch),
        })
    }
}

fn download_failed(uri: &str, reason: String, transient: bool) -> ServiceError {
    ProcessingError::BlobDownloadFailed {
        uri: uri.to_string(),
        reason,
        transient,
    }
    .into()
}

/// ".ext" of an object name, or empty
fn suffix_of(object: &str) -> String {
    Path::new(object)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default()
}
