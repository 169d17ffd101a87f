//! Remote directory provider capability.
//!
//! The sync engine only ever sees this trait: a listing of
//! `(name, size, modified)` tuples and a way to fetch one entry's bytes.
//! Two interchangeable implementations exist — a metadata-aware HTTP folder
//! index, and a bulk mirror command (rclone-style) driven through the process
//! supervisor as fallback transport.

use crate::error::{HelperError, SyncError};
use crate::supervisor::Supervisor;
use async_trait::async_trait;
use chrono::DateTime;
use futures_util::StreamExt;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use url::Url;

/// One file as reported by the remote listing. Immutable snapshot; not
/// persisted.
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
    pub modified: SystemTime,
}

#[async_trait]
pub trait RemoteProvider: Send + Sync {
    /// List the remote folder. Fails with `ProviderUnavailable` on
    /// network/auth errors; the caller keeps the previous manifest.
    async fn list(&self) -> Result<Vec<RemoteEntry>, SyncError>;

    /// Fetch one entry's bytes into `dest`, returning the byte count written.
    async fn fetch(&self, name: &str, dest: &Path) -> Result<u64, SyncError>;
}

/// Deserialized row of the HTTP folder index.
#[derive(Debug, Deserialize)]
struct IndexEntry {
    name: String,
    size: u64,
    #[serde(default)]
    modified: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    items: Vec<IndexEntry>,
}

/// Metadata-aware provider: a JSON index (`index.json`) describing the folder
/// plus direct per-file GETs, streamed to disk.
#[derive(Debug)]
pub struct HttpFolderProvider {
    client: reqwest::Client,
    base: Url,
}

impl HttpFolderProvider {
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self, SyncError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| SyncError::ProviderUnavailable(format!("invalid remote url: {e}")))?;
        // A trailing slash keeps join() from swallowing the last path segment.
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Ok(Self { client, base })
    }

    fn index_url(&self) -> Result<Url, SyncError> {
        self.base
            .join("index.json")
            .map_err(|e| SyncError::ProviderUnavailable(e.to_string()))
    }

    fn file_url(&self, name: &str) -> Result<Url, SyncError> {
        self.base
            .join(&urlencoding::encode(name))
            .map_err(|e| SyncError::fetch(name, e))
    }
}

#[async_trait]
impl RemoteProvider for HttpFolderProvider {
    async fn list(&self) -> Result<Vec<RemoteEntry>, SyncError> {
        let url = self.index_url()?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::ProviderUnavailable(e.to_string()))?;

        let index: IndexResponse = response
            .json()
            .await
            .map_err(|e| SyncError::ProviderUnavailable(format!("bad index: {e}")))?;

        Ok(index
            .items
            .into_iter()
            .map(|item| RemoteEntry {
                name: item.name,
                size: item.size,
                modified: parse_modified(item.modified.as_deref()),
            })
            .collect())
    }

    async fn fetch(&self, name: &str, dest: &Path) -> Result<u64, SyncError> {
        let url = self.file_url(name)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::fetch(name, e))?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| SyncError::fetch(name, e))?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SyncError::fetch(name, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| SyncError::fetch(name, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| SyncError::fetch(name, e))?;
        Ok(written)
    }
}

fn parse_modified(raw: Option<&str>) -> SystemTime {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(SystemTime::from)
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// rclone `lsjson` row.
#[derive(Debug, Deserialize)]
struct MirrorListing {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Size")]
    size: i64,
    #[serde(rename = "ModTime", default)]
    mod_time: Option<String>,
    #[serde(rename = "IsDir", default)]
    is_dir: bool,
}

/// Bulk-downloader fallback: drives an external mirror command (rclone-style
/// `lsjson` / `copyto`) through the process supervisor. Used when the remote
/// folder has no HTTP index.
pub struct MirrorCommandProvider {
    supervisor: Arc<Supervisor>,
    program: String,
    remote: String,
    timeout: Duration,
}

impl MirrorCommandProvider {
    pub fn new(
        supervisor: Arc<Supervisor>,
        program: impl Into<String>,
        remote: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            supervisor,
            program: program.into(),
            remote: remote.into(),
            timeout,
        }
    }
}

fn unavailable(e: HelperError) -> SyncError {
    SyncError::ProviderUnavailable(e.to_string())
}

#[async_trait]
impl RemoteProvider for MirrorCommandProvider {
    async fn list(&self) -> Result<Vec<RemoteEntry>, SyncError> {
        let output = self
            .supervisor
            .run_and_capture(&self.program, &["lsjson", &self.remote], self.timeout)
            .await
            .map_err(unavailable)?;

        if !output.success {
            return Err(SyncError::ProviderUnavailable(format!(
                "mirror listing failed: {}",
                output.stderr.trim()
            )));
        }

        let rows: Vec<MirrorListing> = serde_json::from_str(&output.stdout)
            .map_err(|e| SyncError::ProviderUnavailable(format!("bad mirror listing: {e}")))?;

        Ok(rows
            .into_iter()
            .filter(|row| !row.is_dir && row.size >= 0)
            .map(|row| RemoteEntry {
                name: row.name,
                size: row.size as u64,
                modified: parse_modified(row.mod_time.as_deref()),
            })
            .collect())
    }

    async fn fetch(&self, name: &str, dest: &Path) -> Result<u64, SyncError> {
        let source = format!("{}/{}", self.remote, name);
        let dest_str = dest.to_string_lossy().into_owned();
        let output = self
            .supervisor
            .run_and_capture(
                &self.program,
                &["copyto", &source, &dest_str],
                self.timeout,
            )
            .await
            .map_err(|e| SyncError::fetch(name, e))?;

        if !output.success {
            return Err(SyncError::fetch(name, output.stderr.trim()));
        }

        let metadata = tokio::fs::metadata(dest)
            .await
            .map_err(|e| SyncError::fetch(name, e))?;
        Ok(metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let provider =
            HttpFolderProvider::new(reqwest::Client::new(), "http://host/folder").unwrap();
        assert_eq!(provider.file_url("a b.jpg").unwrap().path(), "/folder/a%20b.jpg");
        assert_eq!(provider.index_url().unwrap().path(), "/folder/index.json");
    }

    #[test]
    fn invalid_base_url_is_provider_unavailable() {
        let err = HttpFolderProvider::new(reqwest::Client::new(), "not a url").unwrap_err();
        assert!(matches!(err, SyncError::ProviderUnavailable(_)));
    }

    #[test]
    fn modified_parsing_tolerates_missing_values() {
        assert_eq!(parse_modified(None), SystemTime::UNIX_EPOCH);
        assert_eq!(parse_modified(Some("garbage")), SystemTime::UNIX_EPOCH);
        assert!(parse_modified(Some("2024-06-01T12:00:00Z")) > SystemTime::UNIX_EPOCH);
    }
}
