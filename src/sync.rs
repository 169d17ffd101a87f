//! Incremental sync engine.
//!
//! Diffs the remote listing against the local manifest, fetches new/changed
//! entries atomically (temp-then-rename), garbage-collects files gone from
//! the remote, and best-effort triggers a clock sync after each pass. The
//! engine is stateless between calls apart from the filesystem it mutates.

use crate::manifest::{self, LocalEntry, PARTIAL_DIR};
use crate::provider::{RemoteEntry, RemoteProvider};
use crate::supervisor::Supervisor;
use crate::timesync;
use crate::error::SyncError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Minimal work for one pass, computed from a single consistent snapshot
/// pair. `to_fetch` and `to_delete` are disjoint by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub to_fetch: Vec<String>,
    pub to_delete: Vec<String>,
}

impl SyncPlan {
    /// A name is fetched iff it is absent locally or its remote size differs;
    /// deleted iff present locally but absent remotely. Size is the only
    /// change signal (no hashing): two different contents of identical byte
    /// length will not be re-fetched.
    pub fn compute(remote: &[RemoteEntry], local: &[LocalEntry]) -> Self {
        let local_sizes: HashMap<&str, u64> =
            local.iter().map(|e| (e.name.as_str(), e.size)).collect();

        let mut to_fetch: Vec<String> = remote
            .iter()
            .filter(|r| local_sizes.get(r.name.as_str()) != Some(&r.size))
            .map(|r| r.name.clone())
            .collect();

        let remote_names: std::collections::HashSet<&str> =
            remote.iter().map(|r| r.name.as_str()).collect();
        let mut to_delete: Vec<String> = local
            .iter()
            .filter(|l| !remote_names.contains(l.name.as_str()))
            .map(|l| l.name.clone())
            .collect();

        to_fetch.sort();
        to_delete.sort();
        Self { to_fetch, to_delete }
    }
}

/// Outcome of one sync pass.
#[derive(Debug, Default, Clone)]
pub struct SyncResult {
    pub fetched: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: Vec<(String, String)>,
}

pub struct SyncEngine {
    provider: Arc<dyn RemoteProvider>,
    cache_dir: PathBuf,
    supported_formats: Vec<String>,
    supervisor: Arc<Supervisor>,
    sync_system_time: bool,
    clock_timeout: Duration,
}

impl SyncEngine {
    pub fn new(
        provider: Arc<dyn RemoteProvider>,
        cache_dir: PathBuf,
        supported_formats: Vec<String>,
        supervisor: Arc<Supervisor>,
        sync_system_time: bool,
        clock_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            cache_dir,
            supported_formats,
            supervisor,
            sync_system_time,
            clock_timeout,
        }
    }

    /// Run one sync pass.
    ///
    /// `ProviderUnavailable` aborts the pass and the previous manifest stays
    /// authoritative; a failed single-entry fetch is recorded and the
    /// remaining entries are still processed.
    pub async fn synchronize(&self) -> Result<SyncResult, SyncError> {
        let partial_dir = self.cache_dir.join(PARTIAL_DIR);
        tokio::fs::create_dir_all(&partial_dir)
            .await
            .map_err(|e| SyncError::ProviderUnavailable(format!("cache dir: {e}")))?;
        remove_stale_partials(&partial_dir).await;

        let mut remote = self.provider.list().await?;
        remote.retain(|entry| self.is_acceptable(&entry.name));
        let remote_sizes: HashMap<String, u64> = remote
            .iter()
            .map(|r| (r.name.clone(), r.size))
            .collect();

        let local = manifest::scan(&self.cache_dir, &self.supported_formats);
        let plan = SyncPlan::compute(&remote, &local);
        tracing::debug!(
            fetch = plan.to_fetch.len(),
            delete = plan.to_delete.len(),
            "computed sync plan"
        );

        let mut result = SyncResult {
            skipped: remote.len() - plan.to_fetch.len(),
            ..Default::default()
        };

        for name in &plan.to_fetch {
            let expected = remote_sizes[name];
            match self.fetch_one(name, expected, &partial_dir).await {
                Ok(()) => {
                    tracing::info!("fetched {name} ({expected} bytes)");
                    result.fetched += 1;
                }
                Err(reason) => {
                    tracing::warn!("fetch of {name} failed: {reason}");
                    result.failed.push((name.clone(), reason));
                }
            }
        }

        for name in &plan.to_delete {
            let path = self.cache_dir.join(name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::info!("deleted {name} (gone from remote)");
                    result.deleted += 1;
                }
                Err(e) => {
                    tracing::warn!("delete of {name} failed: {e}");
                    result.failed.push((name.clone(), e.to_string()));
                }
            }
        }

        if self.sync_system_time {
            let outcome = timesync::sync_clock(&self.supervisor, self.clock_timeout).await;
            tracing::info!(synced = outcome.succeeded(), "clock sync pass: {outcome}");
        }

        tracing::info!(
            fetched = result.fetched,
            deleted = result.deleted,
            skipped = result.skipped,
            failed = result.failed.len(),
            "sync pass complete"
        );
        Ok(result)
    }

    /// Fetch one entry into the partial dir, verify the byte count against
    /// the remote size, then rename into place. A short or failed transfer
    /// never becomes visible under the final name.
    async fn fetch_one(
        &self,
        name: &str,
        expected_size: u64,
        partial_dir: &Path,
    ) -> Result<(), String> {
        let partial = partial_dir.join(format!("{name}.part"));
        let final_path = self.cache_dir.join(name);

        let written = match self.provider.fetch(name, &partial).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e.to_string());
            }
        };

        if written != expected_size {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(format!(
                "incomplete transfer: got {written} bytes, expected {expected_size}"
            ));
        }

        tokio::fs::rename(&partial, &final_path)
            .await
            .map_err(|e| e.to_string())
    }

    /// Supported extension, plain name. Names carrying path separators or a
    /// leading dot never touch the cache dir.
    fn is_acceptable(&self, name: &str) -> bool {
        if name.starts_with('.') || name.contains('/') || name.contains('\\') {
            return false;
        }
        let lower = name.to_ascii_lowercase();
        self.supported_formats
            .iter()
            .any(|ext| lower.ends_with(&ext.to_ascii_lowercase()))
    }
}

/// Drop leftovers from an interrupted earlier pass.
async fn remove_stale_partials(partial_dir: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(partial_dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Err(e) = tokio::fs::remove_file(entry.path()).await {
            tracing::debug!("could not remove stale partial {:?}: {e}", entry.path());
        }
    }
}
