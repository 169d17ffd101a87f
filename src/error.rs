//! Typed error kinds for the sync, media, and helper subsystems.
//!
//! Application seams still use `anyhow::Result`; these enums exist where the
//! caller needs to branch on the failure kind (skip vs. abort vs. default).

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the remote provider and the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote listing could not be obtained. The sync pass aborts and the
    /// previous local manifest stays authoritative until the next cycle.
    #[error("remote provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// A single entry failed to transfer. Other entries are still processed.
    #[error("fetch failed for '{name}': {reason}")]
    Fetch { name: String, reason: String },
}

impl SyncError {
    pub fn fetch(name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SyncError::Fetch {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors from decoding media files.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("cannot decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("unsupported media format: {path}")]
    UnsupportedFormat { path: PathBuf },
}

/// Errors from helper process invocation.
#[derive(Error, Debug)]
pub enum HelperError {
    /// The helper did not finish within its deadline. It has been terminated
    /// and reaped; callers treat this as a non-fatal miss.
    #[error("helper '{program}' timed out after {timeout_secs}s")]
    Timeout { program: String, timeout_secs: u64 },

    #[error("failed to spawn helper '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("helper '{program}' exited with {status}")]
    Exit { program: String, status: String },
}
