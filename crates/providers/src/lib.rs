//! Scanning backend abstractions.
//!
//! A backend accepts file uploads and later reports the verdict for a scan id.
//! Backends are stateless request/response boundaries: one call is one request,
//! and any retry or polling cadence belongs to the caller.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod http;
pub mod mock;

/// Why a scan ended up `Failed`. Kept on the record for observability only;
/// every kind leads to the same terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Transport,
    Rejected,
    UnknownScan,
    BackendFailure,
    Malformed,
    /// Backend still reported the scan as running when polling gave up.
    Incomplete,
    /// The workflow task died before reaching a verdict.
    Aborted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Transport => "transport",
            FailureKind::Rejected => "rejected",
            FailureKind::UnknownScan => "unknown_scan",
            FailureKind::BackendFailure => "backend_failure",
            FailureKind::Malformed => "malformed",
            FailureKind::Incomplete => "incomplete",
            FailureKind::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error)]
pub enum UploadError {
    #[error("upload timed out")]
    Timeout,
    #[error("upload transport failed: {0}")]
    Transport(String),
    #[error("upload rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed upload response: {0}")]
    Malformed(String),
}

impl UploadError {
    pub fn kind(&self) -> FailureKind {
        match self {
            UploadError::Timeout => FailureKind::Timeout,
            UploadError::Transport(_) => FailureKind::Transport,
            UploadError::Rejected { .. } => FailureKind::Rejected,
            UploadError::Malformed(_) => FailureKind::Malformed,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("resolve timed out")]
    Timeout,
    #[error("resolve transport failed: {0}")]
    Transport(String),
    #[error("unknown scan id: {0}")]
    UnknownScan(String),
    #[error("backend reported scan failure: {0}")]
    ScanFailed(String),
    #[error("malformed resolve response: {0}")]
    Malformed(String),
    #[error("scan not finished yet (status {0})")]
    NotReady(String),
}

impl ResolveError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ResolveError::Timeout => FailureKind::Timeout,
            ResolveError::Transport(_) => FailureKind::Transport,
            ResolveError::UnknownScan(_) => FailureKind::UnknownScan,
            ResolveError::ScanFailed(_) => FailureKind::BackendFailure,
            ResolveError::Malformed(_) => FailureKind::Malformed,
            ResolveError::NotReady(_) => FailureKind::Incomplete,
        }
    }

    /// Whether asking again later could produce a verdict.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, ResolveError::NotReady(_))
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown backend: {0}")]
    UnknownBackend(String),
    #[error("backend setup failed: {0}")]
    Setup(String),
}

/// File content handed over by the host, together with the metadata the
/// backend needs to accept it.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub size_bytes: u64,
    pub content: Bytes,
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self {
            file_name: file_name.into(),
            size_bytes: content.len() as u64,
            content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub scan_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanVerdict {
    pub is_malicious: bool,
    pub threats: Vec<String>,
}

impl ScanVerdict {
    pub fn clean() -> Self {
        Self {
            is_malicious: false,
            threats: Vec::new(),
        }
    }

    pub fn malicious<I, S>(threats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            is_malicious: true,
            threats: threats.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait::async_trait]
pub trait ScanBackend: Send + Sync {
    /// Upload file content; returns the backend's scan id on acceptance.
    async fn submit(&self, upload: &FileUpload) -> Result<Submission, UploadError>;

    /// Fetch the outcome for a scan id. A single request, no internal retry.
    async fn resolve(&self, scan_id: &str) -> Result<ScanVerdict, ResolveError>;
}

#[derive(Default, Clone)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn ScanBackend>>,
    pub preferred: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, name: &str, backend: Arc<dyn ScanBackend>) -> Self {
        self.backends.insert(name.to_string(), backend);
        self
    }

    pub fn set_preferred(mut self, name: &str) -> Self {
        self.preferred = Some(name.to_string());
        self
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn backend(&self, name: Option<&str>) -> Result<Arc<dyn ScanBackend>, ProviderError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred.clone())
            .ok_or_else(|| ProviderError::UnknownBackend("no scan backend configured".into()))?;
        self.backends
            .get(&key)
            .cloned()
            .ok_or(ProviderError::UnknownBackend(key))
    }
}
