//! In-process backend with scripted outcomes and simulated latency.

use crate::{FileUpload, ResolveError, ScanBackend, ScanVerdict, Submission, UploadError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub const EXECUTABLE_THREAT: &str = "Suspicious executable pattern detected";

const EXECUTABLE_MAGIC: &[&[u8]] = &[b"MZ", b"\x7fELF", b"#!"];

/// What the mock does for one file name.
#[derive(Debug, Clone, Default)]
pub struct ScanScript {
    scan_id: Option<String>,
    upload_error: Option<UploadError>,
    /// Consumed in order, one per resolve call; the last entry repeats.
    resolves: Vec<Result<ScanVerdict, ResolveError>>,
    upload_delay: Option<Duration>,
    resolve_delay: Option<Duration>,
    panic_on_resolve: bool,
}

impl ScanScript {
    pub fn accept(scan_id: impl Into<String>) -> Self {
        Self {
            scan_id: Some(scan_id.into()),
            ..Self::default()
        }
    }

    pub fn reject_upload(err: UploadError) -> Self {
        Self {
            upload_error: Some(err),
            ..Self::default()
        }
    }

    pub fn then(mut self, outcome: Result<ScanVerdict, ResolveError>) -> Self {
        self.resolves.push(outcome);
        self
    }

    pub fn verdict(self, verdict: ScanVerdict) -> Self {
        self.then(Ok(verdict))
    }

    pub fn resolve_error(self, err: ResolveError) -> Self {
        self.then(Err(err))
    }

    pub fn upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = Some(delay);
        self
    }

    pub fn resolve_delay(mut self, delay: Duration) -> Self {
        self.resolve_delay = Some(delay);
        self
    }

    pub fn panic_on_resolve(mut self) -> Self {
        self.panic_on_resolve = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Submit { file_name: String },
    Resolve { scan_id: String },
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<MockCall>,
    /// scan id -> (script, resolve calls so far, verdict for unscripted scans)
    scans: HashMap<String, (ScanScript, usize, ScanVerdict)>,
}

#[derive(Debug, Default)]
pub struct MockScanBackend {
    scripts: HashMap<String, ScanScript>,
    latency: Duration,
    timeout: Option<Duration>,
    flag_executables: bool,
    next_id: AtomicU64,
    state: Mutex<MockState>,
}

impl MockScanBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default delay for every call that has no scripted delay.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Calls whose delay exceeds this fail with a timeout error after it elapses.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Unscripted uploads starting with an executable header come back malicious.
    pub fn flag_executables(mut self, on: bool) -> Self {
        self.flag_executables = on;
        self
    }

    pub fn script(mut self, file_name: &str, script: ScanScript) -> Self {
        self.scripts.insert(file_name.to_string(), script);
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn submit_count(&self, file_name: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, MockCall::Submit { file_name: f } if f == file_name))
            .count()
    }

    pub fn resolve_count(&self, scan_id: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, MockCall::Resolve { scan_id: s } if s == scan_id))
            .count()
    }

    pub fn total_resolves(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, MockCall::Resolve { .. }))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sleeps for `delay`, or returns false once the configured timeout elapses first.
    async fn wait(&self, delay: Option<Duration>) -> bool {
        let delay = delay.unwrap_or(self.latency);
        if delay.is_zero() {
            return true;
        }
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, tokio::time::sleep(delay))
                .await
                .is_ok(),
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }

    fn default_verdict(&self, upload: &FileUpload) -> ScanVerdict {
        let executable = EXECUTABLE_MAGIC
            .iter()
            .any(|magic| upload.content.starts_with(magic));
        if self.flag_executables && executable {
            ScanVerdict::malicious([EXECUTABLE_THREAT])
        } else {
            ScanVerdict::clean()
        }
    }
}

#[async_trait::async_trait]
impl ScanBackend for MockScanBackend {
    async fn submit(&self, upload: &FileUpload) -> Result<Submission, UploadError> {
        self.lock().calls.push(MockCall::Submit {
            file_name: upload.file_name.clone(),
        });
        let script = self
            .scripts
            .get(&upload.file_name)
            .cloned()
            .unwrap_or_default();

        if !self.wait(script.upload_delay).await {
            return Err(UploadError::Timeout);
        }
        if let Some(err) = script.upload_error.clone() {
            return Err(err);
        }

        let scan_id = script.scan_id.clone().unwrap_or_else(|| {
            format!("mock-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
        });
        let fallback = self.default_verdict(upload);
        self.lock()
            .scans
            .insert(scan_id.clone(), (script, 0, fallback));
        Ok(Submission { scan_id })
    }

    async fn resolve(&self, scan_id: &str) -> Result<ScanVerdict, ResolveError> {
        let (outcome, delay, panic) = {
            let mut state = self.lock();
            state.calls.push(MockCall::Resolve {
                scan_id: scan_id.to_string(),
            });
            let Some((script, seen, fallback)) = state.scans.get_mut(scan_id) else {
                return Err(ResolveError::UnknownScan(scan_id.to_string()));
            };
            let outcome = script
                .resolves
                .get(*seen)
                .or_else(|| script.resolves.last())
                .cloned()
                .unwrap_or_else(|| Ok(fallback.clone()));
            *seen += 1;
            (outcome, script.resolve_delay, script.panic_on_resolve)
        };

        if !self.wait(delay).await {
            return Err(ResolveError::Timeout);
        }
        if panic {
            panic!("scripted resolve panic for {scan_id}");
        }
        outcome
    }
}
