//! Scan orchestration engine.
//!
//! Every submission becomes an independent background workflow:
//! upload, then resolve, then one terminal update in the registry. Backend
//! errors never escape a workflow; they end the record as `Failed`.

use crate::models::{RecordId, ScanRecord, TransitionError};
use crate::registry::ScanRegistry;
use chrono::Utc;
use providers::{FailureKind, FileUpload, ResolveError, ScanBackend, ScanVerdict};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// How the resolve phase treats a backend that is still scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Resolve calls per scan, at least one. `1` means single-shot.
    pub max_attempts: u32,
    /// Pause between attempts after a not-ready answer.
    pub interval: Duration,
    /// Upper bound on the whole resolve phase.
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            interval: Duration::from_millis(1500),
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub poll: PollPolicy,
    /// Concurrent workflows allowed past the upload gate; `None` is unbounded.
    pub max_in_flight: Option<usize>,
    /// Registry capacity; `None` keeps every record for the session.
    pub registry_capacity: Option<usize>,
}

#[derive(Clone)]
pub struct ScanOrchestrator {
    backend: Arc<dyn ScanBackend>,
    registry: ScanRegistry,
    poll: Arc<PollPolicy>,
    permits: Option<Arc<Semaphore>>,
}

impl ScanOrchestrator {
    pub fn new(backend: Arc<dyn ScanBackend>) -> Self {
        Self::with_settings(backend, OrchestratorSettings::default())
    }

    pub fn with_settings(backend: Arc<dyn ScanBackend>, settings: OrchestratorSettings) -> Self {
        Self {
            backend,
            registry: ScanRegistry::with_capacity(settings.registry_capacity),
            poll: Arc::new(settings.poll),
            permits: settings
                .max_in_flight
                .map(|n| Arc::new(Semaphore::new(n.max(1)))),
        }
    }

    /// Registers a `Pending` record for `upload` and starts its workflow in
    /// the background. Returns as soon as the record is in the registry.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, upload: FileUpload) -> RecordId {
        let id = self.registry.append(ScanRecord::pending(&upload));
        info!(record = %id, file = %upload.file_name, size = upload.size_bytes, "scan submitted");

        let workflow = Workflow {
            id,
            backend: self.backend.clone(),
            registry: self.registry.clone(),
            poll: self.poll.clone(),
            permits: self.permits.clone(),
        };
        let registry = self.registry.clone();
        let task = tokio::spawn(workflow.run(upload));
        tokio::spawn(async move {
            if let Err(err) = task.await {
                warn!(record = %id, error = %err, "scan workflow aborted");
                // Only lands if the workflow died before its terminal update.
                let _ = registry.update(id, |r| r.fail(FailureKind::Aborted, Utc::now()));
            }
        });
        id
    }

    /// Ordered copy of all records, newest first.
    pub fn snapshot(&self) -> Vec<ScanRecord> {
        self.registry.snapshot()
    }

    pub fn record(&self, id: RecordId) -> Option<ScanRecord> {
        self.registry.get(id)
    }

    pub fn in_flight(&self) -> usize {
        self.registry.pending_count()
    }

    /// Change feed for the registry; see [`ScanRegistry::subscribe`].
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.registry.subscribe()
    }

    /// Waits until the record reaches a terminal state. `None` if the handle
    /// is unknown or the record was evicted.
    pub async fn wait_for(&self, id: RecordId) -> Option<ScanRecord> {
        let mut changes = self.registry.subscribe();
        loop {
            match self.registry.get(id) {
                Some(record) if record.status().is_terminal() => return Some(record),
                None => return None,
                Some(_) => {}
            }
            if changes.changed().await.is_err() {
                return self.registry.get(id);
            }
        }
    }

    /// Waits until no record is `Pending`.
    pub async fn wait_idle(&self) {
        let mut changes = self.registry.subscribe();
        while self.registry.pending_count() > 0 {
            if changes.changed().await.is_err() {
                return;
            }
        }
    }
}

struct Workflow {
    id: RecordId,
    backend: Arc<dyn ScanBackend>,
    registry: ScanRegistry,
    poll: Arc<PollPolicy>,
    permits: Option<Arc<Semaphore>>,
}

impl Workflow {
    async fn run(self, upload: FileUpload) {
        let _permit = match self.admit().await {
            Ok(permit) => permit,
            Err(()) => {
                self.fail(FailureKind::Aborted);
                return;
            }
        };

        let scan_id = match self.backend.submit(&upload).await {
            Ok(submission) => submission.scan_id,
            Err(err) => {
                warn!(record = %self.id, file = %upload.file_name, error = %err, "upload failed");
                self.fail(err.kind());
                return;
            }
        };
        debug!(record = %self.id, scan_id = %scan_id, "upload accepted");
        self.apply(|r| r.mark_uploaded(scan_id.clone()));

        match self.resolve(&scan_id).await {
            Ok(verdict) => {
                if let Some(status) = self.apply(|r| r.complete(verdict, Utc::now())) {
                    info!(record = %self.id, scan_id = %scan_id, status = %status, "scan resolved");
                }
            }
            Err(err) => {
                warn!(record = %self.id, scan_id = %scan_id, error = %err, "resolve failed");
                self.fail(err.kind());
            }
        }
    }

    async fn admit(&self) -> Result<Option<OwnedSemaphorePermit>, ()> {
        match &self.permits {
            Some(sem) => sem.clone().acquire_owned().await.map(Some).map_err(|_| ()),
            None => Ok(None),
        }
    }

    async fn resolve(&self, scan_id: &str) -> Result<ScanVerdict, ResolveError> {
        let attempts = self.poll.max_attempts.max(1);
        let poll = async {
            let mut attempt = 1;
            loop {
                match self.backend.resolve(scan_id).await {
                    Err(err) if err.is_not_ready() && attempt < attempts => {
                        debug!(record = %self.id, scan_id, attempt, "scan still running");
                        attempt += 1;
                        tokio::time::sleep(self.poll.interval).await;
                    }
                    outcome => return outcome,
                }
            }
        };
        match self.poll.deadline {
            Some(limit) => tokio::time::timeout(limit, poll)
                .await
                .unwrap_or(Err(ResolveError::Timeout)),
            None => poll.await,
        }
    }

    fn fail(&self, kind: FailureKind) {
        self.apply(|r| r.fail(kind, Utc::now()));
    }

    fn apply<T, F>(&self, transition: F) -> Option<T>
    where
        F: FnOnce(&mut ScanRecord) -> Result<T, TransitionError>,
    {
        match self.registry.update(self.id, transition) {
            Some(Ok(out)) => Some(out),
            Some(Err(err)) => {
                warn!(record = %self.id, error = %err, "transition rejected");
                None
            }
            None => {
                debug!(record = %self.id, "record no longer in registry");
                None
            }
        }
    }
}
