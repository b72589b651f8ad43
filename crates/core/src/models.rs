use chrono::{DateTime, Utc};
use providers::{FailureKind, FileUpload, ScanVerdict};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Registry handle for one record. Assigned on append, unrelated to the
/// backend's scan id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub(crate) u64);

impl RecordId {
    pub(crate) const UNASSIGNED: RecordId = RecordId(0);

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Clean,
    Suspicious,
    Failed,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ScanStatus::Pending)
    }

    pub fn label(self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Clean => "clean",
            ScanStatus::Suspicious => "suspicious",
            ScanStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("record {id} is already {status}")]
    AlreadyTerminal { id: RecordId, status: ScanStatus },
    #[error("record {id} already carries scan id {existing}")]
    AlreadyUploaded { id: RecordId, existing: String },
    #[error("record {id} has no scan id to resolve")]
    NotUploaded { id: RecordId },
}

/// State of one submitted file's scan.
///
/// Fields are read-only outside this crate. Mutation goes through the
/// transition methods, which refuse to move a record out of a terminal
/// state and keep `threats`/`failure` consistent with `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanRecord {
    id: RecordId,
    file_name: String,
    file_size_bytes: u64,
    status: ScanStatus,
    submitted_at: DateTime<Utc>,
    scan_id: Option<String>,
    threats: Vec<String>,
    failure: Option<FailureKind>,
    resolved_at: Option<DateTime<Utc>>,
    content_hash: String,
    mime_type: Option<String>,
}

impl ScanRecord {
    /// A fresh `Pending` record for `upload`, stamped with the current time.
    pub fn pending(upload: &FileUpload) -> Self {
        Self {
            id: RecordId::UNASSIGNED,
            file_name: upload.file_name.clone(),
            file_size_bytes: upload.size_bytes,
            status: ScanStatus::Pending,
            submitted_at: Utc::now(),
            scan_id: None,
            threats: Vec::new(),
            failure: None,
            resolved_at: None,
            content_hash: blake3::hash(&upload.content).to_hex().to_string(),
            mime_type: infer::get(&upload.content).map(|t| t.mime_type().to_string()),
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_size_bytes(&self) -> u64 {
        self.file_size_bytes
    }

    pub fn status(&self) -> ScanStatus {
        self.status
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn scan_id(&self) -> Option<&str> {
        self.scan_id.as_deref()
    }

    pub fn threats(&self) -> &[String] {
        &self.threats
    }

    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// blake3 hex digest of the submitted bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub(crate) fn assign_id(&mut self, id: RecordId) {
        self.id = id;
    }

    fn ensure_pending(&self) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::AlreadyTerminal {
                id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    /// Upload accepted: remember the backend's scan id. Stays `Pending`.
    pub(crate) fn mark_uploaded(&mut self, scan_id: String) -> Result<(), TransitionError> {
        self.ensure_pending()?;
        if let Some(existing) = &self.scan_id {
            return Err(TransitionError::AlreadyUploaded {
                id: self.id,
                existing: existing.clone(),
            });
        }
        self.scan_id = Some(scan_id);
        Ok(())
    }

    /// Apply the backend verdict. Threats are only kept for malicious verdicts.
    pub(crate) fn complete(
        &mut self,
        verdict: ScanVerdict,
        at: DateTime<Utc>,
    ) -> Result<ScanStatus, TransitionError> {
        self.ensure_pending()?;
        if self.scan_id.is_none() {
            return Err(TransitionError::NotUploaded { id: self.id });
        }
        if verdict.is_malicious {
            self.status = ScanStatus::Suspicious;
            self.threats = verdict.threats;
        } else {
            self.status = ScanStatus::Clean;
            self.threats.clear();
        }
        self.resolved_at = Some(at);
        Ok(self.status)
    }

    /// Terminal failure. Any scan id already assigned is kept.
    pub(crate) fn fail(&mut self, kind: FailureKind, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.ensure_pending()?;
        self.status = ScanStatus::Failed;
        self.threats.clear();
        self.failure = Some(kind);
        self.resolved_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, bytes: &[u8]) -> ScanRecord {
        ScanRecord::pending(&FileUpload::new(name, bytes.to_vec()))
    }

    #[test]
    fn pending_record_captures_upload_metadata() {
        let r = record("doc.pdf", b"%PDF-1.7\n%stuff");
        assert_eq!(r.status(), ScanStatus::Pending);
        assert_eq!(r.file_name(), "doc.pdf");
        assert_eq!(r.file_size_bytes(), 15);
        assert_eq!(r.scan_id(), None);
        assert!(r.threats().is_empty());
        assert_eq!(r.mime_type(), Some("application/pdf"));
        assert_eq!(r.content_hash().len(), 64);
        assert!(r.resolved_at().is_none());
    }

    #[test]
    fn clean_verdict_drops_threat_strings() {
        let mut r = record("a.txt", b"hello");
        r.mark_uploaded("abc".into()).unwrap();
        let verdict = ScanVerdict {
            is_malicious: false,
            threats: vec!["Error analyzing file".into()],
        };
        assert_eq!(r.complete(verdict, Utc::now()).unwrap(), ScanStatus::Clean);
        assert!(r.threats().is_empty());
        assert!(r.failure().is_none());
    }

    #[test]
    fn malicious_verdict_keeps_threats() {
        let mut r = record("payload.exe", b"MZ");
        r.mark_uploaded("xyz789".into()).unwrap();
        let status = r
            .complete(ScanVerdict::malicious(["bad"]), Utc::now())
            .unwrap();
        assert_eq!(status, ScanStatus::Suspicious);
        assert_eq!(r.threats(), ["bad".to_string()]);
        assert!(r.resolved_at().is_some());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut r = record("a.txt", b"x");
        r.mark_uploaded("q1".into()).unwrap();
        r.fail(FailureKind::Timeout, Utc::now()).unwrap();
        assert_eq!(r.scan_id(), Some("q1"));

        let before = r.clone();
        assert!(matches!(
            r.complete(ScanVerdict::malicious(["late"]), Utc::now()),
            Err(TransitionError::AlreadyTerminal { status: ScanStatus::Failed, .. })
        ));
        assert!(r.fail(FailureKind::Transport, Utc::now()).is_err());
        assert!(r.mark_uploaded("other".into()).is_err());
        assert_eq!(r, before);
    }

    #[test]
    fn verdict_requires_scan_id() {
        let mut r = record("a.txt", b"x");
        assert!(matches!(
            r.complete(ScanVerdict::clean(), Utc::now()),
            Err(TransitionError::NotUploaded { .. })
        ));
        assert_eq!(r.status(), ScanStatus::Pending);
    }

    #[test]
    fn scan_id_assigned_once() {
        let mut r = record("a.txt", b"x");
        r.mark_uploaded("one".into()).unwrap();
        assert!(matches!(
            r.mark_uploaded("two".into()),
            Err(TransitionError::AlreadyUploaded { existing, .. }) if existing == "one"
        ));
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ScanStatus::Suspicious).unwrap(),
            "\"suspicious\""
        );
        assert!(ScanStatus::Failed.is_terminal());
        assert!(!ScanStatus::Pending.is_terminal());
    }
}
