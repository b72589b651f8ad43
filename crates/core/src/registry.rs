//! Ordered store of scan records, newest first.
//!
//! The registry is the only shared mutable state of the engine. All writes
//! take one lock, so a reader never sees a record with a new status but stale
//! threats. Every mutation bumps a version counter on a watch channel so
//! consumers can re-read the snapshot when something changed.

use crate::models::{RecordId, ScanRecord};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    /// Front is the most recent submission.
    order: VecDeque<RecordId>,
    records: HashMap<RecordId, ScanRecord>,
    next_id: u64,
    capacity: Option<usize>,
}

impl Inner {
    /// Drops the oldest terminal records until the registry fits its capacity.
    /// Pending records are never dropped, so the registry may stay above
    /// capacity while many scans are in flight.
    fn evict(&mut self) -> Vec<RecordId> {
        let Some(cap) = self.capacity else {
            return Vec::new();
        };
        let mut evicted = Vec::new();
        while self.order.len() > cap {
            let victim = self.order.iter().rposition(|id| {
                self.records
                    .get(id)
                    .map(|r| r.status().is_terminal())
                    .unwrap_or(true)
            });
            let Some(pos) = victim else { break };
            if let Some(id) = self.order.remove(pos) {
                self.records.remove(&id);
                evicted.push(id);
            }
        }
        evicted
    }
}

#[derive(Debug, Clone)]
pub struct ScanRegistry {
    inner: Arc<RwLock<Inner>>,
    changes: Arc<watch::Sender<u64>>,
}

impl Default for ScanRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanRegistry {
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// `capacity` bounds how many records are kept; `None` keeps everything.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        let (tx, _rx) = watch::channel(0u64);
        Self {
            inner: Arc::new(RwLock::new(Inner {
                capacity,
                ..Inner::default()
            })),
            changes: Arc::new(tx),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }

    /// Inserts `record` at the head and returns its handle.
    pub fn append(&self, mut record: ScanRecord) -> RecordId {
        let (id, evicted) = {
            let mut inner = self.write();
            inner.next_id += 1;
            let id = RecordId(inner.next_id);
            record.assign_id(id);
            inner.order.push_front(id);
            inner.records.insert(id, record);
            (id, inner.evict())
        };
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted settled scan records");
        }
        self.notify();
        id
    }

    /// Runs `mutator` on the record behind `id` under the write lock.
    /// Returns `None` when no such record exists. Ordering is untouched.
    pub fn update<F, T>(&self, id: RecordId, mutator: F) -> Option<T>
    where
        F: FnOnce(&mut ScanRecord) -> T,
    {
        let out = {
            let mut inner = self.write();
            inner.records.get_mut(&id).map(mutator)
        };
        if out.is_some() {
            self.notify();
        }
        out
    }

    pub fn get(&self, id: RecordId) -> Option<ScanRecord> {
        self.read().records.get(&id).cloned()
    }

    /// Point-in-time copy of every record, newest first.
    pub fn snapshot(&self) -> Vec<ScanRecord> {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_count(&self) -> usize {
        self.read()
            .records
            .values()
            .filter(|r| !r.status().is_terminal())
            .count()
    }

    /// Change feed: the value is a counter bumped after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScanStatus;
    use chrono::Utc;
    use providers::{FailureKind, FileUpload, ScanVerdict};

    fn pending(name: &str) -> ScanRecord {
        ScanRecord::pending(&FileUpload::new(name, name.as_bytes().to_vec()))
    }

    fn names(reg: &ScanRegistry) -> Vec<String> {
        reg.snapshot()
            .iter()
            .map(|r| r.file_name().to_string())
            .collect()
    }

    fn settle(reg: &ScanRegistry, id: RecordId) {
        reg.update(id, |r| r.fail(FailureKind::Transport, Utc::now()))
            .unwrap()
            .unwrap();
    }

    #[test]
    fn append_inserts_at_head_with_distinct_ids() {
        let reg = ScanRegistry::new();
        let a = reg.append(pending("a"));
        let b = reg.append(pending("b"));
        let c = reg.append(pending("c"));
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(names(&reg), vec!["c", "b", "a"]);
        assert_eq!(reg.get(b).unwrap().id(), b);
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn update_changes_one_record_in_place() {
        let reg = ScanRegistry::new();
        let a = reg.append(pending("a"));
        let b = reg.append(pending("b"));
        reg.update(a, |r| {
            r.mark_uploaded("s-a".into())?;
            r.complete(ScanVerdict::malicious(["t"]), Utc::now())
        })
        .unwrap()
        .unwrap();

        let snap = reg.snapshot();
        assert_eq!(names(&reg), vec!["b", "a"]);
        assert_eq!(snap[1].status(), ScanStatus::Suspicious);
        assert_eq!(snap[0].status(), ScanStatus::Pending);
        assert_eq!(reg.get(b).unwrap().scan_id(), None);
        assert_eq!(reg.pending_count(), 1);
    }

    #[test]
    fn update_unknown_handle_is_none() {
        let reg = ScanRegistry::new();
        assert!(reg.update(RecordId(99), |_| ()).is_none());
    }

    #[test]
    fn snapshot_is_detached_from_later_updates() {
        let reg = ScanRegistry::new();
        let a = reg.append(pending("a"));
        let before = reg.snapshot();
        settle(&reg, a);
        assert_eq!(before[0].status(), ScanStatus::Pending);
        assert_eq!(reg.snapshot()[0].status(), ScanStatus::Failed);
    }

    #[test]
    fn eviction_drops_oldest_settled_only() {
        let reg = ScanRegistry::with_capacity(Some(2));
        let a = reg.append(pending("a"));
        let b = reg.append(pending("b"));
        // Nothing settled yet: stays over capacity.
        reg.append(pending("c"));
        assert_eq!(reg.len(), 3);

        settle(&reg, b);
        reg.append(pending("d"));
        // b was the only settled record; a is still pending.
        assert_eq!(names(&reg), vec!["d", "c", "a"]);
        assert!(reg.get(b).is_none());

        settle(&reg, a);
        reg.append(pending("e"));
        assert_eq!(names(&reg), vec!["e", "d", "c"]);
    }

    #[tokio::test]
    async fn subscribers_see_every_mutation() {
        let reg = ScanRegistry::new();
        let mut rx = reg.subscribe();
        let a = reg.append(pending("a"));
        rx.changed().await.unwrap();
        let after_append = *rx.borrow_and_update();
        settle(&reg, a);
        rx.changed().await.unwrap();
        assert!(*rx.borrow() > after_append);
    }
}
