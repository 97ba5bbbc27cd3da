//! TaskStore - tracked task の正本（single source of truth）
//!
//! # 設計
//! - record は `IndexMap` に挿入順で持つ（UI の並び順が安定する）
//! - 変更はすべて [`TaskStore::batch`] の中で 1 回のロックとして行う
//!   → スナップショットの保存は 1 回、`TasksChanged` も 1 回
//! - ロック中に `.await` しない（fetch はロックの外で行う）
//! - consumer は `subscribe()` でイベントを受け取り、store の中身を直接触らない

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::domain::{StorageError, TaskEvent, TaskFamily, TaskId, TaskRecord};
use crate::ports::SessionStorage;

const EVENT_CAPACITY: usize = 256;

type Records = IndexMap<TaskId, TaskRecord>;

/// One atomic write against the store.
///
/// Changes made through a batch become visible, persisted and announced together.
pub struct Batch<'a> {
    records: &'a mut Records,
    changed: bool,
    events: Vec<TaskEvent>,
}

impl<'a> Batch<'a> {
    pub fn records(&self) -> &Records {
        self.records
    }

    /// Mutable access to the record map. Call [`Batch::mark_changed`] after editing.
    pub fn records_mut(&mut self) -> &mut Records {
        self.records
    }

    pub fn get_mut(&mut self, task_id: &TaskId) -> Option<&mut TaskRecord> {
        self.records.get_mut(task_id)
    }

    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    /// Queue a semantic event; it is sent after the write is committed.
    pub fn emit(&mut self, event: TaskEvent) {
        self.events.push(event);
    }
}

pub struct TaskStore {
    records: Mutex<Records>,
    storage: Arc<dyn SessionStorage>,
    storage_key: String,
    events: broadcast::Sender<TaskEvent>,
    active: watch::Sender<usize>,
    poller_claimed: AtomicBool,
}

impl TaskStore {
    /// Create a store and hydrate it from the session snapshot, if any.
    pub fn new(storage: Arc<dyn SessionStorage>, storage_key: impl Into<String>) -> Self {
        let storage_key = storage_key.into();
        let records = load_snapshot(storage.as_ref(), &storage_key);
        let active_count = records.values().filter(|r| r.is_active()).count();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (active, _) = watch::channel(active_count);
        Self {
            records: Mutex::new(records),
            storage,
            storage_key,
            events,
            active,
            poller_claimed: AtomicBool::new(false),
        }
    }

    /// Add records; a record whose ID is already present replaces it in place.
    pub fn add_tasks(&self, records: impl IntoIterator<Item = TaskRecord>) {
        self.batch(|batch| {
            for record in records {
                let id = record.task_id.clone();
                let previous = batch.records_mut().insert(id, record.clone());
                if previous.as_ref() != Some(&record) {
                    batch.mark_changed();
                }
            }
        });
    }

    /// Snapshot of every record in insertion order.
    pub fn list_tasks(&self) -> Vec<TaskRecord> {
        self.records.lock().values().cloned().collect()
    }

    pub fn get(&self, task_id: &TaskId) -> Option<TaskRecord> {
        self.records.lock().get(task_id).cloned()
    }

    /// Remove matching records; returns how many were removed.
    pub fn remove_tasks<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&TaskRecord) -> bool,
    {
        self.batch(|batch| {
            let before = batch.records().len();
            batch.records_mut().retain(|_, record| !predicate(record));
            let removed = before - batch.records().len();
            if removed > 0 {
                batch.mark_changed();
            }
            removed
        })
    }

    /// Real, non-terminal task IDs, optionally for one family.
    pub fn active_task_ids(&self, family: Option<TaskFamily>) -> Vec<TaskId> {
        self.records
            .lock()
            .values()
            .filter(|r| r.is_active() && family.is_none_or(|f| r.family == f))
            .map(|r| r.task_id.clone())
            .collect()
    }

    /// Active task IDs grouped by family.
    pub fn active_by_family(&self) -> BTreeMap<TaskFamily, Vec<TaskId>> {
        let mut partitions: BTreeMap<TaskFamily, Vec<TaskId>> = BTreeMap::new();
        for record in self.records.lock().values().filter(|r| r.is_active()) {
            partitions
                .entry(record.family)
                .or_default()
                .push(record.task_id.clone());
        }
        partitions
    }

    pub fn active_count(&self) -> usize {
        *self.active.borrow()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Number of active tasks, updated after every committed write.
    pub fn watch_active(&self) -> watch::Receiver<usize> {
        self.active.subscribe()
    }

    /// Run `f` as one atomic write.
    ///
    /// If the batch marked a change: the snapshot is persisted once, the active
    /// count is republished, then `TasksChanged` and any queued events are sent.
    ///
    /// Events are sent while the lock is still held, so two writers' events
    /// never interleave and every receiver sees them in commit order.
    pub fn batch<R>(&self, f: impl FnOnce(&mut Batch<'_>) -> R) -> R {
        let mut records = self.records.lock();
        let mut batch = Batch {
            records: &mut records,
            changed: false,
            events: Vec::new(),
        };
        let result = f(&mut batch);
        let Batch {
            changed, events, ..
        } = batch;

        if changed {
            if let Err(e) = self.persist(&records) {
                // 永続化の失敗で書き込み自体は失敗させない
                warn!(error = %e, key = %self.storage_key, "could not persist task snapshot");
            }
            let active_count = records.values().filter(|r| r.is_active()).count();
            self.active.send_if_modified(|current| {
                let modified = *current != active_count;
                *current = active_count;
                modified
            });
            // receiver がいなくてもエラーにしない
            let _ = self.events.send(TaskEvent::TasksChanged);
        }
        for event in events {
            let _ = self.events.send(event);
        }
        result
    }

    fn persist(&self, records: &Records) -> Result<(), StorageError> {
        let snapshot: Vec<&TaskRecord> = records.values().collect();
        let encoded = serde_json::to_string(&snapshot)?;
        self.storage.set_item(&self.storage_key, &encoded)
    }

    pub(crate) fn claim_poller(&self) -> bool {
        self.poller_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_poller(&self) {
        self.poller_claimed.store(false, Ordering::Release);
    }
}

/// Read the session snapshot. Anything undecodable is discarded.
fn load_snapshot(storage: &dyn SessionStorage, key: &str) -> Records {
    let raw = match storage.get_item(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Records::new(),
        Err(e) => {
            warn!(error = %e, key, "could not read task snapshot");
            return Records::new();
        }
    };
    match serde_json::from_str::<Vec<TaskRecord>>(&raw) {
        Ok(records) => {
            debug!(count = records.len(), "restored tracked tasks from session");
            records
                .into_iter()
                .map(|r| (r.task_id.clone(), r))
                .collect()
        }
        Err(e) => {
            warn!(error = %e, key, "discarding stale task snapshot");
            if let Err(e) = storage.remove_item(key) {
                warn!(error = %e, key, "could not remove stale task snapshot");
            }
            Records::new()
        }
    }
}
