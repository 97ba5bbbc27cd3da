//! ReconciliationEngine - サーバーの状態を store に取り込む
//!
//! # 1 cycle のフロー
//! 1. active な real ID を family ごとに分ける
//! 2. family ごとに fetch（並行、ロックの外）
//! 3. wire status を lifecycle で正規化し、前進する変化だけを 1 回の batch で反映
//! 4. terminal に到達した task ごとに `TaskCompleted` / `TaskFailed`
//! 5. 完了した task ごとに refresh hook を 1 回呼ぶ
//!
//! fetch に失敗した family は何も変更しない（次の cycle でリトライ）。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::registry::FamilyRegistry;
use super::store::TaskStore;
use crate::domain::{
    ContainerRef, FetchError, TaskEvent, TaskFamily, TaskId, TerminalOutcome,
};
use crate::ports::{Clock, RefreshHook, StatusReport};

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// IDs sent to fetchers.
    pub polled: usize,
    /// Records whose status or progress changed.
    pub updated: usize,
    pub completed: usize,
    pub failed: usize,
    /// Families whose fetch failed this cycle.
    pub skipped_families: Vec<TaskFamily>,
    /// Another cycle was still running; nothing was done.
    pub skipped: bool,
}

pub struct ReconciliationEngine {
    store: Arc<TaskStore>,
    registry: Arc<FamilyRegistry>,
    clock: Arc<dyn Clock>,
    refresh: Arc<dyn RefreshHook>,
    in_flight: AtomicBool,
}

type FetchOutcome = (TaskFamily, usize, Result<HashMap<TaskId, StatusReport>, FetchError>);

impl ReconciliationEngine {
    pub fn new(
        store: Arc<TaskStore>,
        registry: Arc<FamilyRegistry>,
        clock: Arc<dyn Clock>,
        refresh: Arc<dyn RefreshHook>,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            refresh,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Run one poll-and-merge cycle.
    ///
    /// Cycles never overlap: a call made while another is running returns a
    /// report with `skipped` set.
    pub async fn run_cycle(&self) -> CycleReport {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("previous cycle still running, skipping");
            return CycleReport {
                skipped: true,
                ..CycleReport::default()
            };
        }
        let _guard = InFlight(&self.in_flight);

        let partitions = self.store.active_by_family();
        if partitions.is_empty() {
            return CycleReport::default();
        }

        let fetches = partitions.into_iter().filter_map(|(family, ids)| {
            let Some(entry) = self.registry.get(family) else {
                warn!(%family, count = ids.len(), "no fetcher registered, tasks will not progress");
                return None;
            };
            let fetcher = entry.fetcher.clone();
            Some(async move {
                let result = fetcher.fetch_statuses(&ids).await;
                (family, ids.len(), result)
            })
        });
        let outcomes: Vec<FetchOutcome> = join_all(fetches).await;

        let mut report = CycleReport::default();
        let mut fetched: Vec<(TaskFamily, HashMap<TaskId, StatusReport>)> = Vec::new();
        for (family, count, result) in outcomes {
            report.polled += count;
            match result {
                Ok(reports) => fetched.push((family, reports)),
                Err(e) => {
                    warn!(%family, error = %e, kind = ?e.kind(), "status fetch failed, keeping records as they are");
                    report.skipped_families.push(family);
                }
            }
        }

        let refreshes = self.apply(fetched, &mut report);
        for (family, container) in refreshes {
            self.refresh.refresh(family, container.as_ref());
        }

        debug!(
            polled = report.polled,
            updated = report.updated,
            completed = report.completed,
            failed = report.failed,
            "reconciliation cycle finished"
        );
        report
    }

    /// Merge fetched reports in one store batch; returns the refreshes to run.
    fn apply(
        &self,
        fetched: Vec<(TaskFamily, HashMap<TaskId, StatusReport>)>,
        report: &mut CycleReport,
    ) -> Vec<(TaskFamily, Option<ContainerRef>)> {
        let now = self.clock.now();
        let mut refreshes = Vec::new();

        self.store.batch(|batch| {
            for (family, reports) in fetched {
                let Some(entry) = self.registry.get(family) else {
                    continue;
                };
                let lifecycle = &entry.lifecycle;

                for (task_id, wire) in reports {
                    // fetch 中に消された record は復活させない
                    let Some(record) = batch.get_mut(&task_id) else {
                        debug!(%task_id, "record removed while fetching, ignoring report");
                        continue;
                    };
                    if record.is_terminal() {
                        continue;
                    }
                    let Some(status) = lifecycle.parse_wire(&wire.status) else {
                        debug!(%task_id, wire = %wire.status, "unknown status for this family, ignoring");
                        continue;
                    };

                    let advances = lifecycle.can_transition(record.status, status);
                    let progress_only = status == record.status
                        && wire.progress.is_some()
                        && wire.progress != record.progress;
                    if !advances && !progress_only {
                        if status != record.status {
                            debug!(%task_id, from = %record.status, to = %status, "backward move ignored");
                        }
                        continue;
                    }

                    record.observe(status, wire.progress, wire.message, wire.error, now);
                    let record = record.clone();
                    batch.mark_changed();
                    report.updated += 1;

                    match lifecycle.outcome(status) {
                        Some(TerminalOutcome::Success) => {
                            info!(%task_id, %family, label = %record.subject_label, "task completed");
                            report.completed += 1;
                            refreshes.push((family, record.container_ref.clone()));
                            batch.emit(TaskEvent::completed(&record));
                        }
                        Some(TerminalOutcome::Failure) => {
                            info!(
                                %task_id,
                                %family,
                                status = %record.status,
                                error = record.error.as_deref().unwrap_or("-"),
                                "task failed"
                            );
                            report.failed += 1;
                            batch.emit(TaskEvent::failed(&record));
                        }
                        None => {}
                    }
                }
            }
        });

        refreshes
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskRecord, TaskStatus};
    use crate::impls::{InMemorySessionStorage, ScriptedStatusFetcher};
    use crate::ports::SystemClock;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use tokio::sync::broadcast;

    #[derive(Default)]
    struct RecordingRefresh {
        calls: Mutex<Vec<(TaskFamily, Option<ContainerRef>)>>,
    }

    impl RefreshHook for RecordingRefresh {
        fn refresh(&self, family: TaskFamily, container: Option<&ContainerRef>) {
            self.calls.lock().push((family, container.cloned()));
        }
    }

    struct Fixture {
        store: Arc<TaskStore>,
        etl: Arc<ScriptedStatusFetcher>,
        import: Arc<ScriptedStatusFetcher>,
        refresh: Arc<RecordingRefresh>,
        engine: ReconciliationEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(TaskStore::new(
            Arc::new(InMemorySessionStorage::new()),
            "test.tasks",
        ));
        let etl = Arc::new(ScriptedStatusFetcher::new());
        let import = Arc::new(ScriptedStatusFetcher::new());
        let mut registry = FamilyRegistry::new();
        registry.register(TaskFamily::DocumentEtl, etl.clone()).unwrap();
        registry.register(TaskFamily::SaasImport, import.clone()).unwrap();
        let refresh = Arc::new(RecordingRefresh::default());
        let engine = ReconciliationEngine::new(
            store.clone(),
            Arc::new(registry),
            Arc::new(SystemClock),
            refresh.clone(),
        );
        Fixture {
            store,
            etl,
            import,
            refresh,
            engine,
        }
    }

    fn track(store: &TaskStore, id: &str, family: TaskFamily) -> TaskId {
        let task_id: TaskId = id.parse().unwrap();
        store.add_tasks([TaskRecord::new(
            task_id.clone(),
            family,
            format!("{id}.pdf"),
            Some("project-1".parse().unwrap()),
            chrono::Utc::now(),
        )]);
        task_id
    }

    fn drain(rx: &mut broadcast::Receiver<TaskEvent>) -> Vec<TaskEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn empty_store_fetches_nothing() {
        let f = fixture();
        let report = f.engine.run_cycle().await;
        assert_eq!(report, CycleReport::default());
        assert_eq!(f.etl.calls(), 0);
        assert_eq!(f.import.calls(), 0);
    }

    #[tokio::test]
    async fn status_only_moves_forward() {
        let f = fixture();
        let id = track(&f.store, "1", TaskFamily::DocumentEtl);
        f.etl.push(&id, StatusReport::new("llm_processing"));
        f.etl.push(&id, StatusReport::new("mineru_parsing"));

        f.engine.run_cycle().await;
        assert_eq!(f.store.get(&id).unwrap().status, TaskStatus::LlmProcessing);

        let report = f.engine.run_cycle().await;
        assert_eq!(report.updated, 0);
        assert_eq!(f.store.get(&id).unwrap().status, TaskStatus::LlmProcessing);
    }

    #[tokio::test]
    async fn progress_change_alone_is_an_update() {
        let f = fixture();
        let id = track(&f.store, "1", TaskFamily::DocumentEtl);
        f.etl.push(&id, StatusReport::new("mineru_parsing").with_progress(10));
        f.etl.push(&id, StatusReport::new("mineru_parsing").with_progress(40));
        let mut rx = f.store.subscribe();

        f.engine.run_cycle().await;
        f.engine.run_cycle().await;
        let unchanged = f.engine.run_cycle().await;

        assert_eq!(f.store.get(&id).unwrap().progress, Some(40));
        assert_eq!(unchanged.updated, 0);
        assert_eq!(drain(&mut rx), vec![TaskEvent::TasksChanged, TaskEvent::TasksChanged]);
    }

    #[tokio::test]
    async fn import_wire_status_is_mapped() {
        let f = fixture();
        let id = track(&f.store, "9", TaskFamily::SaasImport);
        f.import.push(&id, StatusReport::new("processing").with_progress(20));

        f.engine.run_cycle().await;

        assert_eq!(f.store.get(&id).unwrap().status, TaskStatus::Downloading);
        assert_eq!(f.etl.calls(), 0, "only families with active tasks are fetched");
    }

    #[tokio::test]
    async fn completion_emits_once_and_refreshes_once() {
        let f = fixture();
        let id = track(&f.store, "55", TaskFamily::DocumentEtl);
        f.etl.push(&id, StatusReport::new("completed").with_progress(100));
        let mut rx = f.store.subscribe();

        let report = f.engine.run_cycle().await;
        let after = f.engine.run_cycle().await;

        let record = f.store.get(&id).unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(after.polled, 0, "terminal records are not polled");
        assert_eq!(
            drain(&mut rx),
            vec![TaskEvent::TasksChanged, TaskEvent::completed(&record)]
        );
        assert_eq!(
            f.refresh.calls.lock().clone(),
            vec![(TaskFamily::DocumentEtl, Some("project-1".parse().unwrap()))]
        );
        assert_eq!(f.etl.calls(), 1);
    }

    #[tokio::test]
    async fn failure_carries_the_server_error() {
        let f = fixture();
        let id = track(&f.store, "7", TaskFamily::DocumentEtl);
        f.etl.push(&id, StatusReport::new("failed").with_error("corrupt pdf"));
        let mut rx = f.store.subscribe();

        let report = f.engine.run_cycle().await;

        assert_eq!(report.failed, 1);
        let events = drain(&mut rx);
        assert!(matches!(
            &events[1],
            TaskEvent::TaskFailed { error: Some(e), .. } if e == "corrupt pdf"
        ));
        assert!(f.refresh.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_leaves_the_family_untouched() {
        let f = fixture();
        let etl_id = track(&f.store, "1", TaskFamily::DocumentEtl);
        let import_id = track(&f.store, "2", TaskFamily::SaasImport);
        f.etl.push(&etl_id, StatusReport::new("completed"));
        f.etl.fail_next(1);
        f.import.push(&import_id, StatusReport::new("extracting"));

        let report = f.engine.run_cycle().await;

        assert_eq!(report.skipped_families, vec![TaskFamily::DocumentEtl]);
        assert_eq!(f.store.get(&etl_id).unwrap().status, TaskStatus::Pending);
        assert_eq!(f.store.get(&import_id).unwrap().status, TaskStatus::Extracting);

        let retry = f.engine.run_cycle().await;
        assert_eq!(retry.completed, 1);
    }

    #[tokio::test]
    async fn omitted_and_unknown_statuses_change_nothing() {
        let f = fixture();
        let a = track(&f.store, "1", TaskFamily::DocumentEtl);
        track(&f.store, "2", TaskFamily::DocumentEtl);
        f.etl.push(&a, StatusReport::new("downloading"));
        let mut rx = f.store.subscribe();

        let report = f.engine.run_cycle().await;

        assert_eq!(report.polled, 2);
        assert_eq!(report.updated, 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn removed_records_are_not_resurrected() {
        let f = fixture();
        let etl = Arc::new(ScriptedStatusFetcher::new().with_latency(std::time::Duration::from_millis(50)));
        let mut registry = FamilyRegistry::new();
        registry.register(TaskFamily::DocumentEtl, etl.clone()).unwrap();
        let engine = Arc::new(ReconciliationEngine::new(
            f.store.clone(),
            Arc::new(registry),
            Arc::new(SystemClock),
            Arc::new(crate::ports::NoopRefreshHook),
        ));
        let id = track(&f.store, "1", TaskFamily::DocumentEtl);
        etl.push(&id, StatusReport::new("completed"));

        let running = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run_cycle().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        f.store.remove_tasks(|_| true);
        let report = running.await.unwrap();

        assert!(f.store.is_empty());
        assert_eq!(report.completed, 0);
    }

    #[tokio::test]
    async fn overlapping_cycles_are_skipped() {
        let f = fixture();
        let etl = Arc::new(ScriptedStatusFetcher::new().with_latency(std::time::Duration::from_millis(50)));
        let mut registry = FamilyRegistry::new();
        registry.register(TaskFamily::DocumentEtl, etl.clone()).unwrap();
        let engine = ReconciliationEngine::new(
            f.store.clone(),
            Arc::new(registry),
            Arc::new(SystemClock),
            Arc::new(crate::ports::NoopRefreshHook),
        );
        let id = track(&f.store, "1", TaskFamily::DocumentEtl);
        etl.push(&id, StatusReport::new("mineru_parsing"));

        let (first, second) = tokio::join!(engine.run_cycle(), engine.run_cycle());

        assert!(!first.skipped);
        assert!(second.skipped);
        assert_eq!(etl.calls(), 1);
    }
}
