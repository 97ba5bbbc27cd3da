//! TrackerBuilder - tracker の構築とワイヤリング
//!
//! # Fail-fast
//! - `register()` は同じ family の二重登録を `DuplicateFamily` で弾く
//! - `expect_families()` を指定すると、`build()` 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - store / clock / id 生成器 / refresh hook は差し替え可能（未指定なら既定の実装）

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::allocator::{PlaceholderAllocator, Resolution};
use super::poller::{Poller, PollerHandle};
use super::reconcile::ReconciliationEngine;
use super::registry::{FamilyEntry, FamilyRegistry};
use super::status::TaskCounts;
use super::store::TaskStore;
use crate::config::TrackerConfig;
use crate::domain::{
    Assignment, ContainerRef, SubmissionItem, TaskEvent, TaskFamily, TaskId, TaskRecord,
    TrackerError,
};
use crate::impls::{ApiClient, EtlStatusFetcher, InMemorySessionStorage, SaasImportStatusFetcher};
use crate::ports::{Clock, IdGenerator, NoopRefreshHook, RefreshHook, SessionStorage, SystemClock, UlidGenerator};

/// TrackerBuilder は tracker を構築
///
/// # 使用例
/// ```ignore
/// let tracker = TrackerBuilder::new(config)
///     .with_http_families()?
///     .expect_families(&[TaskFamily::DocumentEtl, TaskFamily::SaasImport])
///     .build()?;
/// let poller = tracker.spawn_poller()?;
/// ```
pub struct TrackerBuilder {
    config: TrackerConfig,
    registry: FamilyRegistry,
    storage: Option<Arc<dyn SessionStorage>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    refresh: Option<Arc<dyn RefreshHook>>,
    expected_families: Option<Vec<TaskFamily>>,
}

impl TrackerBuilder {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            registry: FamilyRegistry::new(),
            storage: None,
            clock: None,
            ids: None,
            refresh: None,
            expected_families: None,
        }
    }

    /// Register a family; fails on a second registration of the same family.
    pub fn register(mut self, family: TaskFamily, entry: FamilyEntry) -> Result<Self, TrackerError> {
        self.registry.register_entry(family, entry)?;
        Ok(self)
    }

    /// Register both HTTP families against `config.api`, with cancellation.
    pub fn with_http_families(self) -> Result<Self, TrackerError> {
        let api = ApiClient::new(&self.config.api)?;
        let etl = Arc::new(EtlStatusFetcher::new(api.clone()));
        let import = Arc::new(SaasImportStatusFetcher::new(api));
        self.register(
            TaskFamily::DocumentEtl,
            FamilyEntry::new(TaskFamily::DocumentEtl, etl.clone()).with_canceller(etl),
        )?
        .register(
            TaskFamily::SaasImport,
            FamilyEntry::new(TaskFamily::SaasImport, import.clone()).with_canceller(import),
        )
    }

    pub fn storage(mut self, storage: Arc<dyn SessionStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn refresh_hook(mut self, refresh: Arc<dyn RefreshHook>) -> Self {
        self.refresh = Some(refresh);
        self
    }

    /// Families that must be registered by the time `build()` runs.
    pub fn expect_families(mut self, families: &[TaskFamily]) -> Self {
        self.expected_families = Some(families.to_vec());
        self
    }

    /// # 検証
    /// - 設定値（`TrackerConfig::validate`）。不正なら `TrackerError::Config`
    /// - `expect_families()` の family が全て登録されているか
    /// - 不足があれば `TrackerError::MissingFamilies`
    pub fn build(self) -> Result<Tracker, TrackerError> {
        self.config.validate()?;
        if let Some(expected) = &self.expected_families {
            let registered = self.registry.families();
            let missing: Vec<TaskFamily> = expected
                .iter()
                .filter(|f| !registered.contains(f))
                .copied()
                .collect();
            if !missing.is_empty() {
                return Err(TrackerError::MissingFamilies(missing));
            }
        }

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemorySessionStorage::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let refresh = self.refresh.unwrap_or_else(|| Arc::new(NoopRefreshHook));

        let store = Arc::new(TaskStore::new(storage, self.config.storage_key.clone()));
        let registry = Arc::new(self.registry);
        let allocator = PlaceholderAllocator::new(store.clone(), ids, clock.clone());
        let engine = Arc::new(ReconciliationEngine::new(
            store.clone(),
            registry.clone(),
            clock.clone(),
            refresh,
        ));

        info!(
            families = ?registry.families(),
            restored = store.len(),
            poll_interval_ms = self.config.poll_interval_ms,
            "tracker ready"
        );
        Ok(Tracker {
            config: self.config,
            store,
            registry,
            allocator,
            engine,
            clock,
        })
    }
}

/// Tracker はワイヤリング済みの一式
///
/// consumer は `subscribe()` でイベントを受け取り、`store()` で一覧を読む。
pub struct Tracker {
    config: TrackerConfig,
    store: Arc<TaskStore>,
    registry: Arc<FamilyRegistry>,
    allocator: PlaceholderAllocator,
    engine: Arc<ReconciliationEngine>,
    clock: Arc<dyn Clock>,
}

impl Tracker {
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn allocator(&self) -> &PlaceholderAllocator {
        &self.allocator
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TaskEvent> {
        self.store.subscribe()
    }

    /// Start the poller at the configured interval.
    pub fn spawn_poller(&self) -> Result<PollerHandle, TrackerError> {
        Poller::new(self.engine.clone(), self.config.poll_interval()).spawn()
    }

    /// Track a task whose real ID is already known (no placeholder phase).
    pub fn track_task(
        &self,
        task_id: TaskId,
        family: TaskFamily,
        subject_label: impl Into<String>,
        container_ref: Option<ContainerRef>,
    ) -> Result<(), TrackerError> {
        if self.registry.get(family).is_none() {
            return Err(TrackerError::UnknownFamily(family));
        }
        let record = TaskRecord::new(task_id, family, subject_label, container_ref, self.clock.now());
        self.store.add_tasks([record]);
        Ok(())
    }

    /// Swap placeholders for real IDs, see [`PlaceholderAllocator::resolve_placeholders`].
    ///
    /// Placeholders cancelled while the submission was in flight keep
    /// `cancelled` under their real ID, and the server is asked to cancel them.
    pub async fn resolve_placeholders(
        &self,
        container_ref: Option<&ContainerRef>,
        assignments: &[Assignment],
    ) -> Resolution {
        let resolution = self.allocator.resolve_placeholders(container_ref, assignments);
        self.cancel_late(&resolution).await;
        resolution
    }

    /// [`resolve_placeholders`](Self::resolve_placeholders) fed with a bulk submission response.
    pub async fn resolve_submission(
        &self,
        container_ref: Option<&ContainerRef>,
        items: &[SubmissionItem],
    ) -> Resolution {
        self.resolve_placeholders(container_ref, &Assignment::from_submission(items))
            .await
    }

    async fn cancel_late(&self, resolution: &Resolution) {
        for task_id in &resolution.cancelled {
            let Some(record) = self.store.get(task_id) else {
                continue;
            };
            info!(%task_id, family = %record.family, "placeholder was cancelled before submission answered");
            self.cancel_remote(record.family, task_id).await;
        }
    }

    /// Cancel a task.
    ///
    /// The record is marked `cancelled` first, which stops polling it right away.
    /// The server is then asked to cancel (real IDs only, if the family supports
    /// it); a failure there is logged and does not undo the local state.
    /// A cancelled placeholder is cancelled on the server once it resolves.
    pub async fn cancel_task(&self, task_id: &TaskId) -> Result<(), TrackerError> {
        let now = self.clock.now();
        let marked = self.store.batch(|batch| {
            let record = batch.get_mut(task_id)?;
            if record.is_terminal() {
                return Some((record.family, false));
            }
            record.mark_cancelled(now);
            let family = record.family;
            batch.mark_changed();
            Some((family, true))
        });

        let Some((family, changed)) = marked else {
            return Err(TrackerError::UnknownTask(task_id.clone()));
        };
        if !changed {
            debug!(%task_id, "task already finished, nothing to cancel");
            return Ok(());
        }
        info!(%task_id, %family, "task cancelled locally");

        if !task_id.is_placeholder() {
            self.cancel_remote(family, task_id).await;
        }
        Ok(())
    }

    async fn cancel_remote(&self, family: TaskFamily, task_id: &TaskId) {
        let Some(canceller) = self.registry.get(family).and_then(|e| e.canceller.clone()) else {
            return;
        };
        if let Err(e) = canceller.cancel(task_id).await {
            warn!(%task_id, %family, error = %e, "server-side cancel failed");
        }
    }

    /// Drop completed, failed and cancelled records.
    pub fn clear_finished(&self) -> usize {
        self.store.remove_tasks(TaskRecord::is_terminal)
    }

    pub fn clear_all(&self) -> usize {
        self.store.remove_tasks(|_| true)
    }

    pub fn counts(&self) -> TaskCounts {
        TaskCounts::from_records(&self.store.list_tasks())
    }
}
