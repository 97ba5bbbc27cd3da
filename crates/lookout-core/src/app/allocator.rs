//! PlaceholderAllocator - 本物の ID が分かる前に task を見せ、後で差し替える
//!
//! # フロー
//! 1. `allocate_placeholder()` で `temp-` ID の record を `pending` で追加
//! 2. 作成リクエストが返ったら `resolve_placeholders()` で real ID に差し替え
//!    （同じ位置に、同じロック内で。placeholder と real が同時に見えることはない）
//! 3. 作成リクエスト自体が失敗したら `discard_placeholders()` で container 分を全部消す
//!
//! # 既知の制限
//! 対応付けは container 内の label 一致。同じ label が 2 つあると、
//! submission の順番どおりに組み合わせるしかない。

use std::sync::Arc;

use tracing::{info, warn};

use super::store::TaskStore;
use crate::domain::{
    Assignment, ContainerRef, SubmissionItem, TaskFamily, TaskId, TaskRecord, TaskStatus,
};
use crate::ports::{Clock, IdGenerator};

/// Outcome of one resolve call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// (placeholder, real) pairs that were swapped.
    pub resolved: Vec<(TaskId, TaskId)>,
    /// Placeholders removed because the server declined them.
    pub removed: Vec<TaskId>,
    /// Real IDs whose placeholder had been cancelled before the server
    /// answered. The record keeps `cancelled`; the server still has to be told.
    pub cancelled: Vec<TaskId>,
    /// Assignments that matched no placeholder.
    pub unmatched: Vec<Assignment>,
}

pub struct PlaceholderAllocator {
    store: Arc<TaskStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl PlaceholderAllocator {
    pub fn new(store: Arc<TaskStore>, ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self { store, ids, clock }
    }

    /// Add a `pending` placeholder record and return its ID.
    pub fn allocate_placeholder(
        &self,
        family: TaskFamily,
        subject_label: impl Into<String>,
        container_ref: Option<ContainerRef>,
    ) -> TaskId {
        let task_id = self.ids.next_placeholder_id();
        let record = TaskRecord::new(
            task_id.clone(),
            family,
            subject_label,
            container_ref,
            self.clock.now(),
        );
        self.store.add_tasks([record]);
        task_id
    }

    /// Swap the container's placeholders for their real IDs.
    ///
    /// Each assignment is used at most once. Placeholders left without an
    /// assignment were declined by the server and are removed.
    pub fn resolve_placeholders(
        &self,
        container_ref: Option<&ContainerRef>,
        assignments: &[Assignment],
    ) -> Resolution {
        let now = self.clock.now();
        let mut slots: Vec<Option<&Assignment>> = assignments.iter().map(Some).collect();
        let mut resolution = Resolution::default();

        self.store.batch(|batch| {
            let placeholder_ids: Vec<TaskId> = batch
                .records()
                .values()
                .filter(|r| r.is_placeholder() && r.container_ref.as_ref() == container_ref)
                .map(|r| r.task_id.clone())
                .collect();

            for placeholder_id in placeholder_ids {
                let Some((index, _, placeholder)) =
                    batch.records_mut().shift_remove_full(&placeholder_id)
                else {
                    continue;
                };
                batch.mark_changed();

                let assignment = slots
                    .iter_mut()
                    .find(|slot| matches!(slot, Some(a) if a.subject_label == placeholder.subject_label))
                    .and_then(Option::take);

                let Some(assignment) = assignment else {
                    resolution.removed.push(placeholder_id);
                    continue;
                };

                let real_id = assignment.real_task_id.clone();
                let mut cancelled = placeholder.status == TaskStatus::Cancelled;
                // すでに real ID で追跡中なら、そちらを正とする
                if let Some(existing) = batch.get_mut(&real_id) {
                    cancelled &= !existing.is_terminal();
                    if cancelled {
                        existing.mark_cancelled(now);
                    }
                } else {
                    let mut real = placeholder.promote(real_id.clone(), now);
                    if cancelled {
                        // promote() resets to pending
                        real.mark_cancelled(now);
                    }
                    batch.records_mut().shift_insert(index, real_id.clone(), real);
                }
                if cancelled {
                    resolution.cancelled.push(real_id.clone());
                }
                resolution.resolved.push((placeholder_id, real_id));
            }
        });

        resolution.unmatched = slots.into_iter().flatten().cloned().collect();
        if !resolution.unmatched.is_empty() {
            warn!(
                count = resolution.unmatched.len(),
                "submission returned task ids with no matching placeholder"
            );
        }
        info!(
            resolved = resolution.resolved.len(),
            removed = resolution.removed.len(),
            cancelled = resolution.cancelled.len(),
            container = ?container_ref.map(ContainerRef::as_str),
            "resolved placeholders"
        );
        resolution
    }

    /// [`resolve_placeholders`](Self::resolve_placeholders) fed with a bulk submission response.
    pub fn resolve_submission(
        &self,
        container_ref: Option<&ContainerRef>,
        items: &[SubmissionItem],
    ) -> Resolution {
        self.resolve_placeholders(container_ref, &Assignment::from_submission(items))
    }

    /// The submission call failed outright: drop every placeholder of the container.
    pub fn discard_placeholders(&self, container_ref: Option<&ContainerRef>) -> usize {
        let removed = self
            .store
            .remove_tasks(|r| r.is_placeholder() && r.container_ref.as_ref() == container_ref);
        if removed > 0 {
            warn!(
                removed,
                container = ?container_ref.map(ContainerRef::as_str),
                "submission failed, discarded placeholders"
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskEvent;
    use crate::impls::InMemorySessionStorage;
    use crate::ports::{SystemClock, UlidGenerator};
    use pretty_assertions::assert_eq;

    fn allocator() -> (PlaceholderAllocator, Arc<TaskStore>) {
        let store = Arc::new(TaskStore::new(
            Arc::new(InMemorySessionStorage::new()),
            "test.tasks",
        ));
        let allocator = PlaceholderAllocator::new(
            store.clone(),
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(SystemClock),
        );
        (allocator, store)
    }

    fn container(name: &str) -> ContainerRef {
        name.parse().unwrap()
    }

    fn labels_and_ids(store: &TaskStore) -> Vec<(String, String)> {
        store
            .list_tasks()
            .into_iter()
            .map(|r| (r.subject_label, r.task_id.to_string()))
            .collect()
    }

    #[test]
    fn placeholder_starts_pending_and_inactive() {
        let (allocator, store) = allocator();
        let id = allocator.allocate_placeholder(TaskFamily::DocumentEtl, "a.pdf", None);

        let record = store.get(&id).unwrap();
        assert!(id.is_placeholder());
        assert_eq!(record.status, TaskStatus::Pending);
        assert!(store.active_task_ids(None).is_empty());
    }

    #[test]
    fn resolve_round_trip() {
        let (allocator, store) = allocator();
        let project = container("project-1");
        let placeholder =
            allocator.allocate_placeholder(TaskFamily::DocumentEtl, "a.pdf", Some(project.clone()));

        let resolution = allocator.resolve_placeholders(
            Some(&project),
            &[Assignment::new("a.pdf", "123".parse().unwrap())],
        );

        assert_eq!(store.len(), 1);
        assert!(store.get(&placeholder).is_none());
        let real = store.get(&"123".parse().unwrap()).unwrap();
        assert_eq!(real.status, TaskStatus::Pending);
        assert_eq!(real.container_ref, Some(project));
        assert_eq!(real.family, TaskFamily::DocumentEtl);
        assert_eq!(resolution.resolved.len(), 1);
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn declined_items_are_removed() {
        let (allocator, store) = allocator();
        let project = container("project-1");
        allocator.allocate_placeholder(TaskFamily::DocumentEtl, "a.pdf", Some(project.clone()));
        let b = allocator.allocate_placeholder(TaskFamily::DocumentEtl, "b.pdf", Some(project.clone()));

        let resolution = allocator.resolve_placeholders(
            Some(&project),
            &[Assignment::new("a.pdf", "1".parse().unwrap())],
        );

        assert_eq!(labels_and_ids(&store), vec![("a.pdf".into(), "1".into())]);
        assert_eq!(resolution.removed, vec![b]);
    }

    #[test]
    fn swap_keeps_position_and_other_containers() {
        let (allocator, store) = allocator();
        let mine = container("project-1");
        let other = container("project-2");
        allocator.allocate_placeholder(TaskFamily::DocumentEtl, "x.pdf", Some(other.clone()));
        allocator.allocate_placeholder(TaskFamily::DocumentEtl, "a.pdf", Some(mine.clone()));
        allocator.allocate_placeholder(TaskFamily::DocumentEtl, "b.pdf", Some(mine.clone()));

        allocator.resolve_placeholders(
            Some(&mine),
            &[
                Assignment::new("b.pdf", "20".parse().unwrap()),
                Assignment::new("a.pdf", "10".parse().unwrap()),
            ],
        );

        let tasks = store.list_tasks();
        assert_eq!(tasks.len(), 3);
        assert!(tasks[0].is_placeholder(), "other container untouched");
        assert_eq!(tasks[1].task_id.as_str(), "10");
        assert_eq!(tasks[2].task_id.as_str(), "20");
    }

    #[test]
    fn resolve_emits_a_single_change() {
        let (allocator, store) = allocator();
        let project = container("p");
        allocator.allocate_placeholder(TaskFamily::SaasImport, "repo-a", Some(project.clone()));
        allocator.allocate_placeholder(TaskFamily::SaasImport, "repo-b", Some(project.clone()));
        let mut rx = store.subscribe();

        allocator.resolve_placeholders(
            Some(&project),
            &[
                Assignment::new("repo-a", "1".parse().unwrap()),
                Assignment::new("repo-b", "2".parse().unwrap()),
            ],
        );

        assert_eq!(rx.try_recv().unwrap(), TaskEvent::TasksChanged);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn duplicate_labels_pair_in_submission_order() {
        let (allocator, store) = allocator();
        let project = container("p");
        allocator.allocate_placeholder(TaskFamily::DocumentEtl, "same.pdf", Some(project.clone()));
        allocator.allocate_placeholder(TaskFamily::DocumentEtl, "same.pdf", Some(project.clone()));

        let resolution = allocator.resolve_placeholders(
            Some(&project),
            &[
                Assignment::new("same.pdf", "1".parse().unwrap()),
                Assignment::new("same.pdf", "2".parse().unwrap()),
                Assignment::new("ghost.pdf", "3".parse().unwrap()),
            ],
        );

        let ids: Vec<String> = store.list_tasks().iter().map(|r| r.task_id.to_string()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(resolution.unmatched.len(), 1);
    }

    #[test]
    fn submission_failure_discards_all_placeholders_of_the_container() {
        let (allocator, store) = allocator();
        let project = container("p");
        allocator.allocate_placeholder(TaskFamily::DocumentEtl, "a.pdf", Some(project.clone()));
        allocator.allocate_placeholder(TaskFamily::DocumentEtl, "b.pdf", Some(project.clone()));
        allocator.allocate_placeholder(TaskFamily::DocumentEtl, "c.pdf", None);

        assert_eq!(allocator.discard_placeholders(Some(&project)), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn resolve_from_submission_response() {
        let (allocator, store) = allocator();
        let project = container("p");
        allocator.allocate_placeholder(TaskFamily::DocumentEtl, "a.pdf", Some(project.clone()));
        allocator.allocate_placeholder(TaskFamily::DocumentEtl, "b.pdf", Some(project.clone()));
        let items: Vec<SubmissionItem> = serde_json::from_value(serde_json::json!([
            { "filename": "a.pdf", "status": "pending", "task_id": 55 },
            { "filename": "b.pdf", "status": "failed" }
        ]))
        .unwrap();

        allocator.resolve_submission(Some(&project), &items);

        assert_eq!(labels_and_ids(&store), vec![("a.pdf".into(), "55".into())]);
    }

    #[test]
    fn already_tracked_real_id_is_not_duplicated() {
        let (allocator, store) = allocator();
        let project = container("p");
        allocator.allocate_placeholder(TaskFamily::DocumentEtl, "a.pdf", Some(project.clone()));
        let mut existing = TaskRecord::new(
            "55".parse().unwrap(),
            TaskFamily::DocumentEtl,
            "a.pdf",
            Some(project.clone()),
            chrono::Utc::now(),
        );
        existing.status = TaskStatus::LlmProcessing;
        store.add_tasks([existing]);

        allocator.resolve_placeholders(
            Some(&project),
            &[Assignment::new("a.pdf", "55".parse().unwrap())],
        );

        let tasks = store.list_tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status, TaskStatus::LlmProcessing);
    }

    #[test]
    fn cancelled_placeholder_stays_cancelled_under_its_real_id() {
        let (allocator, store) = allocator();
        let project = container("p");
        let keep = allocator.allocate_placeholder(TaskFamily::DocumentEtl, "a.pdf", Some(project.clone()));
        let cancel = allocator.allocate_placeholder(TaskFamily::DocumentEtl, "b.pdf", Some(project.clone()));
        store.batch(|batch| {
            batch.get_mut(&cancel).unwrap().mark_cancelled(chrono::Utc::now());
            batch.mark_changed();
        });

        let resolution = allocator.resolve_placeholders(
            Some(&project),
            &[
                Assignment::new("a.pdf", "1".parse().unwrap()),
                Assignment::new("b.pdf", "2".parse().unwrap()),
            ],
        );

        let first: TaskId = "1".parse().unwrap();
        let second: TaskId = "2".parse().unwrap();
        assert_eq!(
            resolution.resolved,
            vec![(keep, first.clone()), (cancel, second.clone())]
        );
        assert_eq!(resolution.cancelled, vec![second.clone()]);
        assert_eq!(store.get(&second).unwrap().status, TaskStatus::Cancelled);
        assert_eq!(store.active_task_ids(None), vec![first]);
    }
}
