//! Events - store から consumer へ流すイベント
//!
//! - `TasksChanged`: 何かが変わった（1 回の操作につき最大 1 回）
//! - `TaskCompleted` / `TaskFailed`: terminal に到達した task ごとに 1 回

use serde::Serialize;

use super::family::TaskFamily;
use super::ids::{ContainerRef, TaskId};
use super::record::TaskRecord;

/// Notification published by the task store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TaskEvent {
    /// Generic "the record set changed" signal; re-read the store.
    TasksChanged,

    TaskCompleted {
        family: TaskFamily,
        task_id: TaskId,
        subject_label: String,
        container_ref: Option<ContainerRef>,
    },

    TaskFailed {
        family: TaskFamily,
        task_id: TaskId,
        subject_label: String,
        container_ref: Option<ContainerRef>,
        error: Option<String>,
    },
}

impl TaskEvent {
    pub fn completed(record: &TaskRecord) -> Self {
        TaskEvent::TaskCompleted {
            family: record.family,
            task_id: record.task_id.clone(),
            subject_label: record.subject_label.clone(),
            container_ref: record.container_ref.clone(),
        }
    }

    /// Failure event; a cancellation without server detail reports `"cancelled"`.
    pub fn failed(record: &TaskRecord) -> Self {
        let error = record.error.clone().or_else(|| {
            (record.status == super::TaskStatus::Cancelled).then(|| "cancelled".to_string())
        });
        TaskEvent::TaskFailed {
            family: record.family,
            task_id: record.task_id.clone(),
            subject_label: record.subject_label.clone(),
            container_ref: record.container_ref.clone(),
            error,
        }
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            TaskEvent::TasksChanged => None,
            TaskEvent::TaskCompleted { task_id, .. } | TaskEvent::TaskFailed { task_id, .. } => {
                Some(task_id)
            }
        }
    }
}
