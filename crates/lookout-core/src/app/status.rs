//! Status - store の集計ビュー（CLI と診断用）

use serde::{Deserialize, Serialize};

use crate::domain::{TaskRecord, TaskStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    /// Waiting for the server-assigned ID.
    pub placeholders: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    /// `failed` and `cancelled`.
    pub failed: usize,
}

impl TaskCounts {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a TaskRecord>) -> Self {
        let mut counts = Self::default();
        for record in records {
            match record.status {
                _ if record.is_placeholder() => counts.placeholders += 1,
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed | TaskStatus::Cancelled => counts.failed += 1,
                _ => counts.in_progress += 1,
            }
        }
        counts
    }
}
