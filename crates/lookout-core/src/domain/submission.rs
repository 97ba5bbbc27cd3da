//! Submission - 一括アップロード/インポートのレスポンスと placeholder の対応付け
//!
//! サーバーは client token を返してくれず、item を filename で識別する。
//! そのため placeholder → real ID の解決は「container 内の label 一致」で行う。

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::ids::TaskId;

/// Status values a submission item reports when the server declined it.
const DECLINED_STATUSES: [&str; 4] = ["failed", "error", "rejected", "skipped"];

/// One entry of a bulk submission response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubmissionItem {
    pub filename: String,
    pub status: String,
    #[serde(default, alias = "taskId", deserialize_with = "deserialize_wire_id")]
    pub task_id: Option<TaskId>,
}

impl SubmissionItem {
    /// Accepted items carry a task ID and a non-failure status.
    pub fn is_accepted(&self) -> bool {
        self.task_id.is_some()
            && !DECLINED_STATUSES
                .iter()
                .any(|s| s.eq_ignore_ascii_case(self.status.trim()))
    }
}

/// Server-assigned ID for one submitted subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub subject_label: String,
    pub real_task_id: TaskId,
}

impl Assignment {
    pub fn new(subject_label: impl Into<String>, real_task_id: TaskId) -> Self {
        Self {
            subject_label: subject_label.into(),
            real_task_id,
        }
    }

    /// Assignments for the accepted items of a submission response, in response order.
    pub fn from_submission(items: &[SubmissionItem]) -> Vec<Assignment> {
        items
            .iter()
            .filter(|item| item.is_accepted())
            .filter_map(|item| {
                item.task_id
                    .clone()
                    .map(|id| Assignment::new(item.filename.clone(), id))
            })
            .collect()
    }
}

/// Read a task ID sent either as a JSON string or a JSON number.
pub(crate) fn wire_id(value: &Value) -> Option<TaskId> {
    match value {
        Value::String(s) => TaskId::new(s.clone()).ok(),
        Value::Number(n) => TaskId::new(n.to_string()).ok(),
        _ => None,
    }
}

pub(crate) fn deserialize_wire_id<'de, D>(deserializer: D) -> Result<Option<TaskId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(wire_id))
}
