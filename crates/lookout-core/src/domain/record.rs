//! Task record: the unit of tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::family::TaskFamily;
use super::ids::{ContainerRef, TaskId};
use super::status::TaskStatus;

/// One tracked task.
///
/// Design:
/// - The store holds exactly one record per logical task.
/// - `subject_label` is for display; identity is `task_id` alone.
/// - Status changes go through methods so `updated_at` stays honest.
///
/// Optional fields default on load so older snapshots keep decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub family: TaskFamily,
    pub subject_label: String,
    #[serde(default)]
    pub container_ref: Option<ContainerRef>,
    pub status: TaskStatus,

    /// Last reported progress, 0..=100.
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(
        task_id: TaskId,
        family: TaskFamily,
        subject_label: impl Into<String>,
        container_ref: Option<ContainerRef>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            family,
            subject_label: subject_label.into(),
            container_ref,
            status: TaskStatus::Pending,
            progress: None,
            message: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.task_id.is_placeholder()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Real and not finished: eligible for polling.
    pub fn is_active(&self) -> bool {
        !self.is_placeholder() && !self.is_terminal()
    }

    /// Record a fresh observation from the server.
    pub fn observe(
        &mut self,
        status: TaskStatus,
        progress: Option<u8>,
        message: Option<String>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.status = status;
        self.progress = progress.map(|p| p.min(100));
        if message.is_some() {
            self.message = message;
        }
        if error.is_some() {
            self.error = error;
        }
        self.updated_at = now;
    }

    /// Mark as cancelled locally (optimistic, before the server confirms).
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.updated_at = now;
    }

    /// Carry this placeholder over to its server-assigned ID.
    ///
    /// Label, container, family and creation time are kept; status restarts at `pending`.
    pub fn promote(&self, real_id: TaskId, now: DateTime<Utc>) -> Self {
        Self {
            task_id: real_id,
            family: self.family,
            subject_label: self.subject_label.clone(),
            container_ref: self.container_ref.clone(),
            status: TaskStatus::Pending,
            progress: None,
            message: None,
            error: None,
            created_at: self.created_at,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn new_record_starts_pending() {
        let record = TaskRecord::new(
            "1".parse().unwrap(),
            TaskFamily::DocumentEtl,
            "a.pdf",
            None,
            at(0),
        );
        assert_eq!(record.status, TaskStatus::Pending);
        assert!(record.is_active());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn placeholders_are_never_active() {
        let record = TaskRecord::new(
            TaskId::placeholder(1, Ulid::new()),
            TaskFamily::SaasImport,
            "repo",
            None,
            at(0),
        );
        assert!(!record.is_active());
    }

    #[test]
    fn observe_keeps_previous_message_when_none_is_sent() {
        let mut record = TaskRecord::new(
            "9".parse().unwrap(),
            TaskFamily::SaasImport,
            "sheet",
            None,
            at(0),
        );
        record.observe(
            TaskStatus::Downloading,
            Some(140),
            Some("fetching".into()),
            None,
            at(1),
        );
        record.observe(TaskStatus::Extracting, Some(40), None, None, at(2));

        assert_eq!(record.progress, Some(40));
        assert_eq!(record.message.as_deref(), Some("fetching"));
        assert_eq!(record.updated_at, at(2));
    }

    #[test]
    fn promote_keeps_identity_fields() {
        let container: ContainerRef = "project-1".parse().unwrap();
        let placeholder = TaskRecord::new(
            TaskId::placeholder(3, Ulid::new()),
            TaskFamily::DocumentEtl,
            "a.pdf",
            Some(container.clone()),
            at(0),
        );
        let real = placeholder.promote("123".parse().unwrap(), at(5));

        assert_eq!(real.task_id.as_str(), "123");
        assert_eq!(real.subject_label, "a.pdf");
        assert_eq!(real.container_ref, Some(container));
        assert_eq!(real.created_at, at(0));
        assert_eq!(real.updated_at, at(5));
        assert!(real.is_active());
    }

    #[test]
    fn snapshots_without_optional_fields_still_decode() {
        let json = r#"{
            "task_id": "7",
            "family": "document-etl",
            "subject_label": "a.pdf",
            "status": "llm_processing",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }"#;
        let record: TaskRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, TaskStatus::LlmProcessing);
        assert_eq!(record.container_ref, None);
        assert_eq!(record.progress, None);
    }
}
