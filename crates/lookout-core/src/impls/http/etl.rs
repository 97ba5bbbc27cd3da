//! Document-ETL adapter: one batched POST per cycle.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ApiClient, clamp_progress};
use crate::domain::submission::deserialize_wire_id;
use crate::domain::{FetchError, TaskId};
use crate::ports::{StatusFetcher, StatusReport, TaskCanceller};

#[derive(Debug, Serialize)]
struct BatchRequest<'a> {
    task_ids: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BatchResponse {
    Wrapped { tasks: Vec<EtlTaskStatus> },
    Bare(Vec<EtlTaskStatus>),
}

impl BatchResponse {
    fn into_tasks(self) -> Vec<EtlTaskStatus> {
        match self {
            BatchResponse::Wrapped { tasks } | BatchResponse::Bare(tasks) => tasks,
        }
    }
}

/// Per-task entry of the batch status response. `result` is ignored.
#[derive(Debug, Deserialize)]
struct EtlTaskStatus {
    #[serde(default, alias = "taskId", deserialize_with = "deserialize_wire_id")]
    task_id: Option<TaskId>,
    status: String,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// `POST {base}/etl/tasks/batch` with `{"task_ids": [...]}`.
#[derive(Debug, Clone)]
pub struct EtlStatusFetcher {
    api: ApiClient,
}

impl EtlStatusFetcher {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl StatusFetcher for EtlStatusFetcher {
    async fn fetch_statuses(
        &self,
        task_ids: &[TaskId],
    ) -> Result<HashMap<TaskId, StatusReport>, FetchError> {
        if task_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let request = BatchRequest {
            task_ids: task_ids.iter().map(TaskId::as_str).collect(),
        };
        let response: BatchResponse = self
            .api
            .post_json(&["etl", "tasks", "batch"], &request)
            .await?;

        let requested: HashSet<&TaskId> = task_ids.iter().collect();
        let reports = response
            .into_tasks()
            .into_iter()
            .filter_map(|entry| {
                let id = entry.task_id?;
                requested.contains(&id).then(|| {
                    let report = StatusReport {
                        status: entry.status,
                        progress: clamp_progress(entry.progress),
                        message: entry.message,
                        error: entry.error,
                    };
                    (id, report)
                })
            })
            .collect();
        Ok(reports)
    }
}

#[async_trait]
impl TaskCanceller for EtlStatusFetcher {
    async fn cancel(&self, task_id: &TaskId) -> Result<(), FetchError> {
        self.api
            .post_empty(&["etl", "tasks", task_id.as_str(), "cancel"])
            .await
    }
}
