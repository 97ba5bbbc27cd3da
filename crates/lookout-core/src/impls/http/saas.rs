//! SaaS-import adapter: the server only offers a single-task query, so a batch
//! is the set of single calls issued together.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::Deserialize;

use super::{ApiClient, clamp_progress};
use crate::domain::{FetchError, TaskId};
use crate::ports::{StatusFetcher, StatusReport, TaskCanceller};

/// `GET {base}/import/tasks/{id}` response. Item count and node ID are not tracked.
#[derive(Debug, Deserialize)]
struct ImportTaskStatus {
    status: String,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SaasImportStatusFetcher {
    api: ApiClient,
}

impl SaasImportStatusFetcher {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    async fn fetch_one(&self, task_id: &TaskId) -> Result<Option<(TaskId, StatusReport)>, FetchError> {
        let found: Option<ImportTaskStatus> = self
            .api
            .get_json_opt(&["import", "tasks", task_id.as_str()])
            .await?;
        Ok(found.map(|s| {
            let report = StatusReport {
                status: s.status,
                progress: clamp_progress(s.progress),
                message: s.message,
                error: s.error,
            };
            (task_id.clone(), report)
        }))
    }
}

#[async_trait]
impl StatusFetcher for SaasImportStatusFetcher {
    async fn fetch_statuses(
        &self,
        task_ids: &[TaskId],
    ) -> Result<HashMap<TaskId, StatusReport>, FetchError> {
        if task_ids.is_empty() {
            return Ok(HashMap::new());
        }
        // 1 件でも失敗したら batch 全体を失敗にする
        let found = try_join_all(task_ids.iter().map(|id| self.fetch_one(id))).await?;
        Ok(found.into_iter().flatten().collect())
    }
}

#[async_trait]
impl TaskCanceller for SaasImportStatusFetcher {
    async fn cancel(&self, task_id: &TaskId) -> Result<(), FetchError> {
        self.api
            .post_empty(&["import", "tasks", task_id.as_str(), "cancel"])
            .await
    }
}
