//! ScriptedStatusFetcher - 開発用・テスト用の StatusFetcher
//!
//! task ID ごとに返すレスポンスを順番に積んでおく。1 回の fetch で各 ID の
//! 先頭を 1 つ消費し、最後の 1 つは消費せずに返し続ける（サーバーが同じ状態を
//! 返し続けるのと同じ）。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{FetchError, TaskId};
use crate::ports::{StatusFetcher, StatusReport, TaskCanceller};

#[derive(Debug, Default)]
pub struct ScriptedStatusFetcher {
    scripts: Mutex<HashMap<TaskId, VecDeque<StatusReport>>>,
    failures_left: AtomicUsize,
    latency: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<TaskId>>>,
    cancelled: Mutex<Vec<TaskId>>,
}

impl ScriptedStatusFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue the next status the server will report for `task_id`.
    pub fn push(&self, task_id: &TaskId, report: StatusReport) {
        self.scripts
            .lock()
            .entry(task_id.clone())
            .or_default()
            .push_back(report);
    }

    /// The next `n` fetches fail at the transport level.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Number of fetches that reached this fetcher with a non-empty ID list.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// IDs requested by each call, in call order.
    pub fn requests(&self) -> Vec<Vec<TaskId>> {
        self.requests.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<TaskId> {
        self.cancelled.lock().clone()
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StatusFetcher for ScriptedStatusFetcher {
    async fn fetch_statuses(
        &self,
        task_ids: &[TaskId],
    ) -> Result<HashMap<TaskId, StatusReport>, FetchError> {
        if task_ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(task_ids.to_vec());

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.take_failure() {
            return Err(FetchError::HttpStatus {
                status: 503,
                endpoint: "scripted".into(),
            });
        }

        let mut scripts = self.scripts.lock();
        let reports = task_ids
            .iter()
            .filter_map(|id| {
                let queue = scripts.get_mut(id)?;
                let report = if queue.len() > 1 {
                    queue.pop_front()?
                } else {
                    queue.front()?.clone()
                };
                Some((id.clone(), report))
            })
            .collect();
        Ok(reports)
    }
}

#[async_trait]
impl TaskCanceller for ScriptedStatusFetcher {
    async fn cancel(&self, task_id: &TaskId) -> Result<(), FetchError> {
        self.cancelled.lock().push(task_id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_report_repeats() {
        let fetcher = ScriptedStatusFetcher::new();
        let id: TaskId = "1".parse().unwrap();
        fetcher.push(&id, StatusReport::new("mineru_parsing"));
        fetcher.push(&id, StatusReport::new("completed"));

        let ids = [id.clone()];
        let first = fetcher.fetch_statuses(&ids).await.unwrap();
        let second = fetcher.fetch_statuses(&ids).await.unwrap();
        let third = fetcher.fetch_statuses(&ids).await.unwrap();

        assert_eq!(first[&id].status, "mineru_parsing");
        assert_eq!(second[&id].status, "completed");
        assert_eq!(third[&id].status, "completed");
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed() {
        let fetcher = ScriptedStatusFetcher::new();
        let id: TaskId = "1".parse().unwrap();
        fetcher.push(&id, StatusReport::new("pending"));
        fetcher.fail_next(1);

        assert!(fetcher.fetch_statuses(&[id.clone()]).await.is_err());
        assert!(fetcher.fetch_statuses(&[id.clone()]).await.is_ok());
        assert!(fetcher.fetch_statuses(&[]).await.unwrap().is_empty());
        assert_eq!(fetcher.calls(), 2);
    }
}
