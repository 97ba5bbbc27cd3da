//! StatusFetcher port - family ごとの一括ステータス取得
//!
//! # 契約
//! - 空の入力には空の map を返し、ネットワークには出ない
//! - レスポンスに含まれない ID は map に入れない（エラーではない）
//! - 失敗は batch 単位で返す（一部だけ成功、はない）

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::{FetchError, TaskId};

/// One task's status as reported by the server, before lifecycle mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    /// Raw wire status, e.g. `"processing"`.
    pub status: String,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl StatusReport {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[async_trait]
pub trait StatusFetcher: Send + Sync {
    async fn fetch_statuses(
        &self,
        task_ids: &[TaskId],
    ) -> Result<HashMap<TaskId, StatusReport>, FetchError>;
}
