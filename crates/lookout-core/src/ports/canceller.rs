//! TaskCanceller port - サーバー側へのキャンセル要求
//!
//! 結果に関わらずローカルの record は先に `cancelled` になる。
//! ここでの失敗はログに出すだけ。

use async_trait::async_trait;

use crate::domain::{FetchError, TaskId};

#[async_trait]
pub trait TaskCanceller: Send + Sync {
    async fn cancel(&self, task_id: &TaskId) -> Result<(), FetchError>;
}
