//! RefreshHook port - 完了時の外部リフレッシュ（project 一覧の再読み込み）
//!
//! reconciliation engine が `TaskCompleted` 1 件につき 1 回だけ呼ぶ。

use crate::domain::{ContainerRef, TaskFamily};

pub trait RefreshHook: Send + Sync {
    fn refresh(&self, family: TaskFamily, container: Option<&ContainerRef>);
}

/// Does nothing; for callers that only listen to events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRefreshHook;

impl RefreshHook for NoopRefreshHook {
    fn refresh(&self, _family: TaskFamily, _container: Option<&ContainerRef>) {}
}
