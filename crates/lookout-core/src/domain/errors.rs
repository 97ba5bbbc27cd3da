//! Errors - エラー型と分類
//!
//! # 分類
//! - submission failure: 作成リクエスト自体が失敗 → placeholder を破棄（allocator 側）
//! - poll-transport failure: [`FetchError`] → ログだけ出して次の周期で再試行
//! - terminal failure: サーバーが `failed` を返した → `TaskFailed` イベント（エラーではない）
//! - partial batch failure: submission の一部だけ失敗 → allocator が item 単位で処理

use thiserror::Error;

use super::family::TaskFamily;
use crate::config::ConfigError;
use super::ids::TaskId;

/// ErrorKind は運用上の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 一時的なエラー（次の周期で自然に回復する想定）
    Transient,
    /// 恒久的なエラー（設定ミスなど、待っても直らない）
    Permanent,
}

/// Failure of a whole status-fetch batch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server answered {status} for {endpoint}")]
    HttpStatus { status: u16, endpoint: String },

    #[error("could not decode status response: {0}")]
    Decode(String),

    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Transport(_) | FetchError::Decode(_) => ErrorKind::Transient,
            FetchError::HttpStatus { status, .. } if *status >= 500 || *status == 429 => {
                ErrorKind::Transient
            }
            FetchError::HttpStatus { .. } | FetchError::InvalidUrl(_) => ErrorKind::Permanent,
        }
    }
}

/// Session storage read/write failure.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("session storage unavailable: {0}")]
    Unavailable(String),

    #[error("could not encode task snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors of the tracker wiring and its operations.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("no fetcher registered for task family {0}")]
    UnknownFamily(TaskFamily),

    #[error("task family {0} is already registered")]
    DuplicateFamily(TaskFamily),

    #[error("missing task families: {0:?}. These families were expected but not registered.")]
    MissingFamilies(Vec<TaskFamily>),

    #[error("a poller is already running for this task store")]
    PollerAlreadyRunning,

    #[error("task {0} is not tracked")]
    UnknownTask(TaskId),

    #[error("could not set up the API client: {0}")]
    Api(#[from] FetchError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient_client_errors_are_not() {
        let busy = FetchError::HttpStatus {
            status: 503,
            endpoint: "/etl/tasks/batch".into(),
        };
        let unauthorized = FetchError::HttpStatus {
            status: 401,
            endpoint: "/etl/tasks/batch".into(),
        };
        assert_eq!(busy.kind(), ErrorKind::Transient);
        assert_eq!(unauthorized.kind(), ErrorKind::Permanent);
        assert_eq!(FetchError::Decode("eof".into()).kind(), ErrorKind::Transient);
    }

    #[test]
    fn missing_families_message_lists_them() {
        let err = TrackerError::MissingFamilies(vec![TaskFamily::SaasImport]);
        assert!(err.to_string().contains("SaasImport"));
    }
}
