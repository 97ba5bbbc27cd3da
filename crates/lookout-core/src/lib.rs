//! lookout-core
//!
//! Client-side tracking of long-running server jobs (document ETL, SaaS imports):
//! placeholder IDs until the server answers, one adaptive poller per store, and
//! forward-only reconciliation of the reported statuses.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, family, status, lifecycle, record, events, errors）
//! - **ports**: 抽象化レイヤー（StatusFetcher, SessionStorage, Clock, RefreshHook, など）
//! - **app**: アプリケーションロジック（store, allocator, reconcile, poller, builder）
//! - **impls**: 実装（HTTP adapters, in-memory session storage, scripted fetcher）
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use crate::app::{Tracker, TrackerBuilder};
pub use crate::config::TrackerConfig;
