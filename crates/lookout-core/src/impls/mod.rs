//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemorySessionStorage**: タブ単位のスナップショット置き場
//! - **http**: reqwest ベースの StatusFetcher / TaskCanceller（ETL, SaaS import）
//! - **ScriptedStatusFetcher**: 開発用・テスト用（レスポンスを事前に積む）

pub mod http;
pub mod memory_storage;
pub mod scripted;

pub use self::http::{ApiClient, EtlStatusFetcher, SaasImportStatusFetcher};
pub use self::memory_storage::InMemorySessionStorage;
pub use self::scripted::ScriptedStatusFetcher;
