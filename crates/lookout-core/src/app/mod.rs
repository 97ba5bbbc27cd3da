//! App - アプリケーション層
//!
//! ports を組み合わせて tracking のロジックを実装する。
//!
//! # 主要コンポーネント
//! - **TaskStore**: tracked task の正本とイベント配信
//! - **PlaceholderAllocator**: 仮 ID の発行と real ID への差し替え
//! - **ReconciliationEngine**: fetch 結果の取り込み（1 cycle）
//! - **Poller**: active な task がある間だけ cycle を回すループ
//! - **TrackerBuilder**: 構築とワイヤリング（fail-fast）

pub mod allocator;
pub mod builder;
pub mod poller;
pub mod reconcile;
pub mod registry;
pub mod status;
pub mod store;

// 主要な型を再エクスポート
pub use self::allocator::{PlaceholderAllocator, Resolution};
pub use self::builder::{Tracker, TrackerBuilder};
pub use self::poller::{Poller, PollerHandle, PollerState};
pub use self::reconcile::{CycleReport, ReconciliationEngine};
pub use self::registry::{FamilyEntry, FamilyRegistry};
pub use self::status::TaskCounts;
pub use self::store::{Batch, TaskStore};
