//! Ports - 抽象化レイヤー
//!
//! 外部システム（HTTP API, セッションストレージ, UI 側のリフレッシュ）への
//! インターフェースを trait で定義し、テストで差し替えられるようにする。

pub mod canceller;
pub mod clock;
pub mod id_generator;
pub mod refresh_hook;
pub mod session_storage;
pub mod status_fetcher;

pub use self::canceller::TaskCanceller;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::refresh_hook::{NoopRefreshHook, RefreshHook};
pub use self::session_storage::SessionStorage;
pub use self::status_fetcher::{StatusFetcher, StatusReport};
