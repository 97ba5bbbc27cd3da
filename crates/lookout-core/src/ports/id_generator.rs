//! IdGenerator port - placeholder ID の生成
//!
//! placeholder ID は「単調増加カウンタ + timestamp + random」を組み合わせる。
//! timestamp と random は ULID にまとめて埋め込む。

use std::sync::atomic::{AtomicU64, Ordering};

use ulid::Ulid;

use crate::domain::TaskId;
use crate::ports::Clock;

/// Mints provisional task IDs.
///
/// Every ID must satisfy [`TaskId::is_placeholder`].
pub trait IdGenerator: Send + Sync {
    fn next_placeholder_id(&self) -> TaskId;
}

/// UlidGenerator は ULID ベースの placeholder ID 生成器
///
/// Clock を使うので、テストでは FixedClock で timestamp 部分を固定できる。
pub struct UlidGenerator<C> {
    clock: C,
    counter: AtomicU64,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            counter: AtomicU64::new(1),
        }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn next_placeholder_id(&self) -> TaskId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        TaskId::placeholder(n, ulid)
    }
}
