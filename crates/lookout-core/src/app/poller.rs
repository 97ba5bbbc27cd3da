//! Poller - store ごとに 1 つだけ動くスケジューリングループ
//!
//! # 状態
//! - `Idle`: active な task がない。タイマーは持たず、active 数の watch を待つだけ
//! - `Polling`: interval を持ち、tick ごとに 1 cycle 回す（最初の tick は即時）
//! - `Stopped`: shutdown 済み
//!
//! # 重要
//! - cycle は直列。前の cycle が終わるまで次の tick を待たない
//!   （`MissedTickBehavior::Skip` で溜まった tick は捨てる）
//! - store ごとに poller は 1 つ。2 つ目の spawn は `PollerAlreadyRunning`
//! - 周期 0 は spawn 時に `TrackerError::Config` で拒否する
//! - ループがどう終わっても（panic 含む）`Stopped` を出し、claim を返す

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::reconcile::ReconciliationEngine;
use super::store::TaskStore;
use crate::config::ConfigError;
use crate::domain::TrackerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Stopped,
}

pub struct Poller {
    engine: Arc<ReconciliationEngine>,
    interval: Duration,
}

impl Poller {
    pub fn new(engine: Arc<ReconciliationEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Start the loop on the current tokio runtime.
    pub fn spawn(self) -> Result<PollerHandle, TrackerError> {
        let Poller { engine, interval } = self;
        if interval.is_zero() {
            return Err(ConfigError::Invalid("poll interval must be positive".into()).into());
        }
        let store = engine.store().clone();
        if !store.claim_poller() {
            return Err(TrackerError::PollerAlreadyRunning);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(PollerState::Idle);
        let exit = PollerExit { store, state_tx };
        let join = tokio::spawn(async move {
            let exit = exit;
            poll_loop(engine, interval, shutdown_rx, &exit.state_tx).await;
        });

        Ok(PollerHandle {
            shutdown_tx,
            state_rx,
            join,
        })
    }
}

/// Poller handle.
/// - dropping it stops the poller (the shutdown sender goes away)
/// - `shutdown_and_join()` waits for the loop to finish
pub struct PollerHandle {
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<PollerState>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    pub fn state(&self) -> PollerState {
        *self.state_rx.borrow()
    }

    /// Stop after the current cycle, if any.
    pub fn request_shutdown(&self) {
        // receiver がもういなくても問題ない
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

/// Owned by the loop task. Dropped when the loop ends, however it ends:
/// reports `Stopped`, then frees the store's poller slot.
struct PollerExit {
    store: Arc<TaskStore>,
    state_tx: watch::Sender<PollerState>,
}

impl Drop for PollerExit {
    fn drop(&mut self) {
        self.state_tx.send_replace(PollerState::Stopped);
        self.store.release_poller();
    }
}

async fn poll_loop(
    engine: Arc<ReconciliationEngine>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    state_tx: &watch::Sender<PollerState>,
) {
    let mut active_rx = engine.store().watch_active();

    'idle: loop {
        state_tx.send_replace(PollerState::Idle);
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown_rx) => break 'idle,
            woke = active_rx.wait_for(|n| *n > 0) => {
                if woke.is_err() {
                    break 'idle;
                }
            }
        }

        info!(period_ms = period.as_millis() as u64, "active tasks found, polling started");
        state_tx.send_replace(PollerState::Polling);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown_rx) => break 'idle,
                _ = active_rx.wait_for(|n| *n == 0) => break,
                _ = ticker.tick() => {}
            }

            let report = engine.run_cycle().await;
            debug!(updated = report.updated, skipped = report.skipped, "poll tick");

            if engine.store().active_count() == 0 {
                break;
            }
        }
        // ticker はここで drop される。idle 中はタイマーを持たない
        info!("no active tasks left, polling stopped");
    }
}

/// Resolves once shutdown is requested or the handle is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
