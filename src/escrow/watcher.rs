// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! # Lock Watcher
//!
//! Background task that polls the escrow ledger for a registered set of
//! outstanding locks and publishes status transitions (active → expired,
//! active → claimed, ...) over a channel. Consumers use the transitions to
//! gate the refund sub-flow and to detect settlement without polling the
//! ledger themselves.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ledger::Clock;
use super::types::{Lock, LockId, LockStatus};
use super::EscrowReader;

/// Default interval between polling sweeps.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Buffered capacity of the update channel.
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// A status transition observed for a watched lock.
#[derive(Debug, Clone)]
pub struct LockUpdate {
    pub lock_id: LockId,
    pub previous: LockStatus,
    pub current: LockStatus,
    pub lock: Lock,
}

/// Background lock status poller.
pub struct LockWatcher<E: EscrowReader> {
    reader: Arc<E>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    watched: Arc<Mutex<HashMap<LockId, LockStatus>>>,
    updates: mpsc::Sender<LockUpdate>,
}

impl<E: EscrowReader> LockWatcher<E> {
    /// Create a watcher and the receiving end of its update channel.
    pub fn new(reader: Arc<E>, clock: Arc<dyn Clock>) -> (Self, mpsc::Receiver<LockUpdate>) {
        let (tx, rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        (
            Self {
                reader,
                clock,
                poll_interval: DEFAULT_POLL_INTERVAL,
                watched: Arc::new(Mutex::new(HashMap::new())),
                updates: tx,
            },
            rx,
        )
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Handle for registering locks from outside the running task.
    pub fn handle(&self) -> WatchHandle {
        WatchHandle {
            watched: Arc::clone(&self.watched),
        }
    }

    /// Run the watcher loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(watcher.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Lock watcher starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Lock watcher shutting down");
                return;
            }

            self.poll_step().await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Lock watcher shutting down");
                    return;
                }
            }
        }
    }

    /// Execute one polling sweep over all watched locks.
    pub async fn poll_step(&self) {
        let snapshot: Vec<(LockId, LockStatus)> = {
            let watched = self.watched.lock().expect("watcher mutex poisoned");
            watched.iter().map(|(id, s)| (*id, *s)).collect()
        };

        if snapshot.is_empty() {
            return;
        }

        let now = self.clock.now();

        for (lock_id, previous) in snapshot {
            let lock = match self.reader.read_lock(lock_id).await {
                Ok(lock) => lock,
                Err(e) => {
                    warn!(lock_id = %lock_id, error = %e, "Lock watcher: read failed, will retry");
                    continue;
                }
            };

            let current = lock.status(now);
            if current == previous {
                continue;
            }

            {
                let mut watched = self.watched.lock().expect("watcher mutex poisoned");
                watched.insert(lock_id, current);
            }

            info!(
                lock_id = %lock_id,
                previous = %previous,
                current = %current,
                "Lock status transition"
            );

            let update = LockUpdate {
                lock_id,
                previous,
                current,
                lock,
            };
            if self.updates.send(update).await.is_err() {
                // Receiver dropped; keep polling so state stays current.
                warn!("Lock watcher: update receiver dropped");
            }
        }
    }
}

/// Registration handle shared with the watcher task.
#[derive(Clone)]
pub struct WatchHandle {
    watched: Arc<Mutex<HashMap<LockId, LockStatus>>>,
}

impl WatchHandle {
    /// Start watching a lock. The first observed status is reported as a
    /// transition from `NotFound`.
    pub fn watch(&self, lock_id: LockId) {
        let mut watched = self.watched.lock().expect("watcher mutex poisoned");
        watched.entry(lock_id).or_insert(LockStatus::NotFound);
    }

    /// Stop watching a lock.
    pub fn unwatch(&self, lock_id: LockId) {
        let mut watched = self.watched.lock().expect("watcher mutex poisoned");
        watched.remove(&lock_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::ledger::{InMemoryLedger, ManualClock};
    use alloy::primitives::{Address, B256, U256};
    use sha2::{Digest, Sha256};

    const ONE_ETH: u64 = 1_000_000_000_000_000_000;

    fn setup() -> (Arc<InMemoryLedger>, Arc<ManualClock>, LockId) {
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = Arc::new(InMemoryLedger::with_clock(clock.clone()));
        let requester = Address::repeat_byte(0x11);
        ledger.credit(requester, U256::from(ONE_ETH));
        let preimage = B256::repeat_byte(0x42);
        let hashlock = B256::from_slice(&Sha256::digest(preimage.as_slice()));
        let lock_id = ledger
            .lock(
                requester,
                U256::from(ONE_ETH),
                Address::repeat_byte(0x22),
                hashlock,
                3600,
            )
            .unwrap();
        (ledger, clock, lock_id)
    }

    #[tokio::test]
    async fn reports_initial_status_and_expiry_transition() {
        let (ledger, clock, lock_id) = setup();
        let (watcher, mut updates) = LockWatcher::new(ledger.clone(), clock.clone());
        watcher.handle().watch(lock_id);

        watcher.poll_step().await;
        let first = updates.recv().await.unwrap();
        assert_eq!(first.previous, LockStatus::NotFound);
        assert_eq!(first.current, LockStatus::Active);

        // No transition while nothing changes.
        watcher.poll_step().await;
        assert!(updates.try_recv().is_err());

        clock.advance(3600);
        watcher.poll_step().await;
        let second = updates.recv().await.unwrap();
        assert_eq!(second.previous, LockStatus::Active);
        assert_eq!(second.current, LockStatus::Expired);
    }

    #[tokio::test]
    async fn reports_claim_transition() {
        let (ledger, clock, lock_id) = setup();
        let (watcher, mut updates) = LockWatcher::new(ledger.clone(), clock.clone());
        watcher.handle().watch(lock_id);

        watcher.poll_step().await;
        updates.recv().await.unwrap();

        let preimage = B256::repeat_byte(0x42);
        ledger
            .claim(Address::repeat_byte(0x22), lock_id, preimage)
            .unwrap();

        watcher.poll_step().await;
        let update = updates.recv().await.unwrap();
        assert_eq!(update.current, LockStatus::Claimed);
        assert!(update.lock.claimed);
    }

    #[tokio::test]
    async fn unwatch_stops_reporting() {
        let (ledger, clock, lock_id) = setup();
        let (watcher, mut updates) = LockWatcher::new(ledger, clock.clone());
        let handle = watcher.handle();
        handle.watch(lock_id);

        watcher.poll_step().await;
        updates.recv().await.unwrap();

        handle.unwatch(lock_id);
        clock.advance(7200);
        watcher.poll_step().await;
        assert!(updates.try_recv().is_err());
    }
}
