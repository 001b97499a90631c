// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! Escrow ledger integration.
//!
//! This module provides:
//! - The lock data model and typed revert taxonomy
//! - An in-memory reference ledger with the exact contract semantics
//! - The `sol!` binding and read client for the deployed contract
//! - A wallet-backed transaction submitter
//! - A background watcher publishing lock status transitions

use std::future::Future;

pub mod contract;
pub mod ledger;
pub mod submitter;
pub mod types;
pub mod units;
pub mod watcher;

pub use contract::EvmEscrow;
pub use ledger::{Clock, InMemoryLedger, LedgerEvent, ManualClock, SystemClock};
pub use submitter::EvmWallet;
pub use types::{EscrowError, Hashlock, Lock, LockId, LockStatus};
pub use units::{format_amount, parse_amount};
pub use watcher::{LockUpdate, LockWatcher};

/// Read access to the escrow ledger.
///
/// Injected into the lifecycle controllers and the lock watcher so they can
/// be driven against the in-memory reference ledger in tests.
pub trait EscrowReader: Send + Sync {
    /// Read a lock's current on-chain state. Unknown ids yield the
    /// zero-valued struct, never an error.
    fn read_lock(
        &self,
        lock_id: LockId,
    ) -> impl Future<Output = Result<Lock, EscrowError>> + Send;
}

/// Discovery of the authoritative lock id from a confirmed lock transaction.
pub trait LockDiscovery: Send + Sync {
    /// Find the lock id emitted by the `Locked` event of `tx_hash`, mined in
    /// `block_number`. `None` when the transaction emitted no such event.
    fn find_lock_id(
        &self,
        tx_hash: alloy::primitives::B256,
        block_number: u64,
    ) -> impl Future<Output = Result<Option<LockId>, EscrowError>> + Send;
}
