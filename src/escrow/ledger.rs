// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! In-memory reference ledger with the exact escrow contract semantics.
//!
//! Implements the same lock/claim/refund/getLock behavior as the deployed
//! contract, including the nonce-based lock id scheme and the revert
//! reasons, against an injectable clock and per-address balances. Used as
//! the injectable test double for the lifecycle controllers and as a local
//! simulation when no chain is available.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use alloy::primitives::{keccak256, Address, B256, U256};
use sha2::{Digest, Sha256};

use super::types::{EscrowError, Hashlock, Lock, LockId};

/// Source of the current unix time, injectable for tests.
pub trait Clock: Send + Sync {
    /// Current unix time in seconds.
    fn now(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// Manually driven clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Events emitted by the ledger, one per state-changing call.
///
/// `Claimed` carries the revealed preimage: from the instant a claim lands,
/// the secret is public knowledge to anyone observing the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Locked {
        lock_id: LockId,
        requester: Address,
        provider: Address,
        hashlock: Hashlock,
        timelock: u64,
        amount: U256,
    },
    Claimed {
        lock_id: LockId,
        preimage: B256,
    },
    Refunded {
        lock_id: LockId,
    },
}

#[derive(Default)]
struct LedgerState {
    locks: HashMap<LockId, Lock>,
    balances: HashMap<Address, U256>,
    nonce: u64,
    events: Vec<LedgerEvent>,
}

/// In-memory escrow ledger.
///
/// State-changing calls are serialized through an internal mutex, matching
/// the chain's own atomicity: concurrent claim+refund attempts on the same
/// lock race, and the precondition checks deterministically pick the winner.
pub struct InMemoryLedger {
    inner: Mutex<LedgerState>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(LedgerState::default()),
            clock,
        }
    }

    /// Fund an account so it can lock value.
    pub fn credit(&self, account: Address, amount: U256) {
        let mut state = self.inner.lock().expect("ledger mutex poisoned");
        let entry = state.balances.entry(account).or_default();
        *entry += amount;
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        let state = self.inner.lock().expect("ledger mutex poisoned");
        state.balances.get(&account).copied().unwrap_or_default()
    }

    /// Escrow `value` from `caller` for `provider` under `hashlock`.
    ///
    /// The lock id is keccak256 over the packed (caller, provider, hashlock,
    /// nonce) tuple; the nonce increments on every call, so two locks with
    /// identical arguments always get distinct ids.
    pub fn lock(
        &self,
        caller: Address,
        value: U256,
        provider: Address,
        hashlock: Hashlock,
        timelock_duration: u64,
    ) -> Result<LockId, EscrowError> {
        if value.is_zero() {
            return Err(EscrowError::ZeroAmount);
        }
        if provider == Address::ZERO {
            return Err(EscrowError::InvalidProvider);
        }
        if timelock_duration == 0 {
            return Err(EscrowError::InvalidTimelock);
        }

        let mut state = self.inner.lock().expect("ledger mutex poisoned");

        let balance = state.balances.get(&caller).copied().unwrap_or_default();
        if balance < value {
            return Err(EscrowError::InsufficientBalance);
        }

        let lock_id = compute_lock_id(caller, provider, hashlock, state.nonce);
        state.nonce += 1;

        let timelock = self.clock.now() + timelock_duration;
        state.balances.insert(caller, balance - value);
        state.locks.insert(
            lock_id,
            Lock {
                requester: caller,
                provider,
                amount: value,
                hashlock,
                timelock,
                claimed: false,
                refunded: false,
            },
        );
        state.events.push(LedgerEvent::Locked {
            lock_id,
            requester: caller,
            provider,
            hashlock,
            timelock,
            amount: value,
        });

        Ok(lock_id)
    }

    /// Reveal the preimage and release the escrowed funds to the provider.
    pub fn claim(
        &self,
        caller: Address,
        lock_id: LockId,
        preimage: B256,
    ) -> Result<(), EscrowError> {
        let now = self.clock.now();
        let mut state = self.inner.lock().expect("ledger mutex poisoned");

        let lock = state.locks.get(&lock_id).cloned().unwrap_or_default();
        if lock.provider != caller {
            return Err(EscrowError::NotProvider);
        }
        if lock.is_settled() {
            return Err(EscrowError::AlreadySettled);
        }
        if now >= lock.timelock {
            return Err(EscrowError::Expired);
        }
        if sha256_digest(preimage.as_slice()) != lock.hashlock {
            return Err(EscrowError::WrongPreimage);
        }

        let entry = state.balances.entry(lock.provider).or_default();
        *entry += lock.amount;
        state
            .locks
            .get_mut(&lock_id)
            .expect("checked above")
            .claimed = true;
        state.events.push(LedgerEvent::Claimed { lock_id, preimage });
        Ok(())
    }

    /// Return the escrowed funds to the requester after expiry.
    pub fn refund(&self, caller: Address, lock_id: LockId) -> Result<(), EscrowError> {
        let now = self.clock.now();
        let mut state = self.inner.lock().expect("ledger mutex poisoned");

        let lock = state.locks.get(&lock_id).cloned().unwrap_or_default();
        if lock.requester != caller {
            return Err(EscrowError::NotRequester);
        }
        if lock.is_settled() {
            return Err(EscrowError::AlreadySettled);
        }
        if now < lock.timelock {
            return Err(EscrowError::NotYetExpired);
        }

        let entry = state.balances.entry(lock.requester).or_default();
        *entry += lock.amount;
        state
            .locks
            .get_mut(&lock_id)
            .expect("checked above")
            .refunded = true;
        state.events.push(LedgerEvent::Refunded { lock_id });
        Ok(())
    }

    /// Read a lock. Unknown ids return the zero-valued struct, like the
    /// contract's public mapping.
    pub fn get_lock(&self, lock_id: LockId) -> Lock {
        let state = self.inner.lock().expect("ledger mutex poisoned");
        state.locks.get(&lock_id).cloned().unwrap_or_default()
    }

    /// Snapshot of all emitted events, in order.
    pub fn events(&self) -> Vec<LedgerEvent> {
        let state = self.inner.lock().expect("ledger mutex poisoned");
        state.events.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl super::EscrowReader for InMemoryLedger {
    async fn read_lock(&self, lock_id: LockId) -> Result<Lock, EscrowError> {
        Ok(self.get_lock(lock_id))
    }
}

/// `keccak256(abi.encodePacked(requester, provider, hashlock, nonce))`,
/// nonce packed as a 32-byte big-endian word like Solidity's `uint256`.
fn compute_lock_id(requester: Address, provider: Address, hashlock: Hashlock, nonce: u64) -> LockId {
    let mut packed = Vec::with_capacity(20 + 20 + 32 + 32);
    packed.extend_from_slice(requester.as_slice());
    packed.extend_from_slice(provider.as_slice());
    packed.extend_from_slice(hashlock.as_slice());
    packed.extend_from_slice(U256::from(nonce).to_be_bytes::<32>().as_slice());
    keccak256(&packed)
}

fn sha256_digest(bytes: &[u8]) -> B256 {
    B256::from_slice(&Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_ETH: u64 = 1_000_000_000_000_000_000;
    const TIMELOCK_DURATION: u64 = 3600;

    fn requester() -> Address {
        Address::repeat_byte(0x11)
    }

    fn provider() -> Address {
        Address::repeat_byte(0x22)
    }

    fn other() -> Address {
        Address::repeat_byte(0x33)
    }

    fn preimage() -> B256 {
        B256::repeat_byte(0x42)
    }

    fn hashlock() -> Hashlock {
        sha256_digest(preimage().as_slice())
    }

    fn funded_ledger(clock: Arc<ManualClock>) -> InMemoryLedger {
        let ledger = InMemoryLedger::with_clock(clock);
        ledger.credit(requester(), U256::from(10 * ONE_ETH));
        ledger
    }

    #[test]
    fn lock_persists_fields_and_timelock() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = funded_ledger(clock.clone());

        let id = ledger
            .lock(
                requester(),
                U256::from(ONE_ETH),
                provider(),
                hashlock(),
                TIMELOCK_DURATION,
            )
            .unwrap();

        let lock = ledger.get_lock(id);
        assert_eq!(lock.requester, requester());
        assert_eq!(lock.provider, provider());
        assert_eq!(lock.amount, U256::from(ONE_ETH));
        assert_eq!(lock.hashlock, hashlock());
        assert_eq!(lock.timelock, 1_000 + TIMELOCK_DURATION);
        assert!(!lock.claimed);
        assert!(!lock.refunded);
    }

    #[test]
    fn lock_rejects_invalid_preconditions() {
        let ledger = funded_ledger(Arc::new(ManualClock::new(0)));

        assert_eq!(
            ledger.lock(requester(), U256::ZERO, provider(), hashlock(), 1),
            Err(EscrowError::ZeroAmount)
        );
        assert_eq!(
            ledger.lock(
                requester(),
                U256::from(1u64),
                Address::ZERO,
                hashlock(),
                1
            ),
            Err(EscrowError::InvalidProvider)
        );
        assert_eq!(
            ledger.lock(requester(), U256::from(1u64), provider(), hashlock(), 0),
            Err(EscrowError::InvalidTimelock)
        );
        assert_eq!(
            ledger.lock(
                other(),
                U256::from(ONE_ETH),
                provider(),
                hashlock(),
                1
            ),
            Err(EscrowError::InsufficientBalance)
        );
    }

    #[test]
    fn identical_lock_calls_produce_distinct_ids() {
        let ledger = funded_ledger(Arc::new(ManualClock::new(0)));
        let args = (U256::from(ONE_ETH), provider(), hashlock(), TIMELOCK_DURATION);

        let a = ledger.lock(requester(), args.0, args.1, args.2, args.3).unwrap();
        let b = ledger.lock(requester(), args.0, args.1, args.2, args.3).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn claim_with_correct_preimage_pays_provider() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = funded_ledger(clock.clone());
        let id = ledger
            .lock(
                requester(),
                U256::from(ONE_ETH),
                provider(),
                hashlock(),
                TIMELOCK_DURATION,
            )
            .unwrap();

        assert_eq!(ledger.balance_of(provider()), U256::ZERO);
        ledger.claim(provider(), id, preimage()).unwrap();

        assert_eq!(ledger.balance_of(provider()), U256::from(ONE_ETH));
        assert!(ledger.get_lock(id).claimed);
        assert!(matches!(
            ledger.events().last(),
            Some(LedgerEvent::Claimed { preimage: p, .. }) if *p == preimage()
        ));
    }

    #[test]
    fn claim_rejects_each_violated_precondition() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = funded_ledger(clock.clone());
        let id = ledger
            .lock(
                requester(),
                U256::from(ONE_ETH),
                provider(),
                hashlock(),
                TIMELOCK_DURATION,
            )
            .unwrap();

        assert_eq!(
            ledger.claim(other(), id, preimage()),
            Err(EscrowError::NotProvider)
        );
        assert_eq!(
            ledger.claim(provider(), id, B256::repeat_byte(0x99)),
            Err(EscrowError::WrongPreimage)
        );

        // State unchanged by the failed attempts.
        let lock = ledger.get_lock(id);
        assert!(!lock.claimed && !lock.refunded);

        clock.advance(TIMELOCK_DURATION);
        assert_eq!(
            ledger.claim(provider(), id, preimage()),
            Err(EscrowError::Expired)
        );
    }

    #[test]
    fn refund_after_expiry_repays_requester() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = funded_ledger(clock.clone());
        let id = ledger
            .lock(
                requester(),
                U256::from(ONE_ETH),
                provider(),
                hashlock(),
                TIMELOCK_DURATION,
            )
            .unwrap();
        let balance_after_lock = ledger.balance_of(requester());

        assert_eq!(
            ledger.refund(requester(), id),
            Err(EscrowError::NotYetExpired)
        );

        clock.advance(TIMELOCK_DURATION);
        assert_eq!(
            ledger.refund(other(), id),
            Err(EscrowError::NotRequester)
        );
        ledger.refund(requester(), id).unwrap();

        assert_eq!(
            ledger.balance_of(requester()),
            balance_after_lock + U256::from(ONE_ETH)
        );
        assert!(ledger.get_lock(id).refunded);
    }

    #[test]
    fn settled_locks_reject_all_further_settlement() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = funded_ledger(clock.clone());
        let id = ledger
            .lock(
                requester(),
                U256::from(ONE_ETH),
                provider(),
                hashlock(),
                TIMELOCK_DURATION,
            )
            .unwrap();

        ledger.claim(provider(), id, preimage()).unwrap();

        assert_eq!(
            ledger.claim(provider(), id, preimage()),
            Err(EscrowError::AlreadySettled)
        );
        clock.advance(TIMELOCK_DURATION + 1);
        assert_eq!(
            ledger.refund(requester(), id),
            Err(EscrowError::AlreadySettled)
        );

        let lock = ledger.get_lock(id);
        assert!(lock.claimed && !lock.refunded);
    }

    #[test]
    fn double_refund_rejected() {
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = funded_ledger(clock.clone());
        let id = ledger
            .lock(
                requester(),
                U256::from(ONE_ETH),
                provider(),
                hashlock(),
                TIMELOCK_DURATION,
            )
            .unwrap();

        clock.advance(TIMELOCK_DURATION);
        ledger.refund(requester(), id).unwrap();
        assert_eq!(
            ledger.refund(requester(), id),
            Err(EscrowError::AlreadySettled)
        );
        assert_eq!(
            ledger.claim(provider(), id, preimage()),
            Err(EscrowError::AlreadySettled)
        );
    }

    #[test]
    fn unknown_lock_reads_as_zero_struct_repeatedly() {
        let ledger = InMemoryLedger::new();
        let id = keccak256(b"does-not-exist");

        let first = ledger.get_lock(id);
        let second = ledger.get_lock(id);
        assert_eq!(first, Lock::default());
        assert_eq!(first, second);
        assert!(first.amount.is_zero());
    }
}
