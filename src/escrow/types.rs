// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! Escrow ledger types and the revert-reason taxonomy.

use alloy::primitives::{Address, B256, U256};

/// Identifier of an escrow lock (keccak256 of requester, provider, hashlock, nonce).
pub type LockId = B256;

/// One-way SHA-256 commitment to a secret preimage.
pub type Hashlock = B256;

/// On-chain lock state, mirroring the contract struct field for field.
///
/// The contract returns a zero-valued struct for unknown lock ids; there is
/// no distinct "not found" error. A zero `timelock` therefore means the slot
/// is empty (a real lock always has `timelock > 0` because the contract
/// rejects a zero duration).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lock {
    pub requester: Address,
    pub provider: Address,
    pub amount: U256,
    pub hashlock: Hashlock,
    /// Absolute expiry instant (unix seconds).
    pub timelock: u64,
    pub claimed: bool,
    pub refunded: bool,
}

impl Lock {
    /// Whether this lock id maps to a real lock on the ledger.
    pub fn exists(&self) -> bool {
        self.timelock != 0
    }

    /// Whether a terminal flag has been set.
    pub fn is_settled(&self) -> bool {
        self.claimed || self.refunded
    }

    /// Derive the lock's status relative to `now` (unix seconds).
    pub fn status(&self, now: u64) -> LockStatus {
        if !self.exists() {
            LockStatus::NotFound
        } else if self.claimed {
            LockStatus::Claimed
        } else if self.refunded {
            LockStatus::Refunded
        } else if now >= self.timelock {
            LockStatus::Expired
        } else {
            LockStatus::Active
        }
    }
}

/// Observable lifecycle status of a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// No lock exists under this id.
    NotFound,
    /// Unsettled and before the timelock: claimable by the provider.
    Active,
    /// Unsettled but past the timelock: refundable by the requester.
    Expired,
    Claimed,
    Refunded,
}

impl std::fmt::Display for LockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LockStatus::NotFound => "not_found",
            LockStatus::Active => "active",
            LockStatus::Expired => "expired",
            LockStatus::Claimed => "claimed",
            LockStatus::Refunded => "refunded",
        };
        write!(f, "{s}")
    }
}

/// Typed escrow failure taxonomy.
///
/// One variant per contract `require` reason, so callers can distinguish
/// "expired" from "wrong preimage" and drive retry/refund logic accordingly.
/// The display strings match the contract's revert reasons exactly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EscrowError {
    #[error("Must lock some value")]
    ZeroAmount,

    #[error("Invalid provider")]
    InvalidProvider,

    #[error("Invalid timelock")]
    InvalidTimelock,

    #[error("Only provider can claim")]
    NotProvider,

    #[error("Only requester can refund")]
    NotRequester,

    #[error("Already settled")]
    AlreadySettled,

    #[error("Lock expired")]
    Expired,

    #[error("Not yet expired")]
    NotYetExpired,

    #[error("Wrong preimage")]
    WrongPreimage,

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("RPC error: {0}")]
    Rpc(String),
}

impl EscrowError {
    /// Classify a raw revert reason string into the typed taxonomy.
    ///
    /// Unknown reasons fall through to [`EscrowError::Rpc`] so the original
    /// text is never lost.
    pub fn from_revert_reason(reason: &str) -> Self {
        const KNOWN: &[(&str, EscrowError)] = &[
            ("Must lock some value", EscrowError::ZeroAmount),
            ("Invalid provider", EscrowError::InvalidProvider),
            ("Invalid timelock", EscrowError::InvalidTimelock),
            ("Only provider can claim", EscrowError::NotProvider),
            ("Only requester can refund", EscrowError::NotRequester),
            ("Already settled", EscrowError::AlreadySettled),
            ("Lock expired", EscrowError::Expired),
            ("Not yet expired", EscrowError::NotYetExpired),
            ("Wrong preimage", EscrowError::WrongPreimage),
        ];

        for (needle, err) in KNOWN {
            if reason.contains(needle) {
                return err.clone();
            }
        }
        EscrowError::Rpc(reason.to_string())
    }

    /// Precondition violations are final for the attempted call and must
    /// never be retried automatically.
    pub fn is_precondition(&self) -> bool {
        !matches!(self, EscrowError::Rpc(_) | EscrowError::InvalidRpcUrl(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_struct_reads_as_not_found() {
        let lock = Lock::default();
        assert!(!lock.exists());
        assert_eq!(lock.status(1_000), LockStatus::NotFound);
    }

    #[test]
    fn status_follows_timelock_and_flags() {
        let lock = Lock {
            timelock: 500,
            ..Lock::default()
        };
        assert_eq!(lock.status(499), LockStatus::Active);
        assert_eq!(lock.status(500), LockStatus::Expired);

        let claimed = Lock {
            claimed: true,
            ..lock.clone()
        };
        assert_eq!(claimed.status(499), LockStatus::Claimed);

        let refunded = Lock {
            refunded: true,
            ..lock
        };
        assert_eq!(refunded.status(9_999), LockStatus::Refunded);
    }

    #[test]
    fn revert_reasons_classify_to_typed_variants() {
        assert_eq!(
            EscrowError::from_revert_reason("execution reverted: Wrong preimage"),
            EscrowError::WrongPreimage
        );
        assert_eq!(
            EscrowError::from_revert_reason("Lock expired"),
            EscrowError::Expired
        );
        assert_eq!(
            EscrowError::from_revert_reason("Already settled"),
            EscrowError::AlreadySettled
        );
        assert!(matches!(
            EscrowError::from_revert_reason("something else entirely"),
            EscrowError::Rpc(_)
        ));
    }

    #[test]
    fn preconditions_are_not_retryable() {
        assert!(EscrowError::WrongPreimage.is_precondition());
        assert!(EscrowError::NotYetExpired.is_precondition());
        assert!(!EscrowError::Rpc("timeout".into()).is_precondition());
    }
}
