// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! Protocol-level error taxonomy.
//!
//! Four classes drive the handling policy:
//! - precondition violations: final for the attempted call, never retried
//!   automatically;
//! - transient wallet/transport failures: recoverable by re-running the
//!   same step;
//! - stale state: the lock was settled or moved on by the time of action,
//!   detected by re-reading the ledger, terminal for that action;
//! - malformed input: skipped per-message, never fatal to a listener.

use alloy::primitives::B256;

use crate::commitment::CommitmentError;
use crate::escrow::{EscrowError, LockStatus};
use crate::lifecycle::{TransitionError, WalletError};
use crate::notify::NotifyError;
use crate::payload::PayloadError;

/// Handling class of a [`ProtocolError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Fatal for the attempted call; never retried automatically.
    Precondition,
    /// Recoverable by user-driven retry of the same step.
    Transient,
    /// The lock's state moved on; terminal for this action.
    Stale,
    /// A single bad message; skip it and continue.
    Malformed,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Escrow(#[from] EscrowError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Commitment(#[from] CommitmentError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("No secret/hashlock commitment generated yet")]
    NoCommitment,

    #[error("Lock id not yet confirmed for this request")]
    LockIdUnknown,

    #[error("No Locked event found for transaction {tx_hash}")]
    LockIdNotFound { tx_hash: B256 },

    #[error("Transaction {tx_hash} reverted")]
    TransactionReverted { tx_hash: B256 },

    #[error("Request carries no secret and no standing secret was supplied")]
    MissingSecret,

    #[error("Lock is {status}; claim is not possible")]
    LockUnavailable { status: LockStatus },

    #[error("Refund unavailable: lock is {status}")]
    RefundUnavailable { status: LockStatus },

    #[error("Lock was settled in the meantime: {status}")]
    LockSettled { status: LockStatus },

    #[error("On-chain hashlock does not match the request")]
    HashlockMismatch,

    #[error("Secret does not hash to the lock's hashlock")]
    SecretMismatch,

    #[error("Lock is not addressed to this provider")]
    NotLockProvider,
}

impl ProtocolError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProtocolError::Escrow(e) => {
                if e.is_precondition() {
                    ErrorClass::Precondition
                } else {
                    ErrorClass::Transient
                }
            }
            ProtocolError::Wallet(_) => ErrorClass::Transient,
            ProtocolError::Notify(NotifyError::Transport(_)) => ErrorClass::Transient,
            ProtocolError::Notify(NotifyError::Malformed(_)) => ErrorClass::Malformed,
            ProtocolError::Payload(_) => ErrorClass::Malformed,
            ProtocolError::Commitment(CommitmentError::Rng) => ErrorClass::Transient,
            ProtocolError::Commitment(_) => ErrorClass::Malformed,
            ProtocolError::LockUnavailable { .. }
            | ProtocolError::RefundUnavailable { .. }
            | ProtocolError::LockSettled { .. } => ErrorClass::Stale,
            ProtocolError::Transition(_)
            | ProtocolError::NoCommitment
            | ProtocolError::LockIdUnknown
            | ProtocolError::LockIdNotFound { .. }
            | ProtocolError::TransactionReverted { .. }
            | ProtocolError::MissingSecret
            | ProtocolError::HashlockMismatch
            | ProtocolError::SecretMismatch
            | ProtocolError::NotLockProvider => ErrorClass::Precondition,
        }
    }

    /// Whether re-running the same step may succeed.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_failures_are_retryable() {
        let err = ProtocolError::Wallet(WalletError::Rejected("user declined".into()));
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.is_retryable());
    }

    #[test]
    fn ledger_preconditions_are_not_retryable() {
        let err = ProtocolError::Escrow(EscrowError::WrongPreimage);
        assert_eq!(err.class(), ErrorClass::Precondition);
        assert!(!err.is_retryable());
    }

    #[test]
    fn settled_locks_are_stale_not_retryable() {
        let err = ProtocolError::LockSettled {
            status: LockStatus::Claimed,
        };
        assert_eq!(err.class(), ErrorClass::Stale);
        assert!(!err.is_retryable());
    }

    #[test]
    fn malformed_messages_are_classified_for_skipping() {
        let err = ProtocolError::Notify(NotifyError::Malformed("bad json".into()));
        assert_eq!(err.class(), ErrorClass::Malformed);
    }
}
