// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! Injected wallet port for the two-phase transaction flow.
//!
//! The controllers never talk to a wallet or RPC endpoint directly; they are
//! handed a [`WalletPort`] and drive it through the assemble → finalize →
//! sign → broadcast phases. Each phase's output is carried in the controller
//! state so a failed step can be retried without re-running earlier steps.

use std::future::Future;
use std::time::Duration;

use alloy::{
    primitives::{Address, B256, U256},
    rpc::types::TransactionRequest,
};

/// A transaction intention: the local, not-yet-priced description of a call.
///
/// Assembling an intention has no external effect; it is always safe to
/// rebuild, and a fresh intention supersedes a stale one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIntention {
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
}

/// Fee estimation result attached to a finalized transaction.
#[derive(Debug, Clone)]
pub struct GasEstimate {
    /// Estimated gas limit
    pub gas_limit: u64,
    /// Current max fee per gas (base fee + priority fee)
    pub max_fee_per_gas: u128,
    /// Max priority fee per gas (tip)
    pub max_priority_fee_per_gas: u128,
    /// Total estimated cost in wei
    pub estimated_cost_wei: U256,
}

/// Output of the finalize phase: a fully priced transaction ready to sign.
#[derive(Debug, Clone)]
pub struct FinalizedTx {
    pub request: TransactionRequest,
    pub gas: GasEstimate,
}

/// Output of the sign phase: the serialized signed transaction.
#[derive(Debug, Clone)]
pub struct SignedTx {
    /// EIP-2718 encoded signed transaction bytes.
    pub raw: Vec<u8>,
}

/// Transaction hash returned by broadcast.
pub type TxHash = B256;

/// Receipt after inclusion.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    /// Block number where the transaction was included
    pub block_number: u64,
    /// Gas actually used
    pub gas_used: u64,
    /// Whether the transaction was successful
    pub success: bool,
}

/// Wallet-side failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WalletError {
    /// The user declined to sign. Retryable by re-running the sign step.
    #[error("Signature rejected: {0}")]
    Rejected(String),

    #[error("Invalid transaction material: {0}")]
    InvalidTransaction(String),

    #[error("Broadcast failed: {0}")]
    Broadcast(String),

    /// The confirmation wait hit its bound. The transaction may still land;
    /// callers must re-query authoritative state before declaring failure.
    #[error("Transaction confirmation timed out")]
    ConfirmationTimeout,

    #[error("Wallet transport error: {0}")]
    Transport(String),
}

impl WalletError {
    /// Whether re-running the same step may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WalletError::Rejected(_)
                | WalletError::ConfirmationTimeout
                | WalletError::Transport(_)
        )
    }
}

/// The external wallet capability: finalize, sign, broadcast, confirm.
///
/// Modeled as a two-phase assembly so a pure single-phase "send" wallet
/// cannot silently skip the fee-calculation/signing gates the protocol
/// tracks per step.
pub trait WalletPort: Send + Sync {
    /// Account this wallet signs for.
    fn address(&self) -> Address;

    /// Price the intention: gas estimation, fee calculation, nonce and chain
    /// id assignment. Returns the material to sign.
    fn finalize(
        &self,
        intention: &TxIntention,
    ) -> impl Future<Output = Result<FinalizedTx, WalletError>> + Send;

    /// Sign the finalized transaction.
    fn sign(
        &self,
        finalized: &FinalizedTx,
    ) -> impl Future<Output = Result<SignedTx, WalletError>> + Send;

    /// Submit the signed transaction to the network. Once this succeeds the
    /// transaction cannot be withdrawn.
    fn broadcast(
        &self,
        signed: &SignedTx,
    ) -> impl Future<Output = Result<TxHash, WalletError>> + Send;

    /// Wait for inclusion, bounded by `timeout`.
    fn await_confirmation(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> impl Future<Output = Result<TxReceipt, WalletError>> + Send;

    /// Non-blocking receipt lookup, for re-querying after a timed-out
    /// confirmation wait.
    fn transaction_status(
        &self,
        tx_hash: TxHash,
    ) -> impl Future<Output = Result<Option<TxReceipt>, WalletError>> + Send;
}
