// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! Lock lifecycle controllers.
//!
//! Each party runs its own finite state machine over the shared escrow:
//! the requester's lock → notify → (refund) path and the provider's
//! validate → claim → respond path. State transitions are pure functions
//! over tagged-union state types; the controllers are the outer drivers
//! that perform the I/O through injected ports and apply the resulting
//! events.
//!
//! One controller instance covers one lock. No two protocol-affecting
//! steps for the same lock run concurrently because every step takes
//! `&mut self`; concurrency across different locks is unconstrained.

pub mod ports;
pub mod provider;
pub mod requester;

pub use ports::{
    FinalizedTx, GasEstimate, SignedTx, TxHash, TxIntention, TxReceipt, WalletError, WalletPort,
};
pub use provider::{ProviderController, ProviderEvent, ProviderState};
pub use requester::{RequestParams, RequesterController, RequesterEvent, RequesterState};

/// An event arrived in a state that does not accept it.
///
/// The driver never mutates state on a failed transition, so the phase the
/// controller was in survives the error untouched and the same step can be
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid transition: {event} while {from}")]
pub struct TransitionError {
    pub from: &'static str,
    pub event: &'static str,
}
