// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! HealthSwap Protocol - HTLC Data Exchange Client
//!
//! Client-side implementation of the hashed time-locked data-exchange
//! protocol: an on-chain fund escrow coordinated with an off-chain
//! encrypted data handoff so that payment and data delivery hinge on the
//! same secret.
//!
//! ## Modules
//!
//! - `escrow` - Escrow ledger: types, reference implementation, EVM binding,
//!   wallet submitter, lock watcher
//! - `commitment` - Secret generation and SHA-256 hashlock scheme
//! - `lifecycle` - Requester and provider state machines over injected ports
//! - `notify` - Notification channel adapter and background listener
//! - `payload` - Conditional payload encryption under the exchange secret
//!
//! No durable local store: a party's state is rebuilt from the ledger and
//! the notification channel on each load.

pub mod commitment;
pub mod config;
pub mod error;
pub mod escrow;
pub mod lifecycle;
pub mod logging;
pub mod notify;
pub mod payload;

pub use error::{ErrorClass, ProtocolError};
