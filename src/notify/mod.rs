// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! Notification channel integration.
//!
//! Maps protocol messages (access request, access response, self-backup)
//! onto an opaque encrypted pub/sub transport. The transport is
//! at-least-once and unordered; everything in this module is written to
//! preserve exactly-once-observed semantics on top of that.

pub mod adapter;
pub mod listener;
pub mod memory;
pub mod messages;

pub use adapter::{
    Envelope, InboundRequest, MessageFilter, NotificationAdapter, OutgoingRequestView, RelayPort,
};
pub use listener::{InboundMessage, MessageListener};
pub use memory::{InMemoryRelay, RelayHub};
pub use messages::{
    AccessRequest, AccessResponse, OutgoingRequestBackup, ProtocolMessage, APP_TAG,
    DATASHARE_OP_TAG,
};

/// Notification channel failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NotifyError {
    #[error("Relay transport error: {0}")]
    Transport(String),

    /// A single message could not be understood. Malformed messages are
    /// skipped individually; they are never fatal to the listening process.
    #[error("Malformed message: {0}")]
    Malformed(String),
}
