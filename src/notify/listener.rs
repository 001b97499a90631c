// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! # Message Listener
//!
//! Background task that periodically re-reads the filtered channel view and
//! forwards first-seen protocol messages over a channel. The transport is
//! at-least-once and unordered, so the listener de-duplicates by message id;
//! malformed or undecryptable messages are skipped individually and never
//! stop the loop.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken` for graceful shutdown,
//! following the same pattern as the lock watcher.

use std::collections::HashSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::adapter::{MessageFilter, RelayPort};
use super::messages::{ProtocolMessage, DATASHARE_OP_TAG};

/// Default interval between inbox sweeps.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Buffered capacity of the inbound channel.
const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// A first-seen protocol message with its transport metadata.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub msg_id: String,
    pub sender: String,
    pub created_at: u64,
    pub message: ProtocolMessage,
}

/// Background inbox poller.
pub struct MessageListener<R: RelayPort> {
    relay: R,
    /// Our own transport pubkey.
    me: String,
    poll_interval: Duration,
    seen: HashSet<String>,
    inbound: mpsc::Sender<InboundMessage>,
}

impl<R: RelayPort> MessageListener<R> {
    /// Create a listener and the receiving end of its message channel.
    pub fn new(relay: R, me: impl Into<String>) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        (
            Self {
                relay,
                me: me.into(),
                poll_interval: DEFAULT_POLL_INTERVAL,
                seen: HashSet::new(),
                inbound: tx,
            },
            rx,
        )
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run the listener loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(listener.run(shutdown.clone()));
    /// ```
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Message listener starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Message listener shutting down");
                return;
            }

            self.poll_step().await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Message listener shutting down");
                    return;
                }
            }
        }
    }

    /// Execute one inbox sweep, forwarding messages not seen before.
    pub async fn poll_step(&mut self) {
        let filter = MessageFilter {
            recipient: Some(self.me.clone()),
            author: None,
            op_tag: DATASHARE_OP_TAG.to_string(),
        };

        let envelopes = match self.relay.fetch(&filter).await {
            Ok(envelopes) => envelopes,
            Err(e) => {
                warn!(error = %e, "Message listener: fetch failed, will retry");
                return;
            }
        };

        for env in envelopes {
            if self.seen.contains(&env.id) {
                continue;
            }
            self.seen.insert(env.id.clone());

            let Some(content) = env.content.as_deref() else {
                debug!(msg_id = %env.id, "Skipping undecryptable message");
                continue;
            };
            let message = match ProtocolMessage::from_json(content) {
                Ok(message) => message,
                Err(e) => {
                    debug!(msg_id = %env.id, error = %e, "Skipping malformed message");
                    continue;
                }
            };

            let inbound = InboundMessage {
                msg_id: env.id,
                sender: env.sender,
                created_at: env.created_at,
                message,
            };
            if self.inbound.send(inbound).await.is_err() {
                warn!("Message listener: inbound receiver dropped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::memory::{InMemoryRelay, RelayHub};
    use crate::notify::messages::{AccessResponse, APP_TAG, TAG_APP, TAG_OP};

    fn tags() -> Vec<(String, String)> {
        vec![
            (TAG_APP.to_string(), APP_TAG.to_string()),
            (TAG_OP.to_string(), DATASHARE_OP_TAG.to_string()),
        ]
    }

    fn response_json(lock_byte: u8) -> String {
        ProtocolMessage::DataAccessResponse(AccessResponse {
            lock_id: format!("0x{}", format!("{lock_byte:02x}").repeat(32)),
            encrypted_payload: "AAECAw==".to_string(),
        })
        .to_json()
    }

    #[tokio::test]
    async fn forwards_each_message_exactly_once() {
        let hub = RelayHub::new();
        let relay = InMemoryRelay::connect(hub.clone(), "me");
        let (mut listener, mut rx) = MessageListener::new(relay, "me");

        hub.inject("peer", "me", &tags(), Some(&response_json(0x01)));

        listener.poll_step().await;
        let first = rx.try_recv().unwrap();
        assert!(matches!(
            first.message,
            ProtocolMessage::DataAccessResponse(_)
        ));

        // Redelivery and re-polling produce nothing new.
        hub.duplicate_all();
        listener.poll_step().await;
        listener.poll_step().await;
        assert!(rx.try_recv().is_err());

        // A genuinely new message still comes through.
        hub.inject("peer", "me", &tags(), Some(&response_json(0x02)));
        listener.poll_step().await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn malformed_messages_do_not_stop_the_sweep() {
        let hub = RelayHub::new();
        let relay = InMemoryRelay::connect(hub.clone(), "me");
        let (mut listener, mut rx) = MessageListener::new(relay, "me");

        hub.inject("peer", "me", &tags(), Some("garbage"));
        hub.inject("peer", "me", &tags(), None);
        hub.inject("peer", "me", &tags(), Some(&response_json(0x03)));

        listener.poll_step().await;
        let got = rx.try_recv().unwrap();
        assert!(matches!(
            got.message,
            ProtocolMessage::DataAccessResponse(_)
        ));
        assert!(rx.try_recv().is_err());
    }
}
