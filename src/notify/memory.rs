// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! In-memory relay hub.
//!
//! A process-local stand-in for the relay network, used by tests and local
//! simulation. Each party connects with its own transport identity; a
//! message's plaintext is readable only by its sender and recipient,
//! mirroring encrypt-to-recipient transports where everyone can see that a
//! message exists but only the endpoints can open it.

use std::sync::{Arc, Mutex};

use super::adapter::{Envelope, MessageFilter, RelayPort};
use super::messages::{APP_TAG, TAG_APP, TAG_OP};
use super::NotifyError;

#[derive(Debug, Clone)]
struct StoredEvent {
    id: String,
    sender: String,
    recipient: String,
    tags: Vec<(String, String)>,
    content: Option<String>,
    created_at: u64,
}

/// Shared message store connecting all parties of a simulation.
pub struct RelayHub {
    events: Mutex<Vec<StoredEvent>>,
}

impl RelayHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    /// Inject a raw message, bypassing any connected party. `content: None`
    /// simulates a message nobody in this process can decrypt.
    pub fn inject(
        &self,
        sender: &str,
        recipient: &str,
        tags: &[(String, String)],
        content: Option<&str>,
    ) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut events = self.events.lock().expect("relay hub mutex poisoned");
        events.push(StoredEvent {
            id: id.clone(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            tags: tags.to_vec(),
            content: content.map(str::to_string),
            created_at: chrono::Utc::now().timestamp().max(0) as u64,
        });
        id
    }

    /// Re-append every stored message under its existing id, simulating the
    /// transport's at-least-once redelivery.
    pub fn duplicate_all(&self) {
        let mut events = self.events.lock().expect("relay hub mutex poisoned");
        let copies: Vec<StoredEvent> = events.clone();
        events.extend(copies);
    }
}

/// One party's handle on the hub.
#[derive(Clone)]
pub struct InMemoryRelay {
    hub: Arc<RelayHub>,
    identity: String,
}

impl InMemoryRelay {
    pub fn connect(hub: Arc<RelayHub>, identity: impl Into<String>) -> Self {
        Self {
            hub,
            identity: identity.into(),
        }
    }
}

impl RelayPort for InMemoryRelay {
    async fn publish(
        &self,
        recipient: &str,
        tags: &[(String, String)],
        plaintext: &str,
    ) -> Result<String, NotifyError> {
        Ok(self
            .hub
            .inject(&self.identity, recipient, tags, Some(plaintext)))
    }

    async fn fetch(&self, filter: &MessageFilter) -> Result<Vec<Envelope>, NotifyError> {
        let events = self
            .hub
            .events
            .lock()
            .expect("relay hub mutex poisoned")
            .clone();

        let matches_tag = |event: &StoredEvent, key: &str, value: &str| {
            event.tags.iter().any(|(k, v)| k == key && v == value)
        };

        Ok(events
            .into_iter()
            .filter(|e| matches_tag(e, TAG_APP, APP_TAG))
            .filter(|e| filter.op_tag.is_empty() || matches_tag(e, TAG_OP, &filter.op_tag))
            .filter(|e| {
                filter
                    .recipient
                    .as_deref()
                    .map(|r| e.recipient == r)
                    .unwrap_or(true)
            })
            .filter(|e| {
                filter
                    .author
                    .as_deref()
                    .map(|a| e.sender == a)
                    .unwrap_or(true)
            })
            .map(|e| {
                // Only the endpoints can open the message.
                let readable = e.sender == self.identity || e.recipient == self.identity;
                Envelope {
                    id: e.id,
                    sender: e.sender,
                    recipient: e.recipient,
                    created_at: e.created_at,
                    content: if readable { e.content } else { None },
                }
            })
            .collect())
    }
}
