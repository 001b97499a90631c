// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! Notification channel adapter.
//!
//! Publishes tagged protocol messages through an opaque encrypted relay
//! port and reconstructs requester/provider views purely by re-reading the
//! channel. The transport is at-least-once and unordered: consumers here
//! de-duplicate by message identity and tolerate responses arriving before
//! the matching request confirmation.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use tracing::{debug, info};

use super::messages::{
    AccessRequest, AccessResponse, OutgoingRequestBackup, ProtocolMessage, APP_TAG,
    DATASHARE_OP_TAG, TAG_APP, TAG_CORRELATION, TAG_OP,
};
use super::NotifyError;

/// A message as observed on the transport.
///
/// `content` is the decrypted plaintext; `None` when the transport could
/// not decrypt the message for us (it is skipped, never fatal).
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Transport-assigned message identity, the de-duplication key.
    pub id: String,
    pub sender: String,
    pub recipient: String,
    /// Unix seconds.
    pub created_at: u64,
    pub content: Option<String>,
}

/// Query shape handed to the relay port.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Only messages addressed to this transport key.
    pub recipient: Option<String>,
    /// Only messages authored by this transport key.
    pub author: Option<String>,
    /// Operation tag; the application tag is always implied.
    pub op_tag: String,
}

/// The opaque pub/sub capability: publish/fetch encrypted messages by
/// recipient key.
pub trait RelayPort: Send + Sync {
    fn publish(
        &self,
        recipient: &str,
        tags: &[(String, String)],
        plaintext: &str,
    ) -> impl Future<Output = Result<String, NotifyError>> + Send;

    fn fetch(
        &self,
        filter: &MessageFilter,
    ) -> impl Future<Output = Result<Vec<Envelope>, NotifyError>> + Send;
}

/// A deduplicated, parsed incoming access request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub msg_id: String,
    pub sender: String,
    pub created_at: u64,
    pub request: AccessRequest,
}

/// A requester-side view: the self-backup joined with any response observed
/// under the same lock id.
#[derive(Debug, Clone)]
pub struct OutgoingRequestView {
    pub msg_id: String,
    pub created_at: u64,
    pub backup: OutgoingRequestBackup,
    pub response: Option<AccessResponse>,
}

/// Adapter binding protocol messages to the relay port.
pub struct NotificationAdapter<R: RelayPort> {
    relay: R,
    /// Our own transport pubkey.
    me: String,
}

impl<R: RelayPort> NotificationAdapter<R> {
    pub fn new(relay: R, me: impl Into<String>) -> Self {
        Self {
            relay,
            me: me.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.me
    }

    fn tags_for(lock_id: &str) -> Vec<(String, String)> {
        vec![
            (TAG_APP.to_string(), APP_TAG.to_string()),
            (TAG_OP.to_string(), DATASHARE_OP_TAG.to_string()),
            (TAG_CORRELATION.to_string(), lock_id.to_string()),
        ]
    }

    fn inbox_filter(&self) -> MessageFilter {
        MessageFilter {
            recipient: Some(self.me.clone()),
            author: None,
            op_tag: DATASHARE_OP_TAG.to_string(),
        }
    }

    /// Send an access request to the provider, plus the self-addressed
    /// backup copy that alone carries the secret. Returns both message ids.
    pub async fn send_request(
        &self,
        provider_pubkey: &str,
        request: &AccessRequest,
        backup: &OutgoingRequestBackup,
    ) -> Result<(String, String), NotifyError> {
        let tags = Self::tags_for(&request.lock_id);

        let request_id = self
            .relay
            .publish(
                provider_pubkey,
                &tags,
                &ProtocolMessage::DataAccessRequest(request.clone()).to_json(),
            )
            .await?;

        let backup_id = self
            .relay
            .publish(
                &self.me,
                &tags,
                &ProtocolMessage::OutgoingAccessRequest(backup.clone()).to_json(),
            )
            .await?;

        info!(
            lock_id = %request.lock_id,
            provider = %provider_pubkey,
            "Access request sent with self-backup"
        );
        Ok((request_id, backup_id))
    }

    /// Send the encrypted response for a lock id.
    pub async fn send_response(
        &self,
        requester_pubkey: &str,
        response: &AccessResponse,
    ) -> Result<String, NotifyError> {
        let tags = Self::tags_for(&response.lock_id);
        let id = self
            .relay
            .publish(
                requester_pubkey,
                &tags,
                &ProtocolMessage::DataAccessResponse(response.clone()).to_json(),
            )
            .await?;

        info!(lock_id = %response.lock_id, requester = %requester_pubkey, "Access response sent");
        Ok(id)
    }

    /// Provider view: all distinct incoming access requests, oldest first.
    ///
    /// De-duplicates by message id and by lock id (first observation wins),
    /// and skips undecryptable or malformed messages individually.
    pub async fn provider_inbox(&self) -> Result<Vec<InboundRequest>, NotifyError> {
        let envelopes = self.relay.fetch(&self.inbox_filter()).await?;

        let mut seen_locks = HashSet::new();
        let mut requests = Vec::new();

        for env in dedup_by_id(envelopes) {
            let Some(message) = parse_envelope(&env) else {
                continue;
            };
            if let ProtocolMessage::DataAccessRequest(request) = message {
                if !seen_locks.insert(request.lock_id.clone()) {
                    debug!(lock_id = %request.lock_id, "Duplicate request for lock, skipping");
                    continue;
                }
                requests.push(InboundRequest {
                    msg_id: env.id,
                    sender: env.sender,
                    created_at: env.created_at,
                    request,
                });
            }
        }

        requests.sort_by_key(|r| r.created_at);
        Ok(requests)
    }

    /// Requester view: self-backups joined with responses by lock id,
    /// newest first.
    ///
    /// Responses are collected in a first pass so one arriving before the
    /// backup has been observed still joins correctly.
    pub async fn requester_inbox(&self) -> Result<Vec<OutgoingRequestView>, NotifyError> {
        let envelopes = dedup_by_id(self.relay.fetch(&self.inbox_filter()).await?);

        // First pass: responses from counterparties, keyed by lock id.
        let mut responses: HashMap<String, AccessResponse> = HashMap::new();
        for env in envelopes.iter().filter(|e| e.sender != self.me) {
            let Some(ProtocolMessage::DataAccessResponse(response)) = parse_envelope(env) else {
                continue;
            };
            responses.entry(response.lock_id.clone()).or_insert(response);
        }

        // Second pass: our own backups.
        let mut views = Vec::new();
        for env in envelopes.iter().filter(|e| e.sender == self.me) {
            let Some(ProtocolMessage::OutgoingAccessRequest(backup)) = parse_envelope(env) else {
                continue;
            };
            let response = responses.get(&backup.lock_id).cloned();
            views.push(OutgoingRequestView {
                msg_id: env.id.clone(),
                created_at: env.created_at,
                backup,
                response,
            });
        }

        views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(views)
    }
}

/// Drop repeated deliveries of the same message id, keeping the first.
fn dedup_by_id(envelopes: Vec<Envelope>) -> Vec<Envelope> {
    let mut seen = HashSet::new();
    envelopes
        .into_iter()
        .filter(|e| seen.insert(e.id.clone()))
        .collect()
}

/// Decode an envelope into a protocol message, or `None` for anything
/// undecryptable or malformed.
fn parse_envelope(env: &Envelope) -> Option<ProtocolMessage> {
    let Some(content) = env.content.as_deref() else {
        debug!(msg_id = %env.id, "Skipping undecryptable message");
        return None;
    };
    match ProtocolMessage::from_json(content) {
        Ok(message) => Some(message),
        Err(e) => {
            debug!(msg_id = %env.id, error = %e, "Skipping malformed message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::memory::{InMemoryRelay, RelayHub};

    fn request(lock_byte: u8) -> AccessRequest {
        AccessRequest {
            lock_id: format!("0x{}", format!("{lock_byte:02x}").repeat(32)),
            tx_hash: format!("0x{}", "22".repeat(32)),
            hashlock: format!("0x{}", "33".repeat(32)),
            amount: "0.001".to_string(),
            requester_pubkey: "req-pk".to_string(),
            requester_evm: "0x1111111111111111111111111111111111111111".to_string(),
            timestamp: 1_700_000_000,
            secret: Some(format!("0x{}", "44".repeat(32))),
        }
    }

    fn backup_for(request: &AccessRequest) -> OutgoingRequestBackup {
        OutgoingRequestBackup {
            lock_id: request.lock_id.clone(),
            tx_hash: request.tx_hash.clone(),
            hashlock: request.hashlock.clone(),
            amount: request.amount.clone(),
            provider_pubkey: "prov-pk".to_string(),
            provider_evm: "0x2222222222222222222222222222222222222222".to_string(),
            timestamp: request.timestamp,
            secret: request.secret.clone(),
        }
    }

    fn adapters() -> (
        NotificationAdapter<InMemoryRelay>,
        NotificationAdapter<InMemoryRelay>,
        std::sync::Arc<RelayHub>,
    ) {
        let hub = RelayHub::new();
        let requester = NotificationAdapter::new(InMemoryRelay::connect(hub.clone(), "req-pk"), "req-pk");
        let provider = NotificationAdapter::new(InMemoryRelay::connect(hub.clone(), "prov-pk"), "prov-pk");
        (requester, provider, hub)
    }

    #[tokio::test]
    async fn request_reaches_provider_and_backup_stays_home() {
        let (requester, provider, _hub) = adapters();
        let req = request(0x01);

        requester
            .send_request("prov-pk", &req, &backup_for(&req))
            .await
            .unwrap();

        let inbox = provider.provider_inbox().await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].request, req);
        assert_eq!(inbox[0].sender, "req-pk");

        // The provider never sees the self-backup.
        let views = requester.requester_inbox().await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].backup.secret, req.secret);
        assert!(views[0].response.is_none());
    }

    #[tokio::test]
    async fn duplicate_delivery_is_observed_once() {
        let (requester, provider, hub) = adapters();
        let req = request(0x01);

        requester
            .send_request("prov-pk", &req, &backup_for(&req))
            .await
            .unwrap();
        // At-least-once transport: redeliver everything.
        hub.duplicate_all();

        let inbox = provider.provider_inbox().await.unwrap();
        assert_eq!(inbox.len(), 1);
    }

    #[tokio::test]
    async fn response_joins_backup_even_when_observed_first() {
        let (requester, provider, _hub) = adapters();
        let req = request(0x05);

        // Provider responds before the requester's own backup round-trips
        // into its inbox ordering; publish the response first.
        provider
            .send_response(
                "req-pk",
                &AccessResponse {
                    lock_id: req.lock_id.clone(),
                    encrypted_payload: "AAECAw==".to_string(),
                },
            )
            .await
            .unwrap();
        requester
            .send_request("prov-pk", &req, &backup_for(&req))
            .await
            .unwrap();

        let views = requester.requester_inbox().await.unwrap();
        assert_eq!(views.len(), 1);
        let response = views[0].response.as_ref().unwrap();
        assert_eq!(response.lock_id, req.lock_id);
    }

    #[tokio::test]
    async fn malformed_and_undecryptable_messages_are_skipped() {
        let (_requester, provider, hub) = adapters();

        hub.inject(
            "other-pk",
            "prov-pk",
            &[
                (TAG_APP.to_string(), APP_TAG.to_string()),
                (TAG_OP.to_string(), DATASHARE_OP_TAG.to_string()),
            ],
            Some("this is not json"),
        );
        hub.inject(
            "other-pk",
            "prov-pk",
            &[
                (TAG_APP.to_string(), APP_TAG.to_string()),
                (TAG_OP.to_string(), DATASHARE_OP_TAG.to_string()),
            ],
            None,
        );

        let inbox = provider.provider_inbox().await.unwrap();
        assert!(inbox.is_empty());
    }

    #[tokio::test]
    async fn unrelated_traffic_is_filtered_out() {
        let (requester, provider, hub) = adapters();
        let req = request(0x01);

        // A message in another application namespace with well-formed JSON.
        hub.inject(
            "other-pk",
            "prov-pk",
            &[
                (TAG_APP.to_string(), "some-other-app".to_string()),
                (TAG_OP.to_string(), "some-other-op".to_string()),
            ],
            Some(&ProtocolMessage::DataAccessRequest(request(0x09)).to_json()),
        );
        requester
            .send_request("prov-pk", &req, &backup_for(&req))
            .await
            .unwrap();

        let inbox = provider.provider_inbox().await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].request.lock_id, req.lock_id);
    }
}
