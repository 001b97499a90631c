// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! Wire schema for protocol messages.
//!
//! Messages are JSON with a `type` tag and camel-case field names. Hashes,
//! addresses and secrets travel as 0x-hex strings; amounts as decimal coin
//! strings. Typed accessors parse the wire strings into ledger types.

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use super::NotifyError;
use crate::commitment::Secret;
use crate::escrow::{parse_amount, Hashlock, LockId};

/// Application namespace tag value. Receivers filter the transport's
/// firehose down to exactly this application's traffic.
pub const APP_TAG: &str = "healthswap-v1";

/// Operation tag value for the data-share exchange.
pub const DATASHARE_OP_TAG: &str = "healthswap-v1-datashare";

/// Tag keys: application namespace, operation, correlation id (lock id).
pub const TAG_APP: &str = "A";
pub const TAG_OP: &str = "O";
pub const TAG_CORRELATION: &str = "C";

/// All messages exchanged over the notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolMessage {
    DataAccessRequest(AccessRequest),
    DataAccessResponse(AccessResponse),
    OutgoingAccessRequest(OutgoingRequestBackup),
}

impl ProtocolMessage {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("protocol messages always serialize")
    }

    pub fn from_json(raw: &str) -> Result<Self, NotifyError> {
        serde_json::from_str(raw).map_err(|e| NotifyError::Malformed(e.to_string()))
    }

    /// Correlation key shared by every message kind.
    pub fn lock_id_str(&self) -> &str {
        match self {
            ProtocolMessage::DataAccessRequest(m) => &m.lock_id,
            ProtocolMessage::DataAccessResponse(m) => &m.lock_id,
            ProtocolMessage::OutgoingAccessRequest(m) => &m.lock_id,
        }
    }
}

/// Requester → provider: funds are locked, please respond with the data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub lock_id: String,
    pub tx_hash: String,
    pub hashlock: String,
    /// Decimal coin string, e.g. "0.001".
    pub amount: String,
    pub requester_pubkey: String,
    #[serde(rename = "requesterEVM")]
    pub requester_evm: String,
    /// Unix seconds.
    pub timestamp: u64,
    /// Hex secret, present when the requester generated it. Absent when the
    /// provider pre-published a standing hashlock and already holds the
    /// preimage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl AccessRequest {
    pub fn lock_id(&self) -> Result<LockId, NotifyError> {
        parse_word(&self.lock_id, "lockId")
    }

    pub fn hashlock(&self) -> Result<Hashlock, NotifyError> {
        parse_word(&self.hashlock, "hashlock")
    }

    pub fn amount_wei(&self) -> Result<U256, NotifyError> {
        parse_amount(&self.amount).map_err(|e| NotifyError::Malformed(e.to_string()))
    }

    pub fn requester_evm(&self) -> Result<Address, NotifyError> {
        self.requester_evm
            .parse()
            .map_err(|_| NotifyError::Malformed(format!("bad requesterEVM: {}", self.requester_evm)))
    }

    pub fn secret(&self) -> Result<Option<Secret>, NotifyError> {
        self.secret
            .as_deref()
            .map(|s| Secret::from_hex(s).map_err(|e| NotifyError::Malformed(e.to_string())))
            .transpose()
    }
}

/// Provider → requester: the encrypted payload for a claimed (or about to be
/// claimed) lock. At most one response per lock id decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessResponse {
    pub lock_id: String,
    pub encrypted_payload: String,
}

impl AccessResponse {
    pub fn lock_id(&self) -> Result<LockId, NotifyError> {
        parse_word(&self.lock_id, "lockId")
    }
}

/// Requester → self: backup copy of an outgoing request.
///
/// The only place the secret is persisted; the requester reconstructs its
/// entire request state (secret included) by re-reading the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingRequestBackup {
    pub lock_id: String,
    pub tx_hash: String,
    pub hashlock: String,
    pub amount: String,
    pub provider_pubkey: String,
    #[serde(rename = "providerEVM")]
    pub provider_evm: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl OutgoingRequestBackup {
    pub fn lock_id(&self) -> Result<LockId, NotifyError> {
        parse_word(&self.lock_id, "lockId")
    }

    pub fn secret(&self) -> Result<Option<Secret>, NotifyError> {
        self.secret
            .as_deref()
            .map(|s| Secret::from_hex(s).map_err(|e| NotifyError::Malformed(e.to_string())))
            .transpose()
    }
}

fn parse_word(raw: &str, field: &str) -> Result<B256, NotifyError> {
    raw.parse()
        .map_err(|_| NotifyError::Malformed(format!("bad {field}: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AccessRequest {
        AccessRequest {
            lock_id: format!("0x{}", "11".repeat(32)),
            tx_hash: format!("0x{}", "22".repeat(32)),
            hashlock: format!("0x{}", "33".repeat(32)),
            amount: "0.001".to_string(),
            requester_pubkey: "a1b2c3".to_string(),
            requester_evm: "0x1111111111111111111111111111111111111111".to_string(),
            timestamp: 1_700_000_000,
            secret: Some(format!("0x{}", "44".repeat(32))),
        }
    }

    #[test]
    fn request_serializes_with_wire_names() {
        let msg = ProtocolMessage::DataAccessRequest(request());
        let json = msg.to_json();

        assert!(json.contains(r#""type":"data_access_request""#));
        assert!(json.contains(r#""lockId":"#));
        assert!(json.contains(r#""txHash":"#));
        assert!(json.contains(r#""requesterEVM":"#));
        assert!(!json.contains("lock_id"));

        assert_eq!(ProtocolMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn response_round_trips() {
        let msg = ProtocolMessage::DataAccessResponse(AccessResponse {
            lock_id: format!("0x{}", "11".repeat(32)),
            encrypted_payload: "AAECAw==".to_string(),
        });
        let json = msg.to_json();
        assert!(json.contains(r#""type":"data_access_response""#));
        assert!(json.contains(r#""encryptedPayload":"#));
        assert_eq!(ProtocolMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn backup_keeps_secret_only_when_present() {
        let mut backup = OutgoingRequestBackup {
            lock_id: format!("0x{}", "11".repeat(32)),
            tx_hash: format!("0x{}", "22".repeat(32)),
            hashlock: format!("0x{}", "33".repeat(32)),
            amount: "1".to_string(),
            provider_pubkey: "pk".to_string(),
            provider_evm: "0x2222222222222222222222222222222222222222".to_string(),
            timestamp: 0,
            secret: None,
        };

        let json = ProtocolMessage::OutgoingAccessRequest(backup.clone()).to_json();
        assert!(!json.contains("secret"));

        backup.secret = Some(format!("0x{}", "44".repeat(32)));
        let json = ProtocolMessage::OutgoingAccessRequest(backup).to_json();
        assert!(json.contains(r#""secret":"#));
    }

    #[test]
    fn typed_accessors_parse_wire_strings() {
        let req = request();
        assert_eq!(req.lock_id().unwrap(), B256::repeat_byte(0x11));
        assert_eq!(req.hashlock().unwrap(), B256::repeat_byte(0x33));
        assert_eq!(
            req.amount_wei().unwrap(),
            U256::from(1_000_000_000_000_000u64)
        );
        assert!(req.secret().unwrap().is_some());
    }

    #[test]
    fn malformed_json_is_a_typed_error() {
        assert!(matches!(
            ProtocolMessage::from_json("{\"type\":\"unknown_thing\"}"),
            Err(NotifyError::Malformed(_))
        ));
        assert!(matches!(
            ProtocolMessage::from_json("not json"),
            Err(NotifyError::Malformed(_))
        ));
    }

    #[test]
    fn bad_field_values_fail_typed_access() {
        let mut req = request();
        req.lock_id = "0x1234".to_string();
        assert!(matches!(req.lock_id(), Err(NotifyError::Malformed(_))));

        req.amount = "1.2.3".to_string();
        assert!(matches!(req.amount_wei(), Err(NotifyError::Malformed(_))));
    }
}
