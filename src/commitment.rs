// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! Secret/hashlock commitment scheme.
//!
//! The hashlock is the SHA-256 digest of a 32-byte secret — the exact
//! function the escrow contract verifies claims with. A digest mismatch
//! between client and contract is a fatal integration bug, not a
//! recoverable error, so there is exactly one hash function here.

use alloy::primitives::B256;
use ring::rand::SecureRandom;
use sha2::{Digest, Sha256};

use crate::escrow::Hashlock;

/// A 32-byte secret preimage.
///
/// Held by the requester until the provider reveals it on-chain via claim.
/// `Debug` is redacted; the only serialized form is the explicit hex one
/// embedded in the encrypted self-backup and request messages.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; 32]);

impl Secret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The secret as a `bytes32` word, as submitted to `claim`.
    pub fn as_word(&self) -> B256 {
        B256::from(self.0)
    }

    /// Hex encoding with `0x` prefix, the wire form.
    pub fn to_hex(&self) -> String {
        format!("0x{}", alloy::hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, CommitmentError> {
        let bytes = alloy::hex::decode(s).map_err(|_| CommitmentError::InvalidHex)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CommitmentError::InvalidLength)?;
        Ok(Self(arr))
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitmentError {
    #[error("Random generator failure")]
    Rng,

    #[error("Secret is not valid hex")]
    InvalidHex,

    #[error("Secret must be exactly 32 bytes")]
    InvalidLength,
}

/// Generate a fresh 32-byte secret.
pub fn generate_secret(rng: &dyn SecureRandom) -> Result<Secret, CommitmentError> {
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes).map_err(|_| CommitmentError::Rng)?;
    Ok(Secret(bytes))
}

/// Derive the hashlock committing to `secret`.
pub fn hashlock(secret: &Secret) -> Hashlock {
    B256::from_slice(&Sha256::digest(secret.as_bytes()))
}

/// Check a secret against a hashlock.
///
/// Used client-side before submitting a claim, to fail fast with a clear
/// error rather than paying gas for a reverted transaction.
pub fn verify(secret: &Secret, expected: &Hashlock) -> bool {
    hashlock(secret) == *expected
}
