// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! Conditional payload encryption.
//!
//! The shared record payload is encrypted under the HTLC secret itself:
//! AES-256-GCM with the secret's raw 32 bytes as the key, no derivation
//! step. Knowledge of the secret — released publicly only when the provider
//! claims — is what makes the payload readable. A fresh random 96-bit nonce
//! is used per encryption and prepended to the ciphertext; the whole blob is
//! base64-encoded for embedding in a JSON message.

use base64ct::{Base64, Encoding};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::SecureRandom;

use crate::commitment::Secret;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("Payload is not valid base64")]
    InvalidEncoding,

    #[error("Payload too short to contain nonce and tag")]
    Truncated,

    #[error("Authentication failed: wrong key or corrupted payload")]
    AuthFailure,

    #[error("Encryption failure")]
    Encrypt,
}

/// Encrypt `plaintext` under the secret. Output: base64(nonce || ciphertext || tag).
pub fn encrypt_with_secret(
    plaintext: &[u8],
    secret: &Secret,
    rng: &dyn SecureRandom,
) -> Result<String, PayloadError> {
    let key = LessSafeKey::new(
        UnboundKey::new(&AES_256_GCM, secret.as_bytes()).map_err(|_| PayloadError::Encrypt)?,
    );

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes).map_err(|_| PayloadError::Encrypt)?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut buf = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut buf)
        .map_err(|_| PayloadError::Encrypt)?;

    let mut out = Vec::with_capacity(NONCE_LEN + buf.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&buf);
    Ok(Base64::encode_string(&out))
}

/// Decrypt a payload produced by [`encrypt_with_secret`].
///
/// Fails cleanly with a distinguishable error on wrong key or corrupted
/// input; never returns unauthenticated bytes.
pub fn decrypt_with_secret(encoded: &str, secret: &Secret) -> Result<Vec<u8>, PayloadError> {
    let data = Base64::decode_vec(encoded).map_err(|_| PayloadError::InvalidEncoding)?;

    let tag_len = AES_256_GCM.tag_len();
    if data.len() < NONCE_LEN + tag_len {
        return Err(PayloadError::Truncated);
    }

    let key = LessSafeKey::new(
        UnboundKey::new(&AES_256_GCM, secret.as_bytes()).map_err(|_| PayloadError::AuthFailure)?,
    );

    let nonce_bytes: [u8; NONCE_LEN] = data[..NONCE_LEN].try_into().expect("length checked");
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut buf = data[NONCE_LEN..].to_vec();
    let plaintext = key
        .open_in_place(nonce, Aad::empty(), &mut buf)
        .map_err(|_| PayloadError::AuthFailure)?;

    Ok(plaintext.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;

    fn secret(byte: u8) -> Secret {
        Secret::from_bytes([byte; 32])
    }

    #[test]
    fn round_trip() {
        let rng = SystemRandom::new();
        let s = secret(0x01);
        let plaintext = br#"{"healthRecords":[{"cid":"bafy...","label":"blood panel"}]}"#;

        let encoded = encrypt_with_secret(plaintext, &s, &rng).unwrap();
        let decrypted = decrypt_with_secret(&encoded, &s).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn fresh_nonce_per_encryption() {
        let rng = SystemRandom::new();
        let s = secret(0x01);

        let a = encrypt_with_secret(b"same payload", &s, &rng).unwrap();
        let b = encrypt_with_secret(b"same payload", &s, &rng).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let rng = SystemRandom::new();
        let encoded = encrypt_with_secret(b"payload", &secret(0x01), &rng).unwrap();

        assert_eq!(
            decrypt_with_secret(&encoded, &secret(0x02)),
            Err(PayloadError::AuthFailure)
        );
    }

    #[test]
    fn corrupted_ciphertext_fails_authentication() {
        let rng = SystemRandom::new();
        let s = secret(0x01);
        let encoded = encrypt_with_secret(b"payload", &s, &rng).unwrap();

        let mut raw = Base64::decode_vec(&encoded).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = Base64::encode_string(&raw);

        assert_eq!(
            decrypt_with_secret(&tampered, &s),
            Err(PayloadError::AuthFailure)
        );
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert_eq!(
            decrypt_with_secret(&Base64::encode_string(&[0u8; 8]), &secret(0x01)),
            Err(PayloadError::Truncated)
        );
    }

    #[test]
    fn invalid_base64_is_rejected() {
        assert_eq!(
            decrypt_with_secret("not/val!d base64###", &secret(0x01)),
            Err(PayloadError::InvalidEncoding)
        );
    }
}
