// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Message Cipher
//!
//! AES-256-GCM with a fresh 96-bit nonce per message.
//!
//! ## Wire format
//!
//! ```text
//! base64( nonce[12] || tag[16] || ciphertext )
//! ```
//!
//! The associated data is not transmitted; both ends rebuild it from the
//! message envelope. Any flipped bit in nonce, tag, ciphertext or associated
//! data fails with [`CipherError::DecryptionFailure`].
//!
//! A [`MessageCipher`] is only ever constructed inside a
//! [`crate::domain::secret_store::SecretStore`]; it never exposes its key.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand_core::{OsRng, RngCore};
use std::fmt;
use thiserror::Error;

use crate::domain::secret_store::KeyMaterial;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
/// Largest plaintext accepted by [`MessageCipher::seal`].
pub const MAX_PLAINTEXT_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("encryption failed: {0}")]
    EncryptionFailure(String),

    #[error("decryption failed: {0}")]
    DecryptionFailure(String),
}

/// Sealed bytes in wire order (`nonce || tag || ciphertext`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload(Vec<u8>);

impl SealedPayload {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CipherError> {
        if bytes.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::DecryptionFailure(format!(
                "payload of {} bytes is shorter than nonce and tag",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CipherError::DecryptionFailure(format!("invalid base64: {e}")))?;
        Self::from_bytes(bytes)
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Mutable access for tamper tests.
    #[cfg(test)]
    pub(crate) fn bytes_mut(&mut self) -> &mut Vec<u8> {
        &mut self.0
    }

    fn nonce(&self) -> &[u8] {
        &self.0[..NONCE_LEN]
    }

    fn tag(&self) -> &[u8] {
        &self.0[NONCE_LEN..NONCE_LEN + TAG_LEN]
    }

    fn ciphertext(&self) -> &[u8] {
        &self.0[NONCE_LEN + TAG_LEN..]
    }
}

#[derive(Clone)]
pub struct MessageCipher {
    aead: Aes256Gcm,
}

impl MessageCipher {
    pub(crate) fn new(material: &KeyMaterial) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(material.expose());
        Self {
            aead: Aes256Gcm::new(key),
        }
    }

    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<SealedPayload, CipherError> {
        if plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(CipherError::EncryptionFailure(format!(
                "plaintext of {} bytes exceeds the {} byte limit",
                plaintext.len(),
                MAX_PLAINTEXT_LEN
            )));
        }

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        // aes-gcm appends the tag; the wire format puts it first.
        let ct_and_tag = self
            .aead
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
            .map_err(|e| CipherError::EncryptionFailure(e.to_string()))?;
        let (ciphertext, tag) = ct_and_tag.split_at(ct_and_tag.len() - TAG_LEN);

        let mut wire = Vec::with_capacity(NONCE_LEN + TAG_LEN + ciphertext.len());
        wire.extend_from_slice(&nonce);
        wire.extend_from_slice(tag);
        wire.extend_from_slice(ciphertext);
        Ok(SealedPayload(wire))
    }

    pub fn open(&self, sealed: &SealedPayload, aad: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut ct_and_tag = Vec::with_capacity(sealed.ciphertext().len() + TAG_LEN);
        ct_and_tag.extend_from_slice(sealed.ciphertext());
        ct_and_tag.extend_from_slice(sealed.tag());

        self.aead
            .decrypt(
                Nonce::from_slice(sealed.nonce()),
                Payload {
                    msg: &ct_and_tag,
                    aad,
                },
            )
            .map_err(|_| CipherError::DecryptionFailure("authentication tag mismatch".to_string()))
    }
}

impl fmt::Debug for MessageCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MessageCipher(AES-256-GCM)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> MessageCipher {
        MessageCipher::new(&KeyMaterial::generate())
    }

    #[test]
    fn test_seal_open_roundtrip_including_limits() {
        let c = cipher();
        for len in [0usize, 1, 4096, MAX_PLAINTEXT_LEN] {
            let plaintext = vec![0x5au8; len];
            let sealed = c.seal(&plaintext, b"ctx").unwrap();
            assert_eq!(sealed.as_bytes().len(), NONCE_LEN + TAG_LEN + len);
            assert_eq!(c.open(&sealed, b"ctx").unwrap(), plaintext);
        }
    }

    #[test]
    fn test_oversized_plaintext_rejected() {
        let err = cipher().seal(&vec![0u8; MAX_PLAINTEXT_LEN + 1], b"").unwrap_err();
        assert!(matches!(err, CipherError::EncryptionFailure(_)));
    }

    #[test]
    fn test_every_bit_flip_detected() {
        let c = cipher();
        let sealed = c.seal(b"move 10 units to reserve", b"m1").unwrap();
        let total_bits = sealed.as_bytes().len() * 8;
        for bit in 0..total_bits {
            let mut tampered = sealed.clone();
            tampered.bytes_mut()[bit / 8] ^= 1 << (bit % 8);
            assert!(
                matches!(c.open(&tampered, b"m1"), Err(CipherError::DecryptionFailure(_))),
                "bit {bit} flip went undetected"
            );
        }
    }

    #[test]
    fn test_wrong_key_or_context_fails() {
        let sealed = cipher().seal(b"secret", b"m1").unwrap();
        assert!(cipher().open(&sealed, b"m1").is_err());

        let c = cipher();
        let sealed = c.seal(b"secret", b"m1").unwrap();
        assert!(c.open(&sealed, b"m2").is_err());
    }

    #[test]
    fn test_base64_wire_format() {
        let c = cipher();
        let sealed = c.seal(b"hello", b"").unwrap();
        let parsed = SealedPayload::from_base64(&sealed.to_base64()).unwrap();
        assert_eq!(parsed, sealed);
        assert!(SealedPayload::from_base64("AAAA").is_err());
        assert!(SealedPayload::from_base64("***").is_err());
    }

    #[test]
    fn test_nonces_are_fresh() {
        let c = cipher();
        let a = c.seal(b"same", b"").unwrap();
        let b = c.seal(b"same", b"").unwrap();
        assert_ne!(a.nonce(), b.nonce());
    }
}
