// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use thiserror::Error;
use warden_core::domain::secret_store::SecretStoreError;
use warden_core::infrastructure::cipher::CipherError;

use crate::domain::message::MessageId;

/// Failures of the messaging bus. Each is fatal to one message only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MessagingError {
    #[error("encryption failed: {0}")]
    EncryptionFailure(String),

    #[error("decryption failed: {0}")]
    DecryptionFailure(String),

    #[error("unknown identity '{0}'")]
    UnknownIdentity(String),

    #[error("message {0} not found")]
    MessageNotFound(MessageId),

    #[error("only the recipient may open message {0}")]
    NotRecipient(MessageId),

    #[error("key store error: {0}")]
    KeyStore(String),
}

impl From<CipherError> for MessagingError {
    fn from(e: CipherError) -> Self {
        match e {
            CipherError::EncryptionFailure(m) => Self::EncryptionFailure(m),
            CipherError::DecryptionFailure(m) => Self::DecryptionFailure(m),
        }
    }
}

impl From<SecretStoreError> for MessagingError {
    fn from(e: SecretStoreError) -> Self {
        Self::KeyStore(e.to_string())
    }
}
