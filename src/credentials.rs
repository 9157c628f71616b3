//! Credential encryption collaborator seam.
//!
//! Settings carry an opaque encrypted blob; turning it into adapter
//! credentials (and back, after rotation) is delegated to this trait.
//! The production cipher lives outside the core and is keyed by the
//! 32-byte `encryption_key` from the configuration record.

use thiserror::Error;

use crate::ess::Credentials;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential decryption failed: {0}")]
    Decrypt(String),
    #[error("credential encryption failed: {0}")]
    Encrypt(String),
}

pub trait CredentialCipher: Send + Sync {
    fn decrypt(&self, blob: &str) -> Result<Credentials, CredentialError>;
    fn encrypt(&self, credentials: &Credentials) -> Result<String, CredentialError>;
}

/// Development cipher: the blob is the JSON itself. Only suitable for the
/// simulated ESS and tests.
pub struct PlainCipher;

impl CredentialCipher for PlainCipher {
    fn decrypt(&self, blob: &str) -> Result<Credentials, CredentialError> {
        serde_json::from_str(blob).map_err(|e| CredentialError::Decrypt(e.to_string()))
    }

    fn encrypt(&self, credentials: &Credentials) -> Result<String, CredentialError> {
        serde_json::to_string(credentials).map_err(|e| CredentialError::Encrypt(e.to_string()))
    }
}
