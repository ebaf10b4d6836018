//! Encrypted per-namespace credential vault.
//!
//! Encryption uses AES-256-GCM (`aes-gcm` + `base64`), keyed by a single
//! process-wide key loaded at startup.

use std::collections::HashMap;
use std::sync::RwLock;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use servicehub_core::ServiceHubError;

const NONCE_LEN: usize = 12;

/// Plaintext broker descriptor a gateway needs to connect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerCredential {
    pub connection_string: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncryptedCredential {
    nonce: String,
    ciphertext: String,
}

/// Loaded once at process start from `ENCRYPTION_KEY` (>= 32 bytes).
#[derive(Clone)]
pub struct EncryptionKey(Key<Aes256Gcm>);

impl EncryptionKey {
    pub fn from_env() -> Result<Self, ServiceHubError> {
        let raw = std::env::var("ENCRYPTION_KEY").map_err(|_| {
            ServiceHubError::Internal("ENCRYPTION_KEY environment variable is not set".into())
        })?;
        Self::from_bytes(raw.as_bytes())
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, ServiceHubError> {
        if raw.len() < 32 {
            return Err(ServiceHubError::Internal(
                "ENCRYPTION_KEY must be at least 32 bytes".into(),
            ));
        }
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&raw[..32]);
        Ok(Self(*Key::<Aes256Gcm>::from_slice(&key_bytes)))
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn put(&self, namespace_id: &str, credential: &BrokerCredential) -> Result<(), ServiceHubError>;
    /// Missing records or decryption failures are both surfaced as
    /// `Unauthorized`, never silently skipped.
    async fn get(&self, namespace_id: &str) -> Result<BrokerCredential, ServiceHubError>;
    async fn remove(&self, namespace_id: &str);
}

pub struct InMemoryCredentialStore {
    key: EncryptionKey,
    records: RwLock<HashMap<String, EncryptedCredential>>,
}

impl InMemoryCredentialStore {
    pub fn new(key: EncryptionKey) -> Self {
        Self {
            key,
            records: RwLock::new(HashMap::new()),
        }
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(&self.key.0)
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn put(
        &self,
        namespace_id: &str,
        credential: &BrokerCredential,
    ) -> Result<(), ServiceHubError> {
        let plaintext = serde_json::to_vec(credential)
            .map_err(|err| ServiceHubError::Internal(format!("serialize credential: {err}")))?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher()
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|err| ServiceHubError::Internal(format!("encrypt credential: {err}")))?;

        let record = EncryptedCredential {
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(ciphertext),
        };
        self.records
            .write()
            .expect("credential store lock poisoned")
            .insert(namespace_id.to_string(), record);
        Ok(())
    }

    async fn get(&self, namespace_id: &str) -> Result<BrokerCredential, ServiceHubError> {
        let record = self
            .records
            .read()
            .expect("credential store lock poisoned")
            .get(namespace_id)
            .cloned()
            .ok_or_else(|| {
                ServiceHubError::Unauthorized(format!(
                    "no credential registered for namespace {namespace_id}"
                ))
            })?;

        let nonce_bytes = BASE64.decode(&record.nonce).map_err(|_| {
            ServiceHubError::Unauthorized(format!("corrupt credential for namespace {namespace_id}"))
        })?;
        let ciphertext = BASE64.decode(&record.ciphertext).map_err(|_| {
            ServiceHubError::Unauthorized(format!("corrupt credential for namespace {namespace_id}"))
        })?;
        let nonce = Nonce::from_slice(&nonce_bytes);
        let plaintext = self.cipher().decrypt(nonce, ciphertext.as_ref()).map_err(|_| {
            ServiceHubError::Unauthorized(format!(
                "failed to decrypt credential for namespace {namespace_id}"
            ))
        })?;
        serde_json::from_slice(&plaintext).map_err(|_| {
            ServiceHubError::Unauthorized(format!(
                "malformed decrypted credential for namespace {namespace_id}"
            ))
        })
    }

    async fn remove(&self, namespace_id: &str) {
        self.records
            .write()
            .expect("credential store lock poisoned")
            .remove(namespace_id);
    }
}
