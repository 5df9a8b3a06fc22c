use crate::Error;
use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier, VerifyingKey};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::Arc;

/// Capability interface over KMS access. Implementations (in-process keys,
/// remote HSM) are swappable; callers never see key material.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign `data` with the key identified by `key_id`.
    async fn sign(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, Error>;

    /// The verification-method string to embed in proofs produced with
    /// `key_id`.
    async fn verification_method(&self, key_id: &str) -> Result<String, Error>;

    async fn health_check(&self) -> Result<(), Error>;
}

struct KeyEntry {
    signing: SigningKey,
    verification_method: String,
}

/// In-process ed25519 signer. Keys live in memory; suitable for nodes that
/// do not delegate to an external KMS, and for tests.
#[derive(Clone, Default)]
pub struct LocalSigner {
    keys: Arc<RwLock<HashMap<String, KeyEntry>>>,
}

impl LocalSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh keypair under `key_id`, returning the public key.
    pub fn generate(&self, key_id: &str, verification_method: &str) -> VerifyingKey {
        let signing = SigningKey::generate(&mut OsRng);
        let public = signing.verifying_key();
        self.keys.write().insert(
            key_id.to_string(),
            KeyEntry {
                signing,
                verification_method: verification_method.to_string(),
            },
        );
        public
    }

    /// Install existing key material under `key_id`.
    pub fn insert(&self, key_id: &str, signing: SigningKey, verification_method: &str) {
        self.keys.write().insert(
            key_id.to_string(),
            KeyEntry {
                signing,
                verification_method: verification_method.to_string(),
            },
        );
    }

    pub fn public_key(&self, key_id: &str) -> Option<VerifyingKey> {
        self.keys
            .read()
            .get(key_id)
            .map(|e| e.signing.verifying_key())
    }
}

#[async_trait]
impl Signer for LocalSigner {
    async fn sign(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, Error> {
        let keys = self.keys.read();
        let entry = keys
            .get(key_id)
            .ok_or_else(|| Error::UnknownKey(key_id.to_string()))?;
        Ok(entry.signing.sign(data).to_bytes().to_vec())
    }

    async fn verification_method(&self, key_id: &str) -> Result<String, Error> {
        let keys = self.keys.read();
        keys.get(key_id)
            .map(|e| e.verification_method.clone())
            .ok_or_else(|| Error::UnknownKey(key_id.to_string()))
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Verify an ed25519 signature over `data` against a 32-byte public key.
pub fn verify_signature(public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<(), Error> {
    let key_bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| Error::InvalidSignature)?;
    let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| Error::InvalidSignature)?;
    let sig_bytes: [u8; 64] = signature.try_into().map_err(|_| Error::InvalidSignature)?;
    let sig = Signature::from_bytes(&sig_bytes);
    key.verify(data, &sig).map_err(|_| Error::InvalidSignature)
}
