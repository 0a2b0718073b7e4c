// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Key custody abstractions and the default-key lifecycle.
//
// Key hierarchy in a full deployment:
//   root CA (offline) -> intermediate CA (HSM) -> message signing key (HSM)
// This module covers the message signing key only. Backends implement
// `KeyStore`; `KeyManager` layers the default key and rotation on top.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use signgate_core::canonical::rfc3339_micros;
use signgate_core::error::{KeyError, Result};
use tracing::{info, instrument};

/// Longest accepted key id.
pub const MAX_KEY_ID_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    Signing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    Ed25519,
}

/// Metadata about a key. Never carries private material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub key_id: String,
    pub key_type: KeyType,
    pub algorithm: KeyAlgorithm,
    #[serde(with = "rfc3339_micros")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "rfc3339_micros::option")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Raw public key, hex on the wire.
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
}

impl KeyInfo {
    pub fn ed25519_signing(key_id: impl Into<String>, public_key: Vec<u8>) -> Self {
        Self {
            key_id: key_id.into(),
            key_type: KeyType::Signing,
            algorithm: KeyAlgorithm::Ed25519,
            created_at: signgate_core::now_micros(),
            expires_at: None,
            public_key,
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}

/// Custody of asymmetric signing keys.
///
/// Private key material never crosses this boundary: callers hand in data
/// and get a signature back.
pub trait KeyStore: Send + Sync {
    /// Generate a new signing key pair. Fails if `key_id` already exists.
    fn generate_signing_key(&self, key_id: &str) -> Result<KeyInfo>;

    /// Raw public key bytes for `key_id`.
    fn get_public_key(&self, key_id: &str) -> Result<Vec<u8>>;

    /// Sign `data` with `key_id`.
    fn sign(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>>;

    fn list_keys(&self) -> Result<Vec<KeyInfo>>;

    /// Delete a key. Returns `false` if it did not exist.
    fn delete_key(&self, key_id: &str) -> Result<bool>;
}

/// Key ids double as file stems and HSM labels, so they are restricted to
/// `[A-Za-z0-9._-]`, must not start with `.`, and are at most
/// [`MAX_KEY_ID_LEN`] bytes.
pub fn validate_key_id(key_id: &str) -> std::result::Result<(), KeyError> {
    let valid = !key_id.is_empty()
        && key_id.len() <= MAX_KEY_ID_LEN
        && !key_id.starts_with('.')
        && key_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(KeyError::InvalidKeyId(key_id.to_owned()))
    }
}

/// A signature together with the key that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySignature {
    pub key_id: String,
    pub signature: Vec<u8>,
}

/// Default-key lifecycle and rotation on top of a [`KeyStore`].
pub struct KeyManager {
    store: Arc<dyn KeyStore>,
    default_key_id: RwLock<String>,
}

impl KeyManager {
    /// Wrap `store`, generating `default_key_id` if it does not exist yet.
    #[instrument(skip(store))]
    pub fn new(store: Arc<dyn KeyStore>, default_key_id: &str) -> Result<Self> {
        match store.get_public_key(default_key_id) {
            Ok(_) => {}
            Err(signgate_core::SigngateError::Key(KeyError::KeyNotFound(_))) => {
                info!(key_id = default_key_id, "generating default signing key");
                store.generate_signing_key(default_key_id)?;
            }
            Err(e) => return Err(e),
        }
        Ok(Self {
            store,
            default_key_id: RwLock::new(default_key_id.to_owned()),
        })
    }

    pub fn store(&self) -> &Arc<dyn KeyStore> {
        &self.store
    }

    /// Id of the key currently used for signing.
    pub fn default_key_id(&self) -> String {
        self.default_key_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Public key of the current default key.
    pub fn public_key(&self) -> Result<Vec<u8>> {
        self.store.get_public_key(&self.default_key_id())
    }

    /// Sign with `key_id`, or with the default key when `None`.
    ///
    /// The default pointer is read exactly once, so a concurrent rotation
    /// yields either the old or the new key, never a mix.
    pub fn sign(&self, data: &[u8], key_id: Option<&str>) -> Result<KeySignature> {
        let key_id = match key_id {
            Some(id) => id.to_owned(),
            None => self.default_key_id(),
        };
        let signature = self.store.sign(&key_id, data)?;
        Ok(KeySignature { key_id, signature })
    }

    /// Generate a new key and make it the default. The previous key is kept
    /// so signatures it produced remain verifiable.
    #[instrument(skip(self))]
    pub fn rotate_key(&self, new_key_id: Option<&str>) -> Result<KeyInfo> {
        let new_key_id = match new_key_id {
            Some(id) => id.to_owned(),
            None => format!("signing-{}", Utc::now().format("%Y%m%d%H%M%S")),
        };
        let info = self.store.generate_signing_key(&new_key_id)?;

        let old = {
            let mut guard = self
                .default_key_id
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, new_key_id.clone())
        };
        info!(old_key = %old, new_key = %new_key_id, "rotated signing key");
        Ok(info)
    }

    pub fn list_keys(&self) -> Result<Vec<KeyInfo>> {
        self.store.list_keys()
    }

    /// Public keys of every retained key, for provisioning verifiers.
    pub fn trusted_public_keys(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .store
            .list_keys()?
            .into_iter()
            .map(|info| info.public_key)
            .collect())
    }
}
