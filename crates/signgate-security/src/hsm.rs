// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Hardware security module key store.
//
// The HSM performs every private-key operation; this adapter only ever sees
// labels, public keys and signatures. No vendor driver is linked into this
// crate. A deployment supplies an `HsmSession` for its PKCS#11 / cloud HSM
// client, and `connect` without one fails instead of falling back to
// software keys.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use signgate_core::error::{KeyError, Result};
use tracing::{info, instrument};

use crate::keys::{KeyInfo, KeyStore, validate_key_id};

/// Supported HSM families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HsmProvider {
    AwsCloudhsm,
    AzureDedicatedHsm,
    GcpCloudHsm,
    ThalesLuna,
    Yubihsm,
}

impl HsmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwsCloudhsm => "aws_cloudhsm",
            Self::AzureDedicatedHsm => "azure_dedicated_hsm",
            Self::GcpCloudHsm => "gcp_cloud_hsm",
            Self::ThalesLuna => "thales_luna",
            Self::Yubihsm => "yubihsm",
        }
    }
}

impl fmt::Display for HsmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings for an HSM. Credentials stay with the vendor client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsmConfig {
    pub provider: HsmProvider,
    /// Cluster endpoint, slot URI, or connector URL, depending on provider.
    pub endpoint: String,
    /// Partition / key ring the signing keys live in.
    #[serde(default)]
    pub partition: Option<String>,
}

/// An authenticated session with an HSM.
///
/// Implementations wrap a vendor client. Keys are addressed by label and
/// private material never leaves the device.
pub trait HsmSession: Send + Sync {
    /// Create an Ed25519 key pair under `label`, returning the raw public key.
    fn generate_key_pair(&self, label: &str) -> Result<Vec<u8>>;

    /// Raw public key for `label`, or `None` if no such key exists.
    fn public_key(&self, label: &str) -> Result<Option<Vec<u8>>>;

    fn sign(&self, label: &str, data: &[u8]) -> Result<Vec<u8>>;

    fn list_labels(&self) -> Result<Vec<String>>;

    /// Destroy the key under `label`. Returns `false` if it did not exist.
    fn destroy(&self, label: &str) -> Result<bool>;
}

/// [`KeyStore`] backed by an [`HsmSession`].
pub struct HsmKeyStore {
    provider: HsmProvider,
    session: Box<dyn HsmSession>,
    /// Metadata for keys created through this store. The HSM only knows
    /// labels and public keys.
    known: RwLock<BTreeMap<String, KeyInfo>>,
}

impl HsmKeyStore {
    /// Connect using a compiled-in provider driver.
    ///
    /// No driver ships with this crate, so this always fails with
    /// `NotImplemented`. Use [`HsmKeyStore::with_session`] with a
    /// vendor-backed session instead.
    #[instrument]
    pub fn connect(config: &HsmConfig) -> Result<Self> {
        Err(KeyError::NotImplemented(format!(
            "no {} driver is compiled in; supply an HsmSession via HsmKeyStore::with_session",
            config.provider
        ))
        .into())
    }

    /// Wrap an externally established session.
    pub fn with_session(provider: HsmProvider, session: Box<dyn HsmSession>) -> Self {
        info!(provider = %provider, "HSM key store attached");
        Self {
            provider,
            session,
            known: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn provider(&self) -> HsmProvider {
        self.provider
    }
}

impl KeyStore for HsmKeyStore {
    #[instrument(skip(self), fields(provider = %self.provider))]
    fn generate_signing_key(&self, key_id: &str) -> Result<KeyInfo> {
        validate_key_id(key_id)?;
        let mut known = self.known.write().unwrap_or_else(PoisonError::into_inner);
        if known.contains_key(key_id) || self.session.public_key(key_id)?.is_some() {
            return Err(KeyError::KeyAlreadyExists(key_id.to_owned()).into());
        }

        let public_key = self.session.generate_key_pair(key_id)?;
        let info = KeyInfo::ed25519_signing(key_id, public_key);
        known.insert(key_id.to_owned(), info.clone());
        info!(key_id, "generated HSM signing key");
        Ok(info)
    }

    fn get_public_key(&self, key_id: &str) -> Result<Vec<u8>> {
        self.session
            .public_key(key_id)?
            .ok_or_else(|| KeyError::KeyNotFound(key_id.to_owned()).into())
    }

    fn sign(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>> {
        if self.session.public_key(key_id)?.is_none() {
            return Err(KeyError::KeyNotFound(key_id.to_owned()).into());
        }
        self.session.sign(key_id, data)
    }

    /// Keys created elsewhere on the HSM are reported with a creation time
    /// of "now", since the HSM does not expose one.
    fn list_keys(&self) -> Result<Vec<KeyInfo>> {
        let known = self.known.read().unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::new();
        for label in self.session.list_labels()? {
            if let Some(info) = known.get(&label) {
                out.push(info.clone());
            } else if let Some(pk) = self.session.public_key(&label)? {
                out.push(KeyInfo::ed25519_signing(label, pk));
            }
        }
        out.sort_by(|a, b| a.key_id.cmp(&b.key_id));
        Ok(out)
    }

    #[instrument(skip(self))]
    fn delete_key(&self, key_id: &str) -> Result<bool> {
        let mut known = self.known.write().unwrap_or_else(PoisonError::into_inner);
        known.remove(key_id);
        let destroyed = self.session.destroy(key_id)?;
        if destroyed {
            info!(key_id, "destroyed HSM key");
        }
        Ok(destroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::{SigningKeyPair, verify_ed25519};
    use signgate_core::SigngateError;
    use std::sync::Mutex;

    /// Session that keeps key pairs in memory, standing in for a device.
    #[derive(Default)]
    struct MockSession {
        keys: Mutex<BTreeMap<String, SigningKeyPair>>,
    }

    impl HsmSession for MockSession {
        fn generate_key_pair(&self, label: &str) -> Result<Vec<u8>> {
            let pair = SigningKeyPair::generate()?;
            let pk = pair.public_key().to_vec();
            self.keys.lock().unwrap().insert(label.to_owned(), pair);
            Ok(pk)
        }

        fn public_key(&self, label: &str) -> Result<Option<Vec<u8>>> {
            Ok(self
                .keys
                .lock()
                .unwrap()
                .get(label)
                .map(|p| p.public_key().to_vec()))
        }

        fn sign(&self, label: &str, data: &[u8]) -> Result<Vec<u8>> {
            let keys = self.keys.lock().unwrap();
            let pair = keys
                .get(label)
                .ok_or_else(|| KeyError::KeyNotFound(label.to_owned()))?;
            Ok(pair.sign(data))
        }

        fn list_labels(&self) -> Result<Vec<String>> {
            Ok(self.keys.lock().unwrap().keys().cloned().collect())
        }

        fn destroy(&self, label: &str) -> Result<bool> {
            Ok(self.keys.lock().unwrap().remove(label).is_some())
        }
    }

    fn store() -> HsmKeyStore {
        HsmKeyStore::with_session(HsmProvider::Yubihsm, Box::new(MockSession::default()))
    }

    #[test]
    fn connect_without_driver_is_not_implemented() {
        let config = HsmConfig {
            provider: HsmProvider::AwsCloudhsm,
            endpoint: "cluster-1.example".into(),
            partition: None,
        };
        let err = HsmKeyStore::connect(&config).err().unwrap();
        assert!(matches!(
            err,
            SigngateError::Key(KeyError::NotImplemented(_))
        ));
        assert!(err.to_string().contains("aws_cloudhsm"));
    }

    #[test]
    fn provider_names_match_config_format() {
        let parsed: HsmProvider = serde_json::from_str("\"azure_dedicated_hsm\"").unwrap();
        assert_eq!(parsed, HsmProvider::AzureDedicatedHsm);
        assert_eq!(HsmProvider::ThalesLuna.to_string(), "thales_luna");
    }

    #[test]
    fn sign_through_session() {
        let store = store();
        let info = store.generate_signing_key("default").unwrap();
        let sig = store.sign("default", b"shelter in place").unwrap();
        assert!(verify_ed25519(&info.public_key, b"shelter in place", &sig));
        assert_eq!(store.get_public_key("default").unwrap(), info.public_key);
    }

    #[test]
    fn lifecycle_errors() {
        let store = store();
        store.generate_signing_key("k1").unwrap();
        assert!(matches!(
            store.generate_signing_key("k1"),
            Err(SigngateError::Key(KeyError::KeyAlreadyExists(_)))
        ));
        assert!(matches!(
            store.sign("missing", b"x"),
            Err(SigngateError::Key(KeyError::KeyNotFound(_)))
        ));

        store.generate_signing_key("k0").unwrap();
        let ids: Vec<_> = store
            .list_keys()
            .unwrap()
            .into_iter()
            .map(|k| k.key_id)
            .collect();
        assert_eq!(ids, ["k0", "k1"]);

        assert!(store.delete_key("k1").unwrap());
        assert!(!store.delete_key("k1").unwrap());
        assert!(matches!(
            store.get_public_key("k1"),
            Err(SigngateError::Key(KeyError::KeyNotFound(_)))
        ));
    }
}
