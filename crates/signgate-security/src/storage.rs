// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Software key store — signing keys encrypted at rest under a password.
//
// Layout of the storage directory:
//   .salt          16 random bytes, created on first use
//   <key_id>.key   nonce(12) || AES-256-GCM(JSON{private, public, meta})
//
// The key-encryption key is derived from the password and salt with scrypt.
// Every write draws a fresh random nonce, and the key id is bound as
// associated data so blobs cannot be swapped between file names.
//
// Suitable for development and pilot deployments. Production signing keys
// belong in an HSM (see `hsm.rs`).

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use signgate_core::config::KdfParams;
use signgate_core::error::{KeyError, Result, SigngateError};
use tracing::{debug, error, info, instrument, warn};

use crate::keypair::SigningKeyPair;
use crate::keys::{KeyInfo, KeyStore, validate_key_id};

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;
const SALT_FILE: &str = ".salt";
const KEY_EXTENSION: &str = "key";
const DERIVED_KEY_LEN: usize = 32;

/// Plaintext of one key file.
#[derive(Serialize, Deserialize)]
struct KeyBlob {
    /// PKCS#8 DER, hex.
    private: String,
    /// Raw public key, hex.
    public: String,
    meta: KeyInfo,
}

struct LoadedKey {
    info: KeyInfo,
    pair: SigningKeyPair,
}

/// Password-protected key store on the local filesystem.
pub struct SoftwareKeyStore {
    dir: PathBuf,
    cipher: LessSafeKey,
    rng: SystemRandom,
    keys: RwLock<BTreeMap<String, LoadedKey>>,
}

impl SoftwareKeyStore {
    /// Open (or create) the store at `dir`.
    ///
    /// Every existing key file is decrypted into memory. A file that fails
    /// authentication aborts the open, so a wrong password is reported
    /// instead of looking like an empty store.
    #[instrument(skip(password, kdf), fields(dir = %dir.as_ref().display()))]
    pub fn open(dir: impl AsRef<Path>, password: SecretString, kdf: KdfParams) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let rng = SystemRandom::new();
        let salt = load_or_create_salt(&dir, &rng)?;
        let cipher = derive_cipher(&password, &salt, kdf)?;

        let store = Self {
            dir,
            cipher,
            rng,
            keys: RwLock::new(BTreeMap::new()),
        };
        store.load_keys()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key_id: &str) -> PathBuf {
        self.dir.join(format!("{key_id}.{KEY_EXTENSION}"))
    }

    fn load_keys(&self) -> Result<()> {
        let mut loaded = BTreeMap::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(KEY_EXTENSION) {
                continue;
            }
            let Some(key_id) = path.file_stem().and_then(|s| s.to_str()) else {
                warn!(path = %path.display(), "skipping key file with non-UTF-8 name");
                continue;
            };
            if validate_key_id(key_id).is_err() {
                warn!(path = %path.display(), "skipping key file with invalid id");
                continue;
            }

            let key = self.read_key(key_id, &path).inspect_err(|e| {
                error!(key_id, error = %e, "failed to load key");
            })?;
            debug!(key_id, "loaded key");
            loaded.insert(key_id.to_owned(), key);
        }

        info!(count = loaded.len(), "software key store opened");
        *self.keys.write().unwrap_or_else(PoisonError::into_inner) = loaded;
        Ok(())
    }

    fn read_key(&self, key_id: &str, path: &Path) -> Result<LoadedKey> {
        let sealed = fs::read(path)?;
        let plaintext = self.open_blob(key_id, sealed)?;
        let blob: KeyBlob = serde_json::from_slice(&plaintext)?;

        if blob.meta.key_id != key_id {
            return Err(KeyError::Decryption(format!(
                "file {key_id} holds metadata for {}",
                blob.meta.key_id
            ))
            .into());
        }
        let der = hex::decode(&blob.private)
            .map_err(|e| KeyError::Decryption(format!("private key encoding: {e}")))?;
        let pair = SigningKeyPair::from_pkcs8(der)?;
        if hex::encode(pair.public_key()) != blob.public
            || pair.public_key() != blob.meta.public_key
        {
            return Err(KeyError::Decryption(format!("public key mismatch in {key_id}")).into());
        }
        Ok(LoadedKey {
            info: blob.meta,
            pair,
        })
    }

    fn write_key(&self, key_id: &str, pair: &SigningKeyPair, info: &KeyInfo) -> Result<()> {
        let blob = KeyBlob {
            private: hex::encode(pair.pkcs8_der()),
            public: hex::encode(pair.public_key()),
            meta: info.clone(),
        };
        let sealed = self.seal_blob(key_id, serde_json::to_vec(&blob)?)?;

        let path = self.key_path(key_id);
        let tmp = path.with_extension(format!("{KEY_EXTENSION}.tmp"));
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&sealed)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// `nonce || ciphertext || tag`, with a fresh nonce per call.
    fn seal_blob(&self, key_id: &str, mut plaintext: Vec<u8>) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce)
            .map_err(|e| KeyError::Crypto(format!("nonce generation failed: {e}")))?;

        self.cipher
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce),
                Aad::from(key_id.as_bytes()),
                &mut plaintext,
            )
            .map_err(|e| KeyError::Crypto(format!("encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + plaintext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&plaintext);
        Ok(sealed)
    }

    fn open_blob(&self, key_id: &str, mut sealed: Vec<u8>) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(KeyError::Decryption(format!("key file {key_id} is truncated")).into());
        }
        let mut ciphertext = sealed.split_off(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(&sealed)
            .map_err(|_| KeyError::Decryption("bad nonce length".into()))?;

        let plaintext = self
            .cipher
            .open_in_place(nonce, Aad::from(key_id.as_bytes()), &mut ciphertext)
            .map_err(|_| {
                KeyError::Decryption(format!(
                    "key file {key_id} failed authentication (wrong password or tampered file)"
                ))
            })?;
        Ok(plaintext.to_vec())
    }
}

fn load_or_create_salt(dir: &Path, rng: &SystemRandom) -> Result<[u8; SALT_LEN]> {
    let path = dir.join(SALT_FILE);
    if path.exists() {
        let bytes = fs::read(&path)?;
        return bytes.try_into().map_err(|bytes: Vec<u8>| {
            SigngateError::Config(format!(
                "salt file {} has {} bytes, expected {SALT_LEN}",
                path.display(),
                bytes.len()
            ))
        });
    }

    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt)
        .map_err(|e| KeyError::Crypto(format!("salt generation failed: {e}")))?;
    let mut file = fs::File::create(&path)?;
    file.write_all(&salt)?;
    file.sync_all()?;
    debug!(path = %path.display(), "created key store salt");
    Ok(salt)
}

fn derive_cipher(password: &SecretString, salt: &[u8], kdf: KdfParams) -> Result<LessSafeKey> {
    let params = scrypt::Params::new(kdf.log_n, kdf.r, kdf.p, DERIVED_KEY_LEN)
        .map_err(|e| SigngateError::Config(format!("invalid scrypt parameters: {e}")))?;
    let mut derived = [0u8; DERIVED_KEY_LEN];
    scrypt::scrypt(password.expose_secret().as_bytes(), salt, &params, &mut derived)
        .map_err(|e| KeyError::Crypto(format!("key derivation failed: {e}")))?;

    let unbound = UnboundKey::new(&AES_256_GCM, &derived)
        .map_err(|e| KeyError::Crypto(format!("cipher init failed: {e}")))?;
    derived.fill(0);
    Ok(LessSafeKey::new(unbound))
}

impl KeyStore for SoftwareKeyStore {
    #[instrument(skip(self))]
    fn generate_signing_key(&self, key_id: &str) -> Result<KeyInfo> {
        validate_key_id(key_id)?;
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        if keys.contains_key(key_id) || self.key_path(key_id).exists() {
            return Err(KeyError::KeyAlreadyExists(key_id.to_owned()).into());
        }

        let pair = SigningKeyPair::generate()?;
        let info = KeyInfo::ed25519_signing(key_id, pair.public_key().to_vec());
        self.write_key(key_id, &pair, &info)?;
        keys.insert(
            key_id.to_owned(),
            LoadedKey {
                info: info.clone(),
                pair,
            },
        );

        info!(key_id, "generated new signing key");
        Ok(info)
    }

    fn get_public_key(&self, key_id: &str) -> Result<Vec<u8>> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        keys.get(key_id)
            .map(|k| k.info.public_key.clone())
            .ok_or_else(|| KeyError::KeyNotFound(key_id.to_owned()).into())
    }

    fn sign(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        keys.get(key_id)
            .map(|k| k.pair.sign(data))
            .ok_or_else(|| KeyError::KeyNotFound(key_id.to_owned()).into())
    }

    fn list_keys(&self) -> Result<Vec<KeyInfo>> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        Ok(keys.values().map(|k| k.info.clone()).collect())
    }

    #[instrument(skip(self))]
    fn delete_key(&self, key_id: &str) -> Result<bool> {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        if keys.remove(key_id).is_none() {
            return Ok(false);
        }
        match fs::remove_file(self.key_path(key_id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!(key_id, "deleted key");
        Ok(true)
    }
}
