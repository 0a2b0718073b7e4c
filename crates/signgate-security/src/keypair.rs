// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ed25519 signing key pairs.
//
// The private key is held as a PKCS#8 v2 DER document inside a `SecretSlice`
// so it is zeroised on drop. The public key is the raw 32-byte encoding that
// verifiers are provisioned with.

use std::fmt;

use ring::rand::SystemRandom;
use ring::signature::{self, Ed25519KeyPair, KeyPair, UnparsedPublicKey};
use secrecy::{ExposeSecret, SecretSlice};
use signgate_core::KeyError;
use tracing::{debug, instrument};

/// Raw Ed25519 public key length.
pub const ED25519_PUBLIC_KEY_LEN: usize = 32;
/// Ed25519 signature length.
pub const ED25519_SIGNATURE_LEN: usize = 64;

/// An Ed25519 key pair held in process memory.
pub struct SigningKeyPair {
    /// PKCS#8 v2 DER private key (includes the public key).
    pkcs8_der: SecretSlice<u8>,
    key_pair: Ed25519KeyPair,
}

impl SigningKeyPair {
    /// Generate a fresh key pair using the OS CSPRNG.
    #[instrument]
    pub fn generate() -> Result<Self, KeyError> {
        let rng = SystemRandom::new();
        let document = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|e| KeyError::Crypto(format!("key generation failed: {e}")))?;
        let pair = Self::from_pkcs8(document.as_ref().to_vec())?;
        debug!(pubkey = %hex::encode(pair.public_key()), "Ed25519 key pair generated");
        Ok(pair)
    }

    /// Load a key pair from its PKCS#8 DER encoding.
    pub fn from_pkcs8(der: Vec<u8>) -> Result<Self, KeyError> {
        let key_pair = Ed25519KeyPair::from_pkcs8(&der)
            .map_err(|e| KeyError::Crypto(format!("key parsing failed: {e}")))?;
        Ok(Self {
            pkcs8_der: SecretSlice::from(der),
            key_pair,
        })
    }

    /// The PKCS#8 DER private key. Only key stores should persist this.
    pub fn pkcs8_der(&self) -> &[u8] {
        self.pkcs8_der.expose_secret()
    }

    /// Raw 32-byte public key.
    pub fn public_key(&self) -> &[u8] {
        self.key_pair.public_key().as_ref()
    }

    /// Sign `message`, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key_pair.sign(message).as_ref().to_vec()
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public_key", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

/// Check an Ed25519 signature against a raw public key.
pub fn verify_ed25519(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    UnparsedPublicKey::new(&signature::ED25519, public_key)
        .verify(message, signature)
        .is_ok()
}
