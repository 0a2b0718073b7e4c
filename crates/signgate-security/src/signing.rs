// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Message signing on the issuing side.

use std::sync::Arc;

use chrono::Duration;
use ring::rand::{SecureRandom, SystemRandom};
use signgate_core::error::{KeyError, Result, SigngateError};
use signgate_core::{AlertTier, Authorization, MessageContent, SignedMessage};
use tracing::{debug, instrument};

use crate::keys::KeyManager;

/// Bytes of randomness in message ids and nonces.
pub const TOKEN_BYTES: usize = 16;

/// Prefix of development stub signatures.
pub const DEV_STUB_PREFIX: &str = "DEV:";

/// Signature scheme, fixed when the signer or verifier is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    Ed25519,
    /// `DEV:<sha256 hex of payload>`. Provides no authenticity.
    #[cfg(feature = "dev-stub-signatures")]
    DevStub,
}

enum Backend {
    Keys(Arc<KeyManager>),
    #[cfg(feature = "dev-stub-signatures")]
    DevStub,
}

/// Creates and signs [`SignedMessage`]s with the key manager's default key.
pub struct MessageSigner {
    backend: Backend,
    rng: SystemRandom,
}

impl MessageSigner {
    pub fn new(keys: Arc<KeyManager>) -> Self {
        Self {
            backend: Backend::Keys(keys),
            rng: SystemRandom::new(),
        }
    }

    /// Signer producing development stub signatures.
    #[cfg(feature = "dev-stub-signatures")]
    pub fn dev_stub() -> Self {
        tracing::warn!("using development stub signatures; messages are not authenticated");
        Self {
            backend: Backend::DevStub,
            rng: SystemRandom::new(),
        }
    }

    pub fn scheme(&self) -> SignatureScheme {
        match self.backend {
            Backend::Keys(_) => SignatureScheme::Ed25519,
            #[cfg(feature = "dev-stub-signatures")]
            Backend::DevStub => SignatureScheme::DevStub,
        }
    }

    /// Public key of the current default signing key.
    pub fn public_key(&self) -> Result<Vec<u8>> {
        match &self.backend {
            Backend::Keys(keys) => keys.public_key(),
            #[cfg(feature = "dev-stub-signatures")]
            Backend::DevStub => {
                Err(KeyError::NotImplemented("stub signer has no public key".into()).into())
            }
        }
    }

    /// Build and sign a message for `device_id`, valid for `ttl_seconds`.
    ///
    /// A non-positive ttl yields a message that is already expired.
    #[instrument(skip_all, fields(device_id = %device_id, tier = %tier, ttl = ttl_seconds))]
    pub fn create_signed_message(
        &self,
        device_id: &str,
        tier: AlertTier,
        content: MessageContent,
        ttl_seconds: i64,
        authorizations: Vec<Authorization>,
    ) -> Result<SignedMessage> {
        let ttl = Duration::try_seconds(ttl_seconds).ok_or_else(|| {
            SigngateError::Config(format!("ttl out of range: {ttl_seconds}s"))
        })?;
        let mut message = SignedMessage::unsigned(
            self.random_token()?,
            device_id.to_owned(),
            signgate_core::now_micros(),
            ttl,
            self.random_token()?,
            tier,
            content,
            authorizations,
        )?;
        self.sign(&mut message)?;
        Ok(message)
    }

    /// Sign (or re-sign) `message` in place over its canonical payload.
    pub fn sign(&self, message: &mut SignedMessage) -> Result<()> {
        let payload = message.payload_for_signing()?;
        let signature = match &self.backend {
            Backend::Keys(keys) => {
                let signed = keys.sign(&payload, None)?;
                debug!(message_id = %message.message_id, key_id = %signed.key_id, "message signed");
                hex::encode(signed.signature)
            }
            #[cfg(feature = "dev-stub-signatures")]
            Backend::DevStub => dev_stub_signature(&payload),
        };
        message.signature = Some(signature);
        Ok(())
    }

    fn random_token(&self) -> Result<String> {
        let mut bytes = [0u8; TOKEN_BYTES];
        self.rng
            .fill(&mut bytes)
            .map_err(|e| KeyError::Crypto(format!("random token generation failed: {e}")))?;
        Ok(hex::encode(bytes))
    }
}

#[cfg(feature = "dev-stub-signatures")]
pub(crate) fn dev_stub_signature(payload: &[u8]) -> String {
    format!("{DEV_STUB_PREFIX}{}", crate::integrity::hash_bytes(payload))
}
