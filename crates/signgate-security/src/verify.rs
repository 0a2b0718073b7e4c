// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Edge-side message verification.
//
// Checks run in a fixed order and stop at the first failure:
//   1. device binding   (own id or "*")
//   2. expiration       (now >= expires is expired)
//   3. replay           (atomic check-and-reserve of the nonce)
//   4. signature        (Ed25519 against every trusted key)
// A nonce is only remembered once the whole check succeeds. A reservation
// blocks concurrent verifications of the same nonce while it is held.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::Utc;
use signgate_core::types::WILDCARD_DEVICE;
use signgate_core::{ProtocolError, SignedMessage};
use tracing::{debug, instrument, warn};

use crate::keypair::{ED25519_SIGNATURE_LEN, verify_ed25519};
use crate::signing::{DEV_STUB_PREFIX, SignatureScheme};

/// Default bound on remembered nonces.
pub const DEFAULT_REPLAY_CAPACITY: usize = 10_000;

/// Nonces seen in successfully verified messages plus in-flight reservations.
///
/// When `seen` exceeds `capacity` the oldest half by insertion order is
/// dropped. Lookups do not refresh entries, so this is a bound on memory,
/// not an LRU.
#[derive(Debug)]
struct ReplayCache {
    capacity: usize,
    seen: HashSet<String>,
    order: VecDeque<String>,
    pending: HashSet<String>,
}

impl ReplayCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            seen: HashSet::new(),
            order: VecDeque::new(),
            pending: HashSet::new(),
        }
    }

    /// Returns `false` if the nonce is already seen or reserved.
    fn reserve(&mut self, nonce: &str) -> bool {
        if self.seen.contains(nonce) || self.pending.contains(nonce) {
            return false;
        }
        self.pending.insert(nonce.to_owned())
    }

    fn release(&mut self, nonce: &str) {
        self.pending.remove(nonce);
    }

    fn commit(&mut self, nonce: &str) {
        self.pending.remove(nonce);
        if self.seen.insert(nonce.to_owned()) {
            self.order.push_back(nonce.to_owned());
        }
        if self.seen.len() > self.capacity {
            let evict = self.seen.len() / 2;
            for old in self.order.drain(..evict) {
                self.seen.remove(&old);
            }
            debug!(evicted = evict, remaining = self.seen.len(), "replay cache trimmed");
        }
    }
}

/// A held nonce reservation. Released on drop unless committed.
struct Reservation<'a> {
    cache: &'a Mutex<ReplayCache>,
    nonce: &'a str,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        lock(self.cache).commit(self.nonce);
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            lock(self.cache).release(self.nonce);
        }
    }
}

// The cache holds plain sets; a panic mid-update cannot leave them unusable.
fn lock(cache: &Mutex<ReplayCache>) -> std::sync::MutexGuard<'_, ReplayCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Verifies signed messages for one device.
pub struct MessageVerifier {
    device_id: String,
    scheme: SignatureScheme,
    trusted_keys: RwLock<Vec<Vec<u8>>>,
    replay: Mutex<ReplayCache>,
}

impl MessageVerifier {
    /// Ed25519 verifier for `device_id` trusting `trusted_keys`.
    pub fn new(
        device_id: impl Into<String>,
        trusted_keys: Vec<Vec<u8>>,
        replay_capacity: usize,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            scheme: SignatureScheme::Ed25519,
            trusted_keys: RwLock::new(trusted_keys),
            replay: Mutex::new(ReplayCache::new(replay_capacity)),
        }
    }

    /// Verifier accepting development stub signatures only.
    #[cfg(feature = "dev-stub-signatures")]
    pub fn dev_stub(device_id: impl Into<String>, replay_capacity: usize) -> Self {
        warn!("verifier accepts development stub signatures; messages are not authenticated");
        Self {
            device_id: device_id.into(),
            scheme: SignatureScheme::DevStub,
            trusted_keys: RwLock::new(Vec::new()),
            replay: Mutex::new(ReplayCache::new(replay_capacity)),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    /// Trust an additional public key, e.g. after the issuer rotated.
    pub fn add_trusted_key(&self, public_key: Vec<u8>) {
        let mut keys = self
            .trusted_keys
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !keys.contains(&public_key) {
            debug!(pubkey = %hex::encode(&public_key), "trusting new public key");
            keys.push(public_key);
        }
    }

    pub fn trusted_key_count(&self) -> usize {
        self.trusted_keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of nonces currently remembered.
    pub fn seen_nonce_count(&self) -> usize {
        lock(&self.replay).seen.len()
    }

    /// Run every check. A message verifies successfully at most once.
    #[instrument(skip_all, fields(message_id = %message.message_id))]
    pub fn verify(&self, message: &SignedMessage) -> Result<(), ProtocolError> {
        if message.device_id != self.device_id && message.device_id != WILDCARD_DEVICE {
            warn!(target_device = %message.device_id, "message addressed to another device");
            return Err(ProtocolError::DeviceMismatch {
                expected: self.device_id.clone(),
                actual: message.device_id.clone(),
            });
        }

        if message.is_expired_at(Utc::now()) {
            warn!(expires = %message.expires, "message expired");
            return Err(ProtocolError::Expired {
                message_id: message.message_id.clone(),
                expired_at: message.expires,
            });
        }

        let reservation = self.reserve(&message.nonce)?;
        self.check_signature(message)?;
        reservation.commit();

        debug!("message verified");
        Ok(())
    }

    /// [`verify`](Self::verify) without the error type.
    pub fn verify_safe(&self, message: &SignedMessage) -> (bool, Option<String>) {
        match self.verify(message) {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        }
    }

    fn reserve<'a>(&'a self, nonce: &'a str) -> Result<Reservation<'a>, ProtocolError> {
        if !lock(&self.replay).reserve(nonce) {
            warn!(nonce, "replay detected");
            return Err(ProtocolError::ReplayDetected {
                nonce: nonce.to_owned(),
            });
        }
        Ok(Reservation {
            cache: &self.replay,
            nonce,
            committed: false,
        })
    }

    fn check_signature(&self, message: &SignedMessage) -> Result<(), ProtocolError> {
        let signature = message
            .signature
            .as_deref()
            .ok_or_else(|| ProtocolError::MalformedSignature("missing signature".into()))?;
        let payload = message
            .payload_for_signing()
            .map_err(|e| ProtocolError::MalformedSignature(format!("unencodable payload: {e}")))?;

        match self.scheme {
            SignatureScheme::Ed25519 => self.check_ed25519(message, signature, &payload),
            #[cfg(feature = "dev-stub-signatures")]
            SignatureScheme::DevStub => {
                if signature == crate::signing::dev_stub_signature(&payload) {
                    Ok(())
                } else {
                    Err(ProtocolError::SignatureInvalid {
                        message_id: message.message_id.clone(),
                    })
                }
            }
        }
    }

    fn check_ed25519(
        &self,
        message: &SignedMessage,
        signature: &str,
        payload: &[u8],
    ) -> Result<(), ProtocolError> {
        if signature.starts_with(DEV_STUB_PREFIX) {
            return Err(ProtocolError::MalformedSignature(
                "development stub signature not accepted".into(),
            ));
        }
        let raw = hex::decode(signature)
            .map_err(|e| ProtocolError::MalformedSignature(format!("not hex: {e}")))?;
        if raw.len() != ED25519_SIGNATURE_LEN {
            return Err(ProtocolError::MalformedSignature(format!(
                "expected {ED25519_SIGNATURE_LEN} bytes, got {}",
                raw.len()
            )));
        }

        let keys = self
            .trusted_keys
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if keys.iter().any(|pk| verify_ed25519(pk, payload, &raw)) {
            Ok(())
        } else {
            warn!("signature does not match any trusted key");
            Err(ProtocolError::SignatureInvalid {
                message_id: message.message_id.clone(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::test_store::manager;
    use crate::signing::MessageSigner;
    use chrono::Duration;
    use signgate_core::{AlertTier, MessageContent};
    use std::sync::{Arc, Barrier};

    fn signer_and_verifier(device: &str) -> (MessageSigner, MessageVerifier) {
        let keys = manager();
        let signer = MessageSigner::new(keys.clone());
        let verifier = MessageVerifier::new(
            device,
            keys.trusted_public_keys().unwrap(),
            DEFAULT_REPLAY_CAPACITY,
        );
        (signer, verifier)
    }

    fn message(signer: &MessageSigner, device: &str, ttl: i64) -> SignedMessage {
        signer
            .create_signed_message(
                device,
                AlertTier::Informational,
                MessageContent::new("crowd-count").with_param("count", 42),
                ttl,
                vec![],
            )
            .unwrap()
    }

    #[test]
    fn verifies_exactly_once() {
        let (signer, verifier) = signer_and_verifier("sign-1");
        let msg = message(&signer, "sign-1", 300);

        assert_eq!(verifier.verify(&msg), Ok(()));
        assert!(matches!(
            verifier.verify(&msg),
            Err(ProtocolError::ReplayDetected { .. })
        ));
        assert_eq!(verifier.seen_nonce_count(), 1);
    }

    #[test]
    fn tampering_invalidates_signature() {
        let (signer, verifier) = signer_and_verifier("sign-1");
        let original = message(&signer, "sign-1", 300);

        let mutations: [fn(&mut SignedMessage); 6] = [
            |m| m.message_id.push('0'),
            |m| m.tier = "advisory".into(),
            |m| m.expires += Duration::seconds(60),
            |m| m.timestamp -= Duration::seconds(1),
            |m| m.content = MessageContent::new("crowd-count").with_param("count", 43),
            |m| {
                m.authorizations.push(signgate_core::Authorization::new(
                    "op1",
                    signgate_core::AuthMethod::Api,
                ))
            },
        ];
        for (i, mutate) in mutations.iter().enumerate() {
            let mut msg = original.clone();
            mutate(&mut msg);
            assert!(
                matches!(
                    verifier.verify(&msg),
                    Err(ProtocolError::SignatureInvalid { .. })
                ),
                "mutation {i} was accepted"
            );
        }
        // Failed verifications do not consume the nonce.
        assert_eq!(verifier.seen_nonce_count(), 0);
        assert_eq!(verifier.verify(&original), Ok(()));
    }

    #[test]
    fn non_positive_ttl_is_expired_before_replay_check() {
        let (signer, verifier) = signer_and_verifier("sign-1");
        for ttl in [0, -5] {
            let msg = message(&signer, "sign-1", ttl);
            assert!(matches!(
                verifier.verify(&msg),
                Err(ProtocolError::Expired { .. })
            ));
        }
        assert_eq!(verifier.seen_nonce_count(), 0);
    }

    #[test]
    fn device_binding() {
        let (signer, verifier) = signer_and_verifier("sign-1");

        let mut other = message(&signer, "sign-2", 300);
        other.signature = Some("not even hex".into());
        assert_eq!(
            verifier.verify(&other),
            Err(ProtocolError::DeviceMismatch {
                expected: "sign-1".into(),
                actual: "sign-2".into(),
            })
        );

        let broadcast = message(&signer, WILDCARD_DEVICE, 300);
        assert_eq!(verifier.verify(&broadcast), Ok(()));
    }

    #[test]
    fn malformed_signatures() {
        let (signer, verifier) = signer_and_verifier("sign-1");
        for bad in [None, Some("zz"), Some("abcd"), Some("DEV:00")] {
            let mut msg = message(&signer, "sign-1", 300);
            msg.signature = bad.map(str::to_owned);
            assert!(
                matches!(
                    verifier.verify(&msg),
                    Err(ProtocolError::MalformedSignature(_))
                ),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn untrusted_key_then_rotation() {
        let keys = manager();
        let signer = MessageSigner::new(keys.clone());
        let verifier = MessageVerifier::new("sign-1", keys.trusted_public_keys().unwrap(), 100);

        keys.rotate_key(Some("k2")).unwrap();
        let msg = message(&signer, "sign-1", 300);
        assert!(matches!(
            verifier.verify(&msg),
            Err(ProtocolError::SignatureInvalid { .. })
        ));

        verifier.add_trusted_key(keys.public_key().unwrap());
        verifier.add_trusted_key(keys.public_key().unwrap());
        assert_eq!(verifier.trusted_key_count(), 2);
        assert_eq!(verifier.verify(&msg), Ok(()));
    }

    #[test]
    fn verify_safe_reports_reason() {
        let (signer, verifier) = signer_and_verifier("sign-1");
        let msg = message(&signer, "sign-1", 300);
        assert_eq!(verifier.verify_safe(&msg), (true, None));
        let (ok, reason) = verifier.verify_safe(&msg);
        assert!(!ok);
        assert!(reason.unwrap().contains("replay"));
    }

    #[test]
    fn concurrent_verification_succeeds_once() {
        let (signer, verifier) = signer_and_verifier("sign-1");
        let verifier = Arc::new(verifier);
        let msg = Arc::new(message(&signer, "sign-1", 300));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (verifier, msg, barrier) =
                    (Arc::clone(&verifier), Arc::clone(&msg), Arc::clone(&barrier));
                std::thread::spawn(move || {
                    barrier.wait();
                    verifier.verify(&msg)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().all(|r| matches!(
            r,
            Ok(()) | Err(ProtocolError::ReplayDetected { .. })
        )));
    }

    #[test]
    fn cache_evicts_oldest_half() {
        let mut cache = ReplayCache::new(4);
        for n in ["a", "b", "c", "d", "e"] {
            assert!(cache.reserve(n));
            cache.commit(n);
        }
        // 5 > 4: the two oldest are gone.
        assert_eq!(cache.seen.len(), 3);
        assert!(cache.reserve("a"));
        assert!(cache.reserve("b"));
        assert!(!cache.reserve("c"));
        assert!(!cache.reserve("a"), "pending nonce must block");
        cache.release("a");
        assert!(cache.reserve("a"));
    }
}
