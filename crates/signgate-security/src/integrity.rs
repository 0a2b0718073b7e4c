// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SHA-256 fingerprints over raw bytes and canonical JSON.

use serde::Serialize;
use sha2::{Digest, Sha256};
use signgate_core::MessageContent;
use signgate_core::canonical::canonical_json;

/// Compute the SHA-256 hash of `data` and return it as a lowercase hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of the canonical JSON encoding of `value`.
pub fn hash_canonical<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    Ok(hash_bytes(&canonical_json(value)?))
}

/// Fingerprint of displayed content, recorded in `message_displayed` events.
pub fn content_fingerprint(content: &MessageContent) -> serde_json::Result<String> {
    hash_canonical(content)
}
