// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! signgate-security — trust primitives for the Signgate display gate.
//!
//! Key custody (software store and HSM adapter), Ed25519 message signing
//! and verification with replay protection, tier authorization policy, and
//! the hash-chained audit trail with its durable sinks.

pub mod audit;
pub mod hsm;
pub mod integrity;
pub mod keypair;
pub mod keys;
pub mod signing;
pub mod sinks;
pub mod storage;
pub mod tiers;
pub mod verify;

pub use audit::{
    AuditEvent, AuditEventType, AuditLogger, AuditSink, ChainVerification, GENESIS_HASH,
    RemoteSync, SinkRecord,
};
pub use hsm::{HsmConfig, HsmKeyStore, HsmProvider, HsmSession};
pub use integrity::{content_fingerprint, hash_bytes, hash_canonical};
pub use keys::{KeyInfo, KeyManager, KeyStore};
pub use signing::{MessageSigner, SignatureScheme};
pub use sinks::{JsonLinesSink, SqliteSink, open_sink};
pub use storage::SoftwareKeyStore;
pub use tiers::{TierAuthorization, TierValidator, get_tier_for_detection, is_template_autonomous};
pub use verify::MessageVerifier;
