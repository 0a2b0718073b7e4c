// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Signgate.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failures of the message protocol checks run by the verifier.
///
/// Every variant is fail-closed: the message is never displayed and the
/// rejection is always audited.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("message addressed to device {actual}, not {expected}")]
    DeviceMismatch { expected: String, actual: String },

    #[error("message {message_id} expired at {expired_at}")]
    Expired {
        message_id: String,
        expired_at: DateTime<Utc>,
    },

    #[error("nonce {nonce} already seen (replay)")]
    ReplayDetected { nonce: String },

    #[error("invalid signature for message {message_id}")]
    SignatureInvalid { message_id: String },

    #[error("malformed signature: {0}")]
    MalformedSignature(String),
}

impl ProtocolError {
    /// Short machine-readable reason used in audit records.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::DeviceMismatch { .. } => "device_mismatch",
            Self::Expired { .. } => "expired",
            Self::ReplayDetected { .. } => "replay_detected",
            Self::SignatureInvalid { .. } => "signature_invalid",
            Self::MalformedSignature(_) => "malformed_signature",
        }
    }
}

/// Tier policy violations.
///
/// Fail-closed like [`ProtocolError`], but the issuer can legitimately retry
/// with corrected authorizations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown tier: {0}")]
    UnknownTier(String),

    #[error("template '{template_id}' not approved for autonomous {tier}")]
    TemplateNotAutonomous { template_id: String, tier: String },

    #[error("need {required} authorizations, got {got}")]
    InsufficientAuthorizations { required: usize, got: usize },

    #[error("multi-party authorization requires different operators ('{0}' appears twice)")]
    DuplicateOperator(String),

    #[error("operator '{0}' not authorized")]
    UnauthorizedOperator(String),
}

impl ValidationError {
    /// Short machine-readable reason used in audit records.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::UnknownTier(_) => "unknown_tier",
            Self::TemplateNotAutonomous { .. } => "template_not_autonomous",
            Self::InsufficientAuthorizations { .. } => "insufficient_authorizations",
            Self::DuplicateOperator(_) => "duplicate_operator",
            Self::UnauthorizedOperator(_) => "unauthorized_operator",
        }
    }
}

/// Local key-management failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("key {0} not found")]
    KeyNotFound(String),

    #[error("key {0} already exists")]
    KeyAlreadyExists(String),

    #[error("invalid key id: {0:?}")]
    InvalidKeyId(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("key decryption failed: {0}")]
    Decryption(String),

    #[error("key operation failed: {0}")]
    Crypto(String),
}

/// Top-level error type for all Signgate operations.
#[derive(Debug, Error)]
pub enum SigngateError {
    // -- Security decisions --
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Key(#[from] KeyError),

    // -- Storage / persistence --
    #[error("audit storage error: {0}")]
    Storage(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -- Collaborators --
    #[error("display backend error: {0}")]
    Backend(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SigngateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_name_the_problem() {
        let err = ValidationError::TemplateNotAutonomous {
            template_id: "custom-unlisted".into(),
            tier: "informational".into(),
        };
        assert!(err.to_string().contains("not approved"));

        let err = ValidationError::DuplicateOperator("op1".into());
        assert!(err.to_string().contains("different operators"));
    }

    #[test]
    fn protocol_errors_convert_into_top_level() {
        let err: SigngateError = ProtocolError::ReplayDetected {
            nonce: "abc".into(),
        }
        .into();
        assert!(matches!(
            err,
            SigngateError::Protocol(ProtocolError::ReplayDetected { .. })
        ));
        assert_eq!(err.to_string(), "nonce abc already seen (replay)");
    }

    #[test]
    fn reason_codes_are_distinct() {
        let codes = [
            ProtocolError::DeviceMismatch {
                expected: "a".into(),
                actual: "b".into(),
            }
            .reason_code(),
            ProtocolError::Expired {
                message_id: "m".into(),
                expired_at: Utc::now(),
            }
            .reason_code(),
            ProtocolError::ReplayDetected { nonce: "n".into() }.reason_code(),
            ProtocolError::SignatureInvalid {
                message_id: "m".into(),
            }
            .reason_code(),
            ProtocolError::MalformedSignature("x".into()).reason_code(),
        ];
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }
}
