// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types: signed display messages, operator authorizations, and
// the static alert tier table.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::canonical::{canonical_json, format_timestamp, rfc3339_micros};
use crate::error::{SigngateError, ValidationError};

/// Device id that addresses every device.
pub const WILDCARD_DEVICE: &str = "*";

/// Current UTC time truncated to the precision of the wire format.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// ---------------------------------------------------------------------------
// Alert tiers
// ---------------------------------------------------------------------------

/// Alert severity tiers with increasing authorization requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertTier {
    /// Crowd count, weather, time.
    Informational,
    /// Congestion, rain expected.
    Advisory,
    /// Smoke detected, investigating. One operator must confirm.
    Warning,
    /// Fire confirmed, evacuate. Two distinct operators must confirm.
    Emergency,
    /// Government alert pass-through (already authorized upstream).
    Ipaws,
}

impl AlertTier {
    pub const ALL: [AlertTier; 5] = [
        Self::Informational,
        Self::Advisory,
        Self::Warning,
        Self::Emergency,
        Self::Ipaws,
    ];

    /// Wire name of the tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Informational => "informational",
            Self::Advisory => "advisory",
            Self::Warning => "warning",
            Self::Emergency => "emergency",
            Self::Ipaws => "ipaws",
        }
    }

    /// Whether a human operator must authorize display.
    pub fn requires_human(&self) -> bool {
        matches!(self, Self::Warning | Self::Emergency)
    }

    /// Whether authorizations must come from distinct operators.
    pub fn requires_multiparty(&self) -> bool {
        matches!(self, Self::Emergency)
    }

    pub fn min_authorizations(&self) -> usize {
        match self {
            Self::Emergency => 2,
            Self::Warning => 1,
            Self::Informational | Self::Advisory | Self::Ipaws => 0,
        }
    }

    /// Advisory end-to-end latency budget. Enforced by the issuing side, not
    /// by the edge.
    pub fn max_latency_seconds(&self) -> u64 {
        match self {
            Self::Informational => 1,
            Self::Advisory => 2,
            Self::Warning => 60,
            Self::Emergency => 120,
            Self::Ipaws => 5,
        }
    }

    pub fn default_ttl_seconds(&self) -> i64 {
        match self {
            Self::Informational => 300,
            Self::Advisory => 600,
            Self::Warning => 900,
            Self::Emergency => 1800,
            Self::Ipaws => 3600,
        }
    }
}

impl fmt::Display for AlertTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertTier {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tier| tier.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownTier(s.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Authorizations
// ---------------------------------------------------------------------------

/// How an operator expressed their authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Dashboard,
    Api,
    Auto,
    HardwareKey,
}

/// Record of one operator authorizing a message. Covered by the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub operator_id: String,
    #[serde(with = "rfc3339_micros")]
    pub timestamp: DateTime<Utc>,
    pub method: AuthMethod,
}

impl Authorization {
    /// An authorization stamped with the current time.
    pub fn new(operator_id: impl Into<String>, method: AuthMethod) -> Self {
        Self {
            operator_id: operator_id.into(),
            timestamp: now_micros(),
            method,
        }
    }
}

// ---------------------------------------------------------------------------
// Message content
// ---------------------------------------------------------------------------

/// Opaque content map carried by a [`SignedMessage`].
///
/// The map is kept exactly as the issuer produced it so that re-encoding on
/// the edge reproduces the signed bytes. Well-known keys are `template_id`,
/// `params`, and `text` (language code to string).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageContent(Map<String, Value>);

impl MessageContent {
    pub fn new(template_id: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert("template_id".into(), Value::String(template_id.into()));
        map.insert("params".into(), Value::Object(Map::new()));
        map.insert("text".into(), Value::Object(Map::new()));
        Self(map)
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Value::Object(params) = self
            .0
            .entry("params")
            .or_insert_with(|| Value::Object(Map::new()))
        {
            params.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_text(mut self, lang: impl Into<String>, text: impl Into<String>) -> Self {
        if let Value::Object(texts) = self
            .0
            .entry("text")
            .or_insert_with(|| Value::Object(Map::new()))
        {
            texts.insert(lang.into(), Value::String(text.into()));
        }
        self
    }

    pub fn template_id(&self) -> Option<&str> {
        self.0.get("template_id").and_then(Value::as_str)
    }

    pub fn params(&self) -> Option<&Map<String, Value>> {
        self.0.get("params").and_then(Value::as_object)
    }

    /// Localized strings, skipping any non-string entries.
    pub fn text(&self) -> BTreeMap<String, String> {
        self.0
            .get("text")
            .and_then(Value::as_object)
            .map(|texts| {
                texts
                    .iter()
                    .filter_map(|(lang, v)| v.as_str().map(|s| (lang.clone(), s.to_owned())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }
}

impl From<Map<String, Value>> for MessageContent {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ---------------------------------------------------------------------------
// Signed message
// ---------------------------------------------------------------------------

/// A display message as it travels from the issuing authority to the edge.
///
/// Every field except `signature` is covered by the signature through
/// [`SignedMessage::payload_for_signing`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedMessage {
    pub message_id: String,
    pub device_id: String,
    #[serde(with = "rfc3339_micros")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "rfc3339_micros")]
    pub expires: DateTime<Utc>,
    pub nonce: String,
    /// Wire tier string. Kept unparsed so an unknown tier reaches the gate
    /// and is rejected there.
    pub tier: String,
    pub content: MessageContent,
    #[serde(default)]
    pub authorizations: Vec<Authorization>,
    #[serde(default)]
    pub signature: Option<String>,
}

/// Borrowed view of the signed fields.
#[derive(Serialize)]
struct SigningPayload<'a> {
    message_id: &'a str,
    device_id: &'a str,
    timestamp: String,
    expires: String,
    nonce: &'a str,
    tier: &'a str,
    content: &'a MessageContent,
    authorizations: &'a [Authorization],
}

impl SignedMessage {
    /// Build an unsigned message valid for `ttl` from `timestamp`.
    ///
    /// Fails with [`SigngateError::Config`] if the expiry is not
    /// representable.
    #[allow(clippy::too_many_arguments)]
    pub fn unsigned(
        message_id: String,
        device_id: String,
        timestamp: DateTime<Utc>,
        ttl: Duration,
        nonce: String,
        tier: AlertTier,
        content: MessageContent,
        authorizations: Vec<Authorization>,
    ) -> crate::error::Result<Self> {
        let expires = timestamp
            .checked_add_signed(ttl)
            .ok_or_else(|| SigngateError::Config(format!("ttl out of range: {ttl}")))?;
        Ok(Self {
            message_id,
            device_id,
            timestamp,
            expires,
            nonce,
            tier: tier.as_str().to_owned(),
            content,
            authorizations,
            signature: None,
        })
    }

    /// Canonical bytes covered by the signature: sorted keys, no whitespace,
    /// `signature` excluded.
    pub fn payload_for_signing(&self) -> serde_json::Result<Vec<u8>> {
        canonical_json(&SigningPayload {
            message_id: &self.message_id,
            device_id: &self.device_id,
            timestamp: format_timestamp(&self.timestamp),
            expires: format_timestamp(&self.expires),
            nonce: &self.nonce,
            tier: &self.tier,
            content: &self.content,
            authorizations: &self.authorizations,
        })
    }

    /// Messages are valid strictly before `expires`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Parse the tier string into the closed tier set.
    pub fn alert_tier(&self) -> Result<AlertTier, ValidationError> {
        self.tier.parse()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
