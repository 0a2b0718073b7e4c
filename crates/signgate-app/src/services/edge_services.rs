// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Central service layer — initialises every backend subsystem for one edge
// device from a `GateConfig` and exposes the operations the CLI needs.
//
// Nothing here bypasses the display engine: even locally issued messages are
// signed and then pushed through `SecureDisplayEngine::display`.

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use secrecy::SecretString;
use serde_json::{Map, Value, json};
use signgate_core::error::Result;
use signgate_core::{AlertTier, Authorization, GateConfig, MessageContent, SignedMessage};
use signgate_display::{ConsoleBackend, DisplayBackend, DisplayResult, SecureDisplayEngine};
use signgate_security::audit::{AuditEvent, AuditEventType, AuditLogger, ChainVerification};
use signgate_security::integrity::hash_canonical;
use signgate_security::keys::{KeyInfo, KeyManager};
use signgate_security::signing::MessageSigner;
use signgate_security::sinks::open_sink;
use signgate_security::storage::SoftwareKeyStore;
use signgate_security::tiers::{TierAuthorization, TierValidator, get_tier_for_detection};
use signgate_security::verify::MessageVerifier;
use tracing::{error, info, instrument, warn};

/// Everything one edge device runs, built once at startup.
pub struct EdgeServices {
    config: GateConfig,
    keys: Arc<KeyManager>,
    signer: MessageSigner,
    verifier: Arc<MessageVerifier>,
    audit: Arc<AuditLogger>,
    engine: SecureDisplayEngine,
}

impl EdgeServices {
    /// Initialise all services with the console display backend.
    pub fn init(config: GateConfig, password: SecretString) -> Result<Self> {
        Self::with_backend(config, password, Box::new(ConsoleBackend::default()))
    }

    /// Initialise all services, drawing on `backend`.
    ///
    /// Creates the data directory, opens (or creates) the key store and the
    /// audit sink, and records a `boot` event carrying the config hash.
    #[instrument(skip_all, fields(device_id = %config.device_id))]
    pub fn with_backend(
        config: GateConfig,
        password: SecretString,
        backend: Box<dyn DisplayBackend>,
    ) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        info!(path = %config.data_dir.display(), "initialising edge services");

        let store = SoftwareKeyStore::open(config.keys_dir(), password, config.kdf)?;
        let keys = Arc::new(KeyManager::new(Arc::new(store), &config.default_key_id)?);
        let signer = MessageSigner::new(Arc::clone(&keys));
        let verifier = Arc::new(MessageVerifier::new(
            config.device_id.clone(),
            keys.trusted_public_keys()?,
            config.replay_cache_capacity,
        ));

        let sink = open_sink(config.audit.sink, &config.audit_path())?;
        let audit = Arc::new(AuditLogger::open(&config.device_id, sink)?);

        let engine = SecureDisplayEngine::new(backend, Arc::clone(&verifier), Arc::clone(&audit))
            .with_tier_validator(TierValidator::new(config.allowed_operators.clone()))
            .with_audit_failure_policy(config.audit_failure_policy);

        let config_hash = hash_canonical(&config)?;
        audit.log_boot(env!("CARGO_PKG_VERSION"), &config_hash)?;
        info!(config_hash = %config_hash, "edge services initialised");

        Ok(Self {
            config,
            keys,
            signer,
            verifier,
            audit,
            engine,
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    // -- Display -------------------------------------------------------------

    /// Sign a message for this device with the current default key.
    /// `ttl_seconds` defaults to the tier's TTL.
    pub fn issue_message(
        &self,
        template_id: &str,
        tier: AlertTier,
        params: Map<String, Value>,
        text: BTreeMap<String, String>,
        ttl_seconds: Option<i64>,
        authorizations: Vec<Authorization>,
    ) -> Result<SignedMessage> {
        let mut content = MessageContent::new(template_id);
        for (key, value) in params {
            content = content.with_param(key, value);
        }
        for (lang, line) in text {
            content = content.with_text(lang, line);
        }
        self.signer.create_signed_message(
            &self.config.device_id,
            tier,
            content,
            ttl_seconds.unwrap_or_else(|| tier.default_ttl_seconds()),
            authorizations,
        )
    }

    /// Issue and display a message locally (development and demos).
    pub fn display_message(
        &self,
        template_id: &str,
        tier: AlertTier,
        params: Map<String, Value>,
        text: BTreeMap<String, String>,
        ttl_seconds: Option<i64>,
        authorizations: Vec<Authorization>,
    ) -> Result<DisplayResult> {
        let message =
            self.issue_message(template_id, tier, params, text, ttl_seconds, authorizations)?;
        Ok(self.display_signed_message(&message))
    }

    /// Display a message received from an issuing authority.
    pub fn display_signed_message(&self, message: &SignedMessage) -> DisplayResult {
        self.engine.display(message)
    }

    /// Parse a wire-format message and display it. Unparsable input never
    /// reaches the engine.
    pub fn display_signed_json(&self, json: &str) -> Result<DisplayResult> {
        let message = SignedMessage::from_json(json)?;
        Ok(self.engine.display(&message))
    }

    pub fn clear_display(&self) -> Result<bool> {
        self.engine.clear()
    }

    pub fn current_message(&self) -> Option<SignedMessage> {
        self.engine.current_message()
    }

    // -- Detection and authorization -----------------------------------------

    /// Classify a detection and record it. Returns the tier its alert
    /// should carry.
    pub fn process_detection(
        &self,
        detection_type: &str,
        confidence: f64,
        details: Value,
    ) -> Result<AlertTier> {
        let tier = get_tier_for_detection(detection_type, confidence);
        self.audit
            .log_detection(detection_type, confidence, details)?;
        info!(detection_type, confidence, tier = %tier, "detection processed");
        Ok(tier)
    }

    /// Open an authorization request for an alert at `tier`. Operators sign
    /// off on the returned value before the alert is issued.
    pub fn request_authorization(
        &self,
        tier: AlertTier,
        detection_type: &str,
        details: Value,
    ) -> Result<TierAuthorization> {
        let request = TierAuthorization::for_tier(tier);
        self.audit.log(
            AuditEventType::AuthorizationRequested,
            json!({
                "request_id": request.request_id.to_string(),
                "tier": tier.as_str(),
                "detection_type": detection_type,
                "required": request.required_count,
                "details": details,
            }),
            None,
        )?;
        info!(request_id = %request.request_id, tier = %tier, "authorization requested");
        Ok(request)
    }

    // -- Keys ----------------------------------------------------------------

    /// Rotate the signing key. The verifier keeps trusting the old key and
    /// starts trusting the new one.
    pub fn rotate_signing_key(&self, new_key_id: Option<&str>) -> Result<KeyInfo> {
        let old_key_id = self.keys.default_key_id();
        let info = self.keys.rotate_key(new_key_id)?;
        self.verifier.add_trusted_key(info.public_key.clone());
        self.audit.log(
            AuditEventType::KeyRotated,
            json!({ "old_key_id": old_key_id, "new_key_id": info.key_id }),
            None,
        )?;
        Ok(info)
    }

    pub fn list_keys(&self) -> Result<Vec<KeyInfo>> {
        self.keys.list_keys()
    }

    // -- Audit trail ---------------------------------------------------------

    pub fn verify_audit_chain(&self) -> Result<ChainVerification> {
        self.audit.verify_chain()
    }

    pub fn audit_entries(
        &self,
        since_sequence: u64,
        event_types: Option<&[AuditEventType]>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>> {
        self.audit.get_entries(since_sequence, event_types, limit)
    }

    /// The last `count` audit events, oldest first.
    pub fn audit_tail(&self, count: usize) -> Result<Vec<AuditEvent>> {
        let last = self.audit.last_sequence()?;
        self.audit_entries(last.saturating_sub(count as u64), None, count)
    }

    /// Take down whatever is shown and record the shutdown.
    pub fn shutdown(&self, reason: &str) -> Result<()> {
        if self.engine.current_message().is_some()
            && let Err(e) = self.engine.clear()
        {
            warn!(error = %e, "display could not be cleared on shutdown");
        }
        if let Err(e) = self
            .audit
            .log(AuditEventType::SystemShutdown, json!({ "reason": reason }), None)
        {
            error!(error = %e, "failed to record shutdown");
            return Err(e);
        }
        info!(reason, "edge services shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signgate_core::AuthMethod;
    use signgate_core::config::KdfParams;
    use signgate_core::error::SigngateError;
    use signgate_display::MessageState;
    use std::path::Path;
    use tempfile::TempDir;

    fn config(dir: &Path) -> GateConfig {
        let mut config = GateConfig::new("sign-1", dir);
        config.kdf = KdfParams {
            log_n: 4,
            r: 8,
            p: 1,
        };
        config
    }

    fn services(dir: &Path) -> EdgeServices {
        EdgeServices::with_backend(
            config(dir),
            SecretString::from("edge-test".to_owned()),
            Box::new(ConsoleBackend::with_writer(40, 8, Box::new(std::io::sink()))),
        )
        .unwrap()
    }

    fn english(line: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("en".to_owned(), line.to_owned())])
    }

    #[test]
    fn boot_records_config_hash() {
        let tmp = TempDir::new().unwrap();
        let svc = services(tmp.path());

        let boots = svc
            .audit_entries(0, Some(&[AuditEventType::SystemBoot]), 10)
            .unwrap();
        assert_eq!(boots.len(), 1);
        assert_eq!(
            boots[0].data["config_hash"],
            hash_canonical(svc.config()).unwrap()
        );
        assert!(tmp.path().join("keys").is_dir());
        assert!(svc.verify_audit_chain().unwrap().valid);
    }

    #[test]
    fn autonomous_and_authorized_messages() {
        let tmp = TempDir::new().unwrap();
        let svc = services(tmp.path());

        let shown = svc
            .display_message(
                "crowd-count",
                AlertTier::Informational,
                Map::from_iter([("count".to_owned(), json!(40))]),
                english("Crowd level: 40 people"),
                None,
                vec![],
            )
            .unwrap();
        assert!(shown.success());

        let blocked = svc
            .display_message(
                "smoke-detected",
                AlertTier::Warning,
                Map::new(),
                english("Smoke reported"),
                None,
                vec![],
            )
            .unwrap();
        assert_eq!(blocked.state, MessageState::Rejected);

        let mut request = svc
            .request_authorization(AlertTier::Warning, "smoke", json!({ "zone": "B" }))
            .unwrap();
        assert!(request.add_authorization("op-7", AuthMethod::Dashboard));
        assert!(request.is_satisfied());
        let approved = svc
            .display_message(
                "smoke-detected",
                AlertTier::Warning,
                Map::new(),
                english("Smoke reported"),
                None,
                request.into_authorizations(),
            )
            .unwrap();
        assert!(approved.success(), "{approved:?}");
        assert_eq!(
            svc.current_message().unwrap().message_id,
            approved.message_id
        );

        let requested = svc
            .audit_entries(0, Some(&[AuditEventType::AuthorizationRequested]), 10)
            .unwrap();
        assert_eq!(requested[0].data["required"], 1);
    }

    #[test]
    fn detections_are_classified_and_logged() {
        let tmp = TempDir::new().unwrap();
        let svc = services(tmp.path());

        assert_eq!(
            svc.process_detection("fire", 0.95, json!({})).unwrap(),
            AlertTier::Emergency
        );
        assert_eq!(
            svc.process_detection("crowd", 0.99, json!({ "count": 1200 }))
                .unwrap(),
            AlertTier::Informational
        );
        let detections = svc
            .audit_entries(0, Some(&[AuditEventType::Detection]), 10)
            .unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].data["detection_type"], "fire");
    }

    #[test]
    fn rotation_keeps_old_and_trusts_new() {
        let tmp = TempDir::new().unwrap();
        let svc = services(tmp.path());

        let before = svc
            .issue_message(
                "time-display",
                AlertTier::Informational,
                Map::new(),
                BTreeMap::new(),
                None,
                vec![],
            )
            .unwrap();
        let info = svc.rotate_signing_key(Some("k2")).unwrap();
        assert_eq!(info.key_id, "k2");
        assert_eq!(svc.list_keys().unwrap().len(), 2);

        let after = svc
            .issue_message(
                "time-display",
                AlertTier::Informational,
                Map::new(),
                BTreeMap::new(),
                None,
                vec![],
            )
            .unwrap();
        assert!(svc.display_signed_message(&after).success());
        assert!(svc.display_signed_message(&before).success());

        let rotated = svc
            .audit_entries(0, Some(&[AuditEventType::KeyRotated]), 10)
            .unwrap();
        assert_eq!(rotated[0].data["old_key_id"], "default");
        assert_eq!(rotated[0].data["new_key_id"], "k2");
    }

    #[test]
    fn wire_json_and_replay() {
        let tmp = TempDir::new().unwrap();
        let svc = services(tmp.path());

        let msg = svc
            .issue_message(
                "wayfinding",
                AlertTier::Informational,
                Map::new(),
                english("Exit via gate C"),
                Some(60),
                vec![],
            )
            .unwrap();
        let wire = msg.to_json().unwrap();
        assert!(svc.display_signed_json(&wire).unwrap().success());
        assert_eq!(
            svc.display_signed_json(&wire).unwrap().state,
            MessageState::Rejected
        );
        assert!(matches!(
            svc.display_signed_json("{\"message_id\": 1}"),
            Err(SigngateError::Serialization(_))
        ));
    }

    #[test]
    fn unrepresentable_ttl_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let svc = services(tmp.path());
        let result = svc.display_message(
            "crowd-count",
            AlertTier::Informational,
            Map::new(),
            BTreeMap::new(),
            Some(i64::MAX),
            vec![],
        );
        assert!(matches!(result, Err(SigngateError::Config(_))));
        assert!(svc.current_message().is_none());
    }

    #[test]
    fn restart_continues_chain() {
        let tmp = TempDir::new().unwrap();
        {
            let svc = services(tmp.path());
            svc.process_detection("weather", 0.5, json!({})).unwrap();
            svc.shutdown("maintenance").unwrap();
        }

        let svc = services(tmp.path());
        assert!(svc.verify_audit_chain().unwrap().valid);
        let tail = svc.audit_tail(2).unwrap();
        let names: Vec<&str> = tail.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(names, ["shutdown", "boot"]);
        assert_eq!(tail[1].sequence, 4);
        assert_eq!(svc.list_keys().unwrap().len(), 1);
    }

    #[test]
    fn shutdown_clears_display() {
        let tmp = TempDir::new().unwrap();
        let svc = services(tmp.path());
        svc.display_message(
            "event-info",
            AlertTier::Informational,
            Map::new(),
            english("Doors open at 7"),
            None,
            vec![],
        )
        .unwrap();

        svc.shutdown("power loss").unwrap();
        assert!(svc.current_message().is_none());
        let tail = svc.audit_tail(2).unwrap();
        assert_eq!(tail[0].event_type, "message_cleared");
        assert_eq!(tail[1].data["reason"], "power loss");
    }
}
