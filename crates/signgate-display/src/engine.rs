// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Secure display engine — the last line of defence.
//
// Pipeline for every message:
//   Received -> Verifying -> TierValidating -> Rendering -> Displayed
//                  |              |               |
//                  +--------------+-> Rejected    +-> RenderFailed
//
// Nothing reaches the backend unless every upstream check passed, and every
// outcome leaves an audit record.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use signgate_core::config::AuditFailurePolicy;
use signgate_core::{AlertTier, ProtocolError, SignedMessage, ValidationError};
use signgate_security::audit::{AuditEventType, AuditLogger};
use signgate_security::integrity::content_fingerprint;
use signgate_security::tiers::TierValidator;
use signgate_security::verify::MessageVerifier;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::traits::{BackendCapabilities, DisplayBackend};

/// Where a message is in the display pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Received,
    Verifying,
    TierValidating,
    Rendering,
    Displayed,
    Rejected,
    RenderFailed,
}

impl MessageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Displayed | Self::Rejected | Self::RenderFailed)
    }
}

/// Why a message was not displayed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisplayError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("audit log unavailable, refusing to display: {0}")]
    AuditUnavailable(String),

    #[error("render failed: {0}")]
    RenderFailed(String),
}

impl DisplayError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Protocol(e) => e.reason_code(),
            Self::Validation(e) => e.reason_code(),
            Self::AuditUnavailable(_) => "audit_unavailable",
            Self::RenderFailed(_) => "render_failed",
        }
    }
}

/// Outcome of [`SecureDisplayEngine::display`].
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayResult {
    pub message_id: String,
    /// Terminal state reached.
    pub state: MessageState,
    pub displayed_at: Option<DateTime<Utc>>,
    pub error: Option<DisplayError>,
}

impl DisplayResult {
    pub fn success(&self) -> bool {
        self.state == MessageState::Displayed
    }

    fn failed(message: &SignedMessage, state: MessageState, error: DisplayError) -> Self {
        Self {
            message_id: message.message_id.clone(),
            state,
            displayed_at: None,
            error: Some(error),
        }
    }
}

/// Called after a message is shown. Errors are logged and ignored.
pub type DisplayHook = Box<dyn Fn(&SignedMessage) -> Result<(), String> + Send + Sync>;
/// Called after a message is rejected. Errors are logged and ignored.
pub type RejectHook =
    Box<dyn Fn(&SignedMessage, &DisplayError) -> Result<(), String> + Send + Sync>;

/// Gatekeeper between incoming messages and the display backend.
pub struct SecureDisplayEngine {
    backend: Mutex<Box<dyn DisplayBackend>>,
    verifier: Arc<MessageVerifier>,
    audit: Arc<AuditLogger>,
    validator: TierValidator,
    audit_failure_policy: AuditFailurePolicy,
    current: Mutex<Option<SignedMessage>>,
    on_display: Option<DisplayHook>,
    on_reject: Option<RejectHook>,
}

// Backend and current-message guards hold no invariants a panic could break.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SecureDisplayEngine {
    pub fn new(
        backend: Box<dyn DisplayBackend>,
        verifier: Arc<MessageVerifier>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            backend: Mutex::new(backend),
            verifier,
            audit,
            validator: TierValidator::default(),
            audit_failure_policy: AuditFailurePolicy::FailSafeHumanTiers,
            current: Mutex::new(None),
            on_display: None,
            on_reject: None,
        }
    }

    pub fn with_tier_validator(mut self, validator: TierValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_audit_failure_policy(mut self, policy: AuditFailurePolicy) -> Self {
        self.audit_failure_policy = policy;
        self
    }

    pub fn on_display(mut self, hook: DisplayHook) -> Self {
        self.on_display = Some(hook);
        self
    }

    pub fn on_reject(mut self, hook: RejectHook) -> Self {
        self.on_reject = Some(hook);
        self
    }

    pub fn device_id(&self) -> &str {
        self.verifier.device_id()
    }

    pub fn verifier(&self) -> &Arc<MessageVerifier> {
        &self.verifier
    }

    /// Run `message` through every check and, only if all pass, render it.
    #[instrument(skip_all, fields(message_id = %message.message_id, tier = %message.tier))]
    pub fn display(&self, message: &SignedMessage) -> DisplayResult {
        debug!(state = ?MessageState::Received, "message received");

        debug!(state = ?MessageState::Verifying, "verifying");
        if let Err(e) = self.verifier.verify(message) {
            self.audit_protocol_rejection(message, &e);
            return self.reject(message, e.into());
        }

        debug!(state = ?MessageState::TierValidating, "validating tier");
        let tier = match message.alert_tier() {
            Ok(t) => t,
            Err(e) => {
                error!(tier = %message.tier, "SECURITY: unknown tier");
                self.audit_best_effort(
                    self.audit.log_message_rejected(&message.message_id, e.reason_code()),
                );
                return self.reject(message, e.into());
            }
        };

        let template_id = message.content.template_id().unwrap_or_default();
        if let Err(e) = self
            .validator
            .validate(tier, template_id, &message.authorizations)
        {
            error!(error = %e, "SECURITY: tier validation failed");
            self.audit_best_effort(self.audit.log(
                AuditEventType::AuthorizationDenied,
                json!({
                    "message_id": message.message_id,
                    "tier": tier.as_str(),
                    "reason": e.to_string(),
                }),
                None,
            ));
            return self.reject(message, e.into());
        }

        if tier.requires_human()
            && let Err(e) = self.record_authorization(message, tier)
        {
            return self.reject(message, e);
        }

        let content_hash = match content_fingerprint(&message.content) {
            Ok(h) => h,
            Err(e) => return self.render_failed(message, format!("content not encodable: {e}")),
        };

        debug!(state = ?MessageState::Rendering, "rendering");
        let mut backend = lock(&self.backend);
        match backend.render(&message.content) {
            Ok(true) => {}
            Ok(false) => return self.render_failed(message, "backend reported failure".into()),
            Err(e) => return self.render_failed(message, e.to_string()),
        }

        let displayed_at = Utc::now();
        if let Err(e) = self
            .audit
            .log_message_displayed(&message.message_id, tier.as_str(), &content_hash)
        {
            error!(error = %e, "message displayed but display record could not be written");
        }
        *lock(&self.current) = Some(message.clone());
        drop(backend);

        if let Some(hook) = &self.on_display
            && let Err(e) = hook(message)
        {
            error!(error = %e, "display hook failed");
        }

        info!(state = ?MessageState::Displayed, "message displayed");
        DisplayResult {
            message_id: message.message_id.clone(),
            state: MessageState::Displayed,
            displayed_at: Some(displayed_at),
            error: None,
        }
    }

    /// Record who authorized a human-tier message before it is shown.
    fn record_authorization(
        &self,
        message: &SignedMessage,
        tier: AlertTier,
    ) -> Result<(), DisplayError> {
        let operators: Vec<&str> = message
            .authorizations
            .iter()
            .map(|a| a.operator_id.as_str())
            .collect();
        let logged = self.audit.log(
            AuditEventType::AuthorizationGranted,
            json!({
                "message_id": message.message_id,
                "tier": tier.as_str(),
                "operators": operators,
            }),
            None,
        );

        match (logged, self.audit_failure_policy) {
            (Ok(_), _) => Ok(()),
            (Err(e), AuditFailurePolicy::FailSafeHumanTiers) => {
                error!(error = %e, "SECURITY: authorization record failed; refusing display");
                Err(DisplayError::AuditUnavailable(e.to_string()))
            }
            (Err(e), AuditFailurePolicy::FailAvailable) => {
                error!(error = %e, "authorization record failed; displaying anyway");
                Ok(())
            }
        }
    }

    fn audit_protocol_rejection(&self, message: &SignedMessage, e: &ProtocolError) {
        let id = &message.message_id;
        let logged = match e {
            ProtocolError::DeviceMismatch { .. } | ProtocolError::Expired { .. } => {
                warn!(error = %e, "message rejected");
                self.audit.log_message_rejected(id, e.reason_code())
            }
            ProtocolError::ReplayDetected { .. } => {
                error!(error = %e, "SECURITY: replay attack detected");
                self.audit.log(
                    AuditEventType::ReplayDetected,
                    json!({ "message_id": id, "nonce": message.nonce }),
                    None,
                )
            }
            ProtocolError::SignatureInvalid { .. } | ProtocolError::MalformedSignature(_) => {
                error!(error = %e, "SECURITY: signature verification failed");
                self.audit.log_signature_invalid(id, &e.to_string())
            }
        };
        self.audit_best_effort(logged);
    }

    // The rejection stands whether or not it could be recorded.
    fn audit_best_effort<T>(&self, logged: signgate_core::error::Result<T>) {
        if let Err(e) = logged {
            error!(error = %e, "failed to record rejection");
        }
    }

    fn reject(&self, message: &SignedMessage, error: DisplayError) -> DisplayResult {
        if let Some(hook) = &self.on_reject
            && let Err(e) = hook(message, &error)
        {
            error!(error = %e, "reject hook failed");
        }
        debug!(state = ?MessageState::Rejected, reason = error.reason_code(), "message rejected");
        DisplayResult::failed(message, MessageState::Rejected, error)
    }

    fn render_failed(&self, message: &SignedMessage, detail: String) -> DisplayResult {
        error!(detail = %detail, "render failed");
        self.audit_best_effort(
            self.audit
                .log_message_rejected(&message.message_id, "render_failed"),
        );
        DisplayResult::failed(
            message,
            MessageState::RenderFailed,
            DisplayError::RenderFailed(detail),
        )
    }

    /// Blank the display, recording which message was taken down.
    pub fn clear(&self) -> signgate_core::error::Result<bool> {
        let mut backend = lock(&self.backend);
        if let Some(previous) = lock(&self.current).take() {
            self.audit_best_effort(self.audit.log(
                AuditEventType::MessageCleared,
                json!({ "message_id": previous.message_id }),
                None,
            ));
            info!(message_id = %previous.message_id, "display cleared");
        }
        backend.clear()
    }

    pub fn current_message(&self) -> Option<SignedMessage> {
        lock(&self.current).clone()
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        lock(&self.backend).capabilities()
    }
}
