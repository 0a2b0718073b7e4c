// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tier policy: which templates may be shown without a human, how detections
// map to tiers, and the authorization rules for human tiers.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use signgate_core::{AlertTier, AuthMethod, Authorization, ValidationError};
use tracing::{info, warn};
use uuid::Uuid;

/// Templates pre-approved for autonomous informational display.
pub const INFORMATIONAL_TEMPLATES: &[&str] = &[
    "crowd-count",
    "weather-current",
    "time-display",
    "event-info",
    "wayfinding",
];

/// Templates pre-approved for autonomous advisory display.
pub const ADVISORY_TEMPLATES: &[&str] = &[
    "area-congested",
    "weather-advisory",
    "event-starting",
    "event-ending",
    "alternate-route",
];

/// Allow-list for `tier`. Human tiers and IPAWS have none.
pub fn autonomous_templates(tier: AlertTier) -> &'static [&'static str] {
    match tier {
        AlertTier::Informational => INFORMATIONAL_TEMPLATES,
        AlertTier::Advisory => ADVISORY_TEMPLATES,
        AlertTier::Warning | AlertTier::Emergency | AlertTier::Ipaws => &[],
    }
}

/// Map a detection to the tier its alert should carry.
pub fn get_tier_for_detection(detection_type: &str, confidence: f64) -> AlertTier {
    match detection_type {
        "fire" | "active_shooter" | "explosion" => {
            if confidence >= 0.9 {
                AlertTier::Emergency
            } else if confidence >= 0.7 {
                AlertTier::Warning
            } else {
                AlertTier::Advisory
            }
        }
        "smoke" | "fight" | "medical_emergency" => {
            if confidence >= 0.85 {
                AlertTier::Warning
            } else {
                AlertTier::Advisory
            }
        }
        "crowd" | "congestion" | "weather" => AlertTier::Informational,
        _ => AlertTier::Advisory,
    }
}

/// Whether `template_id` may be displayed for `tier` with no human in the loop.
pub fn is_template_autonomous(tier: AlertTier, template_id: &str) -> bool {
    !tier.requires_human() && autonomous_templates(tier).contains(&template_id)
}

/// Guard for code paths that must not run without enough sign-off.
pub fn ensure_min_authorizations(
    tier: AlertTier,
    authorizations: &[Authorization],
) -> Result<(), ValidationError> {
    let required = tier.min_authorizations();
    if authorizations.len() < required {
        return Err(ValidationError::InsufficientAuthorizations {
            required,
            got: authorizations.len(),
        });
    }
    Ok(())
}

/// Checks a message's template and authorizations against its tier.
#[derive(Debug, Clone, Default)]
pub struct TierValidator {
    /// `None` allows any operator.
    allowed_operators: Option<HashSet<String>>,
}

impl TierValidator {
    pub fn new(allowed_operators: Option<Vec<String>>) -> Self {
        Self {
            allowed_operators: allowed_operators.map(|ops| ops.into_iter().collect()),
        }
    }

    pub fn validate(
        &self,
        tier: AlertTier,
        template_id: &str,
        authorizations: &[Authorization],
    ) -> Result<(), ValidationError> {
        if !tier.requires_human() {
            if is_template_autonomous(tier, template_id) {
                return Ok(());
            }
            return Err(ValidationError::TemplateNotAutonomous {
                template_id: template_id.to_owned(),
                tier: tier.as_str().to_owned(),
            });
        }

        ensure_min_authorizations(tier, authorizations)?;

        if let Some(allowed) = &self.allowed_operators
            && let Some(auth) = authorizations
                .iter()
                .find(|a| !allowed.contains(&a.operator_id))
        {
            return Err(ValidationError::UnauthorizedOperator(
                auth.operator_id.clone(),
            ));
        }

        if tier.requires_multiparty() {
            let mut seen = HashSet::new();
            if let Some(dup) = authorizations
                .iter()
                .find(|a| !seen.insert(a.operator_id.as_str()))
            {
                return Err(ValidationError::DuplicateOperator(dup.operator_id.clone()));
            }
        }

        Ok(())
    }
}

/// Collects operator sign-offs for one pending alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierAuthorization {
    pub request_id: Uuid,
    pub tier: AlertTier,
    pub required_count: usize,
    authorizations: Vec<Authorization>,
}

impl TierAuthorization {
    pub fn for_tier(tier: AlertTier) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            tier,
            required_count: tier.min_authorizations(),
            authorizations: Vec::new(),
        }
    }

    /// Record a sign-off. Returns `false` if this operator already signed.
    pub fn add_authorization(&mut self, operator_id: &str, method: AuthMethod) -> bool {
        if self
            .authorizations
            .iter()
            .any(|a| a.operator_id == operator_id)
        {
            warn!(request_id = %self.request_id, operator_id, "duplicate authorization ignored");
            return false;
        }
        self.authorizations
            .push(Authorization::new(operator_id, method));
        info!(
            request_id = %self.request_id,
            operator_id,
            have = self.authorizations.len(),
            need = self.required_count,
            "authorization added"
        );
        true
    }

    pub fn is_satisfied(&self) -> bool {
        self.authorizations.len() >= self.required_count
    }

    pub fn remaining(&self) -> usize {
        self.required_count.saturating_sub(self.authorizations.len())
    }

    pub fn authorizations(&self) -> &[Authorization] {
        &self.authorizations
    }

    /// Hand the collected sign-offs to the signer.
    pub fn into_authorizations(self) -> Vec<Authorization> {
        self.authorizations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auths(ops: &[&str]) -> Vec<Authorization> {
        ops.iter()
            .map(|op| Authorization::new(*op, AuthMethod::Dashboard))
            .collect()
    }

    #[test]
    fn autonomous_templates_pass_without_authorization() {
        let v = TierValidator::default();
        assert!(v.validate(AlertTier::Informational, "crowd-count", &[]).is_ok());
        assert!(v.validate(AlertTier::Advisory, "alternate-route", &[]).is_ok());

        let err = v
            .validate(AlertTier::Informational, "custom-unlisted", &[])
            .unwrap_err();
        assert!(err.to_string().contains("not approved"));

        // Advisory templates are not informational templates.
        assert!(v.validate(AlertTier::Informational, "area-congested", &[]).is_err());
    }

    #[test]
    fn ipaws_has_no_autonomous_templates() {
        let v = TierValidator::default();
        assert!(matches!(
            v.validate(AlertTier::Ipaws, "crowd-count", &[]),
            Err(ValidationError::TemplateNotAutonomous { .. })
        ));
    }

    #[test]
    fn warning_needs_one_operator() {
        let v = TierValidator::default();
        assert_eq!(
            v.validate(AlertTier::Warning, "smoke-detected", &[]),
            Err(ValidationError::InsufficientAuthorizations {
                required: 1,
                got: 0
            })
        );
        assert!(v.validate(AlertTier::Warning, "smoke-detected", &auths(&["op1"])).is_ok());
    }

    #[test]
    fn emergency_needs_two_distinct_operators() {
        let v = TierValidator::default();
        let err = v
            .validate(AlertTier::Emergency, "fire-evacuation", &auths(&["op1", "op1"]))
            .unwrap_err();
        assert!(err.to_string().contains("different operators"));

        assert!(v
            .validate(AlertTier::Emergency, "fire-evacuation", &auths(&["op1", "op2"]))
            .is_ok());
        assert!(matches!(
            v.validate(AlertTier::Emergency, "fire-evacuation", &auths(&["op1"])),
            Err(ValidationError::InsufficientAuthorizations { .. })
        ));
    }

    #[test]
    fn operator_allow_list() {
        let v = TierValidator::new(Some(vec!["op1".into(), "op2".into()]));
        assert!(v.validate(AlertTier::Warning, "x", &auths(&["op2"])).is_ok());
        assert_eq!(
            v.validate(AlertTier::Emergency, "x", &auths(&["op1", "mallory"])),
            Err(ValidationError::UnauthorizedOperator("mallory".into()))
        );
    }

    #[test]
    fn detection_mapping() {
        assert_eq!(get_tier_for_detection("fire", 0.95), AlertTier::Emergency);
        assert_eq!(get_tier_for_detection("fire", 0.75), AlertTier::Warning);
        assert_eq!(get_tier_for_detection("explosion", 0.5), AlertTier::Advisory);
        assert_eq!(get_tier_for_detection("smoke", 0.9), AlertTier::Warning);
        assert_eq!(get_tier_for_detection("fight", 0.84), AlertTier::Advisory);
        assert_eq!(get_tier_for_detection("crowd", 0.99), AlertTier::Informational);
        assert_eq!(get_tier_for_detection("weather", 0.1), AlertTier::Informational);
        assert_eq!(get_tier_for_detection("ufo", 1.0), AlertTier::Advisory);
    }

    #[test]
    fn human_tiers_are_never_autonomous() {
        for tier in [AlertTier::Warning, AlertTier::Emergency] {
            for template in INFORMATIONAL_TEMPLATES.iter().chain(ADVISORY_TEMPLATES) {
                assert!(!is_template_autonomous(tier, template));
            }
        }
    }

    #[test]
    fn authorization_collection() {
        let mut req = TierAuthorization::for_tier(AlertTier::Emergency);
        assert_eq!(req.required_count, 2);
        assert_eq!(req.remaining(), 2);

        assert!(req.add_authorization("op1", AuthMethod::Dashboard));
        assert!(!req.add_authorization("op1", AuthMethod::HardwareKey));
        assert!(!req.is_satisfied());
        assert!(req.add_authorization("op2", AuthMethod::Api));
        assert!(req.is_satisfied());
        assert_eq!(req.remaining(), 0);

        let collected = req.clone().into_authorizations();
        assert!(TierValidator::default()
            .validate(AlertTier::Emergency, "fire-evacuation", &collected)
            .is_ok());
        assert_eq!(collected, req.authorizations());
    }

    #[test]
    fn autonomous_request_is_satisfied_immediately() {
        let req = TierAuthorization::for_tier(AlertTier::Informational);
        assert!(req.is_satisfied());
        assert_eq!(req.remaining(), 0);
        assert!(ensure_min_authorizations(AlertTier::Informational, &[]).is_ok());
        assert!(ensure_min_authorizations(AlertTier::Warning, &[]).is_err());
    }
}
