//! Assertion conformance checks.
//!
//! [`AssertionValidator::validate`] enforces the structural rules of SAML 2.0
//! core and the audience restriction; [`AssertionValidator::validate_time_restrictions`]
//! checks the `Conditions` validity window and is callable on its own.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::{SamlError, SamlResult};
use crate::types::{Assertion, Condition, Conditions, Subject, SubjectConfirmationData, SAML_VERSION};
use crate::xml;

/// Minimum length of an assertion ID (128 bits of hex or base64 material).
pub const MIN_ID_LENGTH: usize = 16;

/// Source of the current time.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant, for tests and replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Validates assertions against an audience allow-list and a clock.
#[derive(Clone)]
pub struct AssertionValidator {
    allowed_audiences: Vec<String>,
    clock: Arc<dyn Clock>,
    skew: Duration,
}

impl fmt::Debug for AssertionValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssertionValidator")
            .field("allowed_audiences", &self.allowed_audiences)
            .field("skew", &self.skew)
            .finish_non_exhaustive()
    }
}

impl AssertionValidator {
    /// Creates a validator accepting the given audiences, using the system clock.
    #[must_use]
    pub fn new(allowed_audiences: Vec<String>) -> Self {
        Self {
            allowed_audiences,
            clock: Arc::new(SystemClock),
            skew: Duration::zero(),
        }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the tolerated clock skew.
    #[must_use]
    pub const fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    /// The configured audiences.
    #[must_use]
    pub fn allowed_audiences(&self) -> &[String] {
        &self.allowed_audiences
    }

    /// The current time according to the validator's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Runs every structural rule and the audience check.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule as a format error.
    pub fn validate(&self, assertion: &Assertion) -> SamlResult<()> {
        validate_header(assertion)?;
        let subject = assertion
            .subject
            .as_ref()
            .ok_or_else(|| SamlError::InvalidAssertion("assertion must contain a Subject".to_string()))?;
        validate_subject(subject)?;
        if let Some(conditions) = &assertion.conditions {
            validate_conditions(conditions)?;
            self.validate_audiences(conditions)?;
        }
        validate_statements(assertion)
    }

    /// Checks `Conditions/@NotBefore` and `@NotOnOrAfter` against the clock.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::AssertionNotYetValid`] or [`SamlError::AssertionExpired`].
    pub fn validate_time_restrictions(&self, assertion: &Assertion) -> SamlResult<()> {
        let Some(conditions) = &assertion.conditions else {
            return Ok(());
        };
        let now = self.clock.now();
        if let Some(not_before) = conditions.not_before {
            if not_before > now + self.skew {
                return Err(SamlError::AssertionNotYetValid(xml::format_instant(not_before)));
            }
        }
        if let Some(not_on_or_after) = conditions.not_on_or_after {
            if not_on_or_after < now - self.skew {
                return Err(SamlError::AssertionExpired(xml::format_instant(not_on_or_after)));
            }
        }
        Ok(())
    }

    /// Every restriction must name at least one allowed audience.
    fn validate_audiences(&self, conditions: &Conditions) -> SamlResult<()> {
        for audiences in conditions.audience_restrictions() {
            if self.allowed_audiences.is_empty() {
                return Err(SamlError::AudienceRestriction(
                    "no allowed audiences are configured".to_string(),
                ));
            }
            if !audiences.iter().any(|a| self.allowed_audiences.contains(a)) {
                return Err(SamlError::AudienceRestriction(format!(
                    "none of {audiences:?} is an allowed audience"
                )));
            }
        }
        Ok(())
    }
}

fn validate_header(assertion: &Assertion) -> SamlResult<()> {
    let id = assertion
        .id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| SamlError::InvalidAssertion("ID is required".to_string()))?;
    if id.len() < MIN_ID_LENGTH {
        return Err(SamlError::InvalidAssertion(format!(
            "ID {id:?} is shorter than {MIN_ID_LENGTH} characters"
        )));
    }
    if assertion.version != SAML_VERSION {
        return Err(SamlError::InvalidVersion(assertion.version.clone()));
    }
    if assertion.issue_instant.is_none() {
        return Err(SamlError::InvalidAssertion("IssueInstant is required".to_string()));
    }
    let issuer = assertion
        .issuer
        .as_ref()
        .filter(|i| !i.value.trim().is_empty())
        .ok_or_else(|| SamlError::InvalidAssertion("Issuer is required".to_string()))?;
    if let Some(format) = &issuer.format {
        xml::require_absolute_uri("Issuer/@Format", format)?;
    }
    Ok(())
}

fn validate_subject(subject: &Subject) -> SamlResult<()> {
    if subject.items.is_empty() {
        return Err(SamlError::InvalidAssertion(
            "Subject must contain an identifier or a SubjectConfirmation".to_string(),
        ));
    }
    if subject.identifier_count() > 1 {
        return Err(SamlError::InvalidAssertion(
            "Subject may contain only one of NameID and EncryptedID".to_string(),
        ));
    }
    if let Some(format) = subject.name_id().and_then(|n| n.format.as_deref()) {
        xml::require_absolute_uri("NameID/@Format", format)?;
    }
    for confirmation in subject.confirmations() {
        xml::require_absolute_uri("SubjectConfirmation/@Method", &confirmation.method)?;
        if let Some(data) = &confirmation.data {
            validate_confirmation_data(data)?;
        }
    }
    Ok(())
}

fn validate_confirmation_data(data: &SubjectConfirmationData) -> SamlResult<()> {
    let recipient = data.recipient.as_deref().ok_or_else(|| {
        SamlError::InvalidAssertion("SubjectConfirmationData/@Recipient is required".to_string())
    })?;
    xml::require_absolute_uri("SubjectConfirmationData/@Recipient", recipient)?;
    if let (Some(not_before), Some(not_on_or_after)) = (data.not_before, data.not_on_or_after) {
        if not_before >= not_on_or_after {
            return Err(SamlError::InvalidAssertion(
                "SubjectConfirmationData NotBefore must be earlier than NotOnOrAfter".to_string(),
            ));
        }
    }
    if let Some(key_infos) = &data.key_infos {
        if key_infos.is_empty() {
            return Err(SamlError::InvalidAssertion(
                "KeyInfoConfirmationData requires at least one KeyInfo".to_string(),
            ));
        }
        if key_infos.iter().any(|k| k.is_empty()) {
            return Err(SamlError::InvalidAssertion(
                "KeyInfo in KeyInfoConfirmationData must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_conditions(conditions: &Conditions) -> SamlResult<()> {
    if let (Some(not_before), Some(not_on_or_after)) = (conditions.not_before, conditions.not_on_or_after) {
        if not_before >= not_on_or_after {
            return Err(SamlError::InvalidAssertion(
                "Conditions NotBefore must be earlier than NotOnOrAfter".to_string(),
            ));
        }
    }

    let mut one_time_use = 0;
    let mut proxy_restrictions = 0;
    for condition in &conditions.items {
        match condition {
            Condition::OneTimeUse => one_time_use += 1,
            Condition::ProxyRestriction { count, audiences } => {
                proxy_restrictions += 1;
                if count.is_some_and(|c| c < 0) {
                    return Err(SamlError::InvalidAssertion(
                        "ProxyRestriction Count must be non-negative".to_string(),
                    ));
                }
                for audience in audiences {
                    xml::require_absolute_uri("ProxyRestriction/Audience", audience)?;
                }
            }
            Condition::AudienceRestriction(audiences) => {
                for audience in audiences {
                    xml::require_absolute_uri("AudienceRestriction/Audience", audience)?;
                }
            }
            Condition::Other(_) => {}
        }
    }
    if one_time_use > 1 {
        return Err(SamlError::InvalidAssertion(
            "Conditions may contain at most one OneTimeUse".to_string(),
        ));
    }
    if proxy_restrictions > 1 {
        return Err(SamlError::InvalidAssertion(
            "Conditions may contain at most one ProxyRestriction".to_string(),
        ));
    }
    Ok(())
}

fn validate_statements(assertion: &Assertion) -> SamlResult<()> {
    for statement in &assertion.statements {
        if let crate::types::Statement::Attribute(attributes) = statement {
            if attributes.attributes.is_empty() {
                return Err(SamlError::InvalidAssertion(
                    "AttributeStatement must contain an Attribute".to_string(),
                ));
            }
            if attributes.attributes.iter().any(|a| a.name.trim().is_empty()) {
                return Err(SamlError::InvalidAssertion("Attribute Name is required".to_string()));
            }
        }
    }
    Ok(())
}
