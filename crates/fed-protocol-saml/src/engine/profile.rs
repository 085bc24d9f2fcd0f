//! Assertion profiles run after structural validation.
//!
//! A profile is selected by [`ProfileKind`] in the engine configuration and
//! resolved once, when the engine is built.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SamlError, SamlResult};
use crate::types::{confirmation_methods, Assertion, SubjectConfirmationData};
use crate::xml;

/// Configured profile names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileKind {
    /// Web browser SSO bearer confirmation rules.
    Bearer,
    /// The assertion must carry an `AuthnStatement`.
    AuthnStatementRequired,
}

impl ProfileKind {
    /// Parses a configuration name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bearer" => Some(Self::Bearer),
            "authn-statement-required" => Some(Self::AuthnStatementRequired),
            _ => None,
        }
    }

    /// Instantiates the profile.
    #[must_use]
    pub fn build(self) -> Box<dyn AssertionProfile> {
        match self {
            Self::Bearer => Box::new(BearerProfile),
            Self::AuthnStatementRequired => Box::new(AuthnStatementRequiredProfile),
        }
    }
}

/// What a profile may check an assertion against.
#[derive(Debug, Clone, Copy)]
pub struct ProfileContext<'a> {
    /// ACS URL the assertion was delivered to.
    pub acs_url: &'a str,
    /// Request the response answered, if any.
    pub in_response_to: Option<&'a str>,
    /// Current time.
    pub now: DateTime<Utc>,
    /// Tolerated clock skew.
    pub skew: Duration,
}

/// Extra rules applied to an accepted assertion.
pub trait AssertionProfile: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Checks `assertion`.
    ///
    /// # Errors
    ///
    /// Returns the violated rule.
    fn check(&self, assertion: &Assertion, context: &ProfileContext<'_>) -> SamlResult<()>;
}

/// Requires a bearer `SubjectConfirmation` addressed to this ACS, still
/// valid, and bound to the answered request.
#[derive(Debug, Clone, Copy, Default)]
pub struct BearerProfile;

impl BearerProfile {
    fn check_data(data: &SubjectConfirmationData, context: &ProfileContext<'_>) -> SamlResult<()> {
        if data.recipient.as_deref() != Some(context.acs_url) {
            return Err(SamlError::InvalidDestination {
                expected: context.acs_url.to_string(),
                actual: data.recipient.clone().unwrap_or_default(),
            });
        }
        if data.not_before.is_some() {
            return Err(SamlError::InvalidAssertion(
                "bearer SubjectConfirmationData must not carry NotBefore".to_string(),
            ));
        }
        let not_on_or_after = data.not_on_or_after.ok_or_else(|| {
            SamlError::InvalidAssertion("bearer SubjectConfirmationData requires NotOnOrAfter".to_string())
        })?;
        if not_on_or_after <= context.now - context.skew {
            return Err(SamlError::AssertionExpired(xml::format_instant(not_on_or_after)));
        }
        match (data.in_response_to.as_deref(), context.in_response_to) {
            (Some(got), Some(expected)) if got != expected => Err(SamlError::InResponseToMismatch(got.to_string())),
            (Some(got), None) => Err(SamlError::InResponseToMismatch(got.to_string())),
            _ => Ok(()),
        }
    }
}

impl AssertionProfile for BearerProfile {
    fn name(&self) -> &'static str {
        "bearer"
    }

    fn check(&self, assertion: &Assertion, context: &ProfileContext<'_>) -> SamlResult<()> {
        let confirmations: Vec<_> = assertion
            .subject
            .iter()
            .flat_map(|s| s.confirmations())
            .filter(|c| c.method == confirmation_methods::BEARER)
            .collect();
        if confirmations.is_empty() {
            return Err(SamlError::InvalidAssertion("no bearer SubjectConfirmation".to_string()));
        }

        // One satisfied confirmation is enough; report the first failure otherwise.
        let mut first_error = None;
        for confirmation in confirmations {
            let Some(data) = &confirmation.data else {
                first_error.get_or_insert(SamlError::InvalidAssertion(
                    "bearer SubjectConfirmation has no SubjectConfirmationData".to_string(),
                ));
                continue;
            };
            match Self::check_data(data, context) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        Err(first_error.unwrap_or_else(|| SamlError::InvalidAssertion("no usable bearer confirmation".to_string())))
    }
}

/// Requires at least one `AuthnStatement`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthnStatementRequiredProfile;

impl AssertionProfile for AuthnStatementRequiredProfile {
    fn name(&self) -> &'static str {
        "authn-statement-required"
    }

    fn check(&self, assertion: &Assertion, _context: &ProfileContext<'_>) -> SamlResult<()> {
        if assertion.authn_statements().next().is_none() {
            return Err(SamlError::InvalidAssertion("assertion has no AuthnStatement".to_string()));
        }
        Ok(())
    }
}
