//! Error hooks consulted at the engine boundary.
//!
//! Every error leaving [`SsoEngine`](super::SsoEngine) is logged with its
//! category, then offered to each configured hook in order. The first hook
//! answering [`HookDecision::Suppress`] turns the failure into a declined
//! outcome; otherwise the original error is returned unchanged.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SamlError;

/// Configured hook names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookKind {
    /// Records every failure at warn level.
    Audit,
    /// Treats a passive-login refusal as a normal outcome.
    SuppressPassiveDeclined,
}

impl HookKind {
    /// Parses a configuration name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "audit" => Some(Self::Audit),
            "suppress-passive-declined" => Some(Self::SuppressPassiveDeclined),
            _ => None,
        }
    }

    /// Instantiates the hook.
    #[must_use]
    pub fn build(self) -> Box<dyn ErrorHook> {
        match self {
            Self::Audit => Box::new(AuditHook),
            Self::SuppressPassiveDeclined => Box::new(SuppressPassiveDeclinedHook),
        }
    }
}

/// Engine operation in which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    /// Starting single sign-on.
    InitiateSso,
    /// Processing an authentication response.
    Response,
    /// Starting single logout.
    InitiateLogout,
    /// Processing a logout request or response.
    Logout,
    /// Answering an artifact resolution request.
    ArtifactResolve,
}

impl ErrorStage {
    /// Returns the stage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InitiateSso => "initiate_sso",
            Self::Response => "response",
            Self::InitiateLogout => "initiate_logout",
            Self::Logout => "logout",
            Self::ArtifactResolve => "artifact_resolve",
        }
    }
}

/// A hook's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookDecision {
    /// Return the error to the caller.
    Propagate,
    /// Swallow the error.
    Suppress,
}

/// Observes, and may suppress, errors at the engine boundary.
pub trait ErrorHook: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Inspects `error`.
    fn on_error(&self, stage: ErrorStage, error: &SamlError) -> HookDecision;
}

/// Logs every error with its category and SAML status code.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditHook;

impl ErrorHook for AuditHook {
    fn name(&self) -> &'static str {
        "audit"
    }

    fn on_error(&self, stage: ErrorStage, error: &SamlError) -> HookDecision {
        warn!(
            stage = stage.as_str(),
            category = %error.category(),
            status = error.status_code(),
            retryable = error.is_retryable(),
            error = %error,
            "SAML operation failed"
        );
        HookDecision::Propagate
    }
}

/// Suppresses [`SamlError::PassiveDeclined`] while processing responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuppressPassiveDeclinedHook;

impl ErrorHook for SuppressPassiveDeclinedHook {
    fn name(&self) -> &'static str {
        "suppress-passive-declined"
    }

    fn on_error(&self, stage: ErrorStage, error: &SamlError) -> HookDecision {
        if stage == ErrorStage::Response && matches!(error, SamlError::PassiveDeclined) {
            info!("passive login declined, continuing anonymously");
            return HookDecision::Suppress;
        }
        HookDecision::Propagate
    }
}

/// Runs `hooks` in order and returns the first suppression, if any.
pub(crate) fn consult(hooks: &[Box<dyn ErrorHook>], stage: ErrorStage, error: &SamlError) -> HookDecision {
    hooks
        .iter()
        .find(|hook| hook.on_error(stage, error) == HookDecision::Suppress)
        .map_or(HookDecision::Propagate, |hook| {
            info!(hook = hook.name(), stage = stage.as_str(), "error suppressed by hook");
            HookDecision::Suppress
        })
}
