//! SAML error types.
//!
//! Every error belongs to one [`ErrorCategory`]. Only transport failures are
//! retryable; the other categories abort the current message.

use std::fmt;

use fed_cache::CacheError;
use fed_crypto::CryptoError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{status_codes, sub_status_codes};

/// Result type for SAML operations.
pub type SamlResult<T> = Result<T, SamlError>;

/// Error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed or non-conformant XML or message field.
    Format,
    /// Signature verification failure, wrapping attempt or missing signature.
    Signature,
    /// InResponseTo mismatch or duplicate one-time-use assertion.
    Replay,
    /// Missing credentials, unknown encoding, unresolvable IdP.
    Configuration,
    /// Network failure or timeout during artifact resolution.
    Transport,
}

impl ErrorCategory {
    /// Returns the category name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Format => "format",
            Self::Signature => "signature",
            Self::Replay => "replay",
            Self::Configuration => "configuration",
            Self::Transport => "transport",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SAML protocol errors.
#[derive(Debug, Error)]
pub enum SamlError {
    // Format
    /// XML parsing error.
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    /// Missing required element.
    #[error("missing required element: {0}")]
    MissingElement(String),

    /// Missing required attribute.
    #[error("missing required attribute {attribute} on {element}")]
    MissingAttribute {
        /// Element name.
        element: String,
        /// Attribute name.
        attribute: String,
    },

    /// Invalid SAML request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid SAML response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Assertion violates a structural rule.
    #[error("invalid assertion: {0}")]
    InvalidAssertion(String),

    /// Unsupported SAML version.
    #[error("unsupported SAML version: {0}")]
    InvalidVersion(String),

    /// A field that must hold an absolute URI does not.
    #[error("{field} is not an absolute URI: {value:?}")]
    InvalidUri {
        /// Field name.
        field: String,
        /// Offending value.
        value: String,
    },

    /// Malformed timestamp.
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),

    /// Assertion is outside its NotOnOrAfter bound.
    #[error("assertion expired at {0}")]
    AssertionExpired(String),

    /// Assertion is before its NotBefore bound.
    #[error("assertion not valid before {0}")]
    AssertionNotYetValid(String),

    /// No configured audience satisfies an AudienceRestriction.
    #[error("audience restriction not satisfied: {0}")]
    AudienceRestriction(String),

    /// Issuer is not the expected entity.
    #[error("invalid issuer: expected {expected}, got {actual}")]
    InvalidIssuer {
        /// The expected issuer.
        expected: String,
        /// The actual issuer.
        actual: String,
    },

    /// Destination is not this endpoint.
    #[error("invalid destination: expected {expected}, got {actual}")]
    InvalidDestination {
        /// The expected destination URL.
        expected: String,
        /// The actual destination URL.
        actual: String,
    },

    /// Base64 decoding error.
    #[error("base64 decode error: {0}")]
    Base64Decode(String),

    /// Deflate compression or decompression error.
    #[error("deflate error: {0}")]
    Deflate(String),

    /// Malformed artifact.
    #[error("invalid artifact: {0}")]
    InvalidArtifact(String),

    /// Malformed metadata document.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Encrypted content could not be decrypted or parsed.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Peer returned a non-success status.
    #[error("status {code} returned{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    StatusNotSuccess {
        /// Top-level status code.
        code: String,
        /// Second-level status code.
        sub_code: Option<String>,
        /// Status message.
        message: Option<String>,
    },

    /// IdP declined a passive login request.
    #[error("passive login declined by identity provider")]
    PassiveDeclined,

    // Signature
    /// Signature did not verify.
    #[error("signature validation failed: {0}")]
    SignatureInvalid(String),

    /// Required signature is absent.
    #[error("signature missing: {0}")]
    SignatureMissing(String),

    /// Signature does not cover the element being trusted.
    #[error("signature reference mismatch: {0}")]
    SignatureWrapping(String),

    /// Signature creation failed.
    #[error("signature creation failed: {0}")]
    SignatureCreation(String),

    // Replay
    /// Response lacks InResponseTo.
    #[error("InResponseTo missing or empty")]
    MissingInResponseTo,

    /// InResponseTo does not match a pending request.
    #[error("InResponseTo {0:?} does not match a pending request")]
    InResponseToMismatch(String),

    /// OneTimeUse assertion already consumed.
    #[error("assertion {0} has already been used")]
    AssertionReplayed(String),

    // Configuration
    /// No identity provider could be selected.
    #[error("no identity provider selected")]
    NoIdentityProviderSelected,

    /// Identity provider not configured or not in metadata.
    #[error("unknown identity provider: {0}")]
    UnknownIdentityProvider(String),

    /// Unsupported binding.
    #[error("unsupported binding: {0}")]
    UnsupportedBinding(String),

    /// Unsupported algorithm.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Unknown text encoding.
    #[error("unknown encoding: {0}")]
    UnknownEncoding(String),

    /// Missing key or certificate.
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// No sign-on is recorded in the session.
    #[error("session has no active sign-on")]
    NotSignedOn,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Key or certificate material could not be used.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Store backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    // Transport
    /// Network failure during artifact resolution.
    #[error("transport error: {0}")]
    Transport(String),

    /// Artifact resolution timed out.
    #[error("artifact resolution timed out after {0} ms")]
    Timeout(u64),
}

impl SamlError {
    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::SignatureInvalid(_)
            | Self::SignatureMissing(_)
            | Self::SignatureWrapping(_)
            | Self::SignatureCreation(_) => ErrorCategory::Signature,
            Self::MissingInResponseTo | Self::InResponseToMismatch(_) | Self::AssertionReplayed(_) => {
                ErrorCategory::Replay
            }
            Self::NoIdentityProviderSelected
            | Self::UnknownIdentityProvider(_)
            | Self::UnsupportedBinding(_)
            | Self::UnsupportedAlgorithm(_)
            | Self::UnknownEncoding(_)
            | Self::MissingCredential(_)
            | Self::NotSignedOn
            | Self::Configuration(_)
            | Self::Crypto(_)
            | Self::Storage(_) => ErrorCategory::Configuration,
            Self::Transport(_) | Self::Timeout(_) => ErrorCategory::Transport,
            _ => ErrorCategory::Format,
        }
    }

    /// Returns true if the operation may be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Transport)
    }

    /// Returns the SAML status code used when reporting this error to a peer.
    #[must_use]
    pub const fn status_code(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Format | ErrorCategory::Signature | ErrorCategory::Replay => {
                status_codes::REQUESTER
            }
            ErrorCategory::Configuration | ErrorCategory::Transport => status_codes::RESPONDER,
        }
    }

    /// Returns a second-level status code if one applies.
    #[must_use]
    pub const fn sub_status_code(&self) -> Option<&'static str> {
        match self {
            Self::UnsupportedBinding(_) => Some(sub_status_codes::UNSUPPORTED_BINDING),
            Self::InvalidVersion(_) => Some(sub_status_codes::REQUEST_UNSUPPORTED),
            Self::UnknownIdentityProvider(_) => Some(sub_status_codes::UNKNOWN_PRINCIPAL),
            Self::SignatureInvalid(_) | Self::SignatureMissing(_) | Self::SignatureWrapping(_) => {
                Some(sub_status_codes::REQUEST_DENIED)
            }
            _ => None,
        }
    }

    /// Returns the HTTP status an adapter should answer with.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self.category() {
            ErrorCategory::Format => 400,
            ErrorCategory::Signature | ErrorCategory::Replay => 403,
            ErrorCategory::Configuration => 500,
            ErrorCategory::Transport => 502,
        }
    }
}

impl From<roxmltree::Error> for SamlError {
    fn from(err: roxmltree::Error) -> Self {
        Self::XmlParse(err.to_string())
    }
}

impl From<base64::DecodeError> for SamlError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Base64Decode(err.to_string())
    }
}

impl From<std::io::Error> for SamlError {
    fn from(err: std::io::Error) -> Self {
        Self::Deflate(err.to_string())
    }
}

impl From<CryptoError> for SamlError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Decryption(msg) => Self::Decryption(msg),
            CryptoError::Signing(msg) => Self::SignatureCreation(msg),
            CryptoError::UnsupportedAlgorithm(msg) => Self::UnsupportedAlgorithm(msg),
            other => Self::Crypto(other.to_string()),
        }
    }
}

impl From<CacheError> for SamlError {
    fn from(err: CacheError) -> Self {
        Self::Storage(err.to_string())
    }
}
