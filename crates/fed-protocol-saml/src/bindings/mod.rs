//! SAML bindings implementation.
//!
//! This module implements the SAML 2.0 bindings for message transport:
//!
//! - **HTTP-Redirect Binding** - Messages are deflated, base64-encoded and
//!   URL-encoded into a query string, optionally signed over the query bytes
//! - **HTTP-POST Binding** - Messages are base64-encoded into an auto-submitting
//!   HTML form
//! - **HTTP-Artifact Binding** - A 44-byte artifact travels through the
//!   browser; the message itself is fetched over a SOAP back channel
//!
//! # Usage
//!
//! ```rust,ignore
//! use fed_protocol_saml::bindings::{HttpPostBinding, HttpRedirectBinding, SamlMessageType};
//!
//! // Query string for the Redirect binding, signed with the SP key
//! let query = HttpRedirectBinding::encode(&request_xml, SamlMessageType::Request, Some("state"), Some(&signer))?;
//! let url = HttpRedirectBinding::build_url("https://idp.example.com/sso", &query);
//!
//! // Auto-submitting form for the POST binding
//! let html = HttpPostBinding::encode_request(&request_xml, "https://idp.example.com/sso", Some("state"));
//! ```

mod artifact;
mod post;
mod redirect;
mod soap;

pub use artifact::*;
pub use post::*;
pub use redirect::*;
pub use soap::*;

use std::borrow::Cow;

use crate::error::{SamlError, SamlResult};

/// Name of the relay state parameter shared by all bindings.
pub const RELAY_STATE_PARAM: &str = "RelayState";

/// SAML message type for binding operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamlMessageType {
    /// Request message (`AuthnRequest`, `LogoutRequest`).
    Request,
    /// Response message (`Response`, `LogoutResponse`).
    Response,
}

impl SamlMessageType {
    /// Returns the form parameter name for this message type.
    #[must_use]
    pub const fn form_param(&self) -> &'static str {
        match self {
            Self::Request => "SAMLRequest",
            Self::Response => "SAMLResponse",
        }
    }

    /// Maps a parameter name back to the message type.
    #[must_use]
    pub fn from_param(name: &str) -> Option<Self> {
        match name {
            "SAMLRequest" => Some(Self::Request),
            "SAMLResponse" => Some(Self::Response),
            _ => None,
        }
    }
}

/// Decoded SAML binding message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    /// The decoded XML message.
    pub xml: String,
    /// The message type (request or response).
    pub message_type: SamlMessageType,
    /// The RelayState if present.
    pub relay_state: Option<String>,
}

/// Percent-encodes a query component. Escapes always use upper-case hex.
pub(crate) fn encode_component(value: &str) -> Cow<'_, str> {
    urlencoding::encode(value)
}

/// Decodes a percent-encoded query component.
pub(crate) fn decode_component(value: &str) -> SamlResult<String> {
    urlencoding::decode(value)
        .map(Cow::into_owned)
        .map_err(|e| SamlError::InvalidRequest(format!("invalid percent-encoding: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_params() {
        for mt in [SamlMessageType::Request, SamlMessageType::Response] {
            assert_eq!(SamlMessageType::from_param(mt.form_param()), Some(mt));
        }
        assert_eq!(SamlMessageType::from_param("SAMLart"), None);
    }

    #[test]
    fn percent_escapes_are_upper_case() {
        assert_eq!(encode_component("a/b+c=d"), "a%2Fb%2Bc%3Dd");
        assert_eq!(encode_component("http://x/é"), "http%3A%2F%2Fx%2F%C3%A9");
        assert_eq!(decode_component("a%2fb%2Bc").unwrap(), "a/b+c");
    }
}
