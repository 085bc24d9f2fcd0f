//! What the engine consumes from and hands back to the web layer.

use crate::bindings::{
    HttpArtifactBinding, HttpPostBinding, HttpRedirectBinding, ReceivedArtifact, RedirectQuery, ARTIFACT_PARAM,
};
use crate::error::{SamlError, SamlResult};
use crate::types::SamlBinding;

/// A protocol message as received by the web layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// HTTP-Redirect: the raw, still-encoded query string.
    Redirect {
        /// Query string, with or without the leading `?`.
        query: String,
    },
    /// HTTP-POST: the raw form body.
    Post {
        /// `application/x-www-form-urlencoded` body.
        body: Vec<u8>,
    },
    /// HTTP-Artifact: an artifact still to be resolved.
    Artifact(ReceivedArtifact),
}

impl InboundMessage {
    /// Classifies a raw request by method and parameters.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::UnsupportedBinding`] for methods other than GET
    /// and POST, or a format error for a malformed artifact.
    pub fn from_request(method: &str, query: &str, body: &[u8]) -> SamlResult<Self> {
        let query = query.strip_prefix('?').unwrap_or(query);
        if method.eq_ignore_ascii_case("GET") {
            if has_param(query.as_bytes(), ARTIFACT_PARAM) {
                return Ok(Self::Artifact(HttpArtifactBinding::parse_query(query)?));
            }
            return Ok(Self::Redirect {
                query: query.to_string(),
            });
        }
        if method.eq_ignore_ascii_case("POST") {
            if has_param(body, ARTIFACT_PARAM) {
                return Ok(Self::Artifact(HttpArtifactBinding::parse_form(body)?));
            }
            return Ok(Self::Post { body: body.to_vec() });
        }
        Err(SamlError::UnsupportedBinding(format!("HTTP method {method}")))
    }

    /// The binding the message arrived on.
    #[must_use]
    pub const fn binding(&self) -> SamlBinding {
        match self {
            Self::Redirect { .. } => SamlBinding::HttpRedirect,
            Self::Post { .. } => SamlBinding::HttpPost,
            Self::Artifact(_) => SamlBinding::HttpArtifact,
        }
    }
}

fn has_param(encoded: &[u8], name: &str) -> bool {
    url::form_urlencoded::parse(encoded).any(|(key, _)| key == name)
}

/// How the user agent must be sent on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Redirect to this URL (Redirect and Artifact bindings).
    Redirect(String),
    /// Serve this auto-submitting HTML form (POST binding).
    Form(String),
}

/// A message ready to leave through the user agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// ID of the protocol message.
    pub message_id: String,
    /// Binding used.
    pub binding: SamlBinding,
    /// Endpoint the message is addressed to.
    pub destination: String,
    /// What to send to the user agent.
    pub delivery: Delivery,
}

impl OutboundMessage {
    /// The redirect target, for Redirect and Artifact deliveries.
    #[must_use]
    pub fn redirect_url(&self) -> Option<&str> {
        match &self.delivery {
            Delivery::Redirect(url) => Some(url),
            Delivery::Form(_) => None,
        }
    }

    /// The HTML page, for POST deliveries.
    #[must_use]
    pub fn form_html(&self) -> Option<&str> {
        match &self.delivery {
            Delivery::Form(html) => Some(html),
            Delivery::Redirect(_) => None,
        }
    }
}

/// A decoded inbound message, with what is known about its authenticity.
#[derive(Debug)]
pub(crate) struct Received {
    pub xml: String,
    pub relay_state: Option<String>,
    pub binding: SamlBinding,
    /// Present for Redirect deliveries, whose signature covers the query.
    pub query: Option<RedirectQuery>,
    /// The enclosing `ArtifactResponse` carried a verified signature.
    pub envelope_verified: bool,
}

impl Received {
    /// Decodes Redirect and POST deliveries. Artifacts need resolution and
    /// are rejected here.
    pub(crate) fn decode_front_channel(inbound: &InboundMessage) -> SamlResult<Self> {
        match inbound {
            InboundMessage::Redirect { query } => {
                let query = HttpRedirectBinding::parse_query(query)?;
                let decoded = query.decode()?;
                Ok(Self {
                    xml: decoded.xml,
                    relay_state: decoded.relay_state,
                    binding: SamlBinding::HttpRedirect,
                    query: Some(query),
                    envelope_verified: false,
                })
            }
            InboundMessage::Post { body } => {
                let decoded = HttpPostBinding::decode_form(body)?;
                Ok(Self {
                    xml: decoded.xml,
                    relay_state: decoded.relay_state,
                    binding: SamlBinding::HttpPost,
                    query: None,
                    envelope_verified: false,
                })
            }
            InboundMessage::Artifact(_) => Err(SamlError::UnsupportedBinding(
                "artifact must be resolved before decoding".to_string(),
            )),
        }
    }
}
