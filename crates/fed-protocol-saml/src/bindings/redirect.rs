//! HTTP-Redirect Binding implementation.
//!
//! Messages are raw-deflated, base64-encoded and percent-encoded into the
//! query string. A signature, when present, covers the exact query bytes
//!
//! ```text
//! SAMLRequest=<value>[&RelayState=<value>]&SigAlg=<value>
//! ```
//!
//! with every value in its transmitted (still percent-encoded) form, so the
//! receiver must verify against the raw parameters it was sent.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tracing::debug;

use super::{decode_component, encode_component, DecodedMessage, SamlMessageType, RELAY_STATE_PARAM};
use crate::error::{SamlError, SamlResult};
use crate::signature::{SignatureAlgorithm, XmlSignatureValidator, XmlSigner};

/// Upper bound for an inflated message.
const MAX_INFLATED_LEN: u64 = 2 * 1024 * 1024;

/// HTTP-Redirect binding encoder/decoder.
pub struct HttpRedirectBinding;

impl HttpRedirectBinding {
    /// Encodes an unsigned request as a query string.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails.
    pub fn encode_request(xml: &str, relay_state: Option<&str>) -> SamlResult<String> {
        Self::encode(xml, SamlMessageType::Request, relay_state, None)
    }

    /// Encodes an unsigned response as a query string.
    ///
    /// # Errors
    ///
    /// Returns an error if compression fails.
    pub fn encode_response(xml: &str, relay_state: Option<&str>) -> SamlResult<String> {
        Self::encode(xml, SamlMessageType::Response, relay_state, None)
    }

    /// Encodes a message as a query string, appending `SigAlg` and
    /// `Signature` when a signer is given.
    ///
    /// Request relay state is itself deflated and base64-encoded; response
    /// relay state is sent verbatim.
    ///
    /// # Errors
    ///
    /// Returns an error if compression or signing fails.
    pub fn encode(
        xml: &str,
        message_type: SamlMessageType,
        relay_state: Option<&str>,
        signer: Option<&XmlSigner>,
    ) -> SamlResult<String> {
        let payload = STANDARD.encode(deflate_compress(xml.as_bytes())?);

        let mut query = String::with_capacity(payload.len() + 256);
        query.push_str(message_type.form_param());
        query.push('=');
        query.push_str(&encode_component(&payload));

        if let Some(relay_state) = relay_state {
            let value = match message_type {
                SamlMessageType::Request => STANDARD.encode(deflate_compress(relay_state.as_bytes())?),
                SamlMessageType::Response => relay_state.to_string(),
            };
            query.push('&');
            query.push_str(RELAY_STATE_PARAM);
            query.push('=');
            query.push_str(&encode_component(&value));
        }

        if let Some(signer) = signer {
            query.push_str("&SigAlg=");
            query.push_str(&encode_component(signer.algorithm().uri()));
            let signature = STANDARD.encode(signer.sign_bytes(query.as_bytes())?);
            query.push_str("&Signature=");
            query.push_str(&encode_component(&signature));
            debug!(algorithm = %signer.algorithm().uri(), "signed redirect query");
        }

        Ok(query)
    }

    /// Appends a query string to a destination URL.
    #[must_use]
    pub fn build_url(destination: &str, query: &str) -> String {
        let separator = if destination.contains('?') { '&' } else { '?' };
        format!("{destination}{separator}{query}")
    }

    /// Parses a raw query string, keeping the transmitted parameter values.
    ///
    /// # Errors
    ///
    /// Returns an error if neither `SAMLRequest` nor `SAMLResponse` is present,
    /// or if both are.
    pub fn parse_query(query: &str) -> SamlResult<RedirectQuery> {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut message: Option<(SamlMessageType, String)> = None;
        let mut parsed = RedirectQuery::default();

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            if let Some(message_type) = SamlMessageType::from_param(name) {
                if message.is_some() {
                    return Err(SamlError::InvalidRequest(
                        "more than one SAML message parameter".to_string(),
                    ));
                }
                message = Some((message_type, value.to_string()));
                continue;
            }
            match name {
                RELAY_STATE_PARAM => parsed.relay_state = Some(value.to_string()),
                "SigAlg" => parsed.sig_alg = Some(value.to_string()),
                "Signature" => parsed.signature = Some(value.to_string()),
                _ => {}
            }
        }

        let (message_type, message) = message.ok_or_else(|| {
            SamlError::InvalidRequest("No SAMLRequest or SAMLResponse parameter".to_string())
        })?;
        parsed.message_type = message_type;
        parsed.message = message;
        Ok(parsed)
    }

    /// Parses the query component of a full redirect URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or carries no SAML message.
    pub fn parse_url(url: &str) -> SamlResult<RedirectQuery> {
        let url = url::Url::parse(url).map_err(|e| SamlError::InvalidRequest(format!("invalid URL: {e}")))?;
        Self::parse_query(url.query().unwrap_or_default())
    }

    /// Parses and decodes a query string without checking its signature.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or its payload is malformed.
    pub fn decode(query: &str) -> SamlResult<DecodedMessage> {
        Self::parse_query(query)?.decode()
    }
}

/// A received redirect query with its parameters as transmitted.
#[derive(Debug, Clone)]
pub struct RedirectQuery {
    message_type: SamlMessageType,
    message: String,
    relay_state: Option<String>,
    sig_alg: Option<String>,
    signature: Option<String>,
}

impl Default for RedirectQuery {
    fn default() -> Self {
        Self {
            message_type: SamlMessageType::Request,
            message: String::new(),
            relay_state: None,
            sig_alg: None,
            signature: None,
        }
    }
}

impl RedirectQuery {
    /// The message type carried by the query.
    #[must_use]
    pub const fn message_type(&self) -> SamlMessageType {
        self.message_type
    }

    /// Returns true if the query carries a `Signature` parameter.
    #[must_use]
    pub const fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Rebuilds the signed octets from the raw parameter values.
    #[must_use]
    pub fn signed_content(&self) -> String {
        let mut content = format!("{}={}", self.message_type.form_param(), self.message);
        if let Some(relay_state) = &self.relay_state {
            content.push('&');
            content.push_str(RELAY_STATE_PARAM);
            content.push('=');
            content.push_str(relay_state);
        }
        if let Some(sig_alg) = &self.sig_alg {
            content.push_str("&SigAlg=");
            content.push_str(sig_alg);
        }
        content
    }

    /// The declared signature algorithm, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the algorithm URI is not supported.
    pub fn signature_algorithm(&self) -> SamlResult<Option<SignatureAlgorithm>> {
        let Some(raw) = &self.sig_alg else {
            return Ok(None);
        };
        let uri = decode_component(raw)?;
        SignatureAlgorithm::from_uri(&uri)
            .map(Some)
            .ok_or_else(|| crate::signature::unsupported("signature method", &uri))
    }

    /// Verifies the query signature with the validator's keys.
    ///
    /// # Errors
    ///
    /// Returns `SignatureMissing` if the query is unsigned or has no `SigAlg`,
    /// and a signature error if verification fails.
    pub fn verify(&self, validator: &XmlSignatureValidator) -> SamlResult<()> {
        let signature = self
            .signature
            .as_deref()
            .ok_or_else(|| SamlError::SignatureMissing("redirect query is not signed".to_string()))?;
        let algorithm = self
            .signature_algorithm()?
            .ok_or_else(|| SamlError::SignatureMissing("redirect query has no SigAlg".to_string()))?;
        let signature = STANDARD.decode(decode_component(signature)?)?;
        validator.verify_detached(algorithm, self.signed_content().as_bytes(), &signature)?;
        debug!(algorithm = %algorithm.uri(), "verified redirect query signature");
        Ok(())
    }

    /// Decodes the message and relay state.
    ///
    /// Request relay state that is not deflate+base64 encoded is returned as
    /// received.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid base64, deflate or UTF-8.
    pub fn decode(&self) -> SamlResult<DecodedMessage> {
        let compressed = STANDARD.decode(decode_component(&self.message)?)?;
        let xml = String::from_utf8(deflate_decompress(&compressed)?)
            .map_err(|e| SamlError::InvalidRequest(format!("Invalid UTF-8 in message: {e}")))?;

        let relay_state = match &self.relay_state {
            None => None,
            Some(raw) => {
                let value = decode_component(raw)?;
                Some(match self.message_type {
                    SamlMessageType::Request => inflate_relay_state(&value).unwrap_or(value),
                    SamlMessageType::Response => value,
                })
            }
        };

        Ok(DecodedMessage {
            xml,
            message_type: self.message_type,
            relay_state,
        })
    }
}

fn inflate_relay_state(value: &str) -> Option<String> {
    let compressed = STANDARD.decode(value).ok()?;
    let inflated = deflate_decompress(&compressed).ok()?;
    String::from_utf8(inflated).ok()
}

/// Raw DEFLATE (RFC 1951) compression, without zlib framing.
fn deflate_compress(data: &[u8]) -> SamlResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| SamlError::Deflate(format!("Compression error: {e}")))?;
    encoder
        .finish()
        .map_err(|e| SamlError::Deflate(format!("Compression finish error: {e}")))
}

fn deflate_decompress(data: &[u8]) -> SamlResult<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data).take(MAX_INFLATED_LEN + 1);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| SamlError::Deflate(format!("Decompression error: {e}")))?;
    if decompressed.len() as u64 > MAX_INFLATED_LEN {
        return Err(SamlError::Deflate("inflated message too large".to_string()));
    }
    Ok(decompressed)
}
