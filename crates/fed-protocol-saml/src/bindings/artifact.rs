//! HTTP-Artifact Binding implementation.
//!
//! The browser carries only a 44-byte artifact:
//!
//! ```text
//! [2B type code 0x0004][2B endpoint index][20B SHA-1 of source entity id][20B random handle]
//! ```
//!
//! The receiver exchanges it for the real message with an `ArtifactResolve`
//! sent over SOAP (see [`super::soap`]).

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use roxmltree::Node;
use serde::{Deserialize, Serialize};

use super::{decode_component, encode_component, RELAY_STATE_PARAM};
use crate::error::{SamlError, SamlResult};
use crate::types::{Issuer, Status, SAMLP_NS, SAML_NS, SAML_VERSION, XMLDSIG_NS};
use crate::xml;

/// Type code of SAML 2.0 artifacts.
pub const ARTIFACT_TYPE_CODE: u16 = 0x0004;

/// Length of a decoded artifact.
pub const ARTIFACT_LEN: usize = 44;

/// Query and form parameter carrying the artifact.
pub const ARTIFACT_PARAM: &str = "SAMLart";

/// A type 0x0004 SAML artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Artifact {
    /// Index of the issuer's artifact resolution endpoint.
    pub endpoint_index: u16,
    /// SHA-1 of the issuer's entity id.
    pub source_id: [u8; 20],
    /// Random handle naming the stored message.
    pub message_handle: [u8; 20],
}

impl Artifact {
    /// Creates an artifact with a fresh random handle.
    #[must_use]
    pub fn new(source_entity_id: &str, endpoint_index: u16) -> Self {
        let mut message_handle = [0u8; 20];
        message_handle.copy_from_slice(&fed_crypto::random_bytes(20));
        Self {
            endpoint_index,
            source_id: fed_crypto::sha1(source_entity_id.as_bytes()),
            message_handle,
        }
    }

    /// Parses the base64 text form.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::InvalidArtifact`] for bad base64, a decoded length
    /// other than 44 bytes, or an unknown type code.
    pub fn parse(encoded: &str) -> SamlResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| SamlError::InvalidArtifact(format!("not base64: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Parses the raw 44-byte form.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::InvalidArtifact`] for a wrong length or type code.
    pub fn from_bytes(bytes: &[u8]) -> SamlResult<Self> {
        if bytes.len() != ARTIFACT_LEN {
            return Err(SamlError::InvalidArtifact(format!(
                "expected {ARTIFACT_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let type_code = u16::from_be_bytes([bytes[0], bytes[1]]);
        if type_code != ARTIFACT_TYPE_CODE {
            return Err(SamlError::InvalidArtifact(format!("unsupported type code {type_code:#06x}")));
        }
        let mut source_id = [0u8; 20];
        source_id.copy_from_slice(&bytes[4..24]);
        let mut message_handle = [0u8; 20];
        message_handle.copy_from_slice(&bytes[24..44]);
        Ok(Self {
            endpoint_index: u16::from_be_bytes([bytes[2], bytes[3]]),
            source_id,
            message_handle,
        })
    }

    /// Returns the raw 44-byte form.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ARTIFACT_LEN] {
        let mut out = [0u8; ARTIFACT_LEN];
        out[..2].copy_from_slice(&ARTIFACT_TYPE_CODE.to_be_bytes());
        out[2..4].copy_from_slice(&self.endpoint_index.to_be_bytes());
        out[4..24].copy_from_slice(&self.source_id);
        out[24..].copy_from_slice(&self.message_handle);
        out
    }

    /// Returns the base64 text form.
    #[must_use]
    pub fn encode(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    /// Returns true if the artifact was issued by `entity_id`.
    #[must_use]
    pub fn is_from(&self, entity_id: &str) -> bool {
        self.source_id == fed_crypto::sha1(entity_id.as_bytes())
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// An artifact as received from the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedArtifact {
    /// The artifact.
    pub artifact: Artifact,
    /// The RelayState if present.
    pub relay_state: Option<String>,
}

/// HTTP-Artifact binding encoder/decoder.
pub struct HttpArtifactBinding;

impl HttpArtifactBinding {
    /// Encodes the artifact and relay state as a query string.
    #[must_use]
    pub fn encode_query(artifact: &Artifact, relay_state: Option<&str>) -> String {
        let mut query = format!("{ARTIFACT_PARAM}={}", encode_component(&artifact.encode()));
        if let Some(relay_state) = relay_state {
            query.push('&');
            query.push_str(RELAY_STATE_PARAM);
            query.push('=');
            query.push_str(&encode_component(relay_state));
        }
        query
    }

    /// Builds the redirect URL carrying the artifact.
    #[must_use]
    pub fn build_url(destination: &str, artifact: &Artifact, relay_state: Option<&str>) -> String {
        super::HttpRedirectBinding::build_url(destination, &Self::encode_query(artifact, relay_state))
    }

    /// Parses a query string carrying `SAMLart`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameter is missing or the artifact is invalid.
    pub fn parse_query(query: &str) -> SamlResult<ReceivedArtifact> {
        let query = query.strip_prefix('?').unwrap_or(query);
        let mut artifact = None;
        let mut relay_state = None;
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            match name {
                ARTIFACT_PARAM => artifact = Some(decode_component(value)?),
                RELAY_STATE_PARAM => relay_state = Some(decode_component(value)?),
                _ => {}
            }
        }
        Self::received(artifact, relay_state)
    }

    /// Parses a form body carrying `SAMLart`.
    ///
    /// # Errors
    ///
    /// Returns an error if the field is missing or the artifact is invalid.
    pub fn parse_form(body: &[u8]) -> SamlResult<ReceivedArtifact> {
        let mut artifact = None;
        let mut relay_state = None;
        for (name, value) in url::form_urlencoded::parse(body) {
            match name.as_ref() {
                ARTIFACT_PARAM => artifact = Some(value.into_owned()),
                RELAY_STATE_PARAM => relay_state = Some(value.into_owned()),
                _ => {}
            }
        }
        Self::received(artifact, relay_state)
    }

    fn received(artifact: Option<String>, relay_state: Option<String>) -> SamlResult<ReceivedArtifact> {
        let artifact = artifact.ok_or_else(|| SamlError::InvalidRequest(format!("No {ARTIFACT_PARAM} parameter")))?;
        Ok(ReceivedArtifact {
            artifact: Artifact::parse(&artifact)?,
            relay_state,
        })
    }
}

/// `samlp:ArtifactResolve` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactResolve {
    /// Unique identifier for this request.
    pub id: String,
    /// Timestamp when this request was issued.
    pub issue_instant: DateTime<Utc>,
    /// The requester.
    pub issuer: Issuer,
    /// The resolution endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Base64 artifact to resolve.
    pub artifact: String,
}

impl ArtifactResolve {
    /// Creates a request with a fresh ID.
    #[must_use]
    pub fn new(issuer: impl Into<String>, artifact: &Artifact) -> Self {
        Self {
            id: fed_crypto::generate_xml_id(),
            issue_instant: Utc::now(),
            issuer: Issuer::new(issuer),
            destination: None,
            artifact: artifact.encode(),
        }
    }

    /// Sets the destination.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Parses an `ArtifactResolve` document.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed XML or missing required fields.
    pub fn parse(xml_text: &str) -> SamlResult<Self> {
        let doc = xml::parse(xml_text)?;
        Self::from_node(doc.root_element())
    }

    /// Parses a `samlp:ArtifactResolve` element.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not an `ArtifactResolve` or lacks a
    /// required field.
    pub fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        if !xml::is_element(node, SAMLP_NS, "ArtifactResolve") {
            return Err(SamlError::InvalidRequest(format!(
                "expected samlp:ArtifactResolve, found {}",
                node.tag_name().name()
            )));
        }
        check_version(node)?;
        Ok(Self {
            id: xml::required_attr(node, "ID")?.to_string(),
            issue_instant: xml::parse_instant(xml::required_attr(node, "IssueInstant")?)?,
            issuer: Issuer::from_parent(node)
                .ok_or_else(|| SamlError::MissingElement("Issuer in ArtifactResolve".to_string()))?,
            destination: node.attribute("Destination").map(String::from),
            artifact: xml::compact_text(xml::required_child(node, SAMLP_NS, "Artifact")?),
        })
    }

    /// Serializes the request.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(512);
        out.push_str("<samlp:ArtifactResolve xmlns:samlp=\"");
        out.push_str(SAMLP_NS);
        out.push_str("\" xmlns:saml=\"");
        out.push_str(SAML_NS);
        out.push('"');
        xml::push_attr(&mut out, "ID", Some(&self.id));
        xml::push_attr(&mut out, "Version", Some(SAML_VERSION));
        xml::push_attr(&mut out, "IssueInstant", Some(&xml::format_instant(self.issue_instant)));
        xml::push_attr(&mut out, "Destination", self.destination.as_deref());
        out.push('>');
        self.issuer.write_xml(&mut out);
        xml::push_text_element(&mut out, "samlp:Artifact", &self.artifact);
        out.push_str("</samlp:ArtifactResolve>");
        out
    }
}

/// `samlp:ArtifactResponse` answering an [`ArtifactResolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactResponse {
    /// Unique identifier for this response.
    pub id: String,
    /// Timestamp when this response was issued.
    pub issue_instant: DateTime<Utc>,
    /// The responder.
    pub issuer: Issuer,
    /// ID of the `ArtifactResolve` this answers.
    pub in_response_to: String,
    /// Outcome of the resolution.
    pub status: Status,
    /// The resolved protocol message, standalone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ArtifactResponse {
    /// Creates a successful response carrying `message`.
    #[must_use]
    pub fn success(issuer: impl Into<String>, in_response_to: impl Into<String>, message: Option<String>) -> Self {
        Self {
            id: fed_crypto::generate_xml_id(),
            issue_instant: Utc::now(),
            issuer: Issuer::new(issuer),
            in_response_to: in_response_to.into(),
            status: Status::success(),
            message,
        }
    }

    /// Returns the resolved message after checking the status is Success.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-success status or an empty response.
    pub fn into_message(self) -> SamlResult<String> {
        self.status.ensure_success()?;
        self.message
            .ok_or_else(|| SamlError::InvalidArtifact("artifact resolved to no message".to_string()))
    }

    /// Parses an `ArtifactResponse` document.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed XML or missing required fields.
    pub fn parse(xml_text: &str) -> SamlResult<Self> {
        let doc = xml::parse(xml_text)?;
        Self::from_node(doc.root_element())
    }

    /// Parses a `samlp:ArtifactResponse` element.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not an `ArtifactResponse` or lacks a
    /// required field.
    pub fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        if !xml::is_element(node, SAMLP_NS, "ArtifactResponse") {
            return Err(SamlError::InvalidResponse(format!(
                "expected samlp:ArtifactResponse, found {}",
                node.tag_name().name()
            )));
        }
        check_version(node)?;
        let message = xml::child_elements(node)
            .find(|n| {
                !xml::is_element(*n, SAML_NS, "Issuer")
                    && !xml::is_element(*n, XMLDSIG_NS, "Signature")
                    && !xml::is_element(*n, SAMLP_NS, "Extensions")
                    && !xml::is_element(*n, SAMLP_NS, "Status")
            })
            .map(xml::standalone_text);
        Ok(Self {
            id: xml::required_attr(node, "ID")?.to_string(),
            issue_instant: xml::parse_instant(xml::required_attr(node, "IssueInstant")?)?,
            issuer: Issuer::from_parent(node)
                .ok_or_else(|| SamlError::MissingElement("Issuer in ArtifactResponse".to_string()))?,
            in_response_to: xml::required_attr(node, "InResponseTo")?.to_string(),
            status: Status::from_node(xml::required_child(node, SAMLP_NS, "Status")?)?,
            message,
        })
    }

    /// Serializes the response.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(1024 + self.message.as_ref().map_or(0, String::len));
        out.push_str("<samlp:ArtifactResponse xmlns:samlp=\"");
        out.push_str(SAMLP_NS);
        out.push_str("\" xmlns:saml=\"");
        out.push_str(SAML_NS);
        out.push('"');
        xml::push_attr(&mut out, "ID", Some(&self.id));
        xml::push_attr(&mut out, "Version", Some(SAML_VERSION));
        xml::push_attr(&mut out, "IssueInstant", Some(&xml::format_instant(self.issue_instant)));
        xml::push_attr(&mut out, "InResponseTo", Some(&self.in_response_to));
        out.push('>');
        self.issuer.write_xml(&mut out);
        self.status.write_xml(&mut out);
        if let Some(message) = &self.message {
            out.push_str(xml::strip_declaration(message));
        }
        out.push_str("</samlp:ArtifactResponse>");
        out
    }
}

fn check_version(node: Node<'_, '_>) -> SamlResult<()> {
    let version = xml::required_attr(node, "Version")?;
    if version == SAML_VERSION {
        Ok(())
    } else {
        Err(SamlError::InvalidVersion(version.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{status_codes, LogoutRequest, NameId};

    #[test]
    fn artifact_layout() {
        let artifact = Artifact::new("https://idp.example.com", 3);
        let bytes = artifact.to_bytes();
        assert_eq!(&bytes[..4], &[0x00, 0x04, 0x00, 0x03]);
        assert_eq!(&bytes[4..24], &fed_crypto::sha1(b"https://idp.example.com"));
        assert!(artifact.is_from("https://idp.example.com"));
        assert!(!artifact.is_from("https://other.example.com"));

        let parsed = Artifact::parse(&artifact.encode()).unwrap();
        assert_eq!(parsed, artifact);
        assert_ne!(Artifact::new("https://idp.example.com", 3), artifact);
    }

    #[test]
    fn wrong_length_is_invalid_artifact() {
        let short = STANDARD.encode([0u8; 43]);
        assert!(matches!(Artifact::parse(&short), Err(SamlError::InvalidArtifact(_))));
        let long = STANDARD.encode([0u8; 45]);
        assert!(matches!(Artifact::parse(&long), Err(SamlError::InvalidArtifact(_))));
        assert!(matches!(Artifact::parse("%%%"), Err(SamlError::InvalidArtifact(_))));
    }

    #[test]
    fn wrong_type_code_rejected() {
        let mut bytes = Artifact::new("urn:x", 0).to_bytes();
        bytes[1] = 0x02;
        assert!(matches!(Artifact::from_bytes(&bytes), Err(SamlError::InvalidArtifact(_))));
    }

    #[test]
    fn query_roundtrip() {
        let artifact = Artifact::new("https://sp.example.com", 0);
        let url = HttpArtifactBinding::build_url("https://idp.example.com/slo", &artifact, Some("a b"));
        let query = url.split_once('?').unwrap().1;
        assert!(query.starts_with("SAMLart="));
        let received = HttpArtifactBinding::parse_query(query).unwrap();
        assert_eq!(received.artifact, artifact);
        assert_eq!(received.relay_state.as_deref(), Some("a b"));
    }

    #[test]
    fn form_roundtrip() {
        let artifact = Artifact::new("https://sp.example.com", 1);
        let body = HttpArtifactBinding::encode_query(&artifact, Some("rs"));
        let received = HttpArtifactBinding::parse_form(body.as_bytes()).unwrap();
        assert_eq!(received.artifact, artifact);
        assert!(HttpArtifactBinding::parse_form(b"RelayState=x").is_err());
    }

    #[test]
    fn artifact_resolve_roundtrip() {
        let artifact = Artifact::new("https://idp.example.com", 0);
        let resolve = ArtifactResolve::new("https://sp.example.com", &artifact)
            .with_destination("https://idp.example.com/ars");
        let mut parsed = ArtifactResolve::parse(&resolve.to_xml()).unwrap();
        parsed.issue_instant = resolve.issue_instant;
        assert_eq!(parsed, resolve);
        assert_eq!(Artifact::parse(&parsed.artifact).unwrap(), artifact);
    }

    #[test]
    fn artifact_response_carries_message() {
        let logout = LogoutRequest::new("https://idp.example.com", NameId::email("u@example.com")).to_xml();
        let response = ArtifactResponse::success("https://idp.example.com", "_req1", Some(logout.clone()));
        let parsed = ArtifactResponse::parse(&response.to_xml()).unwrap();
        assert_eq!(parsed.in_response_to, "_req1");
        let message = parsed.into_message().unwrap();
        assert_eq!(LogoutRequest::parse(&message).unwrap().id, LogoutRequest::parse(&logout).unwrap().id);
    }

    #[test]
    fn embedded_message_gets_inherited_namespaces() {
        let xml = format!(
            r#"<samlp:ArtifactResponse xmlns:samlp="{SAMLP_NS}" xmlns:saml="{SAML_NS}" ID="r" Version="2.0" IssueInstant="2024-01-01T00:00:00Z" InResponseTo="q"><saml:Issuer>idp</saml:Issuer><samlp:Status><samlp:StatusCode Value="{}"/></samlp:Status><samlp:LogoutResponse ID="l" Version="2.0" IssueInstant="2024-01-01T00:00:00Z"><saml:Issuer>idp</saml:Issuer><samlp:Status><samlp:StatusCode Value="{}"/></samlp:Status></samlp:LogoutResponse></samlp:ArtifactResponse>"#,
            status_codes::SUCCESS,
            status_codes::SUCCESS
        );
        let message = ArtifactResponse::parse(&xml).unwrap().into_message().unwrap();
        assert!(crate::types::LogoutResponse::parse(&message).unwrap().is_success());
    }

    #[test]
    fn failed_resolution_reports_status() {
        let mut response = ArtifactResponse::success("idp", "q", None);
        response.status = Status::responder_error("gone");
        let err = ArtifactResponse::parse(&response.to_xml()).unwrap().into_message().unwrap_err();
        assert!(matches!(err, SamlError::StatusNotSuccess { .. }));
        assert!(ArtifactResponse::success("idp", "q", None).into_message().is_err());
    }
}
