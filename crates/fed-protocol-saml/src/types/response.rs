//! SAML Response.
//!
//! Response messages sent by an identity provider to a service provider.

use chrono::{DateTime, Utc};
use roxmltree::Node;
use serde::{Deserialize, Serialize};

use super::{Assertion, Issuer, Status, SAMLP_NS, SAML_NS, SAML_VERSION};
use crate::error::{SamlError, SamlResult};
use crate::xml;

/// SAML Response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Unique identifier for this response.
    pub id: String,

    /// Protocol version.
    pub version: String,

    /// Timestamp when this response was issued.
    pub issue_instant: DateTime<Utc>,

    /// The identity provider that issued this response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<Issuer>,

    /// The ID of the request this response answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<String>,

    /// The endpoint this response was sent to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// Outcome.
    pub status: Status,

    /// Plaintext assertions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertions: Vec<Assertion>,

    /// Serialized `saml:EncryptedAssertion` elements.
    ///
    /// When parsed, each element carries the namespace declarations it
    /// inherited, so it can be decrypted on its own.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encrypted_assertions: Vec<String>,
}

impl Response {
    /// Creates a successful response with a fresh ID.
    #[must_use]
    pub fn success(issuer: impl Into<String>) -> Self {
        Self::with_status(issuer, Status::success())
    }

    /// Creates a response with the given status.
    #[must_use]
    pub fn with_status(issuer: impl Into<String>, status: Status) -> Self {
        Self {
            id: fed_crypto::generate_xml_id(),
            version: SAML_VERSION.to_string(),
            issue_instant: Utc::now(),
            issuer: Some(Issuer::new(issuer)),
            in_response_to: None,
            destination: None,
            status,
            assertions: Vec::new(),
            encrypted_assertions: Vec::new(),
        }
    }

    /// Sets `InResponseTo`.
    #[must_use]
    pub fn in_response_to(mut self, request_id: impl Into<String>) -> Self {
        self.in_response_to = Some(request_id.into());
        self
    }

    /// Sets the destination.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Adds an assertion.
    #[must_use]
    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    /// Adds an already serialized `EncryptedAssertion`.
    #[must_use]
    pub fn with_encrypted_assertion(mut self, encrypted: impl Into<String>) -> Self {
        self.encrypted_assertions.push(encrypted.into());
        self
    }

    /// Returns true if the status is Success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The issuer's entity id, if present.
    #[must_use]
    pub fn issuer_value(&self) -> Option<&str> {
        self.issuer.as_ref().map(|i| i.value.as_str())
    }

    /// Parses a `Response` document.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed XML or missing required fields.
    pub fn parse(xml_text: &str) -> SamlResult<Self> {
        let doc = xml::parse(xml_text)?;
        Self::from_node(doc.root_element())
    }

    /// Parses a `samlp:Response` element.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not a `Response`, lacks a required
    /// field, or contains a malformed assertion.
    pub fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        if !xml::is_element(node, SAMLP_NS, "Response") {
            return Err(SamlError::InvalidResponse(format!(
                "expected samlp:Response, found {}",
                node.tag_name().name()
            )));
        }
        let version = xml::required_attr(node, "Version")?;
        if version != SAML_VERSION {
            return Err(SamlError::InvalidVersion(version.to_string()));
        }

        Ok(Self {
            id: xml::required_attr(node, "ID")?.to_string(),
            version: version.to_string(),
            issue_instant: xml::parse_instant(xml::required_attr(node, "IssueInstant")?)?,
            issuer: Issuer::from_parent(node),
            in_response_to: node.attribute("InResponseTo").map(String::from),
            destination: node.attribute("Destination").map(String::from),
            status: Status::from_node(xml::required_child(node, SAMLP_NS, "Status")?)?,
            assertions: xml::children(node, SAML_NS, "Assertion")
                .map(Assertion::from_node)
                .collect::<SamlResult<Vec<_>>>()?,
            encrypted_assertions: xml::children(node, SAML_NS, "EncryptedAssertion")
                .map(xml::standalone_text)
                .collect(),
        })
    }

    /// Serializes the response.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(2048);
        out.push_str("<samlp:Response xmlns:samlp=\"");
        out.push_str(SAMLP_NS);
        out.push_str("\" xmlns:saml=\"");
        out.push_str(SAML_NS);
        out.push('"');
        xml::push_attr(&mut out, "ID", Some(&self.id));
        xml::push_attr(&mut out, "Version", Some(&self.version));
        xml::push_attr(&mut out, "IssueInstant", Some(&xml::format_instant(self.issue_instant)));
        xml::push_attr(&mut out, "Destination", self.destination.as_deref());
        xml::push_attr(&mut out, "InResponseTo", self.in_response_to.as_deref());
        out.push('>');
        if let Some(issuer) = &self.issuer {
            issuer.write_xml(&mut out);
        }
        self.status.write_xml(&mut out);
        for assertion in &self.assertions {
            assertion.write_xml(&mut out);
        }
        for encrypted in &self.encrypted_assertions {
            out.push_str(encrypted);
        }
        out.push_str("</samlp:Response>");
        out
    }
}
