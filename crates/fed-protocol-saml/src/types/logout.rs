//! SAML Logout types.
//!
//! Single Logout (SLO) request and response messages.

use chrono::{DateTime, Utc};
use roxmltree::Node;
use serde::{Deserialize, Serialize};

use super::{sub_status_codes, Issuer, NameId, Status, StatusCode, SAMLP_NS, SAML_NS, SAML_VERSION};
use crate::error::{SamlError, SamlResult};
use crate::xml;

/// SAML Logout Request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutRequest {
    /// Unique identifier for this request.
    pub id: String,

    /// Protocol version.
    pub version: String,

    /// Timestamp when this request was issued.
    pub issue_instant: DateTime<Utc>,

    /// The requester.
    pub issuer: Issuer,

    /// Endpoint the request is sent to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// The principal to log out.
    pub name_id: NameId,

    /// Session indexes to terminate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub session_indexes: Vec<String>,

    /// Reason for the logout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Time after which the request is no longer valid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_on_or_after: Option<DateTime<Utc>>,
}

impl LogoutRequest {
    /// User logout reason.
    pub const REASON_USER: &'static str = "urn:oasis:names:tc:SAML:2.0:logout:user";

    /// Admin logout reason.
    pub const REASON_ADMIN: &'static str = "urn:oasis:names:tc:SAML:2.0:logout:admin";

    /// Creates a logout request for `name_id` with a fresh ID.
    #[must_use]
    pub fn new(issuer: impl Into<String>, name_id: NameId) -> Self {
        Self {
            id: fed_crypto::generate_xml_id(),
            version: SAML_VERSION.to_string(),
            issue_instant: Utc::now(),
            issuer: Issuer::new(issuer),
            destination: None,
            name_id,
            session_indexes: Vec::new(),
            reason: None,
            not_on_or_after: None,
        }
    }

    /// Sets the destination.
    #[must_use]
    pub fn with_destination(mut self, url: impl Into<String>) -> Self {
        self.destination = Some(url.into());
        self
    }

    /// Adds a session index.
    #[must_use]
    pub fn with_session_index(mut self, index: impl Into<String>) -> Self {
        self.session_indexes.push(index.into());
        self
    }

    /// Sets the reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Sets the expiry relative to the issue instant.
    #[must_use]
    pub fn valid_for(mut self, minutes: i64) -> Self {
        self.not_on_or_after = Some(self.issue_instant + chrono::Duration::minutes(minutes));
        self
    }

    /// Returns true if `NotOnOrAfter` has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.not_on_or_after.is_some_and(|t| now >= t)
    }

    /// Parses a `LogoutRequest` document.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed XML or missing required fields.
    pub fn parse(xml_text: &str) -> SamlResult<Self> {
        let doc = xml::parse(xml_text)?;
        Self::from_node(doc.root_element())
    }

    /// Parses a `samlp:LogoutRequest` element.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not a `LogoutRequest` or lacks a
    /// required field. Encrypted identifiers are not supported.
    pub fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        if !xml::is_element(node, SAMLP_NS, "LogoutRequest") {
            return Err(SamlError::InvalidRequest(format!(
                "expected samlp:LogoutRequest, found {}",
                node.tag_name().name()
            )));
        }
        let version = xml::required_attr(node, "Version")?;
        if version != SAML_VERSION {
            return Err(SamlError::InvalidVersion(version.to_string()));
        }
        let issuer = Issuer::from_parent(node)
            .ok_or_else(|| SamlError::MissingElement("Issuer in LogoutRequest".to_string()))?;
        let name_id = xml::required_child(node, SAML_NS, "NameID")?;

        Ok(Self {
            id: xml::required_attr(node, "ID")?.to_string(),
            version: version.to_string(),
            issue_instant: xml::parse_instant(xml::required_attr(node, "IssueInstant")?)?,
            issuer,
            destination: node.attribute("Destination").map(String::from),
            name_id: NameId::from_node(name_id),
            session_indexes: xml::children(node, SAMLP_NS, "SessionIndex").map(xml::text).collect(),
            reason: node.attribute("Reason").map(String::from),
            not_on_or_after: xml::optional_instant(node, "NotOnOrAfter")?,
        })
    }

    /// Serializes the request.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(768);
        out.push_str("<samlp:LogoutRequest xmlns:samlp=\"");
        out.push_str(SAMLP_NS);
        out.push_str("\" xmlns:saml=\"");
        out.push_str(SAML_NS);
        out.push('"');
        xml::push_attr(&mut out, "ID", Some(&self.id));
        xml::push_attr(&mut out, "Version", Some(&self.version));
        xml::push_attr(&mut out, "IssueInstant", Some(&xml::format_instant(self.issue_instant)));
        xml::push_attr(&mut out, "Destination", self.destination.as_deref());
        xml::push_attr(&mut out, "Reason", self.reason.as_deref());
        xml::push_attr(
            &mut out,
            "NotOnOrAfter",
            self.not_on_or_after.map(xml::format_instant).as_deref(),
        );
        out.push('>');
        self.issuer.write_xml(&mut out);
        self.name_id.write_xml(&mut out);
        for index in &self.session_indexes {
            xml::push_text_element(&mut out, "samlp:SessionIndex", index);
        }
        out.push_str("</samlp:LogoutRequest>");
        out
    }
}

/// SAML Logout Response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutResponse {
    /// Unique identifier for this response.
    pub id: String,

    /// Protocol version.
    pub version: String,

    /// Timestamp when this response was issued.
    pub issue_instant: DateTime<Utc>,

    /// The responder.
    pub issuer: Issuer,

    /// Endpoint the response is sent to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// ID of the request this answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_response_to: Option<String>,

    /// Outcome.
    pub status: Status,
}

impl LogoutResponse {
    /// Creates a successful response.
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
            issuer: Issuer::new(issuer),
            destination: None,
            in_response_to: None,
            status,
        }
    }

    /// Creates a partial-logout response.
    #[must_use]
    pub fn partial_logout(issuer: impl Into<String>) -> Self {
        Self::with_status(
            issuer,
            Status {
                status_code: StatusCode::success().with_sub_status(StatusCode::new(sub_status_codes::PARTIAL_LOGOUT)),
                status_message: None,
            },
        )
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

    /// Returns true if the status is Success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Parses a `LogoutResponse` document.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed XML or missing required fields.
    pub fn parse(xml_text: &str) -> SamlResult<Self> {
        let doc = xml::parse(xml_text)?;
        Self::from_node(doc.root_element())
    }

    /// Parses a `samlp:LogoutResponse` element.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not a `LogoutResponse` or lacks a
    /// required field.
    pub fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        if !xml::is_element(node, SAMLP_NS, "LogoutResponse") {
            return Err(SamlError::InvalidResponse(format!(
                "expected samlp:LogoutResponse, found {}",
                node.tag_name().name()
            )));
        }
        let version = xml::required_attr(node, "Version")?;
        if version != SAML_VERSION {
            return Err(SamlError::InvalidVersion(version.to_string()));
        }
        let issuer = Issuer::from_parent(node)
            .ok_or_else(|| SamlError::MissingElement("Issuer in LogoutResponse".to_string()))?;

        Ok(Self {
            id: xml::required_attr(node, "ID")?.to_string(),
            version: version.to_string(),
            issue_instant: xml::parse_instant(xml::required_attr(node, "IssueInstant")?)?,
            issuer,
            destination: node.attribute("Destination").map(String::from),
            in_response_to: node.attribute("InResponseTo").map(String::from),
            status: Status::from_node(xml::required_child(node, SAMLP_NS, "Status")?)?,
        })
    }

    /// Serializes the response.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(512);
        out.push_str("<samlp:LogoutResponse xmlns:samlp=\"");
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
        self.issuer.write_xml(&mut out);
        self.status.write_xml(&mut out);
        out.push_str("</samlp:LogoutResponse>");
        out
    }
}
