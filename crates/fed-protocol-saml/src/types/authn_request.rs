//! SAML AuthnRequest.
//!
//! Authentication request message sent by a service provider to an identity provider.

use chrono::{DateTime, Utc};
use roxmltree::Node;
use serde::{Deserialize, Serialize};

use super::{
    AuthnContextComparison, Condition, Conditions, Issuer, NameIdPolicy, SamlBinding, SAMLP_NS,
    SAML_NS, SAML_VERSION,
};
use crate::error::{SamlError, SamlResult};
use crate::xml;

/// SAML Authentication Request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthnRequest {
    /// Unique identifier for this request.
    pub id: String,

    /// Protocol version.
    pub version: String,

    /// Timestamp when this request was issued.
    pub issue_instant: DateTime<Utc>,

    /// The issuing service provider.
    pub issuer: Issuer,

    /// Endpoint the request is sent to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// Where the response should be sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assertion_consumer_service_url: Option<String>,

    /// Binding URI the response should use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_binding: Option<String>,

    /// Name ID policy constraints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_id_policy: Option<NameIdPolicy>,

    /// Requested authentication context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_authn_context: Option<RequestedAuthnContext>,

    /// Conditions the SP places on the returned assertion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,

    /// Whether the IdP must authenticate the user directly.
    #[serde(default)]
    pub force_authn: bool,

    /// Whether the IdP must not interact with the user.
    #[serde(default)]
    pub is_passive: bool,

    /// A human-readable name for the requester.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
}

impl AuthnRequest {
    /// Creates a request with a fresh ID, issued now.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            id: fed_crypto::generate_xml_id(),
            version: SAML_VERSION.to_string(),
            issue_instant: Utc::now(),
            issuer: Issuer::new(issuer),
            destination: None,
            assertion_consumer_service_url: None,
            protocol_binding: None,
            name_id_policy: None,
            requested_authn_context: None,
            conditions: None,
            force_authn: false,
            is_passive: false,
            provider_name: None,
        }
    }

    /// Sets the destination.
    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    /// Sets the assertion consumer service URL.
    #[must_use]
    pub fn with_acs_url(mut self, url: impl Into<String>) -> Self {
        self.assertion_consumer_service_url = Some(url.into());
        self
    }

    /// Sets the response binding.
    #[must_use]
    pub fn with_protocol_binding(mut self, binding: SamlBinding) -> Self {
        self.protocol_binding = Some(binding.uri().to_string());
        self
    }

    /// Sets the name ID policy.
    #[must_use]
    pub fn with_name_id_policy(mut self, policy: NameIdPolicy) -> Self {
        self.name_id_policy = Some(policy);
        self
    }

    /// Sets the requested authentication context.
    #[must_use]
    pub fn with_requested_authn_context(mut self, context: RequestedAuthnContext) -> Self {
        self.requested_authn_context = Some(context);
        self
    }

    /// Restricts the returned assertion to `audience`.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.conditions = Some(Conditions::new().with(Condition::AudienceRestriction(vec![audience.into()])));
        self
    }

    /// Sets `ForceAuthn`.
    #[must_use]
    pub const fn with_force_authn(mut self, force: bool) -> Self {
        self.force_authn = force;
        self
    }

    /// Sets `IsPassive`.
    #[must_use]
    pub const fn with_passive(mut self, passive: bool) -> Self {
        self.is_passive = passive;
        self
    }

    /// Returns the parsed response binding.
    #[must_use]
    pub fn parsed_protocol_binding(&self) -> Option<SamlBinding> {
        self.protocol_binding.as_deref().and_then(SamlBinding::from_uri)
    }

    /// Parses an `AuthnRequest` document.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed XML or missing required fields.
    pub fn parse(xml_text: &str) -> SamlResult<Self> {
        let doc = xml::parse(xml_text)?;
        Self::from_node(doc.root_element())
    }

    /// Parses a `samlp:AuthnRequest` element.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not an `AuthnRequest` or lacks
    /// `ID`, `IssueInstant` or `Issuer`.
    pub fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        if !xml::is_element(node, SAMLP_NS, "AuthnRequest") {
            return Err(SamlError::InvalidRequest(format!(
                "expected samlp:AuthnRequest, found {}",
                node.tag_name().name()
            )));
        }
        let version = xml::required_attr(node, "Version")?;
        if version != SAML_VERSION {
            return Err(SamlError::InvalidVersion(version.to_string()));
        }
        let issuer = Issuer::from_parent(node)
            .ok_or_else(|| SamlError::MissingElement("Issuer in AuthnRequest".to_string()))?;

        Ok(Self {
            id: xml::required_attr(node, "ID")?.to_string(),
            version: version.to_string(),
            issue_instant: xml::parse_instant(xml::required_attr(node, "IssueInstant")?)?,
            issuer,
            destination: node.attribute("Destination").map(String::from),
            assertion_consumer_service_url: node.attribute("AssertionConsumerServiceURL").map(String::from),
            protocol_binding: node.attribute("ProtocolBinding").map(String::from),
            name_id_policy: NameIdPolicy::from_parent(node),
            requested_authn_context: xml::child(node, SAMLP_NS, "RequestedAuthnContext")
                .map(RequestedAuthnContext::from_node),
            conditions: match xml::child(node, SAML_NS, "Conditions") {
                Some(c) => Some(Conditions::from_node(c)?),
                None => None,
            },
            force_authn: node.attribute("ForceAuthn") == Some("true"),
            is_passive: node.attribute("IsPassive") == Some("true"),
            provider_name: node.attribute("ProviderName").map(String::from),
        })
    }

    /// Serializes the request.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(1024);
        out.push_str("<samlp:AuthnRequest xmlns:samlp=\"");
        out.push_str(SAMLP_NS);
        out.push_str("\" xmlns:saml=\"");
        out.push_str(SAML_NS);
        out.push('"');
        xml::push_attr(&mut out, "ID", Some(&self.id));
        xml::push_attr(&mut out, "Version", Some(&self.version));
        xml::push_attr(&mut out, "IssueInstant", Some(&xml::format_instant(self.issue_instant)));
        xml::push_attr(&mut out, "Destination", self.destination.as_deref());
        xml::push_attr(
            &mut out,
            "AssertionConsumerServiceURL",
            self.assertion_consumer_service_url.as_deref(),
        );
        xml::push_attr(&mut out, "ProtocolBinding", self.protocol_binding.as_deref());
        xml::push_attr(&mut out, "ProviderName", self.provider_name.as_deref());
        if self.force_authn {
            out.push_str(" ForceAuthn=\"true\"");
        }
        if self.is_passive {
            out.push_str(" IsPassive=\"true\"");
        }
        out.push('>');
        self.issuer.write_xml(&mut out);
        if let Some(policy) = &self.name_id_policy {
            policy.write_xml(&mut out);
        }
        if let Some(conditions) = &self.conditions {
            conditions.write_xml(&mut out);
        }
        if let Some(context) = &self.requested_authn_context {
            context.write_xml(&mut out);
        }
        out.push_str("</samlp:AuthnRequest>");
        out
    }
}

/// `samlp:RequestedAuthnContext`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedAuthnContext {
    /// Requested `AuthnContextClassRef` values.
    pub class_refs: Vec<String>,

    /// How the IdP should compare the classes.
    #[serde(default)]
    pub comparison: AuthnContextComparison,
}

impl RequestedAuthnContext {
    /// Creates a context requesting the given classes with exact comparison.
    #[must_use]
    pub fn new(class_refs: Vec<String>) -> Self {
        Self {
            class_refs,
            comparison: AuthnContextComparison::default(),
        }
    }

    /// Sets the comparison.
    #[must_use]
    pub const fn with_comparison(mut self, comparison: AuthnContextComparison) -> Self {
        self.comparison = comparison;
        self
    }

    fn from_node(node: Node<'_, '_>) -> Self {
        Self {
            class_refs: xml::children(node, SAML_NS, "AuthnContextClassRef")
                .map(xml::text)
                .collect(),
            comparison: node
                .attribute("Comparison")
                .and_then(AuthnContextComparison::parse)
                .unwrap_or_default(),
        }
    }

    fn write_xml(&self, out: &mut String) {
        out.push_str("<samlp:RequestedAuthnContext");
        xml::push_attr(out, "Comparison", Some(self.comparison.as_str()));
        out.push('>');
        for class_ref in &self.class_refs {
            xml::push_text_element(out, "saml:AuthnContextClassRef", class_ref);
        }
        out.push_str("</samlp:RequestedAuthnContext>");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuthnContextClass, NameIdFormat};

    #[test]
    fn new_request_defaults() {
        let request = AuthnRequest::new("https://sp.example.com");
        assert!(request.id.starts_with("id"));
        assert_eq!(request.version, "2.0");
        assert!(!request.force_authn);
        assert!(!request.is_passive);
    }

    #[test]
    fn xml_roundtrip() {
        let request = AuthnRequest::new("https://sp.example.com")
            .with_destination("https://idp.example.com/sso")
            .with_acs_url("https://sp.example.com/acs")
            .with_protocol_binding(SamlBinding::HttpPost)
            .with_name_id_policy(NameIdPolicy::with_format(NameIdFormat::Persistent).allow_create(true))
            .with_requested_authn_context(
                RequestedAuthnContext::new(vec![AuthnContextClass::PasswordProtectedTransport.uri().to_string()])
                    .with_comparison(AuthnContextComparison::Minimum),
            )
            .with_audience("https://sp.example.com")
            .with_passive(true);

        let mut parsed = AuthnRequest::parse(&request.to_xml()).unwrap();
        // IssueInstant is written with second precision.
        parsed.issue_instant = request.issue_instant;
        assert_eq!(parsed, request);
        assert_eq!(parsed.parsed_protocol_binding(), Some(SamlBinding::HttpPost));
    }

    #[test]
    fn wrong_version_rejected() {
        let xml = format!(
            r#"<samlp:AuthnRequest xmlns:samlp="{SAMLP_NS}" xmlns:saml="{SAML_NS}" ID="a" Version="1.1" IssueInstant="2024-01-01T00:00:00Z"><saml:Issuer>x</saml:Issuer></samlp:AuthnRequest>"#
        );
        assert!(matches!(AuthnRequest::parse(&xml), Err(SamlError::InvalidVersion(_))));
    }

    #[test]
    fn missing_issuer_rejected() {
        let xml = format!(
            r#"<samlp:AuthnRequest xmlns:samlp="{SAMLP_NS}" ID="a" Version="2.0" IssueInstant="2024-01-01T00:00:00Z"/>"#
        );
        assert!(matches!(AuthnRequest::parse(&xml), Err(SamlError::MissingElement(_))));
    }
}
