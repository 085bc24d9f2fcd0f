//! Name identifiers and issuers.

use roxmltree::Node;
use serde::{Deserialize, Serialize};

use super::{NameIdFormat, SAMLP_NS, SAML_NS};
use crate::xml;

/// SAML `NameID`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameId {
    /// The identifier value.
    pub value: String,

    /// Format URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Security domain qualifying the name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_qualifier: Option<String>,

    /// SP qualifying the name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sp_name_qualifier: Option<String>,

    /// Alternative SP-provided identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sp_provided_id: Option<String>,
}

impl NameId {
    /// Creates a name ID with no format.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            format: None,
            name_qualifier: None,
            sp_name_qualifier: None,
            sp_provided_id: None,
        }
    }

    /// Creates an email name ID.
    #[must_use]
    pub fn email(email: impl Into<String>) -> Self {
        Self::new(email).with_format(NameIdFormat::Email)
    }

    /// Creates a persistent name ID.
    #[must_use]
    pub fn persistent(value: impl Into<String>) -> Self {
        Self::new(value).with_format(NameIdFormat::Persistent)
    }

    /// Creates a transient name ID.
    #[must_use]
    pub fn transient(value: impl Into<String>) -> Self {
        Self::new(value).with_format(NameIdFormat::Transient)
    }

    /// Sets the format.
    #[must_use]
    pub fn with_format(mut self, format: NameIdFormat) -> Self {
        self.format = Some(format.uri().to_string());
        self
    }

    /// Sets the format URI verbatim.
    #[must_use]
    pub fn with_format_uri(mut self, format: Option<String>) -> Self {
        self.format = format;
        self
    }

    /// Sets the name qualifier.
    #[must_use]
    pub fn with_name_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.name_qualifier = Some(qualifier.into());
        self
    }

    /// Sets the SP name qualifier.
    #[must_use]
    pub fn with_sp_name_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.sp_name_qualifier = Some(qualifier.into());
        self
    }

    /// Returns the parsed format, `Unspecified` when absent or unknown.
    #[must_use]
    pub fn parsed_format(&self) -> NameIdFormat {
        self.format
            .as_deref()
            .and_then(NameIdFormat::from_uri)
            .unwrap_or_default()
    }

    /// Returns true if both identify the same principal (value, format, qualifiers).
    #[must_use]
    pub fn same_principal(&self, other: &Self) -> bool {
        self.value == other.value
            && self.parsed_format() == other.parsed_format()
            && self.name_qualifier == other.name_qualifier
            && self.sp_name_qualifier == other.sp_name_qualifier
    }

    /// Parses a `saml:NameID` element.
    #[must_use]
    pub fn from_node(node: Node<'_, '_>) -> Self {
        Self {
            value: xml::text(node),
            format: node.attribute("Format").map(String::from),
            name_qualifier: node.attribute("NameQualifier").map(String::from),
            sp_name_qualifier: node.attribute("SPNameQualifier").map(String::from),
            sp_provided_id: node.attribute("SPProvidedID").map(String::from),
        }
    }

    /// Writes `<saml:NameID>` (the `saml` prefix must be bound).
    pub fn write_xml(&self, out: &mut String) {
        out.push_str("<saml:NameID");
        xml::push_attr(out, "Format", self.format.as_deref());
        xml::push_attr(out, "NameQualifier", self.name_qualifier.as_deref());
        xml::push_attr(out, "SPNameQualifier", self.sp_name_qualifier.as_deref());
        xml::push_attr(out, "SPProvidedID", self.sp_provided_id.as_deref());
        out.push('>');
        out.push_str(&xml::escape(&self.value));
        out.push_str("</saml:NameID>");
    }
}

/// SAML `Issuer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuer {
    /// Issuer entity id.
    pub value: String,
    /// Format URI, normally absent or the entity format.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl Issuer {
    /// Creates an issuer with no format attribute.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            format: None,
        }
    }

    /// Sets the format URI.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Parses a `saml:Issuer` element.
    #[must_use]
    pub fn from_node(node: Node<'_, '_>) -> Self {
        Self {
            value: xml::text(node),
            format: node.attribute("Format").map(String::from),
        }
    }

    /// Parses the `saml:Issuer` child of `parent`, if any.
    #[must_use]
    pub fn from_parent(parent: Node<'_, '_>) -> Option<Self> {
        xml::child(parent, SAML_NS, "Issuer").map(Self::from_node)
    }

    /// Writes `<saml:Issuer>`.
    pub fn write_xml(&self, out: &mut String) {
        out.push_str("<saml:Issuer");
        xml::push_attr(out, "Format", self.format.as_deref());
        out.push('>');
        out.push_str(&xml::escape(&self.value));
        out.push_str("</saml:Issuer>");
    }
}

/// `NameIDPolicy` of an `AuthnRequest`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameIdPolicy {
    /// Requested format URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// SP name qualifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sp_name_qualifier: Option<String>,

    /// Whether the IdP may create a new identifier.
    #[serde(default)]
    pub allow_create: bool,
}

impl NameIdPolicy {
    /// Creates a policy requesting a specific format.
    #[must_use]
    pub fn with_format(format: NameIdFormat) -> Self {
        Self {
            format: Some(format.uri().to_string()),
            sp_name_qualifier: None,
            allow_create: false,
        }
    }

    /// Sets whether new identifiers can be created.
    #[must_use]
    pub const fn allow_create(mut self, allow: bool) -> Self {
        self.allow_create = allow;
        self
    }

    /// Returns the parsed format.
    #[must_use]
    pub fn parsed_format(&self) -> Option<NameIdFormat> {
        self.format.as_deref().and_then(NameIdFormat::from_uri)
    }

    /// Parses a `samlp:NameIDPolicy` element.
    #[must_use]
    pub fn from_node(node: Node<'_, '_>) -> Self {
        Self {
            format: node.attribute("Format").map(String::from),
            sp_name_qualifier: node.attribute("SPNameQualifier").map(String::from),
            allow_create: node.attribute("AllowCreate") == Some("true"),
        }
    }

    /// Parses the `samlp:NameIDPolicy` child of `parent`, if any.
    #[must_use]
    pub fn from_parent(parent: Node<'_, '_>) -> Option<Self> {
        xml::child(parent, SAMLP_NS, "NameIDPolicy").map(Self::from_node)
    }

    /// Writes `<samlp:NameIDPolicy/>`.
    pub fn write_xml(&self, out: &mut String) {
        out.push_str("<samlp:NameIDPolicy");
        xml::push_attr(out, "Format", self.format.as_deref());
        xml::push_attr(out, "SPNameQualifier", self.sp_name_qualifier.as_deref());
        xml::push_attr(out, "AllowCreate", Some(if self.allow_create { "true" } else { "false" }));
        out.push_str("/>");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_id_email() {
        let name_id = NameId::email("user@example.com");
        assert_eq!(name_id.value, "user@example.com");
        assert_eq!(name_id.parsed_format(), NameIdFormat::Email);
    }

    #[test]
    fn name_id_xml_roundtrip() {
        let name_id = NameId::persistent("a<b&c")
            .with_name_qualifier("https://idp.example.com")
            .with_sp_name_qualifier("https://sp.example.com");
        let mut out = format!("<w xmlns:saml=\"{SAML_NS}\">");
        name_id.write_xml(&mut out);
        out.push_str("</w>");

        let doc = xml::parse(&out).unwrap();
        let node = xml::child(doc.root_element(), SAML_NS, "NameID").unwrap();
        assert_eq!(NameId::from_node(node), name_id);
    }

    #[test]
    fn same_principal_ignores_missing_format_spelling() {
        let a = NameId::new("u1");
        let b = NameId::new("u1").with_format(NameIdFormat::Unspecified);
        assert!(a.same_principal(&b));
        assert!(!a.same_principal(&NameId::new("u2")));
    }

    #[test]
    fn name_id_policy_parse() {
        let xml = format!(
            r#"<samlp:NameIDPolicy xmlns:samlp="{SAMLP_NS}" Format="{}" AllowCreate="true"/>"#,
            NameIdFormat::Email.uri()
        );
        let doc = xml::parse(&xml).unwrap();
        let policy = NameIdPolicy::from_node(doc.root_element());
        assert_eq!(policy.parsed_format(), Some(NameIdFormat::Email));
        assert!(policy.allow_create);
    }
}
