//! SAML Assertion model.
//!
//! Values are built in one pass from a parsed element and are not mutated
//! afterwards; every field is populated by [`Assertion::from_node`]. Required
//! fields are still `Option` so that the validator, not the parser, decides
//! what a missing value means.

use chrono::{DateTime, Utc};
use roxmltree::Node;
use serde::{Deserialize, Serialize};

use super::{Issuer, NameId, SAML_NS, SAML_VERSION, XMLDSIG_NS, XSI_NS};
use crate::error::{SamlError, SamlResult};
use crate::xml;

/// SAML Assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    /// `ID` attribute.
    pub id: Option<String>,

    /// `Version` attribute.
    pub version: String,

    /// `IssueInstant` attribute.
    pub issue_instant: Option<DateTime<Utc>>,

    /// Issuing entity.
    pub issuer: Option<Issuer>,

    /// The subject.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Subject>,

    /// Validity conditions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,

    /// Statements in document order.
    #[serde(default)]
    pub statements: Vec<Statement>,
}

impl Assertion {
    /// Creates an assertion with a fresh ID, issued now.
    #[must_use]
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            id: Some(fed_crypto::generate_xml_id()),
            version: SAML_VERSION.to_string(),
            issue_instant: Some(Utc::now()),
            issuer: Some(Issuer::new(issuer)),
            subject: None,
            conditions: None,
            statements: Vec::new(),
        }
    }

    /// Replaces the ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the issue instant.
    #[must_use]
    pub fn with_issue_instant(mut self, instant: DateTime<Utc>) -> Self {
        self.issue_instant = Some(instant);
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Sets the conditions.
    #[must_use]
    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Appends a statement.
    #[must_use]
    pub fn with_statement(mut self, statement: Statement) -> Self {
        self.statements.push(statement);
        self
    }

    /// The issuer's entity id, if present.
    #[must_use]
    pub fn issuer_value(&self) -> Option<&str> {
        self.issuer.as_ref().map(|i| i.value.as_str())
    }

    /// The subject's `NameID`, if present.
    #[must_use]
    pub fn name_id(&self) -> Option<&NameId> {
        self.subject.as_ref().and_then(Subject::name_id)
    }

    /// All authentication statements.
    pub fn authn_statements(&self) -> impl Iterator<Item = &AuthnStatement> {
        self.statements.iter().filter_map(|s| match s {
            Statement::Authn(a) => Some(a),
            _ => None,
        })
    }

    /// All attributes across attribute statements.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.statements
            .iter()
            .filter_map(|s| match s {
                Statement::Attribute(a) => Some(a.attributes.iter()),
                _ => None,
            })
            .flatten()
    }

    /// The first `SessionIndex` of an authentication statement.
    #[must_use]
    pub fn session_index(&self) -> Option<&str> {
        self.authn_statements().find_map(|a| a.session_index.as_deref())
    }

    /// Returns true if the conditions include `OneTimeUse`.
    #[must_use]
    pub fn is_one_time_use(&self) -> bool {
        self.conditions
            .as_ref()
            .is_some_and(|c| c.items.iter().any(|i| matches!(i, Condition::OneTimeUse)))
    }

    /// Parses a standalone `saml:Assertion` document.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed XML or a non-assertion root.
    pub fn parse(xml_text: &str) -> SamlResult<Self> {
        let doc = xml::parse(xml_text)?;
        Self::from_node(doc.root_element())
    }

    /// Parses a `saml:Assertion` element.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is not an assertion or a child is malformed.
    pub fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        if !xml::is_element(node, SAML_NS, "Assertion") {
            return Err(SamlError::InvalidAssertion(format!(
                "expected saml:Assertion, found {}",
                node.tag_name().name()
            )));
        }

        let subject = xml::child(node, SAML_NS, "Subject")
            .map(Subject::from_node)
            .transpose()?;
        let conditions = xml::child(node, SAML_NS, "Conditions")
            .map(Conditions::from_node)
            .transpose()?;
        let statements = xml::child_elements(node)
            .filter_map(|child| Statement::from_node(child).transpose())
            .collect::<SamlResult<Vec<_>>>()?;

        Ok(Self {
            id: node.attribute("ID").map(String::from),
            version: node.attribute("Version").unwrap_or_default().to_string(),
            issue_instant: xml::optional_instant(node, "IssueInstant")?,
            issuer: Issuer::from_parent(node),
            subject,
            conditions,
            statements,
        })
    }

    /// Serializes the assertion as a standalone element with its own
    /// namespace declarations.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out);
        out
    }

    /// Appends the serialized assertion to `out`.
    pub fn write_xml(&self, out: &mut String) {
        out.push_str("<saml:Assertion xmlns:saml=\"");
        out.push_str(SAML_NS);
        out.push('"');
        xml::push_attr(out, "ID", self.id.as_deref());
        xml::push_attr(out, "Version", Some(&self.version));
        xml::push_attr(out, "IssueInstant", self.issue_instant.map(xml::format_instant).as_deref());
        out.push('>');
        if let Some(issuer) = &self.issuer {
            issuer.write_xml(out);
        }
        if let Some(subject) = &self.subject {
            subject.write_xml(out);
        }
        if let Some(conditions) = &self.conditions {
            conditions.write_xml(out);
        }
        for statement in &self.statements {
            statement.write_xml(out);
        }
        out.push_str("</saml:Assertion>");
    }
}

/// `saml:Subject`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Identifiers and confirmations in document order.
    pub items: Vec<SubjectItem>,
}

/// One child of a `Subject`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubjectItem {
    /// Plain name identifier.
    NameId(NameId),
    /// Encrypted identifier, kept as its serialized element.
    EncryptedId(String),
    /// Confirmation.
    SubjectConfirmation(SubjectConfirmation),
}

impl Subject {
    /// Creates a subject identified by `name_id`.
    #[must_use]
    pub fn with_name_id(name_id: NameId) -> Self {
        Self {
            items: vec![SubjectItem::NameId(name_id)],
        }
    }

    /// Appends a confirmation.
    #[must_use]
    pub fn with_confirmation(mut self, confirmation: SubjectConfirmation) -> Self {
        self.items.push(SubjectItem::SubjectConfirmation(confirmation));
        self
    }

    /// The `NameID`, if present.
    #[must_use]
    pub fn name_id(&self) -> Option<&NameId> {
        self.items.iter().find_map(|i| match i {
            SubjectItem::NameId(n) => Some(n),
            _ => None,
        })
    }

    /// All confirmations.
    pub fn confirmations(&self) -> impl Iterator<Item = &SubjectConfirmation> {
        self.items.iter().filter_map(|i| match i {
            SubjectItem::SubjectConfirmation(c) => Some(c),
            _ => None,
        })
    }

    /// Number of identifier items (`NameID`, `EncryptedID`).
    #[must_use]
    pub fn identifier_count(&self) -> usize {
        self.items
            .iter()
            .filter(|i| !matches!(i, SubjectItem::SubjectConfirmation(_)))
            .count()
    }

    fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        let mut items = Vec::new();
        for child in xml::child_elements(node) {
            match child.tag_name().name() {
                "NameID" => items.push(SubjectItem::NameId(NameId::from_node(child))),
                "EncryptedID" => items.push(SubjectItem::EncryptedId(xml::source_text(child).to_string())),
                "SubjectConfirmation" => {
                    items.push(SubjectItem::SubjectConfirmation(SubjectConfirmation::from_node(child)?));
                }
                other => {
                    return Err(SamlError::InvalidAssertion(format!("unexpected {other} in Subject")));
                }
            }
        }
        Ok(Self { items })
    }

    fn write_xml(&self, out: &mut String) {
        out.push_str("<saml:Subject>");
        for item in &self.items {
            match item {
                SubjectItem::NameId(n) => n.write_xml(out),
                SubjectItem::EncryptedId(raw) => out.push_str(raw),
                SubjectItem::SubjectConfirmation(c) => c.write_xml(out),
            }
        }
        out.push_str("</saml:Subject>");
    }
}

/// `saml:SubjectConfirmation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectConfirmation {
    /// Confirmation method URI.
    pub method: String,
    /// Optional identifier of the confirming entity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_id: Option<NameId>,
    /// Confirmation data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<SubjectConfirmationData>,
}

impl SubjectConfirmation {
    /// Creates a confirmation with the given method.
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            name_id: None,
            data: None,
        }
    }

    /// Sets the confirmation data.
    #[must_use]
    pub fn with_data(mut self, data: SubjectConfirmationData) -> Self {
        self.data = Some(data);
        self
    }

    fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        Ok(Self {
            method: xml::required_attr(node, "Method")?.to_string(),
            name_id: xml::child(node, SAML_NS, "NameID").map(NameId::from_node),
            data: xml::child(node, SAML_NS, "SubjectConfirmationData")
                .map(SubjectConfirmationData::from_node)
                .transpose()?,
        })
    }

    fn write_xml(&self, out: &mut String) {
        out.push_str("<saml:SubjectConfirmation");
        xml::push_attr(out, "Method", Some(&self.method));
        out.push('>');
        if let Some(name_id) = &self.name_id {
            name_id.write_xml(out);
        }
        if let Some(data) = &self.data {
            data.write_xml(out);
        }
        out.push_str("</saml:SubjectConfirmation>");
    }
}

/// `saml:SubjectConfirmationData`, including the `KeyInfoConfirmationDataType`
/// variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectConfirmationData {
    /// `NotBefore`.
    pub not_before: Option<DateTime<Utc>>,
    /// `NotOnOrAfter`.
    pub not_on_or_after: Option<DateTime<Utc>>,
    /// `Recipient`.
    pub recipient: Option<String>,
    /// `InResponseTo`.
    pub in_response_to: Option<String>,
    /// `Address`.
    pub address: Option<String>,
    /// `Some` for `KeyInfoConfirmationDataType`, holding its `ds:KeyInfo` children.
    pub key_infos: Option<Vec<KeyInfoData>>,
}

impl SubjectConfirmationData {
    /// Creates bearer-style data for `recipient`.
    #[must_use]
    pub fn for_recipient(recipient: impl Into<String>) -> Self {
        Self {
            recipient: Some(recipient.into()),
            ..Self::default()
        }
    }

    /// Sets `NotOnOrAfter`.
    #[must_use]
    pub fn with_not_on_or_after(mut self, instant: DateTime<Utc>) -> Self {
        self.not_on_or_after = Some(instant);
        self
    }

    /// Sets `InResponseTo`.
    #[must_use]
    pub fn with_in_response_to(mut self, id: impl Into<String>) -> Self {
        self.in_response_to = Some(id.into());
        self
    }

    fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        let is_key_info = node
            .attribute((XSI_NS, "type"))
            .is_some_and(|t| t.ends_with("KeyInfoConfirmationDataType"));
        let key_infos = is_key_info.then(|| {
            xml::children(node, XMLDSIG_NS, "KeyInfo")
                .map(KeyInfoData::from_node)
                .collect()
        });
        Ok(Self {
            not_before: xml::optional_instant(node, "NotBefore")?,
            not_on_or_after: xml::optional_instant(node, "NotOnOrAfter")?,
            recipient: node.attribute("Recipient").map(String::from),
            in_response_to: node.attribute("InResponseTo").map(String::from),
            address: node.attribute("Address").map(String::from),
            key_infos,
        })
    }

    fn write_xml(&self, out: &mut String) {
        out.push_str("<saml:SubjectConfirmationData");
        if self.key_infos.is_some() {
            out.push_str(" xmlns:xsi=\"");
            out.push_str(XSI_NS);
            out.push_str("\" xsi:type=\"saml:KeyInfoConfirmationDataType\"");
        }
        xml::push_attr(out, "NotBefore", self.not_before.map(xml::format_instant).as_deref());
        xml::push_attr(out, "NotOnOrAfter", self.not_on_or_after.map(xml::format_instant).as_deref());
        xml::push_attr(out, "Recipient", self.recipient.as_deref());
        xml::push_attr(out, "InResponseTo", self.in_response_to.as_deref());
        xml::push_attr(out, "Address", self.address.as_deref());
        match &self.key_infos {
            Some(key_infos) if !key_infos.is_empty() => {
                out.push('>');
                for key_info in key_infos {
                    key_info.write_xml(out);
                }
                out.push_str("</saml:SubjectConfirmationData>");
            }
            _ => out.push_str("/>"),
        }
    }
}

/// Contents of a `ds:KeyInfo` element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfoData {
    /// Base64 `X509Certificate` values.
    pub certificates: Vec<String>,
    /// `KeyName` values.
    pub key_names: Vec<String>,
    /// Number of other child elements (key values, retrieval methods).
    pub other_children: usize,
}

impl KeyInfoData {
    /// Returns true if the `KeyInfo` has no children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty() && self.key_names.is_empty() && self.other_children == 0
    }

    /// Parses a `ds:KeyInfo` element.
    #[must_use]
    pub fn from_node(node: Node<'_, '_>) -> Self {
        let mut data = Self::default();
        for child in xml::child_elements(node) {
            if xml::is_element(child, XMLDSIG_NS, "X509Data") {
                data.certificates.extend(
                    xml::children(child, XMLDSIG_NS, "X509Certificate").map(xml::compact_text),
                );
            } else if xml::is_element(child, XMLDSIG_NS, "KeyName") {
                data.key_names.push(xml::text(child));
            } else {
                data.other_children += 1;
            }
        }
        data
    }

    fn write_xml(&self, out: &mut String) {
        out.push_str("<ds:KeyInfo xmlns:ds=\"");
        out.push_str(XMLDSIG_NS);
        out.push_str("\">");
        for name in &self.key_names {
            xml::push_text_element(out, "ds:KeyName", name);
        }
        if !self.certificates.is_empty() {
            out.push_str("<ds:X509Data>");
            for cert in &self.certificates {
                xml::push_text_element(out, "ds:X509Certificate", cert);
            }
            out.push_str("</ds:X509Data>");
        }
        out.push_str("</ds:KeyInfo>");
    }
}

/// `saml:Conditions`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conditions {
    /// `NotBefore`.
    pub not_before: Option<DateTime<Utc>>,
    /// `NotOnOrAfter`.
    pub not_on_or_after: Option<DateTime<Utc>>,
    /// Condition elements in document order.
    pub items: Vec<Condition>,
}

impl Conditions {
    /// Creates an empty condition set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the validity window.
    #[must_use]
    pub fn with_window(mut self, not_before: Option<DateTime<Utc>>, not_on_or_after: Option<DateTime<Utc>>) -> Self {
        self.not_before = not_before;
        self.not_on_or_after = not_on_or_after;
        self
    }

    /// Appends a condition.
    #[must_use]
    pub fn with(mut self, condition: Condition) -> Self {
        self.items.push(condition);
        self
    }

    /// All audience restrictions.
    pub fn audience_restrictions(&self) -> impl Iterator<Item = &[String]> {
        self.items.iter().filter_map(|c| match c {
            Condition::AudienceRestriction(audiences) => Some(audiences.as_slice()),
            _ => None,
        })
    }

    pub(crate) fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        let items = xml::child_elements(node)
            .map(Condition::from_node)
            .collect::<SamlResult<Vec<_>>>()?;
        Ok(Self {
            not_before: xml::optional_instant(node, "NotBefore")?,
            not_on_or_after: xml::optional_instant(node, "NotOnOrAfter")?,
            items,
        })
    }

    pub(crate) fn write_xml(&self, out: &mut String) {
        out.push_str("<saml:Conditions");
        xml::push_attr(out, "NotBefore", self.not_before.map(xml::format_instant).as_deref());
        xml::push_attr(out, "NotOnOrAfter", self.not_on_or_after.map(xml::format_instant).as_deref());
        out.push('>');
        for item in &self.items {
            item.write_xml(out);
        }
        out.push_str("</saml:Conditions>");
    }
}

/// One condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    /// `AudienceRestriction` with its audiences.
    AudienceRestriction(Vec<String>),
    /// `OneTimeUse`.
    OneTimeUse,
    /// `ProxyRestriction`.
    ProxyRestriction {
        /// `Count`, when present. Kept signed so negative values can be reported.
        count: Option<i64>,
        /// Audiences allowed for proxied assertions.
        audiences: Vec<String>,
    },
    /// Any other condition, by element name.
    Other(String),
}

impl Condition {
    fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        let audiences = || -> Vec<String> { xml::children(node, SAML_NS, "Audience").map(xml::text).collect() };
        Ok(match node.tag_name().name() {
            "AudienceRestriction" => Self::AudienceRestriction(audiences()),
            "OneTimeUse" => Self::OneTimeUse,
            "ProxyRestriction" => {
                let count = node
                    .attribute("Count")
                    .map(|c| {
                        c.trim()
                            .parse::<i64>()
                            .map_err(|_| SamlError::InvalidAssertion(format!("ProxyRestriction Count {c:?}")))
                    })
                    .transpose()?;
                Self::ProxyRestriction {
                    count,
                    audiences: audiences(),
                }
            }
            other => Self::Other(other.to_string()),
        })
    }

    fn write_xml(&self, out: &mut String) {
        let write_audiences = |out: &mut String, audiences: &[String]| {
            for audience in audiences {
                xml::push_text_element(out, "saml:Audience", audience);
            }
        };
        match self {
            Self::AudienceRestriction(audiences) => {
                out.push_str("<saml:AudienceRestriction>");
                write_audiences(out, audiences);
                out.push_str("</saml:AudienceRestriction>");
            }
            Self::OneTimeUse => out.push_str("<saml:OneTimeUse/>"),
            Self::ProxyRestriction { count, audiences } => {
                out.push_str("<saml:ProxyRestriction");
                xml::push_attr(out, "Count", count.map(|c| c.to_string()).as_deref());
                out.push('>');
                write_audiences(out, audiences);
                out.push_str("</saml:ProxyRestriction>");
            }
            Self::Other(_) => {}
        }
    }
}

/// Assertion statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statement {
    /// `AuthnStatement`.
    Authn(AuthnStatement),
    /// `AttributeStatement`.
    Attribute(AttributeStatement),
}

impl Statement {
    fn from_node(node: Node<'_, '_>) -> SamlResult<Option<Self>> {
        if !node.is_element() || node.tag_name().namespace() != Some(SAML_NS) {
            return Ok(None);
        }
        Ok(match node.tag_name().name() {
            "AuthnStatement" => Some(Self::Authn(AuthnStatement::from_node(node)?)),
            "AttributeStatement" => Some(Self::Attribute(AttributeStatement::from_node(node))),
            _ => None,
        })
    }

    fn write_xml(&self, out: &mut String) {
        match self {
            Self::Authn(a) => a.write_xml(out),
            Self::Attribute(a) => a.write_xml(out),
        }
    }
}

/// `saml:AuthnStatement`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthnStatement {
    /// When authentication happened.
    pub authn_instant: DateTime<Utc>,
    /// IdP session index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_index: Option<String>,
    /// Upper bound of the IdP session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_not_on_or_after: Option<DateTime<Utc>>,
    /// `AuthnContextClassRef`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authn_context_class_ref: Option<String>,
}

impl AuthnStatement {
    /// Creates a statement for an authentication at `instant`.
    #[must_use]
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            authn_instant: instant,
            session_index: None,
            session_not_on_or_after: None,
            authn_context_class_ref: None,
        }
    }

    /// Sets the session index.
    #[must_use]
    pub fn with_session_index(mut self, index: impl Into<String>) -> Self {
        self.session_index = Some(index.into());
        self
    }

    /// Sets the authentication context class.
    #[must_use]
    pub fn with_class_ref(mut self, class_ref: impl Into<String>) -> Self {
        self.authn_context_class_ref = Some(class_ref.into());
        self
    }

    fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        let instant = xml::required_attr(node, "AuthnInstant")?;
        Ok(Self {
            authn_instant: xml::parse_instant(instant)?,
            session_index: node.attribute("SessionIndex").map(String::from),
            session_not_on_or_after: xml::optional_instant(node, "SessionNotOnOrAfter")?,
            authn_context_class_ref: xml::child(node, SAML_NS, "AuthnContext")
                .and_then(|ctx| xml::child(ctx, SAML_NS, "AuthnContextClassRef"))
                .map(xml::text),
        })
    }

    fn write_xml(&self, out: &mut String) {
        out.push_str("<saml:AuthnStatement");
        xml::push_attr(out, "AuthnInstant", Some(&xml::format_instant(self.authn_instant)));
        xml::push_attr(out, "SessionIndex", self.session_index.as_deref());
        xml::push_attr(
            out,
            "SessionNotOnOrAfter",
            self.session_not_on_or_after.map(xml::format_instant).as_deref(),
        );
        out.push_str("><saml:AuthnContext>");
        if let Some(class_ref) = &self.authn_context_class_ref {
            xml::push_text_element(out, "saml:AuthnContextClassRef", class_ref);
        }
        out.push_str("</saml:AuthnContext></saml:AuthnStatement>");
    }
}

/// `saml:AttributeStatement`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeStatement {
    /// Attributes.
    pub attributes: Vec<Attribute>,
}

impl AttributeStatement {
    fn from_node(node: Node<'_, '_>) -> Self {
        Self {
            attributes: xml::children(node, SAML_NS, "Attribute")
                .map(Attribute::from_node)
                .collect(),
        }
    }

    fn write_xml(&self, out: &mut String) {
        out.push_str("<saml:AttributeStatement>");
        for attribute in &self.attributes {
            attribute.write_xml(out);
        }
        out.push_str("</saml:AttributeStatement>");
    }
}

/// `saml:Attribute`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// `Name`.
    pub name: String,
    /// `NameFormat`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_format: Option<String>,
    /// `FriendlyName`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    /// String values.
    pub values: Vec<String>,
}

impl Attribute {
    /// Creates an attribute.
    #[must_use]
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            name_format: None,
            friendly_name: None,
            values,
        }
    }

    fn from_node(node: Node<'_, '_>) -> Self {
        Self {
            name: node.attribute("Name").unwrap_or_default().to_string(),
            name_format: node.attribute("NameFormat").map(String::from),
            friendly_name: node.attribute("FriendlyName").map(String::from),
            values: xml::children(node, SAML_NS, "AttributeValue").map(xml::text).collect(),
        }
    }

    fn write_xml(&self, out: &mut String) {
        out.push_str("<saml:Attribute");
        xml::push_attr(out, "Name", Some(&self.name));
        xml::push_attr(out, "NameFormat", self.name_format.as_deref());
        xml::push_attr(out, "FriendlyName", self.friendly_name.as_deref());
        out.push('>');
        for value in &self.values {
            xml::push_text_element(out, "saml:AttributeValue", value);
        }
        out.push_str("</saml:Attribute>");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::confirmation_methods;
    use chrono::{Duration, TimeZone};

    fn sample() -> Assertion {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        Assertion::new("https://idp.example.com")
            .with_id("_b8977dc86cda41493fba68b32ae9291d")
            .with_issue_instant(now)
            .with_subject(
                Subject::with_name_id(NameId::email("alice@example.com")).with_confirmation(
                    SubjectConfirmation::new(confirmation_methods::BEARER).with_data(
                        SubjectConfirmationData::for_recipient("https://sp.example.com/acs")
                            .with_not_on_or_after(now + Duration::minutes(5))
                            .with_in_response_to("id123"),
                    ),
                ),
            )
            .with_conditions(
                Conditions::new()
                    .with_window(Some(now), Some(now + Duration::minutes(5)))
                    .with(Condition::AudienceRestriction(vec!["https://sp.example.com".into()]))
                    .with(Condition::OneTimeUse)
                    .with(Condition::ProxyRestriction {
                        count: Some(2),
                        audiences: vec!["https://proxy.example.com".into()],
                    }),
            )
            .with_statement(Statement::Authn(
                AuthnStatement::new(now)
                    .with_session_index("s-1")
                    .with_class_ref("urn:oasis:names:tc:SAML:2.0:ac:classes:Password"),
            ))
            .with_statement(Statement::Attribute(AttributeStatement {
                attributes: vec![Attribute::new("mail", vec!["alice@example.com".into()])],
            }))
    }

    #[test]
    fn xml_roundtrip() {
        let assertion = sample();
        let parsed = Assertion::parse(&assertion.to_xml()).unwrap();
        assert_eq!(parsed, assertion);
    }

    #[test]
    fn accessors() {
        let assertion = sample();
        assert_eq!(assertion.session_index(), Some("s-1"));
        assert_eq!(assertion.name_id().map(|n| n.value.as_str()), Some("alice@example.com"));
        assert!(assertion.is_one_time_use());
        assert_eq!(assertion.attributes().count(), 1);
        assert_eq!(
            assertion.conditions.as_ref().unwrap().audience_restrictions().count(),
            1
        );
    }

    #[test]
    fn key_info_confirmation_data() {
        let xml = format!(
            r#"<saml:Assertion xmlns:saml="{SAML_NS}" xmlns:xsi="{XSI_NS}" xmlns:ds="{XMLDSIG_NS}" ID="a1" Version="2.0" IssueInstant="2024-01-01T00:00:00Z">
                 <saml:Subject>
                   <saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:holder-of-key">
                     <saml:SubjectConfirmationData xsi:type="saml:KeyInfoConfirmationDataType" Recipient="https://sp/acs">
                       <ds:KeyInfo><ds:KeyName>k1</ds:KeyName></ds:KeyInfo>
                       <ds:KeyInfo/>
                     </saml:SubjectConfirmationData>
                   </saml:SubjectConfirmation>
                 </saml:Subject>
               </saml:Assertion>"#
        );
        let assertion = Assertion::parse(&xml).unwrap();
        let confirmation = assertion.subject.as_ref().unwrap().confirmations().next().unwrap();
        let key_infos = confirmation.data.as_ref().unwrap().key_infos.as_ref().unwrap();
        assert_eq!(key_infos.len(), 2);
        assert!(!key_infos[0].is_empty());
        assert!(key_infos[1].is_empty());
    }

    #[test]
    fn missing_optional_fields_parse() {
        let xml = format!(r#"<saml:Assertion xmlns:saml="{SAML_NS}" Version="1.1"/>"#);
        let assertion = Assertion::parse(&xml).unwrap();
        assert!(assertion.id.is_none());
        assert!(assertion.issuer.is_none());
        assert_eq!(assertion.version, "1.1");
    }

    #[test]
    fn negative_proxy_count_parses() {
        let xml = format!(
            r#"<saml:Assertion xmlns:saml="{SAML_NS}"><saml:Conditions><saml:ProxyRestriction Count="-1"/></saml:Conditions></saml:Assertion>"#
        );
        let assertion = Assertion::parse(&xml).unwrap();
        assert_eq!(
            assertion.conditions.unwrap().items,
            vec![Condition::ProxyRestriction { count: Some(-1), audiences: vec![] }]
        );
    }

    #[test]
    fn non_assertion_root_rejected() {
        assert!(matches!(
            Assertion::parse("<Response/>"),
            Err(SamlError::InvalidAssertion(_))
        ));
    }
}
