//! SAML 2.0 metadata.
//!
//! Entity descriptors for identity and service providers: keys, endpoints per
//! binding, and supported NameID formats. [`MetadataParser`] reads
//! `EntityDescriptor` and `EntitiesDescriptor` documents, checking an
//! optional signature; [`MetadataStore`] holds the trusted set as an
//! immutable snapshot that is swapped as a whole on refresh.

mod parser;
mod store;

pub use parser::*;
pub use store::*;

use chrono::{DateTime, Utc};
use fed_crypto::{Certificate, PublicKey};
use roxmltree::Node;
use tracing::debug;

use crate::error::{SamlError, SamlResult};
use crate::types::{SamlBinding, MD_NS, SAMLP_NS, XMLDSIG_NS};
use crate::xml;

/// Intended use of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyUse {
    /// Signature creation and verification.
    Signing,
    /// Key transport for encryption.
    Encryption,
    /// No `use` attribute: valid for both.
    Unspecified,
}

impl KeyUse {
    /// Returns the `use` attribute value.
    #[must_use]
    pub const fn as_str(&self) -> Option<&'static str> {
        match self {
            Self::Signing => Some("signing"),
            Self::Encryption => Some("encryption"),
            Self::Unspecified => None,
        }
    }

    const fn signs(self) -> bool {
        matches!(self, Self::Signing | Self::Unspecified)
    }

    const fn encrypts(self) -> bool {
        matches!(self, Self::Encryption | Self::Unspecified)
    }
}

/// `md:KeyDescriptor` with an X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescriptor {
    /// Key use.
    pub key_use: KeyUse,
    /// The certificate.
    pub certificate: Certificate,
}

impl KeyDescriptor {
    /// A signing key.
    #[must_use]
    pub const fn signing(certificate: Certificate) -> Self {
        Self {
            key_use: KeyUse::Signing,
            certificate,
        }
    }

    /// An encryption key.
    #[must_use]
    pub const fn encryption(certificate: Certificate) -> Self {
        Self {
            key_use: KeyUse::Encryption,
            certificate,
        }
    }

    fn from_node(node: Node<'_, '_>) -> SamlResult<Option<Self>> {
        let key_use = match node.attribute("use") {
            Some("signing") => KeyUse::Signing,
            Some("encryption") => KeyUse::Encryption,
            None => KeyUse::Unspecified,
            Some(other) => {
                return Err(SamlError::InvalidMetadata(format!("unknown key use {other:?}")));
            }
        };
        let certificate = node
            .descendants()
            .find(|n| xml::is_element(*n, XMLDSIG_NS, "X509Certificate"));
        let Some(certificate) = certificate else {
            debug!("skipping KeyDescriptor without X509Certificate");
            return Ok(None);
        };
        Ok(Some(Self {
            key_use,
            certificate: Certificate::from_base64(&xml::text(certificate))?,
        }))
    }

    fn write_xml(&self, out: &mut String) {
        out.push_str("<md:KeyDescriptor");
        xml::push_attr(out, "use", self.key_use.as_str());
        out.push_str("><ds:KeyInfo xmlns:ds=\"");
        out.push_str(XMLDSIG_NS);
        out.push_str("\"><ds:X509Data>");
        xml::push_text_element(out, "ds:X509Certificate", &self.certificate.to_base64());
        out.push_str("</ds:X509Data></ds:KeyInfo></md:KeyDescriptor>");
    }
}

/// A protocol endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Binding used at this location.
    pub binding: SamlBinding,
    /// Location URL.
    pub location: String,
    /// Where responses go, when different from `location`.
    pub response_location: Option<String>,
}

impl Endpoint {
    /// Creates an endpoint.
    #[must_use]
    pub fn new(binding: SamlBinding, location: impl Into<String>) -> Self {
        Self {
            binding,
            location: location.into(),
            response_location: None,
        }
    }

    /// Sets the response location.
    #[must_use]
    pub fn with_response_location(mut self, location: impl Into<String>) -> Self {
        self.response_location = Some(location.into());
        self
    }

    /// Where a response to a request received here should be sent.
    #[must_use]
    pub fn response_url(&self) -> &str {
        self.response_location.as_deref().unwrap_or(&self.location)
    }

    fn from_node(node: Node<'_, '_>) -> SamlResult<Option<Self>> {
        let binding_uri = xml::required_attr(node, "Binding")?;
        let Some(binding) = SamlBinding::from_uri(binding_uri) else {
            debug!(binding = %binding_uri, "skipping endpoint with unsupported binding");
            return Ok(None);
        };
        let location = xml::required_attr(node, "Location")?;
        xml::require_absolute_uri("Location", location)?;
        Ok(Some(Self {
            binding,
            location: location.to_string(),
            response_location: node.attribute("ResponseLocation").map(String::from),
        }))
    }

    fn write_xml(&self, out: &mut String, tag: &str, index: Option<(u16, bool)>) {
        out.push('<');
        out.push_str(tag);
        xml::push_attr(out, "Binding", Some(self.binding.uri()));
        xml::push_attr(out, "Location", Some(&self.location));
        xml::push_attr(out, "ResponseLocation", self.response_location.as_deref());
        if let Some((index, is_default)) = index {
            xml::push_attr(out, "index", Some(&index.to_string()));
            if is_default {
                xml::push_attr(out, "isDefault", Some("true"));
            }
        }
        out.push_str("/>");
    }
}

/// An endpoint with an `index`, used for assertion consumers and artifact
/// resolution services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEndpoint {
    /// The endpoint.
    pub endpoint: Endpoint,
    /// Index referenced by requests and artifacts.
    pub index: u16,
    /// Whether this is the default among its siblings.
    pub is_default: bool,
}

impl IndexedEndpoint {
    /// Creates an indexed endpoint.
    #[must_use]
    pub const fn new(endpoint: Endpoint, index: u16) -> Self {
        Self {
            endpoint,
            index,
            is_default: false,
        }
    }

    /// Marks the endpoint as default.
    #[must_use]
    pub const fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    fn from_node(node: Node<'_, '_>) -> SamlResult<Option<Self>> {
        let Some(endpoint) = Endpoint::from_node(node)? else {
            return Ok(None);
        };
        let index = xml::required_attr(node, "index")?;
        let index = index
            .parse()
            .map_err(|_| SamlError::InvalidMetadata(format!("invalid endpoint index {index:?}")))?;
        Ok(Some(Self {
            endpoint,
            index,
            is_default: matches!(node.attribute("isDefault"), Some("true" | "1")),
        }))
    }
}

/// Picks the default indexed endpoint: `isDefault="true"` first, then the
/// first one without the flag.
fn default_indexed<'a>(
    endpoints: impl Iterator<Item = &'a IndexedEndpoint> + Clone,
) -> Option<&'a IndexedEndpoint> {
    endpoints
        .clone()
        .find(|e| e.is_default)
        .or_else(|| endpoints.clone().next())
}

/// Keys, logout and artifact endpoints and NameID formats shared by both
/// descriptor roles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleDescriptor {
    /// Keys.
    pub keys: Vec<KeyDescriptor>,
    /// `SingleLogoutService` endpoints.
    pub single_logout: Vec<Endpoint>,
    /// `ArtifactResolutionService` endpoints.
    pub artifact_resolution: Vec<IndexedEndpoint>,
    /// Supported NameID formats.
    pub name_id_formats: Vec<String>,
}

impl RoleDescriptor {
    /// Public keys usable for signature verification.
    #[must_use]
    pub fn signing_keys(&self) -> Vec<PublicKey> {
        self.keys
            .iter()
            .filter(|k| k.key_use.signs())
            .map(|k| k.certificate.public_key().clone())
            .collect()
    }

    /// First certificate usable for encryption.
    #[must_use]
    pub fn encryption_certificate(&self) -> Option<&Certificate> {
        self.keys.iter().find(|k| k.key_use.encrypts()).map(|k| &k.certificate)
    }

    /// Logout endpoint for a binding.
    #[must_use]
    pub fn single_logout_service(&self, binding: SamlBinding) -> Option<&Endpoint> {
        self.single_logout.iter().find(|e| e.binding == binding)
    }

    /// Artifact resolution endpoint by index, or the default one.
    #[must_use]
    pub fn artifact_resolution_service(&self, index: Option<u16>) -> Option<&Endpoint> {
        match index {
            Some(index) => self.artifact_resolution.iter().find(|e| e.index == index),
            None => default_indexed(self.artifact_resolution.iter()),
        }
        .map(|e| &e.endpoint)
    }

    fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        let mut role = Self::default();
        for child in xml::child_elements(node) {
            if child.tag_name().namespace() != Some(MD_NS) {
                continue;
            }
            match child.tag_name().name() {
                "KeyDescriptor" => role.keys.extend(KeyDescriptor::from_node(child)?),
                "SingleLogoutService" => role.single_logout.extend(Endpoint::from_node(child)?),
                "ArtifactResolutionService" => {
                    role.artifact_resolution.extend(IndexedEndpoint::from_node(child)?);
                }
                "NameIDFormat" => role.name_id_formats.push(xml::text(child).trim().to_string()),
                _ => {}
            }
        }
        Ok(role)
    }

    fn write_keys(&self, out: &mut String) {
        for key in &self.keys {
            key.write_xml(out);
        }
    }

    fn write_services(&self, out: &mut String) {
        for endpoint in &self.artifact_resolution {
            endpoint.endpoint.write_xml(
                out,
                "md:ArtifactResolutionService",
                Some((endpoint.index, endpoint.is_default)),
            );
        }
        for endpoint in &self.single_logout {
            endpoint.write_xml(out, "md:SingleLogoutService", None);
        }
        for format in &self.name_id_formats {
            xml::push_text_element(out, "md:NameIDFormat", format);
        }
    }
}

/// `md:IDPSSODescriptor`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdpSsoDescriptor {
    /// Shared role data.
    pub role: RoleDescriptor,
    /// `WantAuthnRequestsSigned`.
    pub want_authn_requests_signed: bool,
    /// `SingleSignOnService` endpoints.
    pub single_sign_on: Vec<Endpoint>,
}

impl IdpSsoDescriptor {
    /// Sign-on endpoint for a binding.
    #[must_use]
    pub fn single_sign_on_service(&self, binding: SamlBinding) -> Option<&Endpoint> {
        self.single_sign_on.iter().find(|e| e.binding == binding)
    }

    fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        Ok(Self {
            role: RoleDescriptor::from_node(node)?,
            want_authn_requests_signed: bool_attr(node, "WantAuthnRequestsSigned"),
            single_sign_on: xml::children(node, MD_NS, "SingleSignOnService")
                .map(Endpoint::from_node)
                .collect::<SamlResult<Vec<_>>>()?
                .into_iter()
                .flatten()
                .collect(),
        })
    }

    fn write_xml(&self, out: &mut String) {
        out.push_str("<md:IDPSSODescriptor");
        if self.want_authn_requests_signed {
            xml::push_attr(out, "WantAuthnRequestsSigned", Some("true"));
        }
        xml::push_attr(out, "protocolSupportEnumeration", Some(SAMLP_NS));
        out.push('>');
        self.role.write_keys(out);
        self.role.write_services(out);
        for endpoint in &self.single_sign_on {
            endpoint.write_xml(out, "md:SingleSignOnService", None);
        }
        out.push_str("</md:IDPSSODescriptor>");
    }
}

/// `md:SPSSODescriptor`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpSsoDescriptor {
    /// Shared role data.
    pub role: RoleDescriptor,
    /// `AuthnRequestsSigned`.
    pub authn_requests_signed: bool,
    /// `WantAssertionsSigned`.
    pub want_assertions_signed: bool,
    /// `AssertionConsumerService` endpoints.
    pub assertion_consumers: Vec<IndexedEndpoint>,
}

impl SpSsoDescriptor {
    /// Assertion consumer by index, or the default one.
    #[must_use]
    pub fn assertion_consumer_service(&self, index: Option<u16>) -> Option<&Endpoint> {
        match index {
            Some(index) => self.assertion_consumers.iter().find(|e| e.index == index),
            None => default_indexed(self.assertion_consumers.iter()),
        }
        .map(|e| &e.endpoint)
    }

    fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        Ok(Self {
            role: RoleDescriptor::from_node(node)?,
            authn_requests_signed: bool_attr(node, "AuthnRequestsSigned"),
            want_assertions_signed: bool_attr(node, "WantAssertionsSigned"),
            assertion_consumers: xml::children(node, MD_NS, "AssertionConsumerService")
                .map(IndexedEndpoint::from_node)
                .collect::<SamlResult<Vec<_>>>()?
                .into_iter()
                .flatten()
                .collect(),
        })
    }

    fn write_xml(&self, out: &mut String) {
        out.push_str("<md:SPSSODescriptor");
        xml::push_attr(out, "AuthnRequestsSigned", Some(bool_str(self.authn_requests_signed)));
        xml::push_attr(out, "WantAssertionsSigned", Some(bool_str(self.want_assertions_signed)));
        xml::push_attr(out, "protocolSupportEnumeration", Some(SAMLP_NS));
        out.push('>');
        self.role.write_keys(out);
        self.role.write_services(out);
        for endpoint in &self.assertion_consumers {
            endpoint.endpoint.write_xml(
                out,
                "md:AssertionConsumerService",
                Some((endpoint.index, endpoint.is_default)),
            );
        }
        out.push_str("</md:SPSSODescriptor>");
    }
}

/// `md:EntityDescriptor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// `entityID`.
    pub entity_id: String,
    /// XML `ID`, needed when the descriptor is signed.
    pub id: Option<String>,
    /// `validUntil`.
    pub valid_until: Option<DateTime<Utc>>,
    /// Identity provider role.
    pub idp: Option<IdpSsoDescriptor>,
    /// Service provider role.
    pub sp: Option<SpSsoDescriptor>,
}

impl EntityDescriptor {
    /// Creates a descriptor with no roles.
    #[must_use]
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            id: None,
            valid_until: None,
            idp: None,
            sp: None,
        }
    }

    /// Sets the XML ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets `validUntil`.
    #[must_use]
    pub const fn with_valid_until(mut self, instant: DateTime<Utc>) -> Self {
        self.valid_until = Some(instant);
        self
    }

    /// Adds the identity provider role.
    #[must_use]
    pub fn with_idp(mut self, idp: IdpSsoDescriptor) -> Self {
        self.idp = Some(idp);
        self
    }

    /// Adds the service provider role.
    #[must_use]
    pub fn with_sp(mut self, sp: SpSsoDescriptor) -> Self {
        self.sp = Some(sp);
        self
    }

    /// Returns true once `validUntil` has passed.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.is_some_and(|until| until <= now)
    }

    /// Signing keys of every role.
    #[must_use]
    pub fn signing_keys(&self) -> Vec<PublicKey> {
        let mut keys = Vec::new();
        if let Some(idp) = &self.idp {
            keys.extend(idp.role.signing_keys());
        }
        if let Some(sp) = &self.sp {
            keys.extend(sp.role.signing_keys());
        }
        keys
    }

    /// Returns the IdP role.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::InvalidMetadata`] if the entity is not an IdP.
    pub fn require_idp(&self) -> SamlResult<&IdpSsoDescriptor> {
        self.idp
            .as_ref()
            .ok_or_else(|| SamlError::InvalidMetadata(format!("{} has no IDPSSODescriptor", self.entity_id)))
    }

    /// Returns the SP role.
    ///
    /// # Errors
    ///
    /// Returns [`SamlError::InvalidMetadata`] if the entity is not an SP.
    pub fn require_sp(&self) -> SamlResult<&SpSsoDescriptor> {
        self.sp
            .as_ref()
            .ok_or_else(|| SamlError::InvalidMetadata(format!("{} has no SPSSODescriptor", self.entity_id)))
    }

    /// Parses an `md:EntityDescriptor` element.
    ///
    /// # Errors
    ///
    /// Returns an error if `entityID` is missing or a key or endpoint is
    /// malformed.
    pub fn from_node(node: Node<'_, '_>) -> SamlResult<Self> {
        if !xml::is_element(node, MD_NS, "EntityDescriptor") {
            return Err(SamlError::InvalidMetadata(format!(
                "expected md:EntityDescriptor, found {}",
                node.tag_name().name()
            )));
        }
        Ok(Self {
            entity_id: xml::required_attr(node, "entityID")?.to_string(),
            id: xml::element_id(node).map(String::from),
            valid_until: xml::optional_instant(node, "validUntil")?,
            idp: xml::child(node, MD_NS, "IDPSSODescriptor")
                .map(IdpSsoDescriptor::from_node)
                .transpose()?,
            sp: xml::child(node, MD_NS, "SPSSODescriptor")
                .map(SpSsoDescriptor::from_node)
                .transpose()?,
        })
    }

    /// Serializes the descriptor.
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(4096);
        out.push_str("<md:EntityDescriptor xmlns:md=\"");
        out.push_str(MD_NS);
        out.push('"');
        xml::push_attr(&mut out, "ID", self.id.as_deref());
        xml::push_attr(&mut out, "entityID", Some(&self.entity_id));
        xml::push_attr(&mut out, "validUntil", self.valid_until.map(xml::format_instant).as_deref());
        out.push('>');
        if let Some(idp) = &self.idp {
            idp.write_xml(&mut out);
        }
        if let Some(sp) = &self.sp {
            sp.write_xml(&mut out);
        }
        out.push_str("</md:EntityDescriptor>");
        out
    }
}

fn bool_attr(node: Node<'_, '_>, name: &str) -> bool {
    matches!(node.attribute(name), Some("true" | "1"))
}

const fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::NameIdFormat;

    pub(crate) const IDP_CERT: &str =
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../../testdata/idp-cert.pem"));
    pub(crate) const SP_CERT: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../../testdata/sp-cert.pem"));

    pub(crate) fn idp_descriptor(entity_id: &str) -> EntityDescriptor {
        let cert = Certificate::from_pem(IDP_CERT).unwrap();
        EntityDescriptor::new(entity_id).with_idp(IdpSsoDescriptor {
            role: RoleDescriptor {
                keys: vec![KeyDescriptor::signing(cert.clone()), KeyDescriptor::encryption(cert)],
                single_logout: vec![Endpoint::new(SamlBinding::HttpRedirect, format!("{entity_id}/slo"))],
                artifact_resolution: vec![IndexedEndpoint::new(
                    Endpoint::new(SamlBinding::Soap, format!("{entity_id}/ars")),
                    0,
                )],
                name_id_formats: vec![NameIdFormat::Persistent.uri().to_string()],
            },
            want_authn_requests_signed: true,
            single_sign_on: vec![
                Endpoint::new(SamlBinding::HttpRedirect, format!("{entity_id}/sso")),
                Endpoint::new(SamlBinding::HttpPost, format!("{entity_id}/sso-post")),
            ],
        })
    }

    #[test]
    fn descriptor_roundtrip() {
        let descriptor = idp_descriptor("https://idp.example.com").with_id("_md1");
        let xml_text = descriptor.to_xml();
        let doc = xml::parse(&xml_text).unwrap();
        let parsed = EntityDescriptor::from_node(doc.root_element()).unwrap();
        assert_eq!(parsed, descriptor);

        let idp = parsed.require_idp().unwrap();
        assert_eq!(
            idp.single_sign_on_service(SamlBinding::HttpPost).map(|e| e.location.as_str()),
            Some("https://idp.example.com/sso-post")
        );
        assert!(idp.role.single_logout_service(SamlBinding::HttpPost).is_none());
        assert_eq!(
            idp.role.artifact_resolution_service(None).map(|e| e.location.as_str()),
            Some("https://idp.example.com/ars")
        );
        assert_eq!(parsed.signing_keys().len(), 1);
        assert!(parsed.require_sp().is_err());
    }

    #[test]
    fn sp_descriptor_default_consumer() {
        let cert = Certificate::from_pem(SP_CERT).unwrap();
        let sp = SpSsoDescriptor {
            role: RoleDescriptor {
                keys: vec![KeyDescriptor {
                    key_use: KeyUse::Unspecified,
                    certificate: cert,
                }],
                ..RoleDescriptor::default()
            },
            authn_requests_signed: true,
            want_assertions_signed: true,
            assertion_consumers: vec![
                IndexedEndpoint::new(Endpoint::new(SamlBinding::HttpPost, "https://sp.example.com/acs"), 0),
                IndexedEndpoint::new(Endpoint::new(SamlBinding::HttpArtifact, "https://sp.example.com/art"), 1)
                    .as_default(),
            ],
        };
        let descriptor = EntityDescriptor::new("https://sp.example.com").with_sp(sp);
        let doc_text = descriptor.to_xml();
        let doc = xml::parse(&doc_text).unwrap();
        let parsed = EntityDescriptor::from_node(doc.root_element()).unwrap();
        let sp = parsed.require_sp().unwrap();
        assert_eq!(
            sp.assertion_consumer_service(None).map(|e| e.binding),
            Some(SamlBinding::HttpArtifact)
        );
        assert_eq!(
            sp.assertion_consumer_service(Some(0)).map(|e| e.binding),
            Some(SamlBinding::HttpPost)
        );
        assert!(sp.role.encryption_certificate().is_some());
        assert_eq!(parsed.signing_keys().len(), 1);
    }

    #[test]
    fn unsupported_binding_skipped() {
        let xml_text = format!(
            r#"<md:EntityDescriptor xmlns:md="{MD_NS}" entityID="urn:idp"><md:IDPSSODescriptor protocolSupportEnumeration="{SAMLP_NS}"><md:SingleSignOnService Binding="urn:x:PAOS" Location="https://idp/ecp"/><md:SingleSignOnService Binding="{}" Location="https://idp/sso"/></md:IDPSSODescriptor></md:EntityDescriptor>"#,
            SamlBinding::HttpRedirect.uri()
        );
        let doc = xml::parse(&xml_text).unwrap();
        let parsed = EntityDescriptor::from_node(doc.root_element()).unwrap();
        assert_eq!(parsed.require_idp().unwrap().single_sign_on.len(), 1);
    }

    #[test]
    fn relative_location_rejected() {
        let xml_text = format!(
            r#"<md:EntityDescriptor xmlns:md="{MD_NS}" entityID="urn:idp"><md:IDPSSODescriptor><md:SingleSignOnService Binding="{}" Location="/sso"/></md:IDPSSODescriptor></md:EntityDescriptor>"#,
            SamlBinding::HttpRedirect.uri()
        );
        let doc = xml::parse(&xml_text).unwrap();
        assert!(matches!(
            EntityDescriptor::from_node(doc.root_element()),
            Err(SamlError::InvalidUri { .. })
        ));
    }
}
