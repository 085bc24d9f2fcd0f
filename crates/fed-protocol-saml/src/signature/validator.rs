//! XML Signature verification.
//!
//! Verification fails closed: any unexpected structure in the signature is an
//! error, never a skipped check. The `Reference` must point at the element
//! being verified, and that element's ID must be unique in the document.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fed_crypto::{Certificate, DigestAlgorithm, PublicKey};
use roxmltree::{Document, Node};
use tracing::debug;

use super::{signature_child, unsupported, SignatureAlgorithm};
use crate::error::{SamlError, SamlResult};
use crate::types::{transforms, XMLDSIG_NS};
use crate::xml::{self, CanonicalizationAlgorithm, Canonicalizer};

const EXC_C14N_NS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

/// Verifies enveloped and detached signatures against candidate keys.
#[derive(Debug, Clone)]
pub struct XmlSignatureValidator {
    keys: Vec<PublicKey>,
    allow_sha1: bool,
}

impl XmlSignatureValidator {
    /// Creates a validator trying `keys` in order. SHA-1 is accepted.
    ///
    /// With no keys, the certificate embedded in the signature's `KeyInfo` is
    /// used; only do that when the document's origin is otherwise trusted.
    #[must_use]
    pub fn new(keys: Vec<PublicKey>) -> Self {
        Self { keys, allow_sha1: true }
    }

    /// Creates a validator from trusted certificates.
    #[must_use]
    pub fn from_certificates<'a>(certificates: impl IntoIterator<Item = &'a Certificate>) -> Self {
        Self::new(certificates.into_iter().map(|c| c.public_key().clone()).collect())
    }

    /// Sets whether SHA-1 signatures and digests are accepted.
    #[must_use]
    pub const fn with_allow_sha1(mut self, allow: bool) -> Self {
        self.allow_sha1 = allow;
        self
    }

    /// Returns true if candidate keys are configured.
    #[must_use]
    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Verifies the signature of the element with `ID="id"` in `document`.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not parse, the ID is missing or
    /// duplicated, or the signature does not verify.
    pub fn validate(&self, document: &str, id: &str) -> SamlResult<()> {
        let doc = xml::parse(document)?;
        let element = xml::find_by_id(&doc, id)?;
        self.verify_element(&doc, element)
    }

    /// Verifies the signature of the document's root element.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not parse or the root's signature
    /// does not verify.
    pub fn validate_root(&self, document: &str) -> SamlResult<()> {
        let doc = xml::parse(document)?;
        self.verify_element(&doc, doc.root_element())
    }

    /// Returns true if the root element carries a valid signature.
    #[must_use]
    pub fn verify(&self, document: &str) -> bool {
        self.validate_root(document).is_ok()
    }

    /// Returns true if `element` carries a valid signature.
    #[must_use]
    pub fn is_valid(&self, doc: &Document<'_>, element: Node<'_, '_>) -> bool {
        self.verify_element(doc, element).is_ok()
    }

    /// Verifies the enveloped signature that is a direct child of `element`.
    ///
    /// # Errors
    ///
    /// - [`SamlError::SignatureMissing`] if there is no signature.
    /// - [`SamlError::SignatureWrapping`] if the reference does not name this
    ///   element or its ID is not unique.
    /// - [`SamlError::SignatureInvalid`] if the digest or signature value does
    ///   not match.
    /// - [`SamlError::UnsupportedAlgorithm`] for unknown or disabled algorithms.
    pub fn verify_element(&self, doc: &Document<'_>, element: Node<'_, '_>) -> SamlResult<()> {
        let signature = signature_child(element).ok_or_else(|| {
            SamlError::SignatureMissing(format!("{} is not signed", element.tag_name().name()))
        })?;
        let signed_info = xml::required_child(signature, XMLDSIG_NS, "SignedInfo")?;

        let c14n_method = xml::required_child(signed_info, XMLDSIG_NS, "CanonicalizationMethod")?;
        let c14n_uri = xml::required_attr(c14n_method, "Algorithm")?;
        let c14n = CanonicalizationAlgorithm::from_uri(c14n_uri)
            .ok_or_else(|| unsupported("canonicalization", c14n_uri))?;

        let method = xml::required_child(signed_info, XMLDSIG_NS, "SignatureMethod")?;
        let method_uri = xml::required_attr(method, "Algorithm")?;
        let algorithm = SignatureAlgorithm::from_uri(method_uri)
            .ok_or_else(|| unsupported("signature method", method_uri))?;
        if algorithm.is_legacy() && !self.allow_sha1 {
            return Err(unsupported("disabled signature method", method_uri));
        }

        let mut references = xml::children(signed_info, XMLDSIG_NS, "Reference");
        let reference = references
            .next()
            .ok_or_else(|| SamlError::SignatureInvalid("SignedInfo has no Reference".to_string()))?;
        if references.next().is_some() {
            return Err(SamlError::SignatureWrapping(
                "SignedInfo must contain exactly one Reference".to_string(),
            ));
        }

        self.check_reference_target(doc, element, reference)?;
        self.check_digest(element, signature, reference)?;

        let canonical_signed_info = Canonicalizer::new(c14n)
            .with_inclusive_prefixes(inclusive_prefixes(c14n_method))
            .canonicalize(signed_info);
        let value = decode_base64(xml::required_child(signature, XMLDSIG_NS, "SignatureValue")?)?;

        let embedded;
        let keys: &[PublicKey] = if self.keys.is_empty() {
            embedded = embedded_keys(signature)?;
            &embedded
        } else {
            &self.keys
        };
        if keys.is_empty() {
            return Err(SamlError::MissingCredential(
                "no key available to verify the signature".to_string(),
            ));
        }

        let verified = keys
            .iter()
            .any(|key| fed_crypto::rsa_verify(key, algorithm.digest(), canonical_signed_info.as_bytes(), &value));
        if verified {
            debug!(
                element = %element.tag_name().name(),
                algorithm = %algorithm.uri(),
                "signature verified"
            );
            Ok(())
        } else {
            Err(SamlError::SignatureInvalid(format!(
                "no candidate key verifies the signature of {}",
                element.tag_name().name()
            )))
        }
    }

    /// Verifies a detached signature (HTTP-Redirect binding).
    ///
    /// # Errors
    ///
    /// Returns an error if SHA-1 is disabled for a SHA-1 algorithm, no key is
    /// configured, or no key verifies.
    pub fn verify_detached(&self, algorithm: SignatureAlgorithm, data: &[u8], signature: &[u8]) -> SamlResult<()> {
        if algorithm.is_legacy() && !self.allow_sha1 {
            return Err(unsupported("disabled signature method", algorithm.uri()));
        }
        if self.keys.is_empty() {
            return Err(SamlError::MissingCredential(
                "no key available to verify the query signature".to_string(),
            ));
        }
        if self
            .keys
            .iter()
            .any(|key| fed_crypto::rsa_verify(key, algorithm.digest(), data, signature))
        {
            Ok(())
        } else {
            Err(SamlError::SignatureInvalid("query signature does not verify".to_string()))
        }
    }

    fn check_reference_target(&self, doc: &Document<'_>, element: Node<'_, '_>, reference: Node<'_, '_>) -> SamlResult<()> {
        let id = xml::element_id(element).ok_or_else(|| {
            SamlError::SignatureWrapping(format!("signed {} has no ID", element.tag_name().name()))
        })?;
        let uri = reference.attribute("URI").unwrap_or_default();
        if uri.strip_prefix('#') != Some(id) {
            return Err(SamlError::SignatureWrapping(format!(
                "reference {uri:?} does not name element {id}"
            )));
        }
        let target = xml::find_by_id(doc, id)?;
        if target.id() != element.id() {
            return Err(SamlError::SignatureWrapping(format!("ID {id} resolves elsewhere")));
        }
        Ok(())
    }

    fn check_digest(&self, element: Node<'_, '_>, signature: Node<'_, '_>, reference: Node<'_, '_>) -> SamlResult<()> {
        let mut c14n = CanonicalizationAlgorithm::Inclusive;
        let mut prefixes = Vec::new();
        let mut enveloped = false;
        if let Some(list) = xml::child(reference, XMLDSIG_NS, "Transforms") {
            for transform in xml::children(list, XMLDSIG_NS, "Transform") {
                let uri = xml::required_attr(transform, "Algorithm")?;
                if uri == transforms::ENVELOPED_SIGNATURE {
                    enveloped = true;
                } else if let Some(alg) = CanonicalizationAlgorithm::from_uri(uri) {
                    c14n = alg;
                    prefixes = inclusive_prefixes(transform);
                } else {
                    return Err(unsupported("transform", uri));
                }
            }
        }

        let digest_method = xml::required_child(reference, XMLDSIG_NS, "DigestMethod")?;
        let digest_uri = xml::required_attr(digest_method, "Algorithm")?;
        let digest = DigestAlgorithm::from_xml_uri(digest_uri).ok_or_else(|| unsupported("digest", digest_uri))?;
        if digest.is_legacy() && !self.allow_sha1 {
            return Err(unsupported("disabled digest", digest_uri));
        }
        let expected = decode_base64(xml::required_child(reference, XMLDSIG_NS, "DigestValue")?)?;

        let mut canonicalizer = Canonicalizer::new(c14n)
            .with_inclusive_prefixes(prefixes)
            .without_comments();
        if enveloped {
            canonicalizer = canonicalizer.excluding(signature.id());
        }
        let actual = fed_crypto::digest(digest, canonicalizer.canonicalize(element).as_bytes());
        if actual != expected {
            return Err(SamlError::SignatureInvalid(format!(
                "digest mismatch for {}",
                element.tag_name().name()
            )));
        }
        Ok(())
    }
}

fn inclusive_prefixes(transform: Node<'_, '_>) -> Vec<String> {
    xml::child(transform, EXC_C14N_NS, "InclusiveNamespaces")
        .and_then(|n| n.attribute("PrefixList"))
        .map(|list| list.split_whitespace().map(String::from).collect())
        .unwrap_or_default()
}

fn decode_base64(node: Node<'_, '_>) -> SamlResult<Vec<u8>> {
    Ok(STANDARD.decode(xml::compact_text(node))?)
}

fn embedded_keys(signature: Node<'_, '_>) -> SamlResult<Vec<PublicKey>> {
    let Some(key_info) = xml::child(signature, XMLDSIG_NS, "KeyInfo") else {
        return Ok(Vec::new());
    };
    xml::children(key_info, XMLDSIG_NS, "X509Data")
        .flat_map(|data| xml::children(data, XMLDSIG_NS, "X509Certificate"))
        .map(|cert| {
            Certificate::from_base64(&xml::compact_text(cert))
                .map(|c| c.public_key().clone())
                .map_err(SamlError::from)
        })
        .collect()
}
