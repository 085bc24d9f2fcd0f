//! XML Signature creation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fed_crypto::{Certificate, DigestAlgorithm, PrivateKey};
use tracing::debug;

use super::{signature_child, SignatureAlgorithm};
use crate::error::{SamlError, SamlResult};
use crate::types::{transforms, SAML_NS, XMLDSIG_NS};
use crate::xml::{self, CanonicalizationAlgorithm, Canonicalizer};

/// Signs SAML documents with an RSA key.
#[derive(Debug, Clone)]
pub struct XmlSigner {
    key: PrivateKey,
    certificate: Option<Certificate>,
    algorithm: SignatureAlgorithm,
    digest: DigestAlgorithm,
    canonicalization: CanonicalizationAlgorithm,
}

impl XmlSigner {
    /// Creates a signer using RSA-SHA256, SHA-256 digests and exclusive C14N.
    #[must_use]
    pub fn new(key: PrivateKey, certificate: Option<Certificate>) -> Self {
        Self {
            key,
            certificate,
            algorithm: SignatureAlgorithm::default(),
            digest: DigestAlgorithm::Sha256,
            canonicalization: CanonicalizationAlgorithm::Exclusive,
        }
    }

    /// Creates a signer from PEM-encoded key and certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if either PEM block is invalid.
    pub fn from_pem(key_pem: &str, certificate_pem: Option<&str>) -> SamlResult<Self> {
        let key = PrivateKey::from_pem(key_pem)?;
        let certificate = certificate_pem.map(Certificate::from_pem).transpose()?;
        Ok(Self::new(key, certificate))
    }

    /// Sets the signature algorithm.
    #[must_use]
    pub const fn with_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Sets the reference digest algorithm.
    #[must_use]
    pub const fn with_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    /// Sets the canonicalization algorithm used for the reference and `SignedInfo`.
    #[must_use]
    pub const fn with_canonicalization(mut self, canonicalization: CanonicalizationAlgorithm) -> Self {
        self.canonicalization = canonicalization;
        self
    }

    /// The signature algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Signs the element with `ID="reference_id"` and returns the new document.
    ///
    /// The `ds:Signature` is inserted immediately after the element's
    /// `saml:Issuer` child, or as its first child when there is no issuer.
    ///
    /// # Errors
    ///
    /// Returns an error if the element is missing, duplicated or already
    /// signed, or if the RSA operation fails.
    pub fn sign(&self, document: &str, reference_id: &str) -> SamlResult<String> {
        let doc = xml::parse(document)?;
        let element = xml::find_by_id(&doc, reference_id)?;
        if signature_child(element).is_some() {
            return Err(SamlError::SignatureCreation(format!(
                "element {reference_id} is already signed"
            )));
        }

        let canonical = Canonicalizer::new(self.canonicalization)
            .without_comments()
            .canonicalize(element);
        let digest_value = STANDARD.encode(fed_crypto::digest(self.digest, canonical.as_bytes()));
        let insertion = insertion_point(element)?;

        // SignedInfo is canonicalized in place, so inherited namespaces are
        // rendered exactly as a verifier will see them.
        let placeholder = insertion.apply(document, &self.signature_element(reference_id, &digest_value, ""));
        let signed_info_c14n = {
            let doc = xml::parse(&placeholder)?;
            let element = xml::find_by_id(&doc, reference_id)?;
            let signature = signature_child(element)
                .ok_or_else(|| SamlError::SignatureCreation("signature not inserted".to_string()))?;
            let signed_info = xml::required_child(signature, XMLDSIG_NS, "SignedInfo")?;
            Canonicalizer::new(self.canonicalization).canonicalize(signed_info)
        };
        let signature_value = STANDARD.encode(self.sign_bytes(signed_info_c14n.as_bytes())?);

        debug!(
            reference = %reference_id,
            algorithm = %self.algorithm.uri(),
            "signed element"
        );
        Ok(insertion.apply(
            document,
            &self.signature_element(reference_id, &digest_value, &signature_value),
        ))
    }

    /// Signs raw bytes (the HTTP-Redirect binding signs the query string).
    ///
    /// # Errors
    ///
    /// Returns an error if the RSA operation fails.
    pub fn sign_bytes(&self, data: &[u8]) -> SamlResult<Vec<u8>> {
        Ok(fed_crypto::rsa_sign(&self.key, self.algorithm.digest(), data)?)
    }

    fn signature_element(&self, reference_id: &str, digest_value: &str, signature_value: &str) -> String {
        let mut out = String::with_capacity(2048);
        out.push_str("<ds:Signature xmlns:ds=\"");
        out.push_str(XMLDSIG_NS);
        out.push_str("\"><ds:SignedInfo><ds:CanonicalizationMethod Algorithm=\"");
        out.push_str(self.canonicalization.uri());
        out.push_str("\"/><ds:SignatureMethod Algorithm=\"");
        out.push_str(self.algorithm.uri());
        out.push_str("\"/><ds:Reference URI=\"#");
        out.push_str(&xml::escape(reference_id));
        out.push_str("\"><ds:Transforms><ds:Transform Algorithm=\"");
        out.push_str(transforms::ENVELOPED_SIGNATURE);
        out.push_str("\"/><ds:Transform Algorithm=\"");
        out.push_str(self.canonicalization.uri());
        out.push_str("\"/></ds:Transforms><ds:DigestMethod Algorithm=\"");
        out.push_str(self.digest.xml_uri());
        out.push_str("\"/>");
        xml::push_text_element(&mut out, "ds:DigestValue", digest_value);
        out.push_str("</ds:Reference></ds:SignedInfo>");
        xml::push_text_element(&mut out, "ds:SignatureValue", signature_value);
        if let Some(certificate) = &self.certificate {
            out.push_str("<ds:KeyInfo><ds:X509Data>");
            xml::push_text_element(&mut out, "ds:X509Certificate", &certificate.to_base64());
            out.push_str("</ds:X509Data></ds:KeyInfo>");
        }
        out.push_str("</ds:Signature>");
        out
    }
}

/// Where the signature goes in the source text.
struct Insertion {
    offset: usize,
    /// Set when the element is self-closing: the start tag must be reopened
    /// and closed with this end tag.
    close_tag: Option<String>,
    /// End of the `/>` being replaced.
    self_closing_end: usize,
}

impl Insertion {
    fn apply(&self, document: &str, signature: &str) -> String {
        let mut out = String::with_capacity(document.len() + signature.len() + 64);
        match &self.close_tag {
            None => {
                out.push_str(&document[..self.offset]);
                out.push_str(signature);
                out.push_str(&document[self.offset..]);
            }
            Some(close) => {
                out.push_str(&document[..self.offset]);
                out.push('>');
                out.push_str(signature);
                out.push_str(close);
                out.push_str(&document[self.self_closing_end..]);
            }
        }
        out
    }
}

fn insertion_point(element: roxmltree::Node<'_, '_>) -> SamlResult<Insertion> {
    if let Some(issuer) = xml::child(element, SAML_NS, "Issuer") {
        return Ok(Insertion {
            offset: issuer.range().end,
            close_tag: None,
            self_closing_end: 0,
        });
    }

    let source = element.document().input_text();
    let start = element.range().start;
    let tag_end = xml::start_tag_end(source, start)
        .ok_or_else(|| SamlError::SignatureCreation("unterminated start tag".to_string()))?;
    if source.as_bytes()[tag_end - 1] == b'/' {
        let qname: String = source[start + 1..]
            .chars()
            .take_while(|c| !c.is_whitespace() && *c != '/' && *c != '>')
            .collect();
        Ok(Insertion {
            offset: tag_end - 1,
            close_tag: Some(format!("</{qname}>")),
            self_closing_end: tag_end + 1,
        })
    } else {
        Ok(Insertion {
            offset: tag_end + 1,
            close_tag: None,
            self_closing_end: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../../testdata/idp-key.pem"));
    const CERT: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/../../testdata/idp-cert.pem"));

    fn signer() -> XmlSigner {
        XmlSigner::from_pem(KEY, Some(CERT)).unwrap()
    }

    #[test]
    fn signature_follows_issuer() {
        let xml = format!(
            r#"<saml:Assertion xmlns:saml="{SAML_NS}" ID="_abc"><saml:Issuer>idp</saml:Issuer><saml:Subject/></saml:Assertion>"#
        );
        let signed = signer().sign(&xml, "_abc").unwrap();
        let doc = xml::parse(&signed).unwrap();
        let children: Vec<_> = xml::child_elements(doc.root_element())
            .map(|n| n.tag_name().name().to_string())
            .collect();
        assert_eq!(children, ["Issuer", "Signature", "Subject"]);
        assert!(signed.contains("<ds:X509Certificate>"));
        assert!(signed.contains(r##"URI="#_abc""##));
    }

    #[test]
    fn signature_first_without_issuer() {
        let signed = signer().sign(r#"<r><a ID="x1"><b/></a></r>"#, "x1").unwrap();
        let doc = xml::parse(&signed).unwrap();
        let a = xml::find_by_id(&doc, "x1").unwrap();
        assert_eq!(
            xml::child_elements(a).next().map(|n| n.tag_name().name()),
            Some("Signature")
        );
    }

    #[test]
    fn self_closing_element_is_reopened() {
        let signed = signer().sign(r#"<r><a ID="x1" b='>'/></r>"#, "x1").unwrap();
        assert!(signed.contains("</ds:Signature></a></r>"));
        xml::parse(&signed).unwrap();
    }

    #[test]
    fn already_signed_rejected() {
        let signed = signer().sign(r#"<a ID="x1"/>"#, "x1").unwrap();
        assert!(matches!(
            signer().sign(&signed, "x1"),
            Err(SamlError::SignatureCreation(_))
        ));
    }

    #[test]
    fn missing_reference_rejected() {
        assert!(signer().sign("<a ID=\"x1\"/>", "nope").is_err());
    }
}
