//! XML Signature support for SAML.
//!
//! Enveloped XML-DSig signatures over elements referenced by `ID`, and the
//! detached query-string signatures of the HTTP-Redirect binding.
//!
//! # Signing Algorithms
//!
//! - RSA-SHA1 (legacy, accepted only when enabled)
//! - RSA-SHA256 (default)
//! - RSA-SHA384
//! - RSA-SHA512

mod signer;
mod validator;

pub use signer::*;
pub use validator::*;

use fed_crypto::DigestAlgorithm;
use roxmltree::Node;
use serde::{Deserialize, Serialize};

use crate::error::{SamlError, SamlResult};
use crate::types::XMLDSIG_NS;
use crate::xml;

/// Signature algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureAlgorithm {
    /// Legacy RSA with SHA-1.
    RsaSha1,
    /// RSA with SHA-256.
    #[default]
    RsaSha256,
    /// RSA with SHA-384.
    RsaSha384,
    /// RSA with SHA-512.
    RsaSha512,
}

impl SignatureAlgorithm {
    /// Returns the URI for this signature algorithm.
    #[must_use]
    pub const fn uri(&self) -> &'static str {
        match self {
            Self::RsaSha1 => "http://www.w3.org/2000/09/xmldsig#rsa-sha1",
            Self::RsaSha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
            Self::RsaSha384 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384",
            Self::RsaSha512 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512",
        }
    }

    /// Parses a signature algorithm from its URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        [Self::RsaSha1, Self::RsaSha256, Self::RsaSha384, Self::RsaSha512]
            .into_iter()
            .find(|alg| alg.uri() == uri)
    }

    /// Returns the digest the RSA signature is computed over.
    #[must_use]
    pub const fn digest(&self) -> DigestAlgorithm {
        match self {
            Self::RsaSha1 => DigestAlgorithm::Sha1,
            Self::RsaSha256 => DigestAlgorithm::Sha256,
            Self::RsaSha384 => DigestAlgorithm::Sha384,
            Self::RsaSha512 => DigestAlgorithm::Sha512,
        }
    }

    /// Returns true if this algorithm uses SHA-1.
    #[must_use]
    pub const fn is_legacy(&self) -> bool {
        matches!(self, Self::RsaSha1)
    }
}

/// Returns the `ds:Signature` that is a direct child of `element`.
#[must_use]
pub fn signature_child<'a, 'i>(element: Node<'a, 'i>) -> Option<Node<'a, 'i>> {
    xml::child(element, XMLDSIG_NS, "Signature")
}

/// Returns true if `element` carries a `ds:Signature` child. No verification
/// is performed.
#[must_use]
pub fn is_signed(element: Node<'_, '_>) -> bool {
    signature_child(element).is_some()
}

/// Removes the enveloped signature of the element with `id`, so that it can be
/// modified and signed again.
///
/// Returns the document unchanged if the element is not signed.
///
/// # Errors
///
/// Returns an error if the document does not parse or the ID is absent or
/// duplicated.
pub fn remove_signature(document: &str, id: &str) -> SamlResult<String> {
    let doc = xml::parse(document)?;
    let element = xml::find_by_id(&doc, id)?;
    let Some(signature) = signature_child(element) else {
        return Ok(document.to_string());
    };
    let range = signature.range();
    let mut out = String::with_capacity(document.len() - range.len());
    out.push_str(&document[..range.start]);
    out.push_str(&document[range.end..]);
    Ok(out)
}

/// Returns the number of `Signature` elements under `root`, at any depth.
pub(crate) fn count_signatures(root: Node<'_, '_>) -> usize {
    root.descendants()
        .filter(|n| xml::is_element(*n, XMLDSIG_NS, "Signature"))
        .count()
}

pub(crate) fn unsupported(what: &str, uri: &str) -> SamlError {
    SamlError::UnsupportedAlgorithm(format!("{what} {uri}"))
}
