//! `EncryptedAssertion` handling (XML Encryption).
//!
//! The session key is carried in an `xenc:EncryptedKey`, either as a sibling
//! of `xenc:EncryptedData` inside the `EncryptedAssertion` or inside
//! `EncryptedData/ds:KeyInfo`. Sibling keys are tried first.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fed_crypto::{BlockCipher, KeyTransport, PrivateKey, PublicKey};
use roxmltree::Node;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SamlError, SamlResult};
use crate::types::{SAML_NS, XMLDSIG_NS, XMLENC_NS};
use crate::xml;

const ELEMENT_TYPE: &str = "http://www.w3.org/2001/04/xmlenc#Element";
const SHA1_DIGEST: &str = "http://www.w3.org/2000/09/xmldsig#sha1";

/// Where [`EncryptedAssertionCodec::encrypt`] puts the `EncryptedKey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPlacement {
    /// Inside `EncryptedData/ds:KeyInfo`.
    #[default]
    Embedded,
    /// As a sibling of `EncryptedData`.
    Sibling,
}

/// Encrypts and decrypts assertions.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncryptedAssertionCodec {
    cipher: BlockCipher,
    transport: KeyTransport,
    placement: KeyPlacement,
}

impl EncryptedAssertionCodec {
    /// Creates a codec using AES-256-CBC and RSA PKCS#1 v1.5.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the content cipher.
    #[must_use]
    pub const fn with_cipher(mut self, cipher: BlockCipher) -> Self {
        self.cipher = cipher;
        self
    }

    /// Sets the key transport algorithm.
    #[must_use]
    pub const fn with_transport(mut self, transport: KeyTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Sets where the `EncryptedKey` is placed.
    #[must_use]
    pub const fn with_placement(mut self, placement: KeyPlacement) -> Self {
        self.placement = placement;
        self
    }

    /// Encrypts a serialized `saml:Assertion` for `recipient`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not an assertion or encryption fails.
    pub fn encrypt(&self, assertion_xml: &str, recipient: &PublicKey) -> SamlResult<String> {
        let doc = xml::parse(assertion_xml)?;
        if !xml::is_element(doc.root_element(), SAML_NS, "Assertion") {
            return Err(SamlError::InvalidAssertion(
                "only saml:Assertion elements can be encrypted".to_string(),
            ));
        }

        let session_key = self.cipher.generate_key();
        let cipher_value = STANDARD.encode(self.cipher.encrypt(&session_key, assertion_xml.as_bytes())?);
        let wrapped_key = STANDARD.encode(self.transport.wrap(recipient, &session_key)?);

        let mut encrypted_key = String::with_capacity(512);
        encrypted_key.push_str("<xenc:EncryptedKey xmlns:xenc=\"");
        encrypted_key.push_str(XMLENC_NS);
        encrypted_key.push('"');
        xml::push_attr(&mut encrypted_key, "Id", Some(&fed_crypto::generate_xml_id()));
        encrypted_key.push_str("><xenc:EncryptionMethod Algorithm=\"");
        encrypted_key.push_str(self.transport.uri());
        encrypted_key.push_str("\"/><xenc:CipherData>");
        xml::push_text_element(&mut encrypted_key, "xenc:CipherValue", &wrapped_key);
        encrypted_key.push_str("</xenc:CipherData></xenc:EncryptedKey>");

        let mut out = String::with_capacity(cipher_value.len() + 1024);
        out.push_str("<saml:EncryptedAssertion xmlns:saml=\"");
        out.push_str(SAML_NS);
        out.push_str("\"><xenc:EncryptedData xmlns:xenc=\"");
        out.push_str(XMLENC_NS);
        out.push('"');
        xml::push_attr(&mut out, "Id", Some(&fed_crypto::generate_xml_id()));
        xml::push_attr(&mut out, "Type", Some(ELEMENT_TYPE));
        out.push_str("><xenc:EncryptionMethod Algorithm=\"");
        out.push_str(self.cipher.uri());
        out.push_str("\"/>");
        if self.placement == KeyPlacement::Embedded {
            out.push_str("<ds:KeyInfo xmlns:ds=\"");
            out.push_str(XMLDSIG_NS);
            out.push_str("\">");
            out.push_str(&encrypted_key);
            out.push_str("</ds:KeyInfo>");
        }
        out.push_str("<xenc:CipherData>");
        xml::push_text_element(&mut out, "xenc:CipherValue", &cipher_value);
        out.push_str("</xenc:CipherData></xenc:EncryptedData>");
        if self.placement == KeyPlacement::Sibling {
            out.push_str(&encrypted_key);
        }
        out.push_str("</saml:EncryptedAssertion>");
        Ok(out)
    }

    /// Decrypts a serialized `saml:EncryptedAssertion` document.
    ///
    /// # Errors
    ///
    /// See [`EncryptedAssertionCodec::decrypt`].
    pub fn decrypt_str(encrypted_xml: &str, key: &PrivateKey) -> SamlResult<String> {
        let doc = xml::parse(encrypted_xml)?;
        Self::decrypt(doc.root_element(), key)
    }

    /// Decrypts an `EncryptedAssertion` element into the serialized plaintext
    /// `saml:Assertion`.
    ///
    /// # Errors
    ///
    /// - [`SamlError::Decryption`] if no `EncryptedKey` unwraps with `key`,
    ///   the ciphertext is corrupt, or the plaintext is not a standalone
    ///   `saml:Assertion` document.
    /// - [`SamlError::UnsupportedAlgorithm`] for unknown algorithm URIs.
    pub fn decrypt(encrypted_assertion: Node<'_, '_>, key: &PrivateKey) -> SamlResult<String> {
        if !xml::is_element(encrypted_assertion, SAML_NS, "EncryptedAssertion") {
            return Err(SamlError::Decryption(format!(
                "expected saml:EncryptedAssertion, found {}",
                encrypted_assertion.tag_name().name()
            )));
        }
        let data = xml::required_child(encrypted_assertion, XMLENC_NS, "EncryptedData")?;
        let cipher = match xml::child(data, XMLENC_NS, "EncryptionMethod") {
            Some(method) => {
                let uri = xml::required_attr(method, "Algorithm")?;
                BlockCipher::from_uri(uri)
                    .ok_or_else(|| SamlError::UnsupportedAlgorithm(format!("block cipher {uri}")))?
            }
            None => BlockCipher::Aes256Cbc,
        };

        let session_key = unwrap_session_key(encrypted_assertion, data, key)?;
        if session_key.len() != cipher.key_len() {
            return Err(SamlError::Decryption(format!(
                "session key of {} bytes does not fit {}",
                session_key.len(),
                cipher.uri()
            )));
        }

        let cipher_data = xml::required_child(data, XMLENC_NS, "CipherData")?;
        let ciphertext = STANDARD.decode(xml::compact_text(xml::required_child(
            cipher_data,
            XMLENC_NS,
            "CipherValue",
        )?))?;
        let plaintext = cipher.decrypt(&session_key, &ciphertext)?;
        let plaintext = String::from_utf8(plaintext)
            .map_err(|e| SamlError::Decryption(format!("plaintext is not UTF-8: {e}")))?;

        {
            let parsed = xml::parse(&plaintext)
                .map_err(|e| SamlError::Decryption(format!("plaintext does not parse: {e}")))?;
            if !xml::is_element(parsed.root_element(), SAML_NS, "Assertion") {
                return Err(SamlError::Decryption("plaintext is not a saml:Assertion".to_string()));
            }
        }

        debug!(cipher = %cipher.uri(), "decrypted assertion");
        Ok(plaintext)
    }
}

/// Tries every candidate `EncryptedKey`, siblings first.
fn unwrap_session_key(encrypted_assertion: Node<'_, '_>, data: Node<'_, '_>, key: &PrivateKey) -> SamlResult<Vec<u8>> {
    let siblings = xml::children(encrypted_assertion, XMLENC_NS, "EncryptedKey");
    let embedded = xml::child(data, XMLDSIG_NS, "KeyInfo")
        .into_iter()
        .flat_map(|info| xml::children(info, XMLENC_NS, "EncryptedKey"));

    let mut last_error = None;
    for encrypted_key in siblings.chain(embedded) {
        match unwrap_one(encrypted_key, key) {
            Ok(session_key) => return Ok(session_key),
            Err(err @ SamlError::UnsupportedAlgorithm(_)) => return Err(err),
            Err(err) => last_error = Some(err),
        }
    }
    Err(last_error.unwrap_or_else(|| SamlError::Decryption("no EncryptedKey found".to_string())))
}

fn unwrap_one(encrypted_key: Node<'_, '_>, key: &PrivateKey) -> SamlResult<Vec<u8>> {
    let transport = match xml::child(encrypted_key, XMLENC_NS, "EncryptionMethod") {
        Some(method) => {
            let uri = xml::required_attr(method, "Algorithm")?;
            let transport = KeyTransport::from_uri(uri)
                .ok_or_else(|| SamlError::UnsupportedAlgorithm(format!("key transport {uri}")))?;
            if let Some(digest) = xml::child(method, XMLDSIG_NS, "DigestMethod") {
                let digest_uri = digest.attribute("Algorithm").unwrap_or_default();
                if digest_uri != SHA1_DIGEST {
                    return Err(SamlError::UnsupportedAlgorithm(format!("OAEP digest {digest_uri}")));
                }
            }
            transport
        }
        None => KeyTransport::RsaPkcs1v15,
    };
    let cipher_data = xml::required_child(encrypted_key, XMLENC_NS, "CipherData")?;
    let wrapped = STANDARD.decode(xml::compact_text(xml::required_child(
        cipher_data,
        XMLENC_NS,
        "CipherValue",
    )?))?;
    Ok(transport.unwrap(key, &wrapped)?)
}
