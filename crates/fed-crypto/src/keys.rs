//! Key and certificate loading.

use base64::{engine::general_purpose::STANDARD, Engine};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::{CryptoError, CryptoResult};

/// An RSA private key.
#[derive(Clone)]
pub struct PrivateKey {
    inner: RsaPrivateKey,
}

impl PrivateKey {
    /// Loads a key from PEM, accepting PKCS#8 and PKCS#1 encodings.
    ///
    /// # Errors
    ///
    /// Returns an error if neither encoding parses.
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        let inner = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Loads a PKCS#8 DER-encoded key.
    ///
    /// # Errors
    ///
    /// Returns an error if the DER is not a PKCS#8 RSA key.
    pub fn from_pkcs8_der(der: &[u8]) -> CryptoResult<Self> {
        let inner =
            RsaPrivateKey::from_pkcs8_der(der).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Returns the matching public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.to_public_key(),
        }
    }

    pub(crate) const fn inner(&self) -> &RsaPrivateKey {
        &self.inner
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

/// An RSA public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: RsaPublicKey,
}

impl PublicKey {
    /// Loads a `SubjectPublicKeyInfo` DER structure.
    ///
    /// # Errors
    ///
    /// Returns an error if the DER is not an RSA public key.
    pub fn from_spki_der(der: &[u8]) -> CryptoResult<Self> {
        let inner =
            RsaPublicKey::from_public_key_der(der).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Loads a PEM `PUBLIC KEY` block.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM is not an RSA public key.
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        let inner =
            RsaPublicKey::from_public_key_pem(pem).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { inner })
    }

    pub(crate) const fn inner(&self) -> &RsaPublicKey {
        &self.inner
    }
}

/// A DER-encoded X.509 certificate.
///
/// Only the public key is used; chain building and revocation are left to
/// whoever curates the trusted metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    public_key: PublicKey,
}

impl Certificate {
    /// Parses a DER certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate or its key cannot be parsed.
    pub fn from_der(der: Vec<u8>) -> CryptoResult<Self> {
        let (_, cert) = X509Certificate::from_der(&der)
            .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;
        let public_key = PublicKey::from_spki_der(cert.public_key().raw)?;
        Ok(Self { der, public_key })
    }

    /// Parses a PEM `CERTIFICATE` block.
    ///
    /// # Errors
    ///
    /// Returns an error if the PEM or certificate is malformed.
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        let (_, block) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
            .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;
        Self::from_der(block.contents)
    }

    /// Parses base64 DER as found in `ds:X509Certificate`. Whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the base64 or certificate is malformed.
    pub fn from_base64(text: &str) -> CryptoResult<Self> {
        let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let der = STANDARD
            .decode(compact)
            .map_err(|e| CryptoError::InvalidCertificate(e.to_string()))?;
        Self::from_der(der)
    }

    /// Returns the certificate as single-line base64 DER.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.der)
    }

    /// Returns the DER bytes.
    #[must_use]
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the subject public key.
    #[must_use]
    pub const fn public_key(&self) -> &PublicKey {
        &self.public_key
    }
}
