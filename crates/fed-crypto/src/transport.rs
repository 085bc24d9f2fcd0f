//! RSA key transport for `EncryptedKey`.

use rsa::{Oaep, Pkcs1v15Encrypt};
use sha1::Sha1;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{PrivateKey, PublicKey};

/// Key transport algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyTransport {
    /// RSA PKCS#1 v1.5.
    #[default]
    RsaPkcs1v15,
    /// RSA-OAEP with MGF1/SHA-1.
    RsaOaepMgf1p,
}

impl KeyTransport {
    /// Returns the XML-Enc algorithm URI.
    #[must_use]
    pub const fn uri(self) -> &'static str {
        match self {
            Self::RsaPkcs1v15 => "http://www.w3.org/2001/04/xmlenc#rsa-1_5",
            Self::RsaOaepMgf1p => "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p",
        }
    }

    /// Parses an XML-Enc algorithm URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            "http://www.w3.org/2001/04/xmlenc#rsa-1_5" => Some(Self::RsaPkcs1v15),
            "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p" => Some(Self::RsaOaepMgf1p),
            _ => None,
        }
    }

    /// Encrypts a symmetric key for `recipient`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is too long for the modulus.
    pub fn wrap(self, recipient: &PublicKey, key: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut rng = rand::thread_rng();
        let result = match self {
            Self::RsaPkcs1v15 => recipient.inner().encrypt(&mut rng, Pkcs1v15Encrypt, key),
            Self::RsaOaepMgf1p => recipient.inner().encrypt(&mut rng, Oaep::new::<Sha1>(), key),
        };
        result.map_err(|e| CryptoError::Encryption(e.to_string()))
    }

    /// Decrypts a wrapped symmetric key.
    ///
    /// # Errors
    ///
    /// Returns an error if the ciphertext was not produced for this key.
    pub fn unwrap(self, key: &PrivateKey, wrapped: &[u8]) -> CryptoResult<Vec<u8>> {
        let result = match self {
            Self::RsaPkcs1v15 => key.inner().decrypt(Pkcs1v15Encrypt, wrapped),
            Self::RsaOaepMgf1p => key.inner().decrypt(Oaep::new::<Sha1>(), wrapped),
        };
        result.map_err(|e| CryptoError::Decryption(e.to_string()))
    }
}
