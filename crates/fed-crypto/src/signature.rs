//! RSA PKCS#1 v1.5 signatures.
//!
//! Both XML-DSig `SignatureValue` and the HTTP-Redirect `Signature` query
//! parameter are plain RSA PKCS#1 v1.5 signatures over a digest of the input,
//! so a single pair of functions serves both.

use rsa::Pkcs1v15Sign;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use crate::algorithm::DigestAlgorithm;
use crate::error::{CryptoError, CryptoResult};
use crate::hash::digest;
use crate::keys::{PrivateKey, PublicKey};

fn padding(algorithm: DigestAlgorithm) -> Pkcs1v15Sign {
    match algorithm {
        DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
        DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
        DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
    }
}

/// Signs `data` with RSA PKCS#1 v1.5 over the given digest.
///
/// # Errors
///
/// Returns an error if the key is too small for the digest.
pub fn rsa_sign(key: &PrivateKey, algorithm: DigestAlgorithm, data: &[u8]) -> CryptoResult<Vec<u8>> {
    let hashed = digest(algorithm, data);
    key.inner()
        .sign(padding(algorithm), &hashed)
        .map_err(|e| CryptoError::Signing(e.to_string()))
}

/// Verifies an RSA PKCS#1 v1.5 signature over `data`.
#[must_use]
pub fn rsa_verify(key: &PublicKey, algorithm: DigestAlgorithm, data: &[u8], signature: &[u8]) -> bool {
    let hashed = digest(algorithm, data);
    key.inner().verify(padding(algorithm), &hashed, signature).is_ok()
}
