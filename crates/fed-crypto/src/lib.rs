//! # fed-crypto
//!
//! Cryptographic primitives for the SAML federation engine, built on the
//! RustCrypto stack.
//!
//! ## Contents
//!
//! - [`hash`] - SHA-1 and SHA-2 digests
//! - [`signature`] - RSA PKCS#1 v1.5 signatures as used by XML-DSig and the
//!   HTTP-Redirect binding
//! - [`cipher`] - XML-Enc block ciphers (AES-CBC, 3DES-CBC)
//! - [`transport`] - RSA key transport for session keys
//! - [`keys`] - PEM/DER loading of private keys and X.509 certificates
//! - [`random`] - identifiers and key material from the OS generator
//!
//! ## Legacy algorithms
//!
//! SAML deployments still use SHA-1 signatures and 3DES encryption. Both are
//! available here because peers send them; callers decide whether to accept
//! them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod algorithm;
pub mod cipher;
pub mod error;
pub mod hash;
pub mod keys;
pub mod random;
pub mod signature;
pub mod transport;

pub use algorithm::DigestAlgorithm;
pub use cipher::BlockCipher;
pub use error::{CryptoError, CryptoResult};
pub use hash::{digest, sha1, sha256};
pub use keys::{Certificate, PrivateKey, PublicKey};
pub use random::{generate_xml_id, random_bytes, random_hex};
pub use signature::{rsa_sign, rsa_verify};
pub use transport::KeyTransport;
