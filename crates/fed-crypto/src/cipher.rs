//! XML-Enc block ciphers.
//!
//! Ciphertexts carry the IV as a prefix. Padding follows XML Encryption: the
//! plaintext is always padded, and the last byte holds the pad length.

use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::error::{CryptoError, CryptoResult};
use crate::random::random_bytes;

/// Block cipher algorithms for `EncryptedData`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlockCipher {
    /// AES-128 in CBC mode.
    Aes128Cbc,
    /// AES-192 in CBC mode.
    Aes192Cbc,
    /// AES-256 in CBC mode.
    #[default]
    Aes256Cbc,
    /// Triple DES (EDE3) in CBC mode.
    TripleDesCbc,
}

impl BlockCipher {
    /// Returns the XML-Enc algorithm URI.
    #[must_use]
    pub const fn uri(self) -> &'static str {
        match self {
            Self::Aes128Cbc => "http://www.w3.org/2001/04/xmlenc#aes128-cbc",
            Self::Aes192Cbc => "http://www.w3.org/2001/04/xmlenc#aes192-cbc",
            Self::Aes256Cbc => "http://www.w3.org/2001/04/xmlenc#aes256-cbc",
            Self::TripleDesCbc => "http://www.w3.org/2001/04/xmlenc#tripledes-cbc",
        }
    }

    /// Parses an XML-Enc algorithm URI.
    #[must_use]
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            "http://www.w3.org/2001/04/xmlenc#aes128-cbc" => Some(Self::Aes128Cbc),
            "http://www.w3.org/2001/04/xmlenc#aes192-cbc" => Some(Self::Aes192Cbc),
            "http://www.w3.org/2001/04/xmlenc#aes256-cbc" => Some(Self::Aes256Cbc),
            "http://www.w3.org/2001/04/xmlenc#tripledes-cbc" => Some(Self::TripleDesCbc),
            _ => None,
        }
    }

    /// Returns the key length in bytes.
    #[must_use]
    pub const fn key_len(self) -> usize {
        match self {
            Self::Aes128Cbc => 16,
            Self::Aes192Cbc | Self::TripleDesCbc => 24,
            Self::Aes256Cbc => 32,
        }
    }

    /// Returns the block (and IV) length in bytes.
    #[must_use]
    pub const fn block_len(self) -> usize {
        match self {
            Self::TripleDesCbc => 8,
            _ => 16,
        }
    }

    /// Generates a fresh random key of the right length.
    #[must_use]
    pub fn generate_key(self) -> Vec<u8> {
        random_bytes(self.key_len())
    }

    /// Encrypts `plaintext`, returning `IV || ciphertext`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key has the wrong length.
    pub fn encrypt(self, key: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.check_key(key)?;
        let block = self.block_len();
        let iv = random_bytes(block);
        let mut buf = xmlenc_pad(plaintext, block);
        let len = buf.len();

        macro_rules! run {
            ($cipher:ty) => {{
                cbc::Encryptor::<$cipher>::new_from_slices(key, &iv)
                    .map_err(|e| CryptoError::Encryption(e.to_string()))?
                    .encrypt_padded_mut::<NoPadding>(&mut buf, len)
                    .map_err(|e| CryptoError::Encryption(e.to_string()))?;
            }};
        }

        match self {
            Self::Aes128Cbc => run!(aes::Aes128),
            Self::Aes192Cbc => run!(aes::Aes192),
            Self::Aes256Cbc => run!(aes::Aes256),
            Self::TripleDesCbc => run!(des::TdesEde3),
        }

        let mut out = iv;
        out.extend_from_slice(&buf);
        Ok(out)
    }

    /// Decrypts `IV || ciphertext`.
    ///
    /// # Errors
    ///
    /// Returns an error on a bad key length, truncated input or bad padding.
    pub fn decrypt(self, key: &[u8], data: &[u8]) -> CryptoResult<Vec<u8>> {
        self.check_key(key)?;
        let block = self.block_len();
        if data.len() < block * 2 || data.len() % block != 0 {
            return Err(CryptoError::Decryption(format!(
                "ciphertext length {} is not a whole number of {block}-byte blocks",
                data.len()
            )));
        }
        let (iv, body) = data.split_at(block);
        let mut buf = body.to_vec();

        macro_rules! run {
            ($cipher:ty) => {{
                cbc::Decryptor::<$cipher>::new_from_slices(key, iv)
                    .map_err(|e| CryptoError::Decryption(e.to_string()))?
                    .decrypt_padded_mut::<NoPadding>(&mut buf)
                    .map_err(|e| CryptoError::Decryption(e.to_string()))?;
            }};
        }

        match self {
            Self::Aes128Cbc => run!(aes::Aes128),
            Self::Aes192Cbc => run!(aes::Aes192),
            Self::Aes256Cbc => run!(aes::Aes256),
            Self::TripleDesCbc => run!(des::TdesEde3),
        }

        xmlenc_unpad(buf, block)
    }

    fn check_key(self, key: &[u8]) -> CryptoResult<()> {
        if key.len() == self.key_len() {
            Ok(())
        } else {
            Err(CryptoError::InvalidKey(format!(
                "{} expects a {} byte key, got {}",
                self.uri(),
                self.key_len(),
                key.len()
            )))
        }
    }
}

fn xmlenc_pad(data: &[u8], block: usize) -> Vec<u8> {
    let pad = block - data.len() % block;
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.extend(std::iter::repeat(pad as u8).take(pad));
    out
}

fn xmlenc_unpad(mut data: Vec<u8>, block: usize) -> CryptoResult<Vec<u8>> {
    let pad = data.last().copied().map_or(0, usize::from);
    if pad == 0 || pad > block || pad > data.len() {
        return Err(CryptoError::Decryption("invalid padding".to_string()));
    }
    data.truncate(data.len() - pad);
    Ok(data)
}
