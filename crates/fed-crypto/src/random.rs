//! Secure random generation.
//!
//! All values come from the thread-local CSPRNG seeded by the OS.

use rand::RngCore;

/// Generates `len` random bytes.
#[must_use]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Generates `len` random bytes as lowercase hex.
#[must_use]
pub fn random_hex(len: usize) -> String {
    random_bytes(len).iter().map(|b| format!("{b:02x}")).collect()
}

/// Generates an XML `ID` value with 160 bits of entropy.
///
/// XML IDs must start with a letter, so the hex is prefixed with `id`.
#[must_use]
pub fn generate_xml_id() -> String {
    format!("id{}", random_hex(20))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn random_bytes_produces_correct_length() {
        assert_eq!(random_bytes(0).len(), 0);
        assert_eq!(random_bytes(20).len(), 20);
    }

    #[test]
    fn xml_id_shape() {
        let id = generate_xml_id();
        assert_eq!(id.len(), 42);
        assert!(id.starts_with("id"));
        assert!(id[2..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn xml_ids_are_unique() {
        let ids: HashSet<_> = (0..1000).map(|_| generate_xml_id()).collect();
        assert_eq!(ids.len(), 1000);
    }
}
