//! Deterministic short digest of a session's ephemeral public key.
//!
//! The fingerprint is the only identity surface users see. It is a display
//! aid, not an authentication mechanism: two different keys colliding in the
//! first 32 bits is treated as a cosmetic collision, never checked for.

use sha2::{Digest, Sha256};

/// `fingerprint(pk) = upper_hex(SHA-256(pk)[0..4])` — 8 uppercase hex characters.
pub fn fingerprint(public_key_bytes: &[u8]) -> String {
    let digest = Sha256::digest(public_key_bytes);
    let mut out = String::with_capacity(8);
    for byte in &digest[0..4] {
        out.push_str(&format!("{byte:02X}"));
    }
    out
}

/// First 4 characters of a full fingerprint, used for the default
/// `anon_<short>` nickname.
pub fn short_fingerprint(fp: &str) -> &str {
    let end = fp.char_indices().nth(4).map(|(i, _)| i).unwrap_or(fp.len());
    &fp[..end]
}

/// Accepts exactly 8 hex characters, case-insensitive.
pub fn is_valid(s: &str) -> bool {
    s.len() == 8 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_eight_uppercase_hex_chars() {
        let fp = fingerprint(b"some public key bytes");
        assert_eq!(fp.len(), 8);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn fingerprint_is_a_pure_function_of_input() {
        let a = fingerprint(b"same input");
        let b = fingerprint(b"same input");
        assert_eq!(a, b);
    }

    #[test]
    fn different_keys_usually_differ() {
        let a = fingerprint(b"key one");
        let b = fingerprint(b"key two");
        assert_ne!(a, b);
    }

    #[test]
    fn short_fingerprint_is_first_four_chars() {
        let fp = fingerprint(b"anything");
        assert_eq!(short_fingerprint(&fp), &fp[..4]);
        assert_eq!(short_fingerprint(&fp).len(), 4);
    }

    #[test]
    fn validates_exactly_eight_hex_chars() {
        assert!(is_valid("DEADBEEF"));
        assert!(is_valid("deadbeef"));
        assert!(!is_valid("DEADBEE"));
        assert!(!is_valid("DEADBEEFF"));
        assert!(!is_valid("DEADBEEG"));
    }
}
