//! Content hashing shared by template pinning, cache metadata and contract hashes.
//!
//! One algorithm and one encoding (lowercase hex SHA-256) is used everywhere.
//! Switching algorithms is a format change and must bump
//! [`HASH_FORMAT_VERSION`].
use crate::error::{Error, Result};
use sha2::{Digest, Sha256};

pub const HASH_FORMAT_VERSION: u32 = 1;

/// Number of digest bytes kept for source-identity keys (128 bits).
const IDENTITY_KEY_BYTES: usize = 16;

/// Lowercase hex SHA-256 of raw bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Deterministic 128-bit key for a source identifier or repository identity.
///
/// Used for file and directory names only; never for integrity checks.
pub fn identity_key(identifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"identity:");
    hasher.update(identifier.as_bytes());
    let digest = hasher.finalize();
    digest[..IDENTITY_KEY_BYTES]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Compare a pinned hash against freshly loaded bytes; returns the actual hash.
pub fn verify_content_hash(source: &str, expected: &str, bytes: &[u8]) -> Result<String> {
    let actual = content_hash(bytes);
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        tracing::error!(expected, actual = %actual, source, "hash mismatch");
        return Err(Error::TemplateHashMismatch {
            source_ref: source.to_string(),
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_matches_known_vector() {
        assert_eq!(
            content_hash(b"TEST"),
            "94ee059335e587e501cc4bf90613e0814f00a7b08bc7c648fd865a2af6a22cc2"
        );
    }

    #[test]
    fn content_hash_is_stable_and_sensitive() {
        let first = content_hash(b"clause 1: pay on time");
        assert_eq!(first, content_hash(b"clause 1: pay on time"));
        assert_ne!(first, content_hash(b"clause 2: pay on time"));
        assert_ne!(content_hash(b""), content_hash(b"\0"));
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn identity_key_is_128_bits_and_distinct_from_content_hash() {
        let key = identity_key("https://example.com/contract.html");
        assert_eq!(key.len(), 32);
        assert_eq!(key, identity_key("https://example.com/contract.html"));
        assert_ne!(key, identity_key("https://example.com/contract.md"));
        assert!(!content_hash(b"https://example.com/contract.html").starts_with(&key));
    }

    #[test]
    fn verify_reports_both_hashes_on_mismatch() {
        let err = verify_content_hash("a.html", "deadbeef", b"body").expect_err("mismatch");
        match err {
            Error::TemplateHashMismatch {
                expected, actual, ..
            } => {
                assert_eq!(expected, "deadbeef");
                assert_eq!(actual, content_hash(b"body"));
            }
            other => panic!("unexpected error: {other}"),
        }
        let expected = content_hash(b"body");
        assert_eq!(
            verify_content_hash("a.html", &expected, b"body").expect("match"),
            expected
        );
    }
}
