//! Credential handling: token generation, hashing, and constant-time
//! comparison, plus bearer header extraction.
//!
//! Event credentials (host token, guest access token) are generated once at
//! event creation and stored only as SHA-256 hex digests.

use rand::{distr::Alphanumeric, Rng};
use sha2::{Digest, Sha256};

/// Length of generated event credentials.
const TOKEN_LEN: usize = 40;

/// Generate a random alphanumeric credential.
pub fn generate_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// SHA-256 hex digest of a token, the only form ever persisted.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Check a presented token against a stored hash.
pub fn verify_token(provided: &str, expected_hash: &str) -> bool {
    if provided.is_empty() || expected_hash.is_empty() {
        return false;
    }
    constant_time_eq(&hash_token(provided), expected_hash)
}

/// Compare two strings in constant time.
///
/// This prevents timing attacks by ensuring the comparison takes the same
/// amount of time regardless of where (or if) the values differ.
///
/// Returns `false` if either value is empty.
pub fn constant_time_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();

    if provided.is_empty() || expected.is_empty() {
        return false;
    }

    let len_match = provided.len() == expected.len();

    // XOR accumulator: if any byte differs, result will be non-zero
    let mut diff: u8 = 0;
    for (a, b) in provided.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }

    len_match && diff == 0
}

/// Extracts the bearer token from an Authorization header value.
///
/// Expected format: "Bearer <token>"
/// Returns `None` if the header doesn't match the expected format.
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();

    // Case-insensitive "Bearer " prefix check (RFC 6750 allows case-insensitive)
    if header.len() < 7 {
        return None;
    }

    let (prefix, token) = header.split_at(7);
    if prefix.eq_ignore_ascii_case("Bearer ") {
        let token = token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    } else {
        None
    }
}
