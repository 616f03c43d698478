//! API key generation and hashing. Only the SHA-256 digest is persisted.

use rand::distr::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

pub const API_KEY_PREFIX: &str = "orin_";
const SECRET_LEN: usize = 32;
/// Characters of the key kept in clear for display.
const DISPLAY_PREFIX_LEN: usize = 12;

pub struct GeneratedKey {
    pub plaintext: String,
    pub hash: String,
    pub display_prefix: String,
}

pub fn generate() -> GeneratedKey {
    let secret: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SECRET_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    let plaintext = format!("{API_KEY_PREFIX}{secret}");

    GeneratedKey {
        hash: hash(&plaintext),
        display_prefix: plaintext.chars().take(DISPLAY_PREFIX_LEN).collect(),
        plaintext,
    }
}

pub fn hash(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Cheap shape check before touching the store.
pub fn looks_like_api_key(candidate: &str) -> bool {
    candidate.len() == API_KEY_PREFIX.len() + SECRET_LEN
        && candidate.starts_with(API_KEY_PREFIX)
        && candidate[API_KEY_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}
