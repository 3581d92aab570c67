use data_encoding::Encoding;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Entropy of a client session token, in bytes.
pub const SESSION_TOKEN_BYTE_LENGTH: usize = 32;

/// Lowercase RFC 4648 base32 without padding -- cookie-safe and
/// case-stable across clients that normalize header casing.
static BASE32_LOWER_NOPAD: Lazy<Encoding> = Lazy::new(|| {
    let mut spec = data_encoding::Specification::new();
    spec.symbols.push_str("abcdefghijklmnopqrstuvwxyz234567");
    spec.encoding().expect("static base32 alphabet is well-formed")
});

#[derive(Debug, Error)]
pub enum TokenError {
    /// The OS entropy source failed. Token issuance must abort rather than
    /// fall back to a weaker generator.
    #[error("entropy source unavailable: {0}")]
    Entropy(#[from] rand::Error),
}

/// Generate a cryptographically secure client session token
/// (32 random bytes, lowercase base32, no padding).
pub fn generate_client_token() -> Result<String, TokenError> {
    let mut bytes = [0u8; SESSION_TOKEN_BYTE_LENGTH];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(BASE32_LOWER_NOPAD.encode(&bytes))
}

/// Derive the server-side session id from a client token.
///
/// SHA-256 over the token's UTF-8 bytes, hex-encoded lowercase. Pure and
/// deterministic; the token itself is never stored, so only the client can
/// ever present the preimage.
pub fn derive_session_id(client_token: &str) -> String {
    let digest = Sha256::digest(client_token.as_bytes());
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_token_length_and_alphabet() {
        let token = generate_client_token().unwrap();
        // 32 bytes * 8 / 5 bits per symbol, rounded up
        assert_eq!(token.len(), 52);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c)));
    }

    #[test]
    fn test_encoding_round_trips() {
        let bytes: Vec<u8> = (0..SESSION_TOKEN_BYTE_LENGTH as u8).collect();
        let encoded = BASE32_LOWER_NOPAD.encode(&bytes);
        let decoded = BASE32_LOWER_NOPAD.decode(encoded.as_bytes()).unwrap();
        assert_eq!(decoded, bytes);
    }

    #[test]
    fn test_tokens_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(generate_client_token().unwrap()));
        }
    }

    #[test]
    fn test_derive_is_deterministic() {
        let token = generate_client_token().unwrap();
        assert_eq!(derive_session_id(&token), derive_session_id(&token));
    }

    #[test]
    fn test_derive_is_lowercase_hex() {
        let id = derive_session_id("some-token");
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_single_byte_difference_changes_id() {
        assert_ne!(derive_session_id("aaaaaaaa"), derive_session_id("aaaaaaab"));
    }

    #[test]
    fn test_known_digest() {
        // sha256("") -- fixed vector, guards against accidental algorithm swaps
        assert_eq!(
            derive_session_id(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
