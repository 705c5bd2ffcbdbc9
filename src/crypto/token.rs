use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Entropy of a freshly minted token, in bytes.
const TOKEN_BYTES: usize = 32;

/// Encoded length of a token: 32 bytes, base64url without padding.
pub const TOKEN_LEN: usize = 43;

/// Domain-separation prefix for the stored token hash. Keeps session-token
/// digests distinct from any other SHA-256 use of the same bytes.
const HASH_DOMAIN: &[u8] = b"session-auth/token/v1";

/// Mints an opaque session token: 256 bits from the OS CSPRNG, URL-safe
/// encoded. Tokens carry no structure, no user id, no timestamp.
pub fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Cheap shape check used before any store access. Anything that does not
/// look like a minted token is rejected without touching storage.
pub fn looks_like_token(raw: &str) -> bool {
    raw.len() == TOKEN_LEN
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Deterministic, domain-separated hash of a raw token. This is the only
/// form a token takes in storage.
pub fn hash_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(HASH_DOMAIN);
    hasher.update([0u8]);
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of two token hashes.
pub fn hashes_match(a: &str, b: &str) -> bool {
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_tokens_are_43_chars_url_safe() {
        let token = new_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(looks_like_token(&token));
    }

    #[test]
    fn minted_tokens_are_unique() {
        assert_ne!(new_token(), new_token());
    }

    #[test]
    fn hash_is_deterministic_and_distinct_from_raw() {
        let token = new_token();
        let h = hash_token(&token);
        assert_eq!(h, hash_token(&token));
        assert_eq!(h.len(), 64);
        assert_ne!(h, token);
        assert!(!h.contains(&token));
    }

    #[test]
    fn hash_is_domain_separated() {
        let token = new_token();
        let plain = hex::encode(Sha256::digest(token.as_bytes()));
        assert_ne!(hash_token(&token), plain);
    }

    #[test]
    fn shape_check_rejects_garbage() {
        assert!(!looks_like_token(""));
        assert!(!looks_like_token("short"));
        assert!(!looks_like_token(&"a".repeat(44)));
        assert!(!looks_like_token(&format!("{}=", "a".repeat(42))));
    }

    #[test]
    fn hash_comparison_handles_unequal_lengths() {
        let h = hash_token("x");
        assert!(hashes_match(&h, &h));
        assert!(!hashes_match(&h, &h[1..]));
        assert!(!hashes_match(&h, "other"));
    }
}
