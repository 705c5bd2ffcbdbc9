use crate::error::{AuthError, Result};

/// Longest secret the hasher will accept, in bytes. Longer inputs are
/// rejected up front to bound hashing work.
pub const MAX_SECRET_BYTES: usize = 1024;

/// Case-folds a login identifier. Applied at every read and write so that
/// `Alice` and `alice` name the same principal.
pub fn fold_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Validates a login identifier.
pub fn validate_identifier(identifier: &str) -> Result<()> {
    let identifier = identifier.trim();
    if identifier.len() < 3 {
        return Err(AuthError::Validation(
            "identifier must be at least 3 characters long",
        ));
    }
    if identifier.len() > 255 {
        return Err(AuthError::Validation(
            "identifier must be at most 255 characters",
        ));
    }
    if !identifier
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '@' | '+'))
    {
        return Err(AuthError::Validation(
            "identifier contains unsupported characters",
        ));
    }
    Ok(())
}

/// Validates a secret's byte length. Quality rules (minimum length and the
/// like) belong to the out-of-scope registration flow; this only bounds
/// hashing work.
pub fn validate_secret(secret: &str) -> Result<()> {
    if secret.is_empty() {
        return Err(AuthError::Validation("secret must not be empty"));
    }
    if secret.len() > MAX_SECRET_BYTES {
        return Err(AuthError::Validation("secret is too long"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_case_folded() {
        assert_eq!(fold_identifier("  Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn identifier_charset_is_bounded() {
        assert!(validate_identifier("alice").is_ok());
        assert!(validate_identifier("alice@example.com").is_ok());
        assert!(validate_identifier("a").is_err());
        assert!(validate_identifier("alice; DROP TABLE principals").is_err());
        assert!(validate_identifier(&"x".repeat(256)).is_err());
    }

    #[test]
    fn secret_length_is_bounded() {
        assert!(validate_secret("correct horse battery staple").is_ok());
        assert!(validate_secret("").is_err());
        assert!(validate_secret(&"x".repeat(MAX_SECRET_BYTES + 1)).is_err());
        assert!(validate_secret(&"x".repeat(MAX_SECRET_BYTES)).is_ok());
    }
}
