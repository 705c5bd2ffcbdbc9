use crate::error::{AuthError, Result};
use crate::validation;
use argon2::password_hash::{
    Error as PhcError, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
};
use argon2::{Algorithm, Argon2, Params, ParamsBuilder, Version};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroize;

/// Salt length for new verifiers, in bytes.
const SALT_BYTES: usize = 16;

/// Fixed secret behind the sentinel verifier. Verifying against it is how
/// login burns one hash-equivalent of work for unknown identifiers.
const SENTINEL_SECRET: &str = "session-auth sentinel, never a real credential";

/// Argon2id cost policy. The defaults follow the first OWASP recommended
/// configuration and take on the order of 100 ms on reference hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 3,
            parallelism: 6,
        }
    }
}

/// Outcome of checking a candidate secret against a stored verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Match,
    /// The secret matched, but the stored verifier is below current policy
    /// and should be replaced while the plaintext is at hand.
    MatchNeedsRehash,
    Mismatch,
}

/// Derives and checks PHC-format Argon2id verifiers
/// (`$argon2id$v=19$m=..,t=..,p=..$salt$digest`).
///
/// The self-describing format is the point: verification reads cost
/// parameters from the stored string, so the policy can be raised later and
/// old verifiers upgraded opportunistically on login.
pub struct PasswordHasher {
    policy: PasswordPolicy,
    sentinel: String,
}

impl PasswordHasher {
    /// Builds a hasher and precomputes the sentinel verifier under the
    /// given policy. Costs one hash; call once at startup.
    pub fn new(policy: PasswordPolicy) -> Result<Self> {
        let mut hasher = Self {
            policy,
            sentinel: String::new(),
        };
        hasher.sentinel = hasher.hash(SENTINEL_SECRET)?;
        Ok(hasher)
    }

    /// Derives a verifier from a plaintext secret with a fresh 16-byte
    /// random salt. Secrets over 1024 bytes are rejected to bound work.
    pub fn hash(&self, secret: &str) -> Result<String> {
        validation::validate_secret(secret)?;

        let mut secret_bytes = secret.as_bytes().to_vec();

        let mut salt_bytes = [0u8; SALT_BYTES];
        OsRng.fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| AuthError::Internal(format!("salt encoding: {e}")))?;

        let outcome = self.instance()?.hash_password(&secret_bytes, &salt);
        secret_bytes.zeroize();

        let verifier = outcome
            .map_err(|e| AuthError::Internal(format!("argon2 hash: {e}")))?
            .to_string();
        tracing::debug!("derived new verifier");
        Ok(verifier)
    }

    /// Checks a candidate secret against a stored verifier. Constant-time
    /// digest comparison is inherited from the `argon2` crate.
    pub fn verify(&self, verifier: &str, secret: &str) -> Result<Verdict> {
        let parsed = PasswordHash::new(verifier).map_err(|_| AuthError::MalformedVerifier)?;

        let mut secret_bytes = secret.as_bytes().to_vec();
        // Parameters come from the verifier itself, not current policy.
        let outcome = Argon2::default().verify_password(&secret_bytes, &parsed);
        secret_bytes.zeroize();

        match outcome {
            Ok(()) if self.needs_rehash(&parsed) => Ok(Verdict::MatchNeedsRehash),
            Ok(()) => Ok(Verdict::Match),
            Err(PhcError::Password) => Ok(Verdict::Mismatch),
            Err(_) => Err(AuthError::MalformedVerifier),
        }
    }

    /// Verifies against the fixed sentinel verifier and discards the
    /// result. Performs the same work as a real verification.
    pub fn verify_sentinel(&self, secret: &str) {
        let _ = self.verify(&self.sentinel, secret);
    }

    fn needs_rehash(&self, parsed: &PasswordHash<'_>) -> bool {
        if parsed.algorithm.as_str() != "argon2id" {
            return true;
        }
        match Params::try_from(parsed) {
            Ok(params) => {
                params.m_cost() < self.policy.memory_kib
                    || params.t_cost() < self.policy.iterations
            }
            Err(_) => true,
        }
    }

    fn instance(&self) -> Result<Argon2<'static>> {
        let params = ParamsBuilder::new()
            .m_cost(self.policy.memory_kib)
            .t_cost(self.policy.iterations)
            .p_cost(self.policy.parallelism)
            .build()
            .map_err(|e| AuthError::Internal(format!("argon2 params: {e}")))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy() -> PasswordPolicy {
        PasswordPolicy {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(fast_policy()).unwrap()
    }

    #[test]
    fn hash_then_verify_matches() {
        let h = hasher();
        let verifier = h.hash("correct horse battery staple").unwrap();
        assert_eq!(
            h.verify(&verifier, "correct horse battery staple").unwrap(),
            Verdict::Match
        );
        assert_eq!(h.verify(&verifier, "wrong").unwrap(), Verdict::Mismatch);
    }

    #[test]
    fn verifier_is_self_describing_and_salted() {
        let h = hasher();
        let a = h.hash("secret-one").unwrap();
        let b = h.hash("secret-one").unwrap();
        assert!(a.starts_with("$argon2id$"));
        // Fresh salt per call: same secret, different verifiers.
        assert_ne!(a, b);
        assert!(!a.contains("secret-one"));
    }

    #[test]
    fn secret_length_bounds_are_enforced() {
        let h = hasher();
        assert!(matches!(h.hash(""), Err(AuthError::Validation(_))));
        assert!(matches!(
            h.hash(&"x".repeat(1025)),
            Err(AuthError::Validation(_))
        ));
    }

    #[test]
    fn malformed_verifier_is_a_hard_fault() {
        let h = hasher();
        assert!(matches!(
            h.verify("not-a-phc-string", "anything"),
            Err(AuthError::MalformedVerifier)
        ));
    }

    #[test]
    fn old_cost_triggers_needs_rehash() {
        let old = hasher();
        let stored = old.hash("pw").unwrap();

        let current = PasswordHasher::new(PasswordPolicy {
            memory_kib: 16,
            iterations: 2,
            parallelism: 1,
        })
        .unwrap();
        assert_eq!(
            current.verify(&stored, "pw").unwrap(),
            Verdict::MatchNeedsRehash
        );
        // Wrong secret still reports a plain mismatch.
        assert_eq!(current.verify(&stored, "nope").unwrap(), Verdict::Mismatch);
    }

    #[test]
    fn sentinel_verification_never_matches_real_secrets() {
        let h = hasher();
        // Smoke test: must not panic and must do a full verify pass.
        h.verify_sentinel("anything");
        assert_eq!(
            h.verify(&h.sentinel, SENTINEL_SECRET).unwrap(),
            Verdict::Match
        );
        assert_eq!(h.verify(&h.sentinel, "anything").unwrap(), Verdict::Mismatch);
    }
}
