//! The session lifecycle facade.
//!
//! ```text
//! (none) --login--> ACTIVE --validate--> ACTIVE           (updates last_seen_at)
//!                      |-- sliding refresh --> ACTIVE     (capped by absolute expiry)
//!                      |-- logout / password_change --> REVOKED
//!                      |-- expiration reached --> EXPIRED
//! REVOKED, EXPIRED: terminal; validate returns Unauthenticated.
//! ```
//!
//! The service holds references to its collaborators and nothing else; all
//! per-request state arrives as explicit arguments.

use crate::clock::Clock;
use crate::config::{BindingPolicy, Config};
use crate::crypto::password::Verdict;
use crate::crypto::token;
use crate::error::{AuthError, Result};
use crate::hashing::HashPool;
use crate::models::attempt::{AttemptOutcome, LoginAttempt};
use crate::models::context::{ClientContext, SessionBinding};
use crate::models::session::Session;
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::stores::{CredentialStore, SessionStore};
use crate::validation;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Rows deleted per garbage-collection pass.
const SWEEP_BATCH: usize = 500;

/// What a successful login hands back to the web layer. `raw_token` is the
/// only place the token ever appears; it goes into the cookie and nowhere
/// else.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub raw_token: String,
    pub session_id: Uuid,
    pub principal_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub absolute_expires_at: DateTime<Utc>,
}

/// What a successful validate hands back. Deliberately excludes the
/// verifier and everything else the caller has no business seeing.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    pub principal_id: Uuid,
    pub identifier: String,
    pub session_id: Uuid,
    /// Current sliding expiry, after any refresh performed by this call.
    pub expires_at: DateTime<Utc>,
}

/// Coordinates credential verification, token minting, session bookkeeping
/// and revocation.
pub struct SessionService {
    credentials: Arc<dyn CredentialStore>,
    sessions: Arc<dyn SessionStore>,
    hashing: HashPool,
    limiter: Arc<dyn RateLimiter>,
    clock: Arc<dyn Clock>,
    config: Config,
}

impl SessionService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        sessions: Arc<dyn SessionStore>,
        hashing: HashPool,
        limiter: Arc<dyn RateLimiter>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        Self {
            credentials,
            sessions,
            hashing,
            limiter,
            clock,
            config,
        }
    }

    /// Exchanges credentials for a fresh session.
    ///
    /// Performs exactly one password-hash-equivalent of work whether or not
    /// the identifier exists: unknown identifiers are verified against a
    /// sentinel verifier before failing.
    pub async fn login(
        &self,
        identifier: &str,
        secret: &str,
        ctx: &ClientContext,
    ) -> Result<LoginOutcome> {
        let now = self.clock.now();
        validation::validate_identifier(identifier)?;
        validation::validate_secret(secret)?;
        let identifier = validation::fold_identifier(identifier);
        let source = ctx.source_addr.map(|a| a.to_string());

        match self
            .limiter
            .check(&identifier, source.as_deref(), now)
            .await?
        {
            RateDecision::Allowed => {}
            RateDecision::Limited { retry_after_secs } => {
                self.record_attempt(&identifier, &source, now, AttemptOutcome::Throttled)
                    .await;
                tracing::warn!(identifier = %identifier, "login throttled");
                return Err(AuthError::Throttled {
                    retry_after_secs: Some(retry_after_secs),
                });
            }
        }

        let principal = self
            .bounded(self.credentials.find_by_identifier(&identifier))
            .await?;
        let Some(principal) = principal else {
            // Equalize timing against the known-identifier path.
            self.hashing.verify_sentinel(secret.to_string()).await?;
            self.record_attempt(&identifier, &source, now, AttemptOutcome::UnknownIdentifier)
                .await;
            tracing::info!(identifier = %identifier, "login failed: unknown identifier");
            return Err(AuthError::InvalidCredentials);
        };

        if principal.is_disabled() {
            self.hashing.verify_sentinel(secret.to_string()).await?;
            self.record_attempt(&identifier, &source, now, AttemptOutcome::Disabled)
                .await;
            tracing::info!(principal_id = %principal.id, "login failed: principal disabled");
            return Err(AuthError::PrincipalDisabled);
        }

        let verdict = self
            .hashing
            .verify(principal.verifier.clone(), secret.to_string())
            .await?;
        match verdict {
            Verdict::Mismatch => {
                self.record_attempt(&identifier, &source, now, AttemptOutcome::BadSecret)
                    .await;
                tracing::info!(principal_id = %principal.id, "login failed: wrong secret");
                return Err(AuthError::InvalidCredentials);
            }
            Verdict::MatchNeedsRehash => {
                // Upgrade the stored verifier while the plaintext is at
                // hand. Failures here must never fail the login.
                match self.hashing.hash(secret.to_string()).await {
                    Ok(new_verifier) => {
                        if let Err(e) = self
                            .bounded(self.credentials.update_verifier(principal.id, &new_verifier))
                            .await
                        {
                            tracing::warn!(principal_id = %principal.id, error = %e,
                                "verifier rehash not persisted");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(principal_id = %principal.id, error = %e,
                            "verifier rehash skipped");
                    }
                }
            }
            Verdict::Match => {}
        }

        let raw_token = token::new_token();
        let session = Session {
            id: Uuid::new_v4(),
            token_hash: token::hash_token(&raw_token),
            principal_id: principal.id,
            created_at: now,
            expires_at: (now + self.config.idle_ttl).min(now + self.config.absolute_ttl),
            absolute_expires_at: now + self.config.absolute_ttl,
            last_seen_at: now,
            binding: ctx.binding(),
            revoked_at: None,
        };
        self.bounded(self.sessions.insert(&session)).await?;

        self.record_attempt(&identifier, &source, now, AttemptOutcome::Success)
            .await;
        tracing::info!(principal_id = %principal.id, session_id = %session.id, "login succeeded");

        Ok(LoginOutcome {
            raw_token,
            session_id: session.id,
            principal_id: principal.id,
            expires_at: session.expires_at,
            absolute_expires_at: session.absolute_expires_at,
        })
    }

    /// Resolves a bearer token to its principal, applying binding policy
    /// and the sliding refresh. Every failure mode collapses to
    /// `Unauthenticated`; the caller learns nothing else.
    pub async fn validate(
        &self,
        raw_token: &str,
        ctx: &ClientContext,
    ) -> Result<AuthenticatedPrincipal> {
        let now = self.clock.now();

        // Malformed tokens are rejected without touching storage.
        if !token::looks_like_token(raw_token) {
            return Err(AuthError::Unauthenticated);
        }
        let token_hash = token::hash_token(raw_token);

        let session = self
            .bounded(self.sessions.find_by_token_hash(&token_hash))
            .await?;
        let Some(session) = session else {
            return Err(AuthError::Unauthenticated);
        };
        if !token::hashes_match(&session.token_hash, &token_hash) {
            return Err(AuthError::Unauthenticated);
        }
        if !session.is_valid_at(now) {
            return Err(AuthError::Unauthenticated);
        }

        let principal = self
            .bounded(self.credentials.find_by_id(session.principal_id))
            .await?;
        let Some(principal) = principal else {
            self.revoke_quietly(session.id, now).await;
            return Err(AuthError::Unauthenticated);
        };
        if principal.is_disabled() {
            self.revoke_quietly(session.id, now).await;
            tracing::info!(session_id = %session.id, "session revoked: principal disabled");
            return Err(AuthError::Unauthenticated);
        }

        if self.binding_rejects(&session.binding, ctx) {
            self.revoke_quietly(session.id, now).await;
            tracing::info!(session_id = %session.id, "session revoked: binding mismatch");
            return Err(AuthError::Unauthenticated);
        }

        let mut expires_at = session.expires_at;
        if now - session.last_seen_at > self.config.refresh_threshold {
            // Sliding refresh, never past the absolute cap.
            let new_expires_at =
                (now + self.config.idle_ttl).min(session.absolute_expires_at);
            self.bounded(self.sessions.touch(session.id, new_expires_at, now))
                .await?;
            expires_at = new_expires_at;
        }

        Ok(AuthenticatedPrincipal {
            principal_id: principal.id,
            identifier: principal.identifier,
            session_id: session.id,
            expires_at,
        })
    }

    /// Revokes the session behind a token. Idempotent: unknown, malformed
    /// or already-revoked tokens return success.
    pub async fn logout(&self, raw_token: &str) -> Result<()> {
        let now = self.clock.now();
        if !token::looks_like_token(raw_token) {
            return Ok(());
        }
        let token_hash = token::hash_token(raw_token);
        let session = self
            .bounded(self.sessions.find_by_token_hash(&token_hash))
            .await?;
        if let Some(session) = session {
            self.bounded(self.sessions.revoke(session.id, now)).await?;
            tracing::info!(session_id = %session.id, "logged out");
        }
        Ok(())
    }

    /// Revokes every session of the principal, optionally preserving the
    /// caller's current one.
    pub async fn logout_all(&self, principal_id: Uuid, except: Option<Uuid>) -> Result<()> {
        let now = self.clock.now();
        let revoked = self
            .bounded(
                self.sessions
                    .revoke_all_for_principal(principal_id, except, now),
            )
            .await?;
        tracing::info!(principal_id = %principal_id, revoked, "logged out everywhere");
        Ok(())
    }

    /// Verifies the old secret, replaces the verifier and forcibly
    /// re-authenticates every other device.
    pub async fn password_change(
        &self,
        principal_id: Uuid,
        old_secret: &str,
        new_secret: &str,
        current_session_id: Option<Uuid>,
    ) -> Result<()> {
        let now = self.clock.now();
        validation::validate_secret(new_secret)?;

        let principal = self
            .bounded(self.credentials.find_by_id(principal_id))
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if principal.is_disabled() {
            return Err(AuthError::PrincipalDisabled);
        }

        let verdict = self
            .hashing
            .verify(principal.verifier.clone(), old_secret.to_string())
            .await?;
        if verdict == Verdict::Mismatch {
            tracing::info!(principal_id = %principal_id, "password change failed: wrong secret");
            return Err(AuthError::InvalidCredentials);
        }

        let new_verifier = self.hashing.hash(new_secret.to_string()).await?;
        self.bounded(self.credentials.update_verifier(principal_id, &new_verifier))
            .await?;

        let revoked = self
            .bounded(self.sessions.revoke_all_for_principal(
                principal_id,
                current_session_id,
                now,
            ))
            .await?;
        tracing::info!(principal_id = %principal_id, revoked, "password changed");
        Ok(())
    }

    /// One bounded garbage-collection pass: drops sessions that have been
    /// expired longer than the retention window, with their audit rows.
    pub async fn sweep(&self) -> Result<u64> {
        let now = self.clock.now();
        let cutoff = now - self.config.retention_after_expiry;
        let removed = self
            .bounded(self.sessions.sweep(cutoff, SWEEP_BATCH))
            .await?;
        if removed > 0 {
            tracing::info!(removed, "swept expired sessions");
        }
        Ok(removed)
    }

    /// Periodic sweeper, meant to be spawned:
    /// `tokio::spawn(service.clone().run_sweeper())`.
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.sweep().await {
                tracing::error!(error = %e, "sweep pass failed");
            }
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn binding_rejects(&self, bound: &SessionBinding, ctx: &ClientContext) -> bool {
        match self.config.binding_policy {
            BindingPolicy::None => false,
            BindingPolicy::UaStrict => bound.user_agent_fingerprint != ctx.ua_fingerprint(),
            BindingPolicy::NetworkSoft => match (&bound.ip_prefix, ctx.ip_prefix()) {
                (Some(bound_prefix), Some(current)) => *bound_prefix != current,
                _ => false,
            },
        }
    }

    async fn revoke_quietly(&self, session_id: Uuid, at: DateTime<Utc>) {
        // A revocation side effect never surfaces as an error to the
        // caller; the caller only ever sees Unauthenticated.
        if let Err(e) = self.bounded(self.sessions.revoke(session_id, at)).await {
            tracing::warn!(session_id = %session_id, error = %e, "side-effect revoke failed");
        }
    }

    async fn record_attempt(
        &self,
        identifier: &str,
        source: &Option<String>,
        at: DateTime<Utc>,
        outcome: AttemptOutcome,
    ) {
        let attempt = LoginAttempt {
            identifier: identifier.to_string(),
            source: source.clone(),
            at,
            outcome,
        };
        if let Err(e) = self.bounded(self.sessions.record_attempt(&attempt)).await {
            tracing::warn!(error = %e, "login attempt not recorded");
        }
    }

    /// Applies the store deadline. On expiry the operation is abandoned
    /// and the caller sees `StorageUnavailable`.
    async fn bounded<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.store_timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::StorageUnavailable(
                "store deadline exceeded".to_string(),
            )),
        }
    }
}
