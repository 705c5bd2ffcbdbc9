//! Trait seams over persistence. Any transactional store can sit behind
//! these; the crate ships an in-memory implementation for tests and
//! single-instance embedding, and a PostgreSQL implementation.

use crate::error::Result;
use crate::models::attempt::LoginAttempt;
use crate::models::principal::Principal;
use crate::models::session::Session;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod memory;
pub mod postgres;

/// Narrow interface over persisted principals. Mutation is limited to the
/// opportunistic verifier upgrade; registration and account administration
/// are out-of-scope flows that talk to the same tables elsewhere.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Looks up a principal by case-folded identifier.
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Principal>>;

    /// Looks up a principal by id. Used by validate and password change.
    async fn find_by_id(&self, principal_id: Uuid) -> Result<Option<Principal>>;

    /// Replaces the stored verifier. Used for opportunistic rehash and
    /// password change.
    async fn update_verifier(&self, principal_id: Uuid, verifier: &str) -> Result<()>;
}

/// Durable bookkeeping for sessions.
///
/// Contracts: `insert` is atomic and rejects a duplicate `token_hash`;
/// `touch` is conditional on `revoked_at` being unset, so a concurrent
/// revoke can never be undone; `revoke` is idempotent;
/// `revoke_all_for_principal` observes a consistent snapshot of the
/// principal's sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &Session) -> Result<()>;

    /// O(1) lookup via the unique `token_hash` index.
    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>>;

    /// Sliding refresh. A no-op if the session is already revoked.
    async fn touch(
        &self,
        session_id: Uuid,
        new_expires_at: DateTime<Utc>,
        last_seen_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Marks the session terminal. Idempotent; an earlier `revoked_at` is
    /// kept.
    async fn revoke(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Revokes every live session of the principal, optionally preserving
    /// one. Returns how many sessions were revoked.
    async fn revoke_all_for_principal(
        &self,
        principal_id: Uuid,
        except: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<u64>;

    /// Deletes sessions whose sliding expiry fell before `cutoff`, and ages
    /// out login attempts older than `cutoff`. At most `batch` session rows
    /// go per call. Returns how many sessions were deleted.
    async fn sweep(&self, cutoff: DateTime<Utc>, batch: usize) -> Result<u64>;

    /// Appends a login-attempt audit row.
    async fn record_attempt(&self, attempt: &LoginAttempt) -> Result<()>;
}
