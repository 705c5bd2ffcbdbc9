//! PostgreSQL stores over deadpool-postgres. Every query is parameterized;
//! mutating calls run as single statements or explicit transactions, and
//! `touch` is a conditional update so it can never race a revoke into
//! resurrection.

use crate::error::{AuthError, Result};
use crate::models::attempt::LoginAttempt;
use crate::models::context::SessionBinding;
use crate::models::principal::Principal;
use crate::models::session::Session;
use crate::stores::{CredentialStore, SessionStore};
use crate::validation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{
    Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime,
};
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

/// Schema the stores expect. `sessions.token_hash` carries the unique index
/// the O(1) lookup relies on; `sessions.principal_id` is indexed for
/// logout-everywhere and audit queries.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS principals (
    id UUID PRIMARY KEY,
    identifier TEXT NOT NULL UNIQUE,
    verifier TEXT NOT NULL,
    disabled_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS sessions (
    id UUID PRIMARY KEY,
    token_hash TEXT NOT NULL,
    principal_id UUID NOT NULL REFERENCES principals(id),
    created_at TIMESTAMPTZ NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL,
    absolute_expires_at TIMESTAMPTZ NOT NULL,
    last_seen_at TIMESTAMPTZ NOT NULL,
    ua_fingerprint TEXT,
    ip_prefix TEXT,
    revoked_at TIMESTAMPTZ
);
CREATE UNIQUE INDEX IF NOT EXISTS sessions_token_hash_idx ON sessions (token_hash);
CREATE INDEX IF NOT EXISTS sessions_principal_idx ON sessions (principal_id);

CREATE TABLE IF NOT EXISTS login_attempts (
    identifier TEXT NOT NULL,
    source TEXT,
    at TIMESTAMPTZ NOT NULL,
    outcome TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS login_attempts_at_idx ON login_attempts (at);
"#;

/// Creates a connection pool from a PostgreSQL URL.
pub fn create_pool(database_url: &str) -> Result<Pool> {
    let mut cfg = Config::new();
    let pg_config: tokio_postgres::Config = database_url
        .parse()
        .map_err(|e: tokio_postgres::Error| AuthError::StorageUnavailable(e.to_string()))?;

    if let Some(tokio_postgres::config::Host::Tcp(hostname)) = pg_config.get_hosts().first() {
        cfg.host = Some(hostname.clone());
    }
    if let Some(port) = pg_config.get_ports().first() {
        cfg.port = Some(*port);
    }
    if let Some(dbname) = pg_config.get_dbname() {
        cfg.dbname = Some(dbname.to_string());
    }
    if let Some(user) = pg_config.get_user() {
        cfg.user = Some(user.to_string());
    }
    if let Some(password) = pg_config.get_password() {
        cfg.password = Some(String::from_utf8_lossy(password).to_string());
    }

    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig {
        max_size: 32,
        timeouts: deadpool_postgres::Timeouts {
            wait: Some(Duration::from_secs(5)),
            create: Some(Duration::from_secs(2)),
            recycle: Some(Duration::from_secs(1)),
        },
        ..Default::default()
    });

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| AuthError::StorageUnavailable(e.to_string()))
}

/// Applies [`SCHEMA`]. Idempotent.
pub async fn ensure_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;
    client.batch_execute(SCHEMA).await?;
    Ok(())
}

fn row_to_principal(row: &Row) -> Result<Principal> {
    Ok(Principal {
        id: row.try_get("id")?,
        identifier: row.try_get("identifier")?,
        verifier: row.try_get("verifier")?,
        disabled_at: row.try_get("disabled_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_session(row: &Row) -> Result<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        token_hash: row.try_get("token_hash")?,
        principal_id: row.try_get("principal_id")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        absolute_expires_at: row.try_get("absolute_expires_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
        binding: SessionBinding {
            user_agent_fingerprint: row.try_get("ua_fingerprint")?,
            ip_prefix: row.try_get("ip_prefix")?,
        },
        revoked_at: row.try_get("revoked_at")?,
    })
}

/// Principal access over a shared pool.
pub struct PgCredentialStore {
    pool: Pool,
}

impl PgCredentialStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Provisions a principal row. Registration proper is out of scope;
    /// this exists for seeding and administrative tooling.
    pub async fn create_principal(&self, principal: &Principal) -> Result<()> {
        let client = self.pool.get().await?;
        let identifier = validation::fold_identifier(&principal.identifier);
        client
            .execute(
                r#"
                INSERT INTO principals (id, identifier, verifier, disabled_at, created_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
                &[
                    &principal.id,
                    &identifier,
                    &principal.verifier,
                    &principal.disabled_at,
                    &principal.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    /// Soft-disables (or re-enables) a principal. Disabling fails new
    /// logins immediately; live sessions are revoked on their next
    /// validate.
    pub async fn set_disabled(
        &self,
        principal_id: Uuid,
        at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE principals
                SET disabled_at = $2
                WHERE id = $1
                "#,
                &[&principal_id, &at],
            )
            .await?;
        if updated == 0 {
            return Err(AuthError::Internal(format!(
                "set_disabled: unknown principal {principal_id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Principal>> {
        let client = self.pool.get().await?;
        let folded = validation::fold_identifier(identifier);
        let row = client
            .query_opt(
                r#"
                SELECT id, identifier, verifier, disabled_at, created_at
                FROM principals
                WHERE identifier = $1
                "#,
                &[&folded],
            )
            .await?;
        row.map(|r| row_to_principal(&r)).transpose()
    }

    async fn find_by_id(&self, principal_id: Uuid) -> Result<Option<Principal>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT id, identifier, verifier, disabled_at, created_at
                FROM principals
                WHERE id = $1
                "#,
                &[&principal_id],
            )
            .await?;
        row.map(|r| row_to_principal(&r)).transpose()
    }

    async fn update_verifier(&self, principal_id: Uuid, verifier: &str) -> Result<()> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE principals
                SET verifier = $1
                WHERE id = $2
                "#,
                &[&verifier, &principal_id],
            )
            .await?;
        if updated == 0 {
            return Err(AuthError::Internal(format!(
                "update_verifier: unknown principal {principal_id}"
            )));
        }
        Ok(())
    }
}

/// Session bookkeeping over a shared pool.
pub struct PgSessionStore {
    pool: Pool,
}

impl PgSessionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: &Session) -> Result<()> {
        let client = self.pool.get().await?;
        let outcome = client
            .execute(
                r#"
                INSERT INTO sessions
                    (id, token_hash, principal_id, created_at, expires_at,
                     absolute_expires_at, last_seen_at, ua_fingerprint, ip_prefix, revoked_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
                &[
                    &session.id,
                    &session.token_hash,
                    &session.principal_id,
                    &session.created_at,
                    &session.expires_at,
                    &session.absolute_expires_at,
                    &session.last_seen_at,
                    &session.binding.user_agent_fingerprint,
                    &session.binding.ip_prefix,
                    &session.revoked_at,
                ],
            )
            .await;
        match outcome {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                // Token mint collision; practically unreachable.
                Err(AuthError::Internal("duplicate token hash".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT id, token_hash, principal_id, created_at, expires_at,
                       absolute_expires_at, last_seen_at, ua_fingerprint, ip_prefix, revoked_at
                FROM sessions
                WHERE token_hash = $1
                "#,
                &[&token_hash],
            )
            .await?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn touch(
        &self,
        session_id: Uuid,
        new_expires_at: DateTime<Utc>,
        last_seen_at: DateTime<Utc>,
    ) -> Result<()> {
        let client = self.pool.get().await?;
        // Conditional on not-revoked: a racing revoke must stick.
        client
            .execute(
                r#"
                UPDATE sessions
                SET expires_at = $2, last_seen_at = $3
                WHERE id = $1 AND revoked_at IS NULL
                "#,
                &[&session_id, &new_expires_at, &last_seen_at],
            )
            .await?;
        Ok(())
    }

    async fn revoke(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                UPDATE sessions
                SET revoked_at = $2
                WHERE id = $1 AND revoked_at IS NULL
                "#,
                &[&session_id, &at],
            )
            .await?;
        Ok(())
    }

    async fn revoke_all_for_principal(
        &self,
        principal_id: Uuid,
        except: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let revoked = tx
            .execute(
                r#"
                UPDATE sessions
                SET revoked_at = $3
                WHERE principal_id = $1
                  AND revoked_at IS NULL
                  AND ($2::uuid IS NULL OR id <> $2)
                "#,
                &[&principal_id, &except, &at],
            )
            .await?;
        tx.commit().await?;
        Ok(revoked)
    }

    async fn sweep(&self, cutoff: DateTime<Utc>, batch: usize) -> Result<u64> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let deleted = tx
            .execute(
                r#"
                DELETE FROM sessions
                WHERE id IN (
                    SELECT id FROM sessions
                    WHERE expires_at < $1
                    LIMIT $2
                )
                "#,
                &[&cutoff, &(batch as i64)],
            )
            .await?;
        tx.execute(
            r#"
            DELETE FROM login_attempts
            WHERE at < $1
            "#,
            &[&cutoff],
        )
        .await?;
        tx.commit().await?;
        Ok(deleted)
    }

    async fn record_attempt(&self, attempt: &LoginAttempt) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO login_attempts (identifier, source, at, outcome)
                VALUES ($1, $2, $3, $4)
                "#,
                &[
                    &attempt.identifier,
                    &attempt.source,
                    &attempt.at,
                    &attempt.outcome.as_str(),
                ],
            )
            .await?;
        Ok(())
    }
}
