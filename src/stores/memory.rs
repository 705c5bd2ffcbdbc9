//! In-memory stores. Back tests and single-instance embedding; the mutex
//! per store gives the same per-row ordering the PostgreSQL stores get
//! from transactions.

use crate::error::{AuthError, Result};
use crate::models::attempt::LoginAttempt;
use crate::models::principal::Principal;
use crate::models::session::Session;
use crate::stores::{CredentialStore, SessionStore};
use crate::validation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Principals held in a mutexed map.
#[derive(Default)]
pub struct MemoryCredentialStore {
    principals: Mutex<HashMap<Uuid, Principal>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provisions a principal. Registration proper is out of scope; this
    /// exists so embedders and tests can seed accounts.
    pub fn insert(&self, mut principal: Principal) {
        principal.identifier = validation::fold_identifier(&principal.identifier);
        self.principals
            .lock()
            .unwrap()
            .insert(principal.id, principal);
    }

    /// Soft-disables (or re-enables) a principal.
    pub fn set_disabled(&self, principal_id: Uuid, at: Option<DateTime<Utc>>) {
        if let Some(p) = self.principals.lock().unwrap().get_mut(&principal_id) {
            p.disabled_at = at;
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<Principal>> {
        let folded = validation::fold_identifier(identifier);
        Ok(self
            .principals
            .lock()
            .unwrap()
            .values()
            .find(|p| p.identifier == folded)
            .cloned())
    }

    async fn find_by_id(&self, principal_id: Uuid) -> Result<Option<Principal>> {
        Ok(self.principals.lock().unwrap().get(&principal_id).cloned())
    }

    async fn update_verifier(&self, principal_id: Uuid, verifier: &str) -> Result<()> {
        let mut principals = self.principals.lock().unwrap();
        match principals.get_mut(&principal_id) {
            Some(p) => {
                p.verifier = verifier.to_string();
                Ok(())
            }
            None => Err(AuthError::Internal(format!(
                "update_verifier: unknown principal {principal_id}"
            ))),
        }
    }
}

#[derive(Default)]
struct SessionState {
    by_id: HashMap<Uuid, Session>,
    by_hash: HashMap<String, Uuid>,
}

/// Sessions and login attempts held in mutexed maps.
#[derive(Default)]
pub struct MemorySessionStore {
    state: Mutex<SessionState>,
    attempts: Mutex<Vec<LoginAttempt>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of session rows currently held. Test observability.
    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().by_id.len()
    }

    /// Snapshot of a session row by id. Test observability.
    pub fn get(&self, session_id: Uuid) -> Option<Session> {
        self.state.lock().unwrap().by_id.get(&session_id).cloned()
    }

    /// Snapshot of the audit log. Test observability.
    pub fn attempts(&self) -> Vec<LoginAttempt> {
        self.attempts.lock().unwrap().clone()
    }

    /// Whether any stored value contains `needle` as a substring. Used by
    /// tests to prove raw secrets and raw tokens never reach storage.
    pub fn contains_plaintext(&self, needle: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.by_id.values().any(|s| {
            s.token_hash.contains(needle)
                || s.binding
                    .user_agent_fingerprint
                    .as_deref()
                    .is_some_and(|ua| ua.contains(needle))
        }) || state.by_hash.keys().any(|h| h.contains(needle))
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &Session) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.by_hash.contains_key(&session.token_hash) {
            // Token mint collision; practically unreachable.
            return Err(AuthError::Internal("duplicate token hash".to_string()));
        }
        state
            .by_hash
            .insert(session.token_hash.clone(), session.id);
        state.by_id.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .by_hash
            .get(token_hash)
            .and_then(|id| state.by_id.get(id))
            .cloned())
    }

    async fn touch(
        &self,
        session_id: Uuid,
        new_expires_at: DateTime<Utc>,
        last_seen_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(s) = state.by_id.get_mut(&session_id) {
            // Conditional on not-revoked: a racing revoke must stick.
            if s.revoked_at.is_none() {
                s.expires_at = new_expires_at;
                s.last_seen_at = last_seen_at;
            }
        }
        Ok(())
    }

    async fn revoke(&self, session_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(s) = state.by_id.get_mut(&session_id) {
            if s.revoked_at.is_none() {
                s.revoked_at = Some(at);
            }
        }
        Ok(())
    }

    async fn revoke_all_for_principal(
        &self,
        principal_id: Uuid,
        except: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut revoked = 0;
        for s in state.by_id.values_mut() {
            if s.principal_id == principal_id
                && Some(s.id) != except
                && s.revoked_at.is_none()
            {
                s.revoked_at = Some(at);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn sweep(&self, cutoff: DateTime<Utc>, batch: usize) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let doomed: Vec<Uuid> = state
            .by_id
            .values()
            .filter(|s| s.expires_at < cutoff)
            .map(|s| s.id)
            .take(batch)
            .collect();
        for id in &doomed {
            if let Some(s) = state.by_id.remove(id) {
                state.by_hash.remove(&s.token_hash);
            }
        }
        self.attempts.lock().unwrap().retain(|a| a.at >= cutoff);
        Ok(doomed.len() as u64)
    }

    async fn record_attempt(&self, attempt: &LoginAttempt) -> Result<()> {
        self.attempts.lock().unwrap().push(attempt.clone());
        Ok(())
    }
}
