use crate::models::context::SessionBinding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-side record that authorizes a client to act as a principal for a
/// bounded time. The raw bearer token is never persisted; `token_hash` is
/// the lookup key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// Domain-separated SHA-256 of the raw token, hex-encoded. Unique.
    pub token_hash: String,
    pub principal_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Sliding expiry, extended on use up to `absolute_expires_at`.
    pub expires_at: DateTime<Utc>,
    /// Hard cap independent of sliding refreshes.
    pub absolute_expires_at: DateTime<Utc>,
    /// Updated on successful validate; drives the sliding refresh.
    pub last_seen_at: DateTime<Utc>,
    /// Client characteristics captured at mint time.
    pub binding: SessionBinding,
    /// Once set, the row is terminal.
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Whether this row alone is still live at `now`. The caller must
    /// additionally check that the principal is not disabled.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now < self.expires_at && now < self.absolute_expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(now: DateTime<Utc>) -> Session {
        Session {
            id: Uuid::new_v4(),
            token_hash: "ab".repeat(32),
            principal_id: Uuid::new_v4(),
            created_at: now,
            expires_at: now + Duration::minutes(30),
            absolute_expires_at: now + Duration::hours(12),
            last_seen_at: now,
            binding: SessionBinding::default(),
            revoked_at: None,
        }
    }

    #[test]
    fn fresh_session_is_valid() {
        let now = Utc::now();
        assert!(session(now).is_valid_at(now));
    }

    #[test]
    fn revoked_session_is_terminal() {
        let now = Utc::now();
        let mut s = session(now);
        s.revoked_at = Some(now);
        assert!(!s.is_valid_at(now));
    }

    #[test]
    fn idle_expiry_invalidates() {
        let now = Utc::now();
        let s = session(now);
        assert!(!s.is_valid_at(now + Duration::minutes(31)));
    }

    #[test]
    fn absolute_expiry_wins_over_sliding_window() {
        let now = Utc::now();
        let mut s = session(now);
        // A refresh that (incorrectly) slid past the cap must not help.
        s.expires_at = now + Duration::hours(13);
        assert!(!s.is_valid_at(now + Duration::hours(12)));
    }
}
