use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// The authenticated identity the rest of the system acts on behalf of.
///
/// The `verifier` holds the salted, cost-parameterized password hash. It
/// never crosses an external interface: it is skipped on serialization and
/// redacted in `Debug` output.
#[derive(Clone, Serialize)]
pub struct Principal {
    pub id: Uuid,
    /// Externally-presented login string, stored case-folded.
    pub identifier: String,
    /// PHC-format verifier string (`$argon2id$v=..$m=..,t=..,p=..$salt$digest`).
    #[serde(skip_serializing)]
    pub verifier: String,
    /// If set, login always fails and existing sessions are invalid.
    pub disabled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Principal {
    pub fn is_disabled(&self) -> bool {
        self.disabled_at.is_some()
    }
}

impl std::fmt::Debug for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Principal")
            .field("id", &self.id)
            .field("identifier", &self.identifier)
            .field("verifier", &"<redacted>")
            .field("disabled_at", &self.disabled_at)
            .field("created_at", &self.created_at)
            .finish()
    }
}
