use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a login attempt ended. Persisted as text in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    UnknownIdentifier,
    BadSecret,
    Disabled,
    Throttled,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::UnknownIdentifier => "unknown_identifier",
            AttemptOutcome::BadSecret => "bad_secret",
            AttemptOutcome::Disabled => "disabled",
            AttemptOutcome::Throttled => "throttled",
        }
    }
}

/// Append-only audit row for a login attempt. Aged out by the sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginAttempt {
    /// Case-folded identifier the caller presented.
    pub identifier: String,
    /// Source address, if known.
    pub source: Option<String>,
    pub at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_round_trips_as_text() {
        for outcome in [
            AttemptOutcome::Success,
            AttemptOutcome::UnknownIdentifier,
            AttemptOutcome::BadSecret,
            AttemptOutcome::Disabled,
            AttemptOutcome::Throttled,
        ] {
            let json = serde_json::to_string(&outcome).unwrap();
            assert_eq!(json, format!("\"{}\"", outcome.as_str()));
        }
    }
}
