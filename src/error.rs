use thiserror::Error;

/// The error kinds surfaced by the authentication core.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Unknown identifier or wrong secret. The client-facing message is the
    /// same in both cases; logs distinguish them.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The account exists but is disabled.
    #[error("principal disabled")]
    PrincipalDisabled,

    /// A rate limit was hit, or the hashing pool is saturated.
    #[error("rate limit exceeded")]
    Throttled {
        /// Optional hint, in seconds, for when to retry.
        retry_after_secs: Option<u64>,
    },

    /// No valid session on a protected call.
    #[error("unauthenticated")]
    Unauthenticated,

    /// A stored verifier could not be parsed. Data corruption in the
    /// credential store; never leaked to the client.
    #[error("malformed verifier")]
    MalformedVerifier,

    /// Transient storage fault. The web layer should map this to a
    /// retryable status.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Rejected input (length or charset bounds).
    #[error("validation error: {0}")]
    Validation(&'static str),

    /// An internal fault that is not the caller's concern.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AuthError` as the error type.
pub type Result<T> = std::result::Result<T, AuthError>;

impl AuthError {
    /// The constant string shown to clients. Never includes server state,
    /// principal identifiers or timing information. `InvalidCredentials`
    /// and `PrincipalDisabled` are indistinguishable here.
    pub fn client_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials | AuthError::PrincipalDisabled => {
                "invalid username or password"
            }
            AuthError::Throttled { .. } => "too many requests",
            AuthError::Unauthenticated => "authentication required",
            AuthError::StorageUnavailable(_) => "service temporarily unavailable",
            AuthError::Validation(msg) => msg,
            AuthError::MalformedVerifier | AuthError::Internal(_) => "internal server error",
        }
    }

    /// Whether the web layer should advertise the request as retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::StorageUnavailable(_))
    }
}

impl From<tokio_postgres::Error> for AuthError {
    fn from(e: tokio_postgres::Error) -> Self {
        AuthError::StorageUnavailable(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AuthError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        AuthError::StorageUnavailable(e.to_string())
    }
}

impl From<redis::RedisError> for AuthError {
    fn from(e: redis::RedisError) -> Self {
        AuthError::StorageUnavailable(e.to_string())
    }
}
