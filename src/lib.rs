//! Reusable session authentication core.
//!
//! The crate exposes a [`service::SessionService`] facade that coordinates
//! login, validate, logout, logout-everywhere and password change over a
//! narrow set of collaborators: a credential store, a session store, a
//! password hasher offloaded to a bounded worker pool, a rate limiter and a
//! clock. Everything client-visible reduces to a single opaque bearer token
//! carried in a host-only cookie; only the token's hash is ever persisted.
//!
//! Transport is deliberately out of scope. A web layer calls the service
//! with explicit arguments (token, [`models::context::ClientContext`]) and
//! turns the returned values into responses; [`cookie`] provides the cookie
//! contract as buildable values.

pub mod clock;
pub mod config;
pub mod cookie;
pub mod error;
pub mod hashing;
pub mod rate_limit;
pub mod service;
pub mod stores;
pub mod validation;

pub mod crypto {
    pub mod password;
    pub mod token;
}

pub mod models {
    pub mod attempt;
    pub mod context;
    pub mod principal;
    pub mod session;
}

pub use clock::{Clock, SystemClock};
pub use config::{BindingPolicy, Config, RateLimitConfig};
pub use error::{AuthError, Result};
pub use models::context::ClientContext;
pub use service::{AuthenticatedPrincipal, LoginOutcome, SessionService};
