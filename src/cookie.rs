//! The cookie contract, the only client-visible artifact of the core.
//!
//! The session cookie is host-only: the Domain attribute is never set, so
//! the cookie is not sent to sibling or parent subdomains. Logout emits a
//! cookie with the same Name/Domain/Path and an expiry in the past, which
//! is what makes deletion reliable.

use chrono::{DateTime, Utc};
use cookie::time::Duration;
use cookie::{Cookie, SameSite};

/// Short and non-descriptive on purpose.
pub const SESSION_COOKIE_NAME: &str = "sid";

/// Builds the session cookie for a freshly minted token.
///
/// `secure` should be the request's `ClientContext::secure_transport`;
/// `Max-Age` always agrees with the server-side `expires_at`.
pub fn session_cookie(
    raw_token: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
    secure: bool,
    same_site_strict: bool,
) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE_NAME, raw_token.to_string());
    apply_scope(&mut cookie, secure, same_site_strict);
    let max_age = (expires_at - now).num_seconds().max(0);
    cookie.set_max_age(Duration::seconds(max_age));
    cookie
}

/// Builds the deletion cookie emitted on logout. Same attributes, empty
/// value, expiry in the past.
pub fn removal_cookie(secure: bool, same_site_strict: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(SESSION_COOKIE_NAME, "");
    apply_scope(&mut cookie, secure, same_site_strict);
    cookie.set_max_age(Duration::seconds(0));
    cookie
}

fn apply_scope(cookie: &mut Cookie<'static>, secure: bool, same_site_strict: bool) {
    cookie.set_http_only(true);
    cookie.set_path("/");
    // Domain deliberately unset: host-only cookie.
    if secure {
        cookie.set_secure(true);
    }
    cookie.set_same_site(if same_site_strict {
        SameSite::Strict
    } else {
        SameSite::Lax
    });
}
