//! Single-use CSRF state for the login flow.
//!
//! A state token is minted at login start, handed to the provider in the
//! authorize URL, and stored with the browser as a short-lived HTTP-only
//! cookie. The callback is accepted only when the query `state` exactly
//! matches the cookie, and the cookie is wiped on every callback exit path
//! — success or failure — so a state value can never be replayed.
//!
//! The server keeps no CSRF state in memory; the browser's cookie jar is
//! the backing store. [`StateStore`] is a seam: an alternate implementation
//! (a distributed store, say) can be injected into the flow without
//! touching its logic.

use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use cookie::time::Duration;
use cookie::Cookie;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::Error;

/// Random bytes in a freshly minted state token.
const STATE_BYTES: usize = 24;

/// Mint a fresh opaque state token: URL-safe base64 over random bytes.
pub fn mint_state() -> String {
    let mut buf = [0u8; STATE_BYTES];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Issues and verifies the single-use CSRF token tied to a login attempt.
pub trait StateStore: Send + Sync {
    /// The cookie that persists `state` with the current response.
    fn save(&self, state: &str) -> Result<Cookie<'static>, Error>;

    /// Whether the state presented in the callback matches the one saved
    /// for this browser. Must not mutate anything.
    fn verify(&self, headers: &HeaderMap, state: &str) -> bool;

    /// The removal cookie that clears the stored state unconditionally.
    fn wipe(&self) -> Cookie<'static>;
}

/// Default store: the state lives in an HTTP-only cookie at path `/`.
#[derive(Debug, Clone)]
pub struct CookieStateStore {
    name: String,
}

impl CookieStateStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for CookieStateStore {
    fn default() -> Self {
        Self::new("authgate_state")
    }
}

impl StateStore for CookieStateStore {
    fn save(&self, state: &str) -> Result<Cookie<'static>, Error> {
        Ok(Cookie::build((self.name.clone(), state.to_string()))
            .path("/")
            .http_only(true)
            .build())
    }

    fn verify(&self, headers: &HeaderMap, state: &str) -> bool {
        // A never-issued (empty) state is invalid even when the browser
        // presents no cookie at all.
        if state.is_empty() {
            return false;
        }
        cookie_value(headers, &self.name).is_some_and(|stored| stored == state)
    }

    fn wipe(&self) -> Cookie<'static> {
        Cookie::build((self.name.clone(), ""))
            .path("/")
            .http_only(true)
            .max_age(Duration::ZERO)
            .build()
    }
}

/// Read a cookie value out of request headers.
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else { continue };
        for parsed in Cookie::split_parse(raw.to_string()) {
            match parsed {
                Ok(c) if c.name() == name => return Some(c.value().to_string()),
                _ => continue,
            }
        }
    }
    None
}
