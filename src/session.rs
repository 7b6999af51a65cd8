//! Signed-cookie sessions — the locally-authoritative user record.
//!
//! A successful callback produces a [`SessionUser`], which is signed into a
//! tamper-evident cookie by an [`Authorizer`]. The session lifetime is
//! independent of the OAuth2 token lifetime: the cookie is refreshed
//! locally when it nears expiry, without another provider round trip, and
//! destroyed on sign-out.
//!
//! The default [`SignedCookieAuthorizer`] encodes the user as
//! `base64url(json) + "." + base64url(hmac-sha256)`. Alternate authorizers
//! (an external session service, say) implement the same trait.

use axum::http::HeaderMap;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use cookie::Cookie;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::config::Config;
use crate::roles::Roles;
use crate::state::cookie_value;
use crate::userinfo::ProviderIdentity;

type HmacSha256 = Hmac<Sha256>;

/// Session decode/encode failures. All of them mean "no session" to a
/// request guard; encode failures at sign-in are server errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session cookie not found")]
    Missing,

    #[error("session cookie malformed")]
    Malformed,

    #[error("session signature mismatch")]
    BadSignature,

    #[error("session expired")]
    Expired,

    #[error("session encode failed: {0}")]
    Encode(String),
}

/// The identity written into the session cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUser {
    pub subject_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub roles: Roles,
    /// Unix seconds; stamped by the authorizer at sign-in and refresh.
    #[serde(default)]
    pub expires_at: i64,
}

impl SessionUser {
    /// Deterministic normalization of a provider identity. The rich
    /// profile keeps its username and nickname; the claims shape maps
    /// `sub`/`name`; an absent identity yields an empty record that still
    /// carries the roles.
    pub fn from_identity(identity: ProviderIdentity, roles: Roles) -> Self {
        let (subject_id, username, display_name, avatar) = match identity {
            ProviderIdentity::Member(me) => (me.id, me.username, me.nickname, me.avatar),
            ProviderIdentity::Claims(claims) => (
                claims.sub,
                String::new(),
                claims.name.unwrap_or_default(),
                claims.avatar,
            ),
            ProviderIdentity::Anonymous => Default::default(),
        };
        Self {
            subject_id,
            username,
            display_name,
            avatar,
            roles,
            expires_at: 0,
        }
    }

    /// Display name, falling back to the username when unset.
    pub fn name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.username
        } else {
            &self.display_name
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.expires_at, 0)
            .single()
            .unwrap_or_default()
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at != 0 && self.expires_at() < now
    }
}

/// Capability that signs a user record into a cookie, reads it back, and
/// clears it on sign-out.
pub trait Authorizer: Send + Sync {
    /// Sign `user` into a session cookie, stamping a fresh expiry.
    fn signin(&self, user: &SessionUser) -> Result<Cookie<'static>, SessionError>;

    /// Decode and verify the session presented by the request.
    fn user_from(&self, headers: &HeaderMap) -> Result<SessionUser, SessionError>;

    /// Re-issue the cookie with an extended expiry when the session is
    /// near expiry; `None` when no refresh is due.
    fn refresh(&self, user: &SessionUser) -> Option<Cookie<'static>>;

    /// The removal cookie ending the session. Idempotent.
    fn signout(&self) -> Cookie<'static>;
}

/// Default authorizer: HMAC-SHA256 signed cookie.
#[derive(Debug, Clone)]
pub struct SignedCookieAuthorizer {
    name: String,
    path: String,
    domain: Option<String>,
    key: Vec<u8>,
    ttl: chrono::Duration,
}

impl SignedCookieAuthorizer {
    pub fn new(key: impl Into<Vec<u8>>, ttl: std::time::Duration) -> Self {
        Self {
            name: "authgate_user".into(),
            path: "/".into(),
            domain: None,
            key: key.into(),
            ttl: chrono::Duration::seconds(ttl.as_secs() as i64),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.session.key.as_bytes().to_vec(), config.session.ttl).with_cookie(
            config.cookies.session_name.clone(),
            config.cookies.session_path.clone(),
            config.cookies.session_domain.clone(),
        )
    }

    /// Override the cookie name, path, and domain.
    pub fn with_cookie(
        mut self,
        name: impl Into<String>,
        path: impl Into<String>,
        domain: Option<String>,
    ) -> Self {
        self.name = name.into();
        self.path = path.into();
        self.domain = domain;
        self
    }

    fn mac(&self) -> Result<HmacSha256, SessionError> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| SessionError::Encode(e.to_string()))
    }

    fn sign(&self, payload: &str) -> Result<String, SessionError> {
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    pub(crate) fn encode(&self, user: &SessionUser) -> Result<String, SessionError> {
        let json = serde_json::to_vec(user).map_err(|e| SessionError::Encode(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(json);
        let sig = self.sign(&payload)?;
        Ok(format!("{payload}.{sig}"))
    }

    pub(crate) fn decode(&self, raw: &str) -> Result<SessionUser, SessionError> {
        let (payload, sig) = raw.split_once('.').ok_or(SessionError::Malformed)?;

        let mut mac = self.mac().map_err(|_| SessionError::BadSignature)?;
        mac.update(payload.as_bytes());
        let sig_bytes = URL_SAFE_NO_PAD
            .decode(sig)
            .map_err(|_| SessionError::BadSignature)?;
        mac.verify_slice(&sig_bytes)
            .map_err(|_| SessionError::BadSignature)?;

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| SessionError::Malformed)?;
        let user: SessionUser =
            serde_json::from_slice(&json).map_err(|_| SessionError::Malformed)?;

        if user.is_expired(Utc::now()) {
            return Err(SessionError::Expired);
        }
        Ok(user)
    }

    fn cookie(&self, value: String, max_age: cookie::time::Duration) -> Cookie<'static> {
        let mut builder = Cookie::build((self.name.clone(), value))
            .path(self.path.clone())
            .http_only(true)
            .max_age(max_age);
        if let Some(domain) = &self.domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }

    fn stamp(&self, user: &SessionUser) -> SessionUser {
        let mut stamped = user.clone();
        stamped.expires_at = (Utc::now() + self.ttl).timestamp();
        stamped
    }
}

impl Authorizer for SignedCookieAuthorizer {
    fn signin(&self, user: &SessionUser) -> Result<Cookie<'static>, SessionError> {
        let value = self.encode(&self.stamp(user))?;
        Ok(self.cookie(
            value,
            cookie::time::Duration::seconds(self.ttl.num_seconds()),
        ))
    }

    fn user_from(&self, headers: &HeaderMap) -> Result<SessionUser, SessionError> {
        let raw = cookie_value(headers, &self.name).ok_or(SessionError::Missing)?;
        self.decode(&raw)
    }

    fn refresh(&self, user: &SessionUser) -> Option<Cookie<'static>> {
        let remaining = user.expires_at() - Utc::now();
        if remaining >= self.ttl / 2 {
            return None;
        }
        self.signin(user).ok()
    }

    fn signout(&self) -> Cookie<'static> {
        self.cookie(String::new(), cookie::time::Duration::ZERO)
    }
}
