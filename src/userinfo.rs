//! Identity resolution against the provider's info endpoint.
//!
//! ## Wire shape
//!
//! The provider answers the bearer-authenticated info request with a JSON
//! object carrying the token fields, the role list under `group`, and the
//! identity in one of two shapes:
//!
//! - `me` — the provider's rich member profile;
//! - `user` — a minimal OIDC-style claims object.
//!
//! A response may also be an error payload (`error` / `error_description`)
//! delivered with *any* HTTP status, including 200; a non-empty error code
//! makes the fetch a failure regardless of transport success.
//!
//! ## Role filter
//!
//! When the caller requires roles, their names are appended to the info URL
//! pipe-separated (`…/info/me|admin|staff`) so the provider can deny
//! server-side. That filter is an optimization only: the flow re-verifies
//! every required role against the resolved set on the client side.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;
use crate::roles::Roles;
use crate::token::Token;

/// Error payload the provider may return in place of an info response.
#[derive(Debug, Default, Deserialize)]
pub struct ProviderError {
    #[serde(default, rename = "error")]
    pub code: String,
    #[serde(default, rename = "error_description")]
    pub message: String,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Rich member profile (the provider's `me` payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberProfile {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Minimal OIDC-style claims (the provider's `user` payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcClaims {
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// The identity shapes an info response may carry, richest first.
#[derive(Debug, Clone)]
pub enum ProviderIdentity {
    Member(MemberProfile),
    Claims(OidcClaims),
    /// Roles-only response; no identity payload at all.
    Anonymous,
}

/// The provider's info response: token fields, identity, and roles.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InfoToken {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub me: Option<MemberProfile>,
    #[serde(default)]
    pub user: Option<OidcClaims>,
    #[serde(default, rename = "group")]
    pub roles: Roles,
}

impl InfoToken {
    /// The identity carried by this response, preferring the rich profile.
    pub fn identity(&self) -> ProviderIdentity {
        if let Some(me) = &self.me {
            ProviderIdentity::Member(me.clone())
        } else if let Some(user) = &self.user {
            ProviderIdentity::Claims(user.clone())
        } else {
            ProviderIdentity::Anonymous
        }
    }
}

/// Fetches the caller's identity and role set with an access token.
#[async_trait]
pub trait UserInfoResolver: Send + Sync {
    async fn resolve(&self, token: &Token, required_roles: &[String]) -> Result<InfoToken, Error>;
}

/// Default resolver: bearer-authenticated GET over the shared HTTP client.
pub struct HttpUserInfoResolver {
    config: Arc<Config>,
    http: reqwest::Client,
}

impl HttpUserInfoResolver {
    pub fn new(config: Arc<Config>, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    fn info_uri(&self, required_roles: &[String]) -> String {
        if required_roles.is_empty() {
            self.config.userinfo_url.clone()
        } else {
            format!("{}|{}", self.config.userinfo_url, required_roles.join("|"))
        }
    }
}

#[async_trait]
impl UserInfoResolver for HttpUserInfoResolver {
    async fn resolve(&self, token: &Token, required_roles: &[String]) -> Result<InfoToken, Error> {
        let uri = self.info_uri(required_roles);
        let body = self
            .http
            .get(&uri)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| {
                tracing::info!(err = %e, endpoint = %uri, "userinfo request failed");
                Error::InfoFetchFailed(e.to_string())
            })?
            .bytes()
            .await
            .map_err(|e| Error::InfoFetchFailed(e.to_string()))?;

        parse_info(&body)
    }
}

/// Decode an info response body, treating a provider error payload as a
/// hard failure even when the HTTP status was a success.
pub(crate) fn parse_info(body: &[u8]) -> Result<InfoToken, Error> {
    let provider_err: ProviderError =
        serde_json::from_slice(body).map_err(|e| Error::InfoFetchFailed(e.to_string()))?;
    if !provider_err.code.is_empty() {
        return Err(Error::InfoFetchFailed(provider_err.to_string()));
    }

    serde_json::from_slice(body).map_err(|e| {
        tracing::info!(err = %e, "unexpected userinfo payload");
        Error::InfoFetchFailed(e.to_string())
    })
}
