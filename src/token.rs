//! Authorization-code exchange against the provider's token endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oauth2::basic::{BasicClient, BasicTokenResponse, BasicTokenType};
use oauth2::{AuthorizationCode, EndpointNotSet, EndpointSet, RedirectUrl, TokenResponse};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Error;

/// OAuth client type with auth URL and token URL set.
pub(crate) type ConfiguredClient = oauth2::Client<
    oauth2::basic::BasicErrorResponse,
    oauth2::basic::BasicTokenResponse,
    oauth2::basic::BasicTokenIntrospectionResponse,
    oauth2::StandardRevocableToken,
    oauth2::basic::BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

/// Ceiling on every outbound provider call. A slow or unreachable provider
/// fails the one request instead of hanging the callback.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(9);

/// Shared outbound HTTP client: bounded timeout, redirects disabled.
pub(crate) fn http_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::ClientBuilder::new()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(HTTP_TIMEOUT)
        .build()
}

/// Build the oauth2 client for `config`, pointed at `redirect`.
pub(crate) fn oauth_client(config: &Config, redirect: RedirectUrl) -> ConfiguredClient {
    BasicClient::new(config.client_id.clone())
        .set_client_secret(config.client_secret.clone())
        .set_auth_uri(config.auth_url.clone())
        .set_token_uri(config.token_url.clone())
        .set_redirect_uri(redirect)
}

/// Access/refresh token pair obtained from the code exchange.
///
/// Owned by the request that obtained it; only fields copied into the
/// session user outlive the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Token {
    pub(crate) fn from_response(res: &BasicTokenResponse) -> Self {
        let token_type = match res.token_type() {
            BasicTokenType::Bearer => "Bearer".to_string(),
            BasicTokenType::Extension(s) => s.clone(),
            other => format!("{other:?}"),
        };
        Self {
            access_token: res.access_token().secret().clone(),
            token_type,
            refresh_token: res.refresh_token().map(|t| t.secret().clone()),
            expires_at: res
                .expires_in()
                .map(|d| Utc::now() + chrono::Duration::seconds(d.as_secs() as i64)),
        }
    }
}

/// Turns an authorization code into a token pair. One outbound call, no
/// automatic retry; failures surface to the caller as [`Error::ExchangeFailed`].
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(&self, code: &str, redirect: RedirectUrl) -> Result<Token, Error>;
}

/// Default exchanger: RFC 6749 form-encoded POST via the `oauth2` crate.
pub struct OAuthTokenExchanger {
    config: Arc<Config>,
    http: reqwest::Client,
}

impl OAuthTokenExchanger {
    pub fn new(config: Arc<Config>, http: reqwest::Client) -> Self {
        Self { config, http }
    }
}

#[async_trait]
impl TokenExchanger for OAuthTokenExchanger {
    async fn exchange(&self, code: &str, redirect: RedirectUrl) -> Result<Token, Error> {
        let client = oauth_client(&self.config, redirect);
        let res = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| {
                tracing::info!(
                    err = %e,
                    endpoint = %self.config.token_url.as_str(),
                    "token exchange failed"
                );
                Error::ExchangeFailed(e.to_string())
            })?;
        Ok(Token::from_response(&res))
    }
}
