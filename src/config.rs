//! Provider and cookie configuration from environment variables.
//!
//! The configuration is built once — either explicitly via
//! [`Config::from_env`] at startup, or lazily and exactly once through
//! [`Config::shared`] — and is immutable afterwards. Components receive it
//! as a value at construction; nothing mutates it later.
//!
//! ## Environment surface
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `AUTHGATE_PREFIX` | `https://id.example.com` | provider base URL |
//! | `AUTHGATE_AUTHORIZE_PATH` | `authorize` | authorize endpoint path |
//! | `AUTHGATE_TOKEN_PATH` | `token` | token endpoint path |
//! | `AUTHGATE_INFO_PATH` | `info/me` | userinfo endpoint path |
//! | `AUTHGATE_CLIENT_ID` | — (required) | OAuth2 client id |
//! | `AUTHGATE_CLIENT_SECRET` | — (required) | OAuth2 client secret |
//! | `AUTHGATE_REDIRECT_URL` | `/auth/callback` | registered redirect; a leading `/` makes it relative, resolved per request |
//! | `AUTHGATE_SCOPES` | empty | comma-separated scope list |
//! | `AUTHGATE_STATE_COOKIE` | `authgate_state` | CSRF state cookie name |
//! | `AUTHGATE_COOKIE_NAME` | `authgate_user` | session cookie name |
//! | `AUTHGATE_COOKIE_PATH` | `/` | session cookie path |
//! | `AUTHGATE_COOKIE_DOMAIN` | empty | session cookie domain |
//! | `AUTHGATE_SESSION_KEY` | — (required) | HMAC key for the session cookie |
//! | `AUTHGATE_SESSION_TTL` | `28800` | session lifetime in seconds |
//! | `AUTHGATE_LOGIN_PATH` | `/auth/login` | login route |
//! | `AUTHGATE_ADMIN_PATH` | `/admin/` | landing page after sign-in |

use std::time::Duration;

use oauth2::url;
use oauth2::{AuthUrl, ClientId, ClientSecret, RedirectUrl, Scope, TokenUrl};
use thiserror::Error;
use tokio::sync::OnceCell;

/// Configuration errors surfaced at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    MissingVar(&'static str),

    #[error("invalid {what} URL: {source}")]
    InvalidUrl {
        what: &'static str,
        source: url::ParseError,
    },

    #[error("http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// The redirect URI registered with the provider.
///
/// A relative target is resolved against the incoming request's scheme and
/// host at call time — never cached — so one binary can serve several
/// hostnames behind a proxy.
#[derive(Debug, Clone)]
pub enum RedirectTarget {
    Absolute(RedirectUrl),
    Relative(String),
}

impl RedirectTarget {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        if raw.starts_with('/') {
            Ok(RedirectTarget::Relative(raw.to_string()))
        } else {
            RedirectUrl::new(raw.to_string())
                .map(RedirectTarget::Absolute)
                .map_err(|source| ConfigError::InvalidUrl {
                    what: "redirect",
                    source,
                })
        }
    }

    /// The exact URI to send to the provider for a request arriving at
    /// `scheme://host`.
    pub fn resolve(&self, scheme: &str, host: &str) -> Result<RedirectUrl, ConfigError> {
        match self {
            RedirectTarget::Absolute(url) => Ok(url.clone()),
            RedirectTarget::Relative(path) => RedirectUrl::new(format!("{scheme}://{host}{path}"))
                .map_err(|source| ConfigError::InvalidUrl {
                    what: "redirect",
                    source,
                }),
        }
    }

    /// The local route path the callback is served on.
    pub fn callback_path(&self) -> &str {
        match self {
            RedirectTarget::Absolute(url) => url.url().path(),
            RedirectTarget::Relative(path) => path,
        }
    }
}

/// Cookie names and attributes.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    /// Name of the single-use CSRF state cookie.
    pub state_name: String,
    pub session_name: String,
    pub session_path: String,
    pub session_domain: Option<String>,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            state_name: "authgate_state".into(),
            session_name: "authgate_user".into(),
            session_path: "/".into(),
            session_domain: None,
        }
    }
}

/// Session signing key and lifetime.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// HMAC-SHA256 key for the signed session cookie.
    pub key: String,
    pub ttl: Duration,
}

/// Immutable provider configuration. Built once, read-only thereafter.
#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: ClientId,
    pub client_secret: ClientSecret,
    pub auth_url: AuthUrl,
    pub token_url: TokenUrl,
    pub userinfo_url: String,
    pub redirect: RedirectTarget,
    pub scopes: Vec<Scope>,
    pub cookies: CookieSettings,
    pub session: SessionSettings,
    pub login_path: String,
    pub admin_path: String,
}

static SHARED: OnceCell<Config> = OnceCell::const_new();

impl Config {
    /// Build the configuration from environment variables (`.env` honored).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let prefix = env_or("AUTHGATE_PREFIX", "https://id.example.com");
        let client_id = std::env::var("AUTHGATE_CLIENT_ID")
            .map_err(|_| ConfigError::MissingVar("AUTHGATE_CLIENT_ID"))?;
        let client_secret = std::env::var("AUTHGATE_CLIENT_SECRET")
            .map_err(|_| ConfigError::MissingVar("AUTHGATE_CLIENT_SECRET"))?;
        let session_key = std::env::var("AUTHGATE_SESSION_KEY")
            .map_err(|_| ConfigError::MissingVar("AUTHGATE_SESSION_KEY"))?;

        let auth_url = AuthUrl::new(join(&prefix, &env_or("AUTHGATE_AUTHORIZE_PATH", "authorize")))
            .map_err(|source| ConfigError::InvalidUrl {
                what: "authorize",
                source,
            })?;
        let token_url = TokenUrl::new(join(&prefix, &env_or("AUTHGATE_TOKEN_PATH", "token")))
            .map_err(|source| ConfigError::InvalidUrl {
                what: "token",
                source,
            })?;
        let userinfo_url = join(&prefix, &env_or("AUTHGATE_INFO_PATH", "info/me"));

        let redirect = RedirectTarget::parse(&env_or("AUTHGATE_REDIRECT_URL", "/auth/callback"))?;

        let scopes = env_or("AUTHGATE_SCOPES", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Scope::new(s.to_string()))
            .collect();

        let ttl_secs = env_or("AUTHGATE_SESSION_TTL", "28800")
            .parse::<u64>()
            .unwrap_or(28800);

        let session_domain = {
            let d = env_or("AUTHGATE_COOKIE_DOMAIN", "");
            if d.is_empty() { None } else { Some(d) }
        };

        Ok(Self {
            client_id: ClientId::new(client_id),
            client_secret: ClientSecret::new(client_secret),
            auth_url,
            token_url,
            userinfo_url,
            redirect,
            scopes,
            cookies: CookieSettings {
                state_name: env_or("AUTHGATE_STATE_COOKIE", "authgate_state"),
                session_name: env_or("AUTHGATE_COOKIE_NAME", "authgate_user"),
                session_path: env_or("AUTHGATE_COOKIE_PATH", "/"),
                session_domain,
            },
            session: SessionSettings {
                key: session_key,
                ttl: Duration::from_secs(ttl_secs),
            },
            login_path: env_or("AUTHGATE_LOGIN_PATH", "/auth/login"),
            admin_path: env_or("AUTHGATE_ADMIN_PATH", "/admin/"),
        })
    }

    /// Get or initialize the process-wide configuration.
    ///
    /// Initialization happens at most once even under concurrent first
    /// access; afterwards the value is read-only.
    pub async fn shared() -> Result<&'static Config, ConfigError> {
        SHARED
            .get_or_try_init(|| async { Config::from_env() })
            .await
    }
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn join(prefix: &str, path: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env() {
        std::env::set_var("AUTHGATE_CLIENT_ID", "cid");
        std::env::set_var("AUTHGATE_CLIENT_SECRET", "secret");
        std::env::set_var("AUTHGATE_SESSION_KEY", "k");
        std::env::set_var("AUTHGATE_PREFIX", "https://sso.example.org/");
        std::env::set_var("AUTHGATE_SCOPES", "openid, profile");

        let config = Config::from_env().unwrap();
        assert_eq!(config.auth_url.as_str(), "https://sso.example.org/authorize");
        assert_eq!(config.token_url.as_str(), "https://sso.example.org/token");
        assert_eq!(config.userinfo_url, "https://sso.example.org/info/me");
        assert_eq!(config.scopes.len(), 2);
        assert!(matches!(config.redirect, RedirectTarget::Relative(_)));
        assert_eq!(config.redirect.callback_path(), "/auth/callback");
    }

    #[test]
    fn test_relative_redirect_resolves_per_request() {
        let target = RedirectTarget::parse("/auth/callback").unwrap();
        let a = target.resolve("https", "one.example.com").unwrap();
        let b = target.resolve("http", "two.example.com:8080").unwrap();
        assert_eq!(a.as_str(), "https://one.example.com/auth/callback");
        assert_eq!(b.as_str(), "http://two.example.com:8080/auth/callback");
    }

    #[test]
    fn test_absolute_redirect_is_fixed() {
        let target = RedirectTarget::parse("https://app.example.com/cb").unwrap();
        let resolved = target.resolve("http", "ignored.example.com").unwrap();
        assert_eq!(resolved.as_str(), "https://app.example.com/cb");
        assert_eq!(target.callback_path(), "/cb");
    }
}
