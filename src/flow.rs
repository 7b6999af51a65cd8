//! The authorization-code flow: login start and callback orchestration.
//!
//! ## State machine
//!
//! `Idle → AwaitingCallback → (Authorized | Denied)`
//!
//! [`AuthFlow::login_start`] mints a single-use state token, persists it via
//! the [`StateStore`], and returns the provider authorize URL for the
//! browser. The provider later calls back with `code` and `state`, and
//! [`AuthFlow::callback`] runs the checks in order:
//!
//! 1. state must match the value issued to this browser — otherwise
//!    `InvalidState`, and the token exchanger is never invoked;
//! 2. the code is exchanged for a token — `ExchangeFailed` on any
//!    transport or provider failure, no retry;
//! 3. identity and roles are resolved; every required role is re-verified
//!    client-side — `InfoFetchFailed` / `NoRole`;
//! 4. the normalized user is signed into the session cookie — Authorized.
//!
//! The state cookie is wiped on **every** exit path, so a state value is
//! single-use even when the callback fails.
//!
//! One logical execution per request: collaborators are shared read-only
//! behind `Arc`s, and no lock is held across a network call.

use std::sync::Arc;

use axum::http::header::HOST;
use axum::http::HeaderMap;
use cookie::Cookie;
use oauth2::url::Url;
use oauth2::CsrfToken;

use crate::config::Config;
use crate::error::Error;
use crate::session::{Authorizer, SessionUser, SignedCookieAuthorizer};
use crate::state::{mint_state, CookieStateStore, StateStore};
use crate::token::{http_client, oauth_client, OAuthTokenExchanger, Token, TokenExchanger};
use crate::userinfo::{HttpUserInfoResolver, InfoToken, UserInfoResolver};

/// Scheme and host of the inbound request, used to resolve a relative
/// redirect URI at call time.
#[derive(Debug, Clone)]
pub struct RequestOrigin {
    pub scheme: &'static str,
    pub host: String,
}

impl RequestOrigin {
    /// Resolve from request headers. `local_tls` is true when the
    /// connection is TLS-terminated by this process; otherwise
    /// `X-Forwarded-Proto: https` marks an upstream-terminated connection.
    pub fn from_headers(headers: &HeaderMap, local_tls: bool) -> Self {
        let host = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("localhost")
            .to_string();
        let https = local_tls
            || headers
                .get("x-forwarded-proto")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.eq_ignore_ascii_case("https"));
        Self {
            scheme: if https { "https" } else { "http" },
            host,
        }
    }
}

/// Everything the login entry point needs to send the browser away.
#[derive(Debug)]
pub struct LoginStart {
    pub authorize_url: Url,
    pub state_cookie: Cookie<'static>,
}

/// `code` and `state` from the provider callback query string.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub state: String,
}

/// A successful callback: the session is established.
pub struct Authorized {
    pub user: SessionUser,
    pub token: Token,
    pub info: InfoToken,
    pub session_cookie: Cookie<'static>,
}

/// Outcome of a callback. The wipe cookie must be attached to the
/// response on every path; it is produced before the checks run.
pub struct CallbackOutcome {
    pub state_wipe: Cookie<'static>,
    pub result: Result<Authorized, Error>,
}

/// Observes the resolved info token before the session is established.
pub type TokenHook = Box<dyn Fn(&InfoToken) + Send + Sync>;
/// Observes the signed-in user after the session cookie is produced.
pub type SignedInHook = Box<dyn Fn(&SessionUser) + Send + Sync>;

/// Orchestrates state, exchange, identity resolution, and sign-in.
pub struct AuthFlow {
    config: Arc<Config>,
    state_store: Arc<dyn StateStore>,
    exchanger: Arc<dyn TokenExchanger>,
    resolver: Arc<dyn UserInfoResolver>,
    authorizer: Arc<dyn Authorizer>,
    required_roles: Vec<String>,
    on_token: Option<TokenHook>,
    on_signed_in: Option<SignedInHook>,
}

impl AuthFlow {
    /// Assemble the flow with the default cookie state store, HTTP
    /// exchanger/resolver, and signed-cookie authorizer.
    pub fn new(config: Arc<Config>) -> Result<Self, crate::config::ConfigError> {
        let http = http_client()?;
        Ok(Self {
            state_store: Arc::new(CookieStateStore::new(config.cookies.state_name.clone())),
            exchanger: Arc::new(OAuthTokenExchanger::new(config.clone(), http.clone())),
            resolver: Arc::new(HttpUserInfoResolver::new(config.clone(), http)),
            authorizer: Arc::new(SignedCookieAuthorizer::from_config(&config)),
            required_roles: Vec::new(),
            on_token: None,
            on_signed_in: None,
            config,
        })
    }

    /// Roles that must ALL be present for a callback to succeed.
    pub fn with_required_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = store;
        self
    }

    pub fn with_exchanger(mut self, exchanger: Arc<dyn TokenExchanger>) -> Self {
        self.exchanger = exchanger;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn UserInfoResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn on_token(mut self, hook: TokenHook) -> Self {
        self.on_token = Some(hook);
        self
    }

    pub fn on_signed_in(mut self, hook: SignedInHook) -> Self {
        self.on_signed_in = Some(hook);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn authorizer(&self) -> &dyn Authorizer {
        self.authorizer.as_ref()
    }

    /// Mint and persist a state token, and compute the authorize URL the
    /// browser should be sent to.
    pub fn login_start(&self, origin: &RequestOrigin) -> Result<LoginStart, Error> {
        let state = mint_state();
        let state_cookie = self.state_store.save(&state)?;

        let redirect = self.config.redirect.resolve(origin.scheme, &origin.host)?;
        let client = oauth_client(&self.config, redirect);
        let (authorize_url, _) = client
            .authorize_url(|| CsrfToken::new(state))
            .add_scopes(self.config.scopes.iter().cloned())
            .url();

        Ok(LoginStart {
            authorize_url,
            state_cookie,
        })
    }

    /// Run the callback checks. The returned wipe cookie clears the state
    /// cookie regardless of the result.
    pub async fn callback(
        &self,
        headers: &HeaderMap,
        query: &CallbackQuery,
        origin: &RequestOrigin,
    ) -> CallbackOutcome {
        CallbackOutcome {
            state_wipe: self.state_store.wipe(),
            result: self.run_callback(headers, query, origin).await,
        }
    }

    async fn run_callback(
        &self,
        headers: &HeaderMap,
        query: &CallbackQuery,
        origin: &RequestOrigin,
    ) -> Result<Authorized, Error> {
        if !self.state_store.verify(headers, &query.state) {
            tracing::info!(state = %query.state, "state mismatch on callback");
            return Err(Error::InvalidState(query.state.clone()));
        }

        let redirect = self.config.redirect.resolve(origin.scheme, &origin.host)?;
        let token = self.exchanger.exchange(&query.code, redirect).await?;

        let info = self.resolve_with_roles(Some(&token)).await?;
        if let Some(hook) = &self.on_token {
            hook(&info);
        }

        let user = SessionUser::from_identity(info.identity(), info.roles.clone());
        let session_cookie = self.authorizer.signin(&user)?;
        if let Some(hook) = &self.on_signed_in {
            hook(&user);
        }

        Ok(Authorized {
            user,
            token,
            info,
            session_cookie,
        })
    }

    /// Resolve identity with the required roles and re-verify every role
    /// client-side. `None` means the caller never performed an exchange.
    pub(crate) async fn resolve_with_roles(
        &self,
        token: Option<&Token>,
    ) -> Result<InfoToken, Error> {
        let token = token.ok_or(Error::NoToken)?;
        let info = self.resolver.resolve(token, &self.required_roles).await?;
        if !info.roles.has_all(&self.required_roles) {
            return Err(Error::NoRole);
        }
        Ok(info)
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::http::header::COOKIE;
    use axum::http::{HeaderMap, HeaderValue};
    use oauth2::RedirectUrl;

    use super::tests_support::test_config;
    use super::*;
    use crate::roles::Roles;

    pub(crate) struct FakeExchanger {
        pub calls: AtomicUsize,
        pub result: Result<Token, String>,
    }

    #[async_trait]
    impl TokenExchanger for FakeExchanger {
        async fn exchange(&self, _code: &str, _redirect: RedirectUrl) -> Result<Token, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .clone()
                .map_err(Error::ExchangeFailed)
        }
    }

    pub(crate) struct FakeResolver {
        pub info: InfoToken,
    }

    #[async_trait]
    impl UserInfoResolver for FakeResolver {
        async fn resolve(
            &self,
            _token: &Token,
            _required_roles: &[String],
        ) -> Result<InfoToken, Error> {
            Ok(self.info.clone())
        }
    }

    fn token() -> Token {
        Token {
            access_token: "at-1".into(),
            token_type: "Bearer".into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    fn info_with_roles(names: &[&str]) -> InfoToken {
        InfoToken {
            roles: names.iter().copied().collect::<Roles>(),
            ..Default::default()
        }
    }

    fn flow_with(
        exchanger: Arc<FakeExchanger>,
        resolver: Arc<FakeResolver>,
        required: &[&str],
    ) -> AuthFlow {
        AuthFlow::new(Arc::new(test_config()))
            .unwrap()
            .with_exchanger(exchanger)
            .with_resolver(resolver)
            .with_required_roles(required.iter().copied())
    }

    fn origin() -> RequestOrigin {
        RequestOrigin {
            scheme: "http",
            host: "app.example.com".into(),
        }
    }

    fn headers_with_state(state: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("authgate_state={state}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_login_start_mints_state_and_builds_authorize_url() {
        let flow = AuthFlow::new(Arc::new(test_config())).unwrap();
        let start = flow.login_start(&origin()).unwrap();

        let state = start.state_cookie.value().to_string();
        assert!(!state.is_empty());
        assert_eq!(start.state_cookie.name(), "authgate_state");

        let query: std::collections::HashMap<_, _> =
            start.authorize_url.query_pairs().into_owned().collect();
        assert_eq!(query.get("client_id").map(String::as_str), Some("client-1"));
        assert_eq!(query.get("state").map(String::as_str), Some(state.as_str()));
        assert_eq!(
            query.get("redirect_uri").map(String::as_str),
            Some("http://app.example.com/auth/callback")
        );
    }

    #[tokio::test]
    async fn test_callback_authorizes_on_all_checks_passing() {
        // Scenario: matching state, good exchange, roles {staff}, no requirement.
        let exchanger = Arc::new(FakeExchanger {
            calls: AtomicUsize::new(0),
            result: Ok(token()),
        });
        let resolver = Arc::new(FakeResolver {
            info: info_with_roles(&["staff"]),
        });
        let flow = flow_with(exchanger.clone(), resolver, &[]);

        let query = CallbackQuery {
            code: "code-1".into(),
            state: "abc123".into(),
        };
        let outcome = flow
            .callback(&headers_with_state("abc123"), &query, &origin())
            .await;

        let authorized = outcome.result.expect("authorized");
        assert!(authorized.user.roles.has("staff"));
        assert!(!authorized.session_cookie.value().is_empty());
        assert_eq!(outcome.state_wipe.value(), "");
        assert_eq!(exchanger.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_state_mismatch_denies_without_exchanging() {
        let exchanger = Arc::new(FakeExchanger {
            calls: AtomicUsize::new(0),
            result: Ok(token()),
        });
        let resolver = Arc::new(FakeResolver {
            info: info_with_roles(&["staff"]),
        });
        let flow = flow_with(exchanger.clone(), resolver, &[]);

        let query = CallbackQuery {
            code: "code-1".into(),
            state: "xyz999".into(),
        };
        let outcome = flow
            .callback(&headers_with_state("abc123"), &query, &origin())
            .await;

        assert!(matches!(outcome.result, Err(Error::InvalidState(_))));
        // The exchanger must never run on a state mismatch.
        assert_eq!(exchanger.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.state_wipe.value(), "");
    }

    #[tokio::test]
    async fn test_exchange_failure_is_denied() {
        let exchanger = Arc::new(FakeExchanger {
            calls: AtomicUsize::new(0),
            result: Err("connection refused".into()),
        });
        let resolver = Arc::new(FakeResolver {
            info: info_with_roles(&["staff"]),
        });
        let flow = flow_with(exchanger, resolver, &[]);

        let query = CallbackQuery {
            code: "code-1".into(),
            state: "abc123".into(),
        };
        let outcome = flow
            .callback(&headers_with_state("abc123"), &query, &origin())
            .await;

        match outcome.result {
            Err(Error::ExchangeFailed(msg)) => assert!(msg.contains("connection refused")),
            other => panic!("expected ExchangeFailed, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_missing_required_role_is_denied() {
        let exchanger = Arc::new(FakeExchanger {
            calls: AtomicUsize::new(0),
            result: Ok(token()),
        });
        let resolver = Arc::new(FakeResolver {
            info: info_with_roles(&["staff"]),
        });
        let flow = flow_with(exchanger, resolver, &["admin"]);

        let query = CallbackQuery {
            code: "code-1".into(),
            state: "abc123".into(),
        };
        let outcome = flow
            .callback(&headers_with_state("abc123"), &query, &origin())
            .await;

        assert!(matches!(outcome.result, Err(Error::NoRole)));
        assert_eq!(outcome.state_wipe.value(), "");
    }

    #[tokio::test]
    async fn test_resolution_without_token_is_defensive_error() {
        let flow = AuthFlow::new(Arc::new(test_config())).unwrap();
        let err = flow.resolve_with_roles(None).await.unwrap_err();
        assert!(matches!(err, Error::NoToken));
    }

    #[tokio::test]
    async fn test_hooks_observe_token_and_user() {
        let seen_roles = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let seen = seen_roles.clone();

        let exchanger = Arc::new(FakeExchanger {
            calls: AtomicUsize::new(0),
            result: Ok(token()),
        });
        let resolver = Arc::new(FakeResolver {
            info: info_with_roles(&["staff"]),
        });
        let flow = flow_with(exchanger, resolver, &[]).on_token(Box::new(move |info| {
            seen.lock().unwrap().extend(info.roles.0.clone());
        }));

        let query = CallbackQuery {
            code: "code-1".into(),
            state: "abc123".into(),
        };
        let outcome = flow
            .callback(&headers_with_state("abc123"), &query, &origin())
            .await;
        assert!(outcome.result.is_ok());
        assert_eq!(*seen_roles.lock().unwrap(), vec!["staff".to_string()]);
    }
}
