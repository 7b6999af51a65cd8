//! # authgate — OAuth2 authorization-code login client
//!
//! Redirects a browser to an identity provider, handles the authorization
//! callback (single-use CSRF state check, code exchange, identity + role
//! resolution), and establishes a signed-cookie session independent of the
//! OAuth2 token lifetime.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Immutable provider + cookie configuration from environment variables |
//! | [`state`] | Single-use CSRF state cookie: mint, save, verify, wipe |
//! | [`token`] | Authorization-code exchange over the provider token endpoint |
//! | [`userinfo`] | Identity + role resolution, provider error handling |
//! | [`roles`] | Role set and the all-of requirement predicate |
//! | [`session`] | Signed-cookie sessions: sign-in, decode, refresh, sign-out |
//! | [`flow`] | The authorization-code state machine tying it all together |
//! | [`handlers`] | Axum routes, `CurrentUser` extractor, refresh layer |
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(authgate::Config::from_env()?);
//! let flow = Arc::new(
//!     authgate::AuthFlow::new(config)?.with_required_roles(["staff"]),
//! );
//! let app = authgate::router(flow);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod flow;
pub mod handlers;
pub mod roles;
pub mod session;
pub mod state;
pub mod token;
pub mod userinfo;

pub use config::{Config, ConfigError, RedirectTarget};
pub use error::Error;
pub use flow::{AuthFlow, Authorized, CallbackOutcome, CallbackQuery, LoginStart, RequestOrigin};
pub use handlers::{router, CurrentUser, SharedFlow};
pub use roles::Roles;
pub use session::{Authorizer, SessionError, SessionUser, SignedCookieAuthorizer};
pub use state::{mint_state, CookieStateStore, StateStore};
pub use token::{OAuthTokenExchanger, Token, TokenExchanger};
pub use userinfo::{
    HttpUserInfoResolver, InfoToken, MemberProfile, OidcClaims, ProviderError, ProviderIdentity,
    UserInfoResolver,
};
