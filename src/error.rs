//! Flow error taxonomy and its HTTP status mapping.
//!
//! Every failure of the callback state machine is one of the variants below
//! and is translated into an HTTP response at the handler boundary; none of
//! them is process-fatal. The status mapping is fixed and consistent:
//!
//! | Variant | Status |
//! |---------|--------|
//! | [`Error::InvalidState`] | 400 |
//! | [`Error::ExchangeFailed`] | 400 |
//! | [`Error::NoToken`] | 401 |
//! | [`Error::InfoFetchFailed`] | 401 |
//! | [`Error::NoRole`] | 403 |
//! | everything else (bootstrap/session-encode failures) | 500 |

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::config::ConfigError;
use crate::session::SessionError;

/// Errors produced by the authorization-code flow.
#[derive(Debug, Error)]
pub enum Error {
    /// The callback `state` did not match the value issued to this browser.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The provider's token endpoint rejected the code or was unreachable.
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),

    /// The callback ran without a token in scope: a caller invoked
    /// identity resolution before the exchange.
    #[error("oauth2 token not found")]
    NoToken,

    /// Transport failure or provider-reported error while resolving identity.
    #[error("userinfo fetch failed: {0}")]
    InfoFetchFailed(String),

    /// Authenticated, but a required role is missing from the resolved set.
    #[error("the user is not in the required roles")]
    NoRole,

    /// The state cookie could not be written.
    #[error("state save failed: {0}")]
    StateSave(String),

    /// The session cookie could not be produced.
    #[error("session cookie error: {0}")]
    Session(#[from] SessionError),

    /// Invalid or missing configuration discovered at call time.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// The HTTP status this failure maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidState(_) | Error::ExchangeFailed(_) => StatusCode::BAD_REQUEST,
            Error::NoToken | Error::InfoFetchFailed(_) => StatusCode::UNAUTHORIZED,
            Error::NoRole => StatusCode::FORBIDDEN,
            Error::StateSave(_) | Error::Session(_) | Error::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::InvalidState("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::ExchangeFailed("boom".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::NoToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            Error::InfoFetchFailed("boom".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(Error::NoRole.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            Error::StateSave("cookie".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
