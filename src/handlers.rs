//! Axum wiring for the flow: login, callback, and logout routes, the
//! [`CurrentUser`] extractor, and the opportunistic session-refresh layer.
//!
//! The handlers stay thin: every decision lives in [`AuthFlow`], and every
//! flow failure maps to its fixed HTTP status via
//! [`Error::into_response`](crate::Error).

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts, Query, Request, State};
use axum::http::header::{ACCEPT, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use cookie::Cookie;
use serde_json::json;

use crate::flow::{AuthFlow, CallbackQuery, RequestOrigin};
use crate::session::SessionUser;

/// Shared flow handle used as router state.
pub type SharedFlow = Arc<AuthFlow>;

/// Assemble the login, callback, and logout routes, with the refresh layer
/// applied to all of them.
pub fn router(flow: SharedFlow) -> Router {
    let login_path = flow.config().login_path.clone();
    let callback_path = flow.config().redirect.callback_path().to_string();
    Router::new()
        .route(&login_path, get(login))
        .route(&callback_path, get(callback))
        .route("/auth/logout", get(logout))
        .layer(middleware::from_fn_with_state(
            flow.clone(),
            session_refresh,
        ))
        .with_state(flow)
}

/// `GET <login-path>` — mint state and send the browser to the provider.
pub async fn login(State(flow): State<SharedFlow>, headers: HeaderMap) -> Response {
    let origin = RequestOrigin::from_headers(&headers, false);
    let start = match flow.login_start(&origin) {
        Ok(start) => start,
        Err(e) => {
            tracing::error!("login start failed: {}", e);
            return e.into_response();
        }
    };

    let location = start.authorize_url.to_string();
    let body = format!(
        "<html><title>Sign in</title><body style='padding: 2em;'>\
         <p>Waiting...</p>\
         <a href='{location}'><button style='font-size: 14px;'>Sign in</button></a>\
         </body></html>"
    );
    let mut resp = Html(body).into_response();
    set_header(&mut resp, "refresh", &format!("1; {location}"));
    set_cookie(&mut resp, &start.state_cookie);
    resp
}

/// `GET <callback-path>?code&state` — run the flow and establish the
/// session. 202 with JSON `{token, user}` for JSON clients, an HTML
/// welcome page otherwise; the taxonomy status on failure. The state
/// cookie is cleared on every path.
pub async fn callback(
    State(flow): State<SharedFlow>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Response {
    let origin = RequestOrigin::from_headers(&headers, false);
    let outcome = flow.callback(&headers, &query, &origin).await;

    let mut resp = match outcome.result {
        Ok(authorized) => {
            let mut resp = if wants_json(&headers) {
                (
                    StatusCode::ACCEPTED,
                    Json(json!({
                        "token": authorized.token.access_token,
                        "user": authorized.user,
                    })),
                )
                    .into_response()
            } else {
                let admin_path = &flow.config().admin_path;
                let body = format!(
                    "Welcome back <b>{}</b>. Please wait, or click \
                     <a href=\"{admin_path}\">here</a> to go back",
                    authorized.user.name()
                );
                let mut resp = (StatusCode::ACCEPTED, Html(body)).into_response();
                set_header(&mut resp, "refresh", &format!("2; {admin_path}"));
                resp
            };
            set_cookie(&mut resp, &authorized.session_cookie);
            resp
        }
        Err(e) => {
            tracing::info!(err = %e, "callback denied");
            e.into_response()
        }
    };

    set_cookie(&mut resp, &outcome.state_wipe);
    resp
}

/// `GET /auth/logout` — clear the session cookie. Idempotent.
pub async fn logout(State(flow): State<SharedFlow>) -> Response {
    let mut resp = StatusCode::NO_CONTENT.into_response();
    set_cookie(&mut resp, &flow.authorizer().signout());
    resp
}

/// Re-issue the session cookie on any authenticated request whose session
/// nears expiry. A local refresh only — no provider round trip.
pub async fn session_refresh(
    State(flow): State<SharedFlow>,
    request: Request,
    next: Next,
) -> Response {
    let refreshed = flow
        .authorizer()
        .user_from(request.headers())
        .ok()
        .and_then(|user| flow.authorizer().refresh(&user));

    let mut resp = next.run(request).await;
    if let Some(cookie) = refreshed {
        set_cookie(&mut resp, &cookie);
    }
    resp
}

/// The authenticated user, decoded from the session cookie. Rejects with
/// 401 when the session is absent, invalid, or expired.
pub struct CurrentUser(pub SessionUser);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
    SharedFlow: FromRef<S>,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let flow = SharedFlow::from_ref(state);
        flow.authorizer()
            .user_from(&parts.headers)
            .map(CurrentUser)
            .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))
    }
}

/// Whether the client asked for JSON (`Accept: application/json`).
fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("application/json"))
}

fn set_cookie(resp: &mut Response, cookie: &Cookie<'_>) {
    if let Ok(value) = HeaderValue::from_str(&cookie.to_string()) {
        resp.headers_mut().append(SET_COOKIE, value);
    }
}

fn set_header(resp: &mut Response, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        resp.headers_mut().insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wants_json() {
        let mut headers = HeaderMap::new();
        assert!(!wants_json(&headers));

        headers.insert(ACCEPT, HeaderValue::from_static("text/html"));
        assert!(!wants_json(&headers));

        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain"),
        );
        assert!(wants_json(&headers));
    }
}
