//! Framework adapter seams.
//!
//! An adapter translates between a web framework and the engine in two
//! directions: [`FrameworkAdapter::normalize`] builds an [`InternalRequest`],
//! [`FrameworkAdapter::render`] turns an [`InternalResponse`] into the
//! framework's response type. [`RenderPlan`] holds the framework-independent
//! part of rendering so every adapter applies the same precedence.
//!
//! # Quick Start (axum)
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use authflow::middleware::axum::{authenticate, CurrentSession};
//!
//! let engine = Arc::new(AuthEngine::new(EngineConfig::from_env()?, handler).with_provider(github)?);
//!
//! let app = axum::Router::new()
//!     .route("/me", get(|CurrentSession(s): CurrentSession<Claims>| async move { Json(s) }))
//!     .layer(axum::middleware::from_fn_with_state(engine, authenticate::<AppUser, Handler>));
//! ```

#[cfg(feature = "axum")]
pub mod axum;

use http::{HeaderValue, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::cookies::Cookie;
use crate::error::Error;
use crate::request::InternalRequest;
use crate::response::InternalResponse;

/// Translation between a web framework and the engine.
pub trait FrameworkAdapter {
    type Request;
    type Response;
    /// Value carried in [`InternalRequest::ext`].
    type Extension;

    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the request cannot be represented
    /// (e.g. an unparseable URL).
    fn normalize(&self, req: Self::Request) -> Result<InternalRequest<Self::Extension>, Error>;

    fn render<U: Serialize>(&self, resp: InternalResponse<U>) -> Self::Response;
}

/// What an adapter writes to the wire for an [`InternalResponse`].
///
/// Precedence: a redirect wins over a body, an explicit body over the user,
/// and a bare status yields an empty body. `Set-Cookie` values are attached in
/// every case.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPlan {
    pub status: StatusCode,
    pub location: Option<HeaderValue>,
    pub body: Option<Value>,
    pub set_cookies: Vec<HeaderValue>,
}

impl RenderPlan {
    #[must_use]
    pub fn from_response<U: Serialize>(resp: InternalResponse<U>) -> Self {
        let set_cookies = set_cookie_values(&resp.cookies);

        if let Some(location) = resp.redirect.as_deref() {
            match HeaderValue::from_str(location) {
                Ok(location) => {
                    return Self {
                        status: resp.status.unwrap_or(StatusCode::FOUND),
                        location: Some(location),
                        body: None,
                        set_cookies,
                    };
                }
                Err(e) => {
                    tracing::error!(error = %e, "Redirect target is not a valid header value");
                    return Self {
                        status: StatusCode::INTERNAL_SERVER_ERROR,
                        location: None,
                        body: None,
                        set_cookies: Vec::new(),
                    };
                }
            }
        }

        let body = match (resp.body, resp.user) {
            (Some(body), _) => Some(body),
            (None, Some(user)) => match serde_json::to_value(&user) {
                Ok(user) => Some(user),
                Err(e) => {
                    tracing::error!(error = %e, "User serialization failed");
                    return Self {
                        status: StatusCode::INTERNAL_SERVER_ERROR,
                        location: None,
                        body: None,
                        set_cookies: Vec::new(),
                    };
                }
            },
            (None, None) => None,
        };

        Self {
            status: resp.status.unwrap_or(StatusCode::OK),
            location: None,
            body,
            set_cookies,
        }
    }
}

/// `Set-Cookie` header values; cookies that cannot be encoded are dropped.
#[must_use]
pub fn set_cookie_values(cookies: &[Cookie]) -> Vec<HeaderValue> {
    cookies
        .iter()
        .filter_map(|c| match HeaderValue::from_str(&c.to_header_value()) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, cookie = %c.name, "Dropping unencodable cookie");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::CookieOptions;
    use serde_json::json;
    use time::Duration;

    fn session_cookie() -> Cookie {
        Cookie::set("s", "tok", Duration::hours(1), CookieOptions::default())
    }

    #[test]
    fn redirect_takes_precedence() {
        let resp = InternalResponse::<Value>::redirect("/home")
            .with_body(json!({"ignored": true}))
            .with_cookie(session_cookie());
        let plan = RenderPlan::from_response(resp);
        assert_eq!(plan.status, StatusCode::FOUND);
        assert_eq!(plan.location.unwrap(), "/home");
        assert!(plan.body.is_none());
        assert_eq!(plan.set_cookies.len(), 1);
    }

    #[test]
    fn body_wins_over_user() {
        let resp = InternalResponse::with_user(json!({"id": 1})).with_body(json!({"ok": true}));
        let plan = RenderPlan::from_response(resp);
        assert_eq!(plan.body, Some(json!({"ok": true})));
        assert_eq!(plan.status, StatusCode::OK);
    }

    #[test]
    fn user_is_rendered_as_json() {
        let plan = RenderPlan::from_response(InternalResponse::with_user(json!({"id": 1})));
        assert_eq!(plan.body, Some(json!({"id": 1})));
    }

    #[test]
    fn bare_status_has_no_body() {
        let resp = InternalResponse::<Value>::new().with_status(StatusCode::UNAUTHORIZED);
        let plan = RenderPlan::from_response(resp);
        assert_eq!(plan.status, StatusCode::UNAUTHORIZED);
        assert!(plan.body.is_none());
        assert!(plan.location.is_none());
    }

    #[test]
    fn set_cookie_header_format() {
        let values = set_cookie_values(&[Cookie::clear("s", CookieOptions::default())]);
        let value = values[0].to_str().unwrap();
        assert!(value.starts_with("s=;"));
        assert!(value.contains("Max-Age=0"));
        assert!(value.contains("HttpOnly"));
    }
}
