use http::StatusCode;
use serde_json::Value;

use crate::cookies::Cookie;
use crate::error::Error;

/// Framework-agnostic result of an engine or provider operation.
///
/// Adapters render it in this order of precedence: `redirect`, then `body`,
/// then `user` as JSON, then an empty response with `status`.
#[derive(Debug)]
pub struct InternalResponse<T> {
    pub user: Option<T>,
    pub status: Option<StatusCode>,
    pub redirect: Option<String>,
    pub cookies: Vec<Cookie>,
    pub error: Option<Error>,
    pub body: Option<Value>,
}

impl<T> Default for InternalResponse<T> {
    fn default() -> Self {
        Self {
            user: None,
            status: None,
            redirect: None,
            cookies: Vec::new(),
            error: None,
            body: None,
        }
    }
}

impl<T> InternalResponse<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(user: T) -> Self {
        Self {
            user: Some(user),
            ..Self::default()
        }
    }

    /// `302 Found` redirect.
    #[must_use]
    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            status: Some(StatusCode::FOUND),
            redirect: Some(location.into()),
            ..Self::default()
        }
    }

    /// `307 Temporary Redirect`: the client repeats the original method and body.
    #[must_use]
    pub fn redirect_preserving(location: impl Into<String>) -> Self {
        Self {
            status: Some(StatusCode::TEMPORARY_REDIRECT),
            redirect: Some(location.into()),
            ..Self::default()
        }
    }

    /// Error response with `{"error": code}` body and the status the error maps to.
    #[must_use]
    pub fn from_error(error: Error) -> Self {
        Self {
            status: Some(error.status()),
            body: Some(serde_json::json!({ "error": error.code() })),
            error: Some(error),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookies.push(cookie);
        self
    }

    #[must_use]
    pub fn with_cookies(mut self, cookies: impl IntoIterator<Item = Cookie>) -> Self {
        self.cookies.extend(cookies);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Merges a later partial response into this one.
    ///
    /// Each `Some` field of `later` replaces this one's; cookies are appended in order.
    #[must_use]
    pub fn merge(mut self, later: Self) -> Self {
        if later.user.is_some() {
            self.user = later.user;
        }
        if later.status.is_some() {
            self.status = later.status;
        }
        if later.redirect.is_some() {
            self.redirect = later.redirect;
        }
        if later.error.is_some() {
            self.error = later.error;
        }
        if later.body.is_some() {
            self.body = later.body;
        }
        self.cookies.extend(later.cookies);
        self
    }

    /// Maps the user payload, keeping every other field.
    pub fn map_user<U>(self, f: impl FnOnce(T) -> U) -> InternalResponse<U> {
        InternalResponse {
            user: self.user.map(f),
            status: self.status,
            redirect: self.redirect,
            cookies: self.cookies,
            error: self.error,
            body: self.body,
        }
    }

    /// An error-bearing response carries no user and may only clear cookies.
    #[must_use]
    pub(crate) fn sanitized(mut self) -> Self {
        if self.error.is_some() {
            self.user = None;
            self.cookies.retain(Cookie::is_clear);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::CookieOptions;
    use crate::error::ValidationCode;
    use time::Duration;

    fn session_cookie() -> Cookie {
        Cookie::set("sid", "v", Duration::hours(1), CookieOptions::default())
    }

    #[test]
    fn merge_prefers_later_non_empty_fields() {
        let first = InternalResponse::with_user(1)
            .with_status(StatusCode::OK)
            .with_cookie(session_cookie());
        let second = InternalResponse::<i32>::redirect("/home")
            .with_cookie(Cookie::clear("flow", CookieOptions::default()));

        let merged = first.merge(second);
        assert_eq!(merged.user, Some(1));
        assert_eq!(merged.status, Some(StatusCode::FOUND));
        assert_eq!(merged.redirect.as_deref(), Some("/home"));
        assert_eq!(merged.cookies.len(), 2);
        assert_eq!(merged.cookies[0].name, "sid");
        assert_eq!(merged.cookies[1].name, "flow");
    }

    #[test]
    fn redirect_preserving_uses_307() {
        let resp = InternalResponse::<()>::redirect_preserving("/retry");
        assert_eq!(resp.status, Some(StatusCode::TEMPORARY_REDIRECT));
    }

    #[test]
    fn error_response_has_code_body() {
        let resp =
            InternalResponse::<()>::from_error(Error::validation(ValidationCode::StateMismatch, "x"));
        assert_eq!(resp.status, Some(StatusCode::BAD_REQUEST));
        assert_eq!(resp.body, Some(serde_json::json!({"error": "state_mismatch"})));
        assert!(resp.is_error());
    }

    #[test]
    fn sanitized_error_drops_user_and_set_cookies() {
        let mut resp = InternalResponse::with_user("alice")
            .with_cookie(session_cookie())
            .with_cookie(Cookie::clear("flow", CookieOptions::default()));
        resp.error = Some(Error::validation(ValidationCode::StateMismatch, "x"));

        let resp = resp.sanitized();
        assert!(resp.user.is_none());
        assert_eq!(resp.cookies.len(), 1);
        assert!(resp.cookies[0].is_clear());
    }

    #[test]
    fn sanitized_success_is_untouched() {
        let resp = InternalResponse::with_user(5).with_cookie(session_cookie()).sanitized();
        assert_eq!(resp.user, Some(5));
        assert_eq!(resp.cookies.len(), 1);
    }
}
