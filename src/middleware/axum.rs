//! axum adapter.
//!
//! Two ways to mount the engine:
//!
//! - [`auth_routes`]: a router serving only `{base}/...`; merge it into the app.
//! - [`authenticate`]: a `from_fn_with_state` middleware that serves the auth
//!   routes itself and, for every other request, resolves the session, stores
//!   it as [`CurrentSession`] in the request extensions, and appends refreshed
//!   or cleared session cookies to the app's response.

use std::sync::Arc;

use ::axum::body::to_bytes;
use ::axum::extract::{FromRequestParts, OptionalFromRequestParts, Request, State};
use ::axum::http::request::Parts;
use ::axum::http::{header, Extensions, HeaderValue, StatusCode};
use ::axum::middleware::Next;
use ::axum::response::{IntoResponse, Response};
use ::axum::routing::any;
use ::axum::{Json, Router};
use serde::Serialize;
use url::Url;

use super::{set_cookie_values, FrameworkAdapter, RenderPlan};
use crate::engine::{AuthEngine, Outcome};
use crate::error::{Error, ValidationCode};
use crate::request::InternalRequest;
use crate::response::InternalResponse;
use crate::traits::SessionHandler;

const DEFAULT_BODY_LIMIT: usize = 64 * 1024;

/// [`FrameworkAdapter`] for axum requests and responses.
///
/// The request body is read lazily, only if a provider asks for it.
#[derive(Debug, Clone, Copy)]
pub struct AxumAdapter {
    body_limit: usize,
}

impl Default for AxumAdapter {
    fn default() -> Self {
        Self {
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl AxumAdapter {
    /// Maximum request body size accepted on auth routes (default 64 KiB).
    #[must_use]
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }
}

impl FrameworkAdapter for AxumAdapter {
    type Request = Request;
    type Response = Response;
    type Extension = Extensions;

    fn normalize(&self, req: Request) -> Result<InternalRequest<Extensions>, Error> {
        let (parts, body) = req.into_parts();
        let limit = self.body_limit;
        Ok(request_from_parts(&parts)?.with_body_loader(async move {
            to_bytes(body, limit)
                .await
                .map_err(|e| Error::validation(ValidationCode::MalformedBody, e.to_string()))
        }))
    }

    fn render<U: Serialize>(&self, resp: InternalResponse<U>) -> Response {
        let plan = RenderPlan::from_response(resp);
        let mut response = match plan.body {
            Some(body) => (plan.status, Json(body)).into_response(),
            None => plan.status.into_response(),
        };
        let headers = response.headers_mut();
        if let Some(location) = plan.location {
            headers.insert(header::LOCATION, location);
        }
        for cookie in plan.set_cookies {
            headers.append(header::SET_COOKIE, cookie);
        }
        response
    }
}

/// Builds the engine's view of a request from its head. Relative request
/// URIs are resolved against `X-Forwarded-Proto` and `Host`.
fn request_from_parts(parts: &Parts) -> Result<InternalRequest<Extensions>, Error> {
    let url = if parts.uri.scheme().is_some() {
        Url::parse(&parts.uri.to_string())
    } else {
        let header_str = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
        };
        let scheme = header_str("x-forwarded-proto").unwrap_or("http");
        let host = header_str(header::HOST.as_str()).unwrap_or("localhost");
        let path = parts
            .uri
            .path_and_query()
            .map_or("/", |pq| pq.as_str());
        Url::parse(&format!("{scheme}://{host}{path}"))
    }
    .map_err(|e| Error::validation(ValidationCode::MalformedRequest, e.to_string()))?;

    Ok(
        InternalRequest::with_extension(parts.method.clone(), url, parts.extensions.clone())
            .with_headers(parts.headers.clone()),
    )
}

/// Router serving the engine's routes under its base path.
pub fn auth_routes<U, H>(engine: Arc<AuthEngine<U, H>>) -> Router
where
    U: Serialize + Send + Sync + 'static,
    H: SessionHandler<U>,
{
    let base = engine.base_path().to_owned();
    Router::new()
        .route(&format!("{base}/{{*rest}}"), any(serve_auth::<U, H>))
        .with_state(engine)
}

async fn serve_auth<U, H>(State(engine): State<Arc<AuthEngine<U, H>>>, req: Request) -> Response
where
    U: Serialize + Send + Sync + 'static,
    H: SessionHandler<U>,
{
    let adapter = AxumAdapter::default();
    let path = req.uri().path().to_owned();
    let internal = match adapter.normalize(req) {
        Ok(internal) => internal,
        Err(e) => return adapter.render(InternalResponse::<U>::from_error(e)),
    };
    match engine.handle(&internal).await {
        Outcome::Respond(resp) => adapter.render(resp),
        Outcome::Continue { .. } => adapter.render(InternalResponse::<U>::from_error(
            Error::validation(ValidationCode::UnknownRoute, format!("no auth route at {path}")),
        )),
    }
}

/// Session middleware. Use with `axum::middleware::from_fn_with_state`.
pub async fn authenticate<U, H>(
    State(engine): State<Arc<AuthEngine<U, H>>>,
    req: Request,
    next: Next,
) -> Response
where
    U: Serialize + Send + Sync + 'static,
    H: SessionHandler<U>,
    H::Session: Clone,
{
    let adapter = AxumAdapter::default();
    if engine.is_auth_route(req.uri().path()) {
        return serve_auth(State(engine), req).await;
    }

    let (mut parts, body) = req.into_parts();
    let internal = match request_from_parts(&parts) {
        Ok(internal) => internal,
        Err(e) => return adapter.render(InternalResponse::<U>::from_error(e)),
    };

    let (session, cookies) = match engine.handle(&internal).await {
        Outcome::Continue { session, cookies } => (session, cookies),
        Outcome::Respond(resp) => return adapter.render(resp),
    };
    if let Some(session) = session {
        parts.extensions.insert(CurrentSession(session));
    }

    let mut response = next.run(Request::from_parts(parts, body)).await;
    let headers = response.headers_mut();
    for cookie in set_cookie_values(&cookies) {
        headers.append(header::SET_COOKIE, cookie);
    }
    response
}

/// Session payload resolved by [`authenticate`].
///
/// Rejects with `401` when there is no session; use `Option<CurrentSession<S>>`
/// for routes open to anonymous users.
#[derive(Debug, Clone)]
pub struct CurrentSession<S>(pub S);

impl<S, St> FromRequestParts<St> for CurrentSession<S>
where
    S: Clone + Send + Sync + 'static,
    St: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &St) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(unauthenticated)
    }
}

impl<S, St> OptionalFromRequestParts<St> for CurrentSession<S>
where
    S: Clone + Send + Sync + 'static,
    St: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &St,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts.extensions.get::<Self>().cloned())
    }
}

fn unauthenticated() -> Response {
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "unauthenticated" })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::cookies::{Cookie, CookieOptions};
    use crate::error::BoxError;
    use crate::session::{RefreshedTokens, SessionPair};
    use crate::token::TokenCodec;
    use ::axum::body::Body;
    use ::axum::http::{Method, Request as HttpRequest};
    use ::axum::routing::get;
    use serde::Deserialize;
    use serde_json::{json, Value};

    const SECRET: &str = "axum-test-secret-axum-test-secret";

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Claims {
        id: u64,
    }

    struct Handler;

    impl SessionHandler<Value> for Handler {
        type Session = Claims;
        type Refresh = Claims;

        async fn create_session(&self, user: &Value) -> Result<SessionPair<Claims, Claims>, BoxError> {
            let id = user["id"].as_u64().ok_or("user without id")?;
            Ok(SessionPair::new(Claims { id }, Claims { id }))
        }

        async fn handle_refresh(
            &self,
            refresh: Claims,
        ) -> Result<Option<RefreshedTokens<Claims, Claims>>, BoxError> {
            Ok(Some(RefreshedTokens::both(refresh.clone(), refresh)))
        }
    }

    fn engine() -> Arc<AuthEngine<Value, Handler>> {
        Arc::new(AuthEngine::new(EngineConfig::new(SECRET).unwrap(), Handler))
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            ::axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn whoami(session: Option<CurrentSession<Claims>>) -> Json<Option<Claims>> {
        Json(session.map(|CurrentSession(claims)| claims))
    }

    #[tokio::test]
    async fn normalize_builds_absolute_url_and_lazy_body() {
        let req = HttpRequest::builder()
            .method(Method::POST)
            .uri("/auth/login/credentials?next=%2Fhome")
            .header(header::HOST, "app.example.com")
            .header("x-forwarded-proto", "https")
            .header(header::COOKIE, "a=1; b=2")
            .body(Body::from("username=a&password=b"))
            .unwrap();

        let internal = AxumAdapter::default().normalize(req).unwrap();
        assert_eq!(
            internal.url().as_str(),
            "https://app.example.com/auth/login/credentials?next=%2Fhome"
        );
        assert_eq!(internal.query("next").as_deref(), Some("/home"));
        assert_eq!(internal.cookie("b"), Some("2"));
        let fields = internal.form_or_json().await.unwrap();
        assert_eq!(fields["username"], json!("a"));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let req = HttpRequest::builder()
            .method(Method::POST)
            .uri("/auth/login/credentials")
            .body(Body::from(vec![b'a'; 32]))
            .unwrap();
        let internal = AxumAdapter::default()
            .with_body_limit(8)
            .normalize(req)
            .unwrap();
        let err = internal.body().await.unwrap_err();
        assert_eq!(err.code(), "malformed_body");
    }

    #[test]
    fn render_redirect_with_cookies() {
        let resp = InternalResponse::<Value>::redirect("/home")
            .with_cookie(Cookie::set(
                "s",
                "tok",
                time::Duration::hours(1),
                CookieOptions::default(),
            ))
            .with_cookie(Cookie::clear("f", CookieOptions::default()));
        let response = AxumAdapter::default().render(resp);

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/home");
        assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 2);
    }

    #[tokio::test]
    async fn render_error_as_json() {
        let resp = InternalResponse::<Value>::from_error(Error::validation(
            ValidationCode::UnknownProvider,
            "x",
        ));
        let response = AxumAdapter::default().render(resp);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = to_bytes(response.into_body(), 1024).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"error": "unknown_provider"}));
    }

    #[tokio::test]
    async fn current_session_rejects_anonymous() {
        let (mut parts, ()) = HttpRequest::builder().body(()).unwrap().into_parts();
        let rejected =
            <CurrentSession<u32> as FromRequestParts<()>>::from_request_parts(&mut parts, &()).await;
        assert_eq!(rejected.unwrap_err().status(), StatusCode::UNAUTHORIZED);

        parts.extensions.insert(CurrentSession(7_u32));
        let found =
            <CurrentSession<u32> as FromRequestParts<()>>::from_request_parts(&mut parts, &()).await;
        assert_eq!(found.unwrap().0, 7);
    }

    #[tokio::test]
    async fn middleware_refreshes_session_and_appends_cookies() {
        let engine = engine();
        let app = Router::new()
            .route("/whoami", get(whoami))
            .layer(::axum::middleware::from_fn_with_state(
                engine,
                authenticate::<Value, Handler>,
            ));
        let base = serve(app).await;

        let codec = TokenCodec::new(SECRET.as_bytes()).unwrap();
        let expired = codec.sign_at(&Claims { id: 5 }, 60, 1_000).unwrap();
        let refresh = codec.sign(&Claims { id: 5 }, 600).unwrap();

        let response = reqwest::Client::new()
            .get(format!("{base}/whoami"))
            .header(
                header::COOKIE,
                format!("authflow.session={expired}; authflow.refresh={refresh}"),
            )
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 200);
        let set_cookies: Vec<String> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_owned())
            .collect();
        assert_eq!(set_cookies.len(), 2);
        assert!(set_cookies[0].starts_with("authflow.session="));
        assert!(set_cookies[1].starts_with("authflow.refresh="));
        assert!(set_cookies.iter().all(|c| !c.contains("Max-Age=0")));

        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({"id": 5}));
    }

    #[tokio::test]
    async fn middleware_passes_anonymous_requests_through() {
        let app = Router::new()
            .route("/whoami", get(whoami))
            .layer(::axum::middleware::from_fn_with_state(
                engine(),
                authenticate::<Value, Handler>,
            ));
        let base = serve(app).await;

        let response = reqwest::get(format!("{base}/whoami")).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, Value::Null);
    }

    #[tokio::test]
    async fn auth_routes_answer_unknown_sub_path_with_not_found() {
        let base = serve(auth_routes(engine())).await;

        let response = reqwest::get(format!("{base}/auth/nowhere")).await.unwrap();
        assert_eq!(response.status().as_u16(), 404);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({"error": "unknown_route"}));

        let response = reqwest::get(format!("{base}/auth/session")).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, Value::Null);
    }
}
