//! Request routing and response assembly.
//!
//! Routes under the base path (default `/auth`):
//!
//! | Route                    | Methods                 | Operation                 |
//! |--------------------------|-------------------------|---------------------------|
//! | `{base}/login/{id}`      | provider login methods  | `Provider::login`         |
//! | `{base}/callback/{id}`   | provider callback methods | `Provider::callback`    |
//! | `{base}/logout`          | `GET`, `POST`           | invalidate the session    |
//! | `{base}/session`         | `GET`                   | current session as JSON   |
//!
//! Every other request gets the per-request session check and is handed back
//! to the application as [`Outcome::Continue`].

use std::collections::HashMap;
use std::sync::Arc;

use http::{Method, StatusCode};

use crate::config::{AuthSettings, EngineConfig};
use crate::cookies::Cookie;
use crate::error::{Error, ValidationCode};
use crate::provider::{FlowContext, Provider};
use crate::request::InternalRequest;
use crate::response::InternalResponse;
use crate::session::SessionManager;
use crate::token::TokenCodec;
use crate::traits::SessionHandler;
use crate::types::ProviderId;

/// What the adapter should do with the request.
#[derive(Debug)]
pub enum Outcome<U, S> {
    /// An auth route handled the request; render this response.
    Respond(InternalResponse<U>),
    /// Not an auth route; run the application handler with `session` and attach
    /// `cookies` (refreshed or cleared session tokens) to its response.
    Continue {
        session: Option<S>,
        cookies: Vec<Cookie>,
    },
}

impl<U, S> Outcome<U, S> {
    #[must_use]
    pub fn session(&self) -> Option<&S> {
        match self {
            Self::Respond(_) => None,
            Self::Continue { session, .. } => session.as_ref(),
        }
    }
}

enum Route<'a> {
    Login(&'a str),
    Callback(&'a str),
    Logout,
    Session,
    PassThrough,
}

/// Stateless authentication engine. Share it behind an `Arc`; it holds no
/// per-request state.
pub struct AuthEngine<U, H: SessionHandler<U>> {
    providers: HashMap<ProviderId, Provider<U>>,
    sessions: SessionManager<U, H>,
    codec: TokenCodec,
    settings: AuthSettings,
}

impl<U, H> AuthEngine<U, H>
where
    U: Send + Sync + 'static,
    H: SessionHandler<U>,
{
    #[must_use]
    pub fn new(config: EngineConfig, handler: H) -> Self {
        let sessions = SessionManager::new(
            config.codec.clone(),
            Arc::new(handler),
            config.settings.session_settings(),
        );
        Self {
            providers: HashMap::new(),
            sessions,
            codec: config.codec,
            settings: config.settings,
        }
    }

    /// Registers a provider under its id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a provider with the same id is already registered.
    pub fn with_provider(mut self, provider: impl Into<Provider<U>>) -> Result<Self, Error> {
        let provider = provider.into();
        let id = provider.id().clone();
        if self.providers.contains_key(&id) {
            return Err(Error::Config(format!("duplicate provider id `{id}`")));
        }
        self.providers.insert(id, provider);
        Ok(self)
    }

    #[must_use]
    pub fn provider(&self, id: &str) -> Option<&Provider<U>> {
        self.providers.get(id)
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager<U, H> {
        &self.sessions
    }

    /// Best-effort revocation of a provider-issued token.
    pub async fn revoke(&self, provider_id: &str, token: &str) -> bool {
        match self.providers.get(provider_id) {
            Some(provider) => provider.logout(token).await,
            None => false,
        }
    }

    #[must_use]
    pub fn base_path(&self) -> &str {
        &self.settings.base_path
    }

    /// Whether `path` is one of the engine's own routes. Adapters use this to
    /// decide if the request body has to be buffered.
    #[must_use]
    pub fn is_auth_route(&self, path: &str) -> bool {
        !matches!(self.route(path), Route::PassThrough)
    }

    pub async fn handle<E: Sync>(&self, req: &InternalRequest<E>) -> Outcome<U, H::Session> {
        match self.route(req.url().path()) {
            Route::Login(id) => Outcome::Respond(self.login(id, req).await),
            Route::Callback(id) => Outcome::Respond(self.callback(id, req).await),
            Route::Logout => Outcome::Respond(self.logout(req).await),
            Route::Session => Outcome::Respond(self.session(req).await),
            Route::PassThrough => {
                let (session, cookies) = self.sessions.resolve(req).await.into_parts();
                Outcome::Continue { session, cookies }
            }
        }
    }

    fn route<'p>(&self, path: &'p str) -> Route<'p> {
        let Some(rest) = path
            .strip_prefix(self.settings.base_path.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return Route::PassThrough;
        };
        let rest = rest.trim_end_matches('/');
        match rest.split_once('/') {
            Some(("login", id)) if !id.contains('/') => Route::Login(id),
            Some(("callback", id)) if !id.contains('/') => Route::Callback(id),
            None if rest == "logout" => Route::Logout,
            None if rest == "session" => Route::Session,
            _ => Route::PassThrough,
        }
    }

    fn flow_context(&self) -> FlowContext<'_> {
        FlowContext {
            codec: &self.codec,
            cookie_prefix: &self.settings.cookie_prefix,
            cookie_options: self.settings.flow_cookie_options(),
            flow_ttl_secs: self.settings.flow_ttl_secs,
        }
    }

    fn lookup(&self, id: &str, method: &Method, callback: bool) -> Result<&Provider<U>, Error> {
        let provider = self
            .providers
            .get(id)
            .ok_or_else(|| {
                Error::validation(ValidationCode::UnknownProvider, format!("no provider `{id}`"))
            })?;
        let allowed = if callback {
            provider.callback_methods()
        } else {
            provider.login_methods()
        };
        if !allowed.contains(method) {
            return Err(Error::validation(
                ValidationCode::MethodNotAllowed,
                format!("{method} not allowed for `{id}`"),
            ));
        }
        Ok(provider)
    }

    async fn login<E: Sync>(&self, id: &str, req: &InternalRequest<E>) -> InternalResponse<U> {
        let provider = match self.lookup(id, req.method(), false) {
            Ok(provider) => provider,
            Err(e) => return self.finalize(InternalResponse::from_error(e)),
        };
        let resp = provider.login(req, &self.flow_context()).await;
        let redirect = match provider {
            Provider::OAuth(_) => Some(self.settings.login_redirect.as_str()),
            Provider::Credentials(_) => None,
        };
        self.establish_session(id, resp, redirect).await
    }

    async fn callback<E: Sync>(&self, id: &str, req: &InternalRequest<E>) -> InternalResponse<U> {
        let provider = match self.lookup(id, req.method(), true) {
            Ok(provider) => provider,
            Err(e) => return self.finalize(InternalResponse::from_error(e)),
        };
        let resp = provider.callback(req, &self.flow_context()).await;
        let redirect = match provider {
            Provider::OAuth(_) => Some(self.settings.login_redirect.as_str()),
            Provider::Credentials(_) => None,
        };
        self.establish_session(id, resp, redirect).await
    }

    /// Turns an authenticated provider response into a signed-in one. Session
    /// cookies are appended only once every step has succeeded.
    async fn establish_session(
        &self,
        provider_id: &str,
        mut resp: InternalResponse<U>,
        redirect: Option<&str>,
    ) -> InternalResponse<U> {
        if resp.is_error() {
            return self.finalize(resp);
        }
        let Some(user) = resp.user.as_ref() else {
            return self.finalize(resp);
        };

        match self.sessions.create_session(user).await {
            Ok(issued) => {
                resp.cookies.extend(issued.cookies);
                if resp.redirect.is_none() {
                    if let Some(to) = redirect {
                        resp.status = Some(StatusCode::FOUND);
                        resp.redirect = Some(to.to_owned());
                    }
                }
                tracing::info!(provider = %provider_id, "Login successful");
                self.finalize(resp)
            }
            Err(e) => {
                tracing::error!(error = %e, provider = %provider_id, "Session creation failed");
                self.finalize(resp.merge(InternalResponse::from_error(e)))
            }
        }
    }

    async fn logout<E: Sync>(&self, req: &InternalRequest<E>) -> InternalResponse<U> {
        if *req.method() != Method::GET && *req.method() != Method::POST {
            return self.finalize(InternalResponse::from_error(Error::validation(
                ValidationCode::MethodNotAllowed,
                format!("{} not allowed for logout", req.method()),
            )));
        }
        let cookies = self.sessions.invalidate(req).await;
        tracing::info!("Logout");
        InternalResponse::redirect(self.settings.logout_redirect.clone()).with_cookies(cookies)
    }

    async fn session<E: Sync>(&self, req: &InternalRequest<E>) -> InternalResponse<U> {
        if *req.method() != Method::GET {
            return self.finalize(InternalResponse::from_error(Error::validation(
                ValidationCode::MethodNotAllowed,
                format!("{} not allowed for session", req.method()),
            )));
        }
        let (session, cookies) = self.sessions.resolve(req).await.into_parts();
        let body = serde_json::to_value(&session).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Session payload serialization failed");
            serde_json::Value::Null
        });
        InternalResponse::new()
            .with_status(StatusCode::OK)
            .with_body(body)
            .with_cookies(cookies)
    }

    /// Applies the error invariants: no user and no set-cookie on an error, and
    /// the optional error redirect.
    fn finalize(&self, resp: InternalResponse<U>) -> InternalResponse<U> {
        let mut resp = resp.sanitized();
        if let (Some(error), Some(target)) = (&resp.error, &self.settings.error_redirect) {
            let encoded = urlencoding::encode(error.code());
            resp.redirect = Some(format!("{target}?error={encoded}"));
            resp.status = Some(StatusCode::FOUND);
        }
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::provider::{CredentialsProvider, OAuthConfig, OAuthProfile, OAuthProvider};
    use crate::session::{RefreshedTokens, SessionPair};
    use crate::traits::CredentialsInput;
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};

    const SECRET: &str = "engine-test-secret-engine-test-secret";

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Claims {
        id: u64,
    }

    struct Handler {
        fail_create: bool,
    }

    impl SessionHandler<Value> for Handler {
        type Session = Claims;
        type Refresh = Claims;

        async fn create_session(&self, user: &Value) -> Result<SessionPair<Claims, Claims>, BoxError> {
            if self.fail_create {
                return Err("session store down".into());
            }
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

    fn engine_with(config: EngineConfig, fail_create: bool) -> AuthEngine<Value, Handler> {
        let credentials = CredentialsProvider::new(|input: CredentialsInput| async move {
            if input.field("username") == Some("a") && input.field("password") == Some("b") {
                Ok::<_, BoxError>(InternalResponse::with_user(json!({"id": 1})))
            } else {
                Ok(InternalResponse::new().with_status(StatusCode::UNAUTHORIZED))
            }
        });
        let oauth = OAuthProvider::new(
            OAuthConfig::new(
                ProviderId::parse("acme").unwrap(),
                "client",
                "https://app/auth/callback/acme".parse().unwrap(),
                "https://id.example.com/authorize".parse().unwrap(),
                "https://id.example.com/token".parse().unwrap(),
                "https://id.example.com/userinfo".parse().unwrap(),
            ),
            |profile: OAuthProfile| async move { Ok::<_, BoxError>(profile.raw) },
        );
        AuthEngine::new(config, Handler { fail_create })
            .with_provider(credentials)
            .unwrap()
            .with_provider(oauth)
            .unwrap()
    }

    fn engine() -> AuthEngine<Value, Handler> {
        engine_with(EngineConfig::new(SECRET).unwrap(), false)
    }

    fn request(method: Method, path: &str) -> InternalRequest {
        InternalRequest::new(method, format!("https://app{path}").parse().unwrap())
    }

    fn respond(outcome: Outcome<Value, Claims>) -> InternalResponse<Value> {
        match outcome {
            Outcome::Respond(resp) => resp,
            Outcome::Continue { .. } => panic!("expected an auth response"),
        }
    }

    #[tokio::test]
    async fn credentials_login_yields_user_and_session_cookies() {
        let req = request(Method::POST, "/auth/login/credentials").with_body("username=a&password=b");
        let resp = respond(engine().handle(&req).await);

        assert_eq!(resp.user, Some(json!({"id": 1})));
        assert!(resp.error.is_none());
        let names: Vec<&str> = resp.cookies.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["authflow.session", "authflow.refresh"]);
        assert!(resp.redirect.is_none());
    }

    #[tokio::test]
    async fn rejected_credentials_issue_no_cookies() {
        let req = request(Method::POST, "/auth/login/credentials").with_body("username=a&password=x");
        let resp = respond(engine().handle(&req).await);
        assert!(resp.user.is_none());
        assert!(resp.cookies.is_empty());
        assert_eq!(resp.status, Some(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn session_factory_failure_aborts_cookie_issuance() {
        let engine = engine_with(EngineConfig::new(SECRET).unwrap(), true);
        let req = request(Method::POST, "/auth/login/credentials").with_body("username=a&password=b");
        let resp = respond(engine.handle(&req).await);
        assert!(resp.user.is_none());
        assert!(resp.cookies.is_empty());
        assert_eq!(resp.error.as_ref().map(Error::code), Some("callback_failed"));
    }

    #[tokio::test]
    async fn credentials_login_rejects_get_by_default() {
        let resp = respond(engine().handle(&request(Method::GET, "/auth/login/credentials")).await);
        assert_eq!(resp.status, Some(StatusCode::METHOD_NOT_ALLOWED));
    }

    #[tokio::test]
    async fn unknown_provider_is_not_found() {
        let resp = respond(engine().handle(&request(Method::GET, "/auth/login/nope")).await);
        assert_eq!(resp.status, Some(StatusCode::NOT_FOUND));
        assert_eq!(resp.error.as_ref().map(Error::code), Some("unknown_provider"));
    }

    #[tokio::test]
    async fn oauth_login_redirects_with_flow_cookie() {
        let resp = respond(engine().handle(&request(Method::GET, "/auth/login/acme")).await);
        assert_eq!(resp.status, Some(StatusCode::FOUND));
        assert!(resp
            .redirect
            .as_deref()
            .unwrap()
            .starts_with("https://id.example.com/authorize?"));
        assert_eq!(resp.cookies.len(), 1);
        assert_eq!(resp.cookies[0].name, "authflow.flow.acme");
        assert_eq!(resp.cookies[0].options.path, "/auth");
    }

    #[tokio::test]
    async fn oauth_state_mismatch_sets_error_and_no_session() {
        let engine = engine();
        let login = respond(engine.handle(&request(Method::GET, "/auth/login/acme")).await);
        let flow = login.cookies[0].value.clone();

        let req = request(Method::GET, "/auth/callback/acme?code=c&state=attacker")
            .with_cookie("authflow.flow.acme", flow);
        let resp = respond(engine.handle(&req).await);

        assert!(resp.user.is_none());
        assert_eq!(resp.error.as_ref().map(Error::code), Some("state_mismatch"));
        assert!(resp.cookies.iter().all(Cookie::is_clear));
        assert_eq!(resp.body, Some(json!({"error": "state_mismatch"})));
    }

    #[tokio::test]
    async fn error_redirect_is_used_when_configured() {
        let engine = engine_with(
            EngineConfig::new(SECRET).unwrap().with_error_redirect("/login"),
            false,
        );
        let req = request(Method::GET, "/auth/callback/acme?code=c&state=x");
        let resp = respond(engine.handle(&req).await);
        assert_eq!(resp.redirect.as_deref(), Some("/login?error=state_mismatch"));
        assert_eq!(resp.status, Some(StatusCode::FOUND));
    }

    #[tokio::test]
    async fn logout_clears_both_cookies() {
        let engine = engine();
        let token = engine.codec.sign(&Claims { id: 1 }, 600).unwrap();
        let req = request(Method::POST, "/auth/logout").with_cookie("authflow.session", token);
        let resp = respond(engine.handle(&req).await);

        assert_eq!(resp.redirect.as_deref(), Some("/"));
        assert_eq!(resp.cookies.len(), 2);
        assert!(resp
            .cookies
            .iter()
            .all(|c| c.to_header_value().contains("Max-Age=0")));
    }

    #[tokio::test]
    async fn session_route_returns_current_session() {
        let engine = engine();
        let token = engine.codec.sign(&Claims { id: 42 }, 600).unwrap();
        let req = request(Method::GET, "/auth/session").with_cookie("authflow.session", token);
        let resp = respond(engine.handle(&req).await);
        assert_eq!(resp.body, Some(json!({"id": 42})));

        let resp = respond(engine.handle(&request(Method::GET, "/auth/session")).await);
        assert_eq!(resp.body, Some(Value::Null));
    }

    #[tokio::test]
    async fn other_paths_continue_with_refreshed_session() {
        let engine = engine();
        let expired = engine.codec.sign_at(&Claims { id: 5 }, 60, 1_000).unwrap();
        let refresh = engine.codec.sign(&Claims { id: 5 }, 600).unwrap();
        let req = request(Method::GET, "/dashboard")
            .with_cookie("authflow.session", expired)
            .with_cookie("authflow.refresh", refresh);

        match engine.handle(&req).await {
            Outcome::Continue { session, cookies } => {
                assert_eq!(session, Some(Claims { id: 5 }));
                assert_eq!(cookies.len(), 2);
                assert!(cookies.iter().all(|c| !c.is_clear()));
            }
            Outcome::Respond(_) => panic!("expected pass-through"),
        }
    }

    #[tokio::test]
    async fn revoke_unknown_provider_is_false() {
        let engine = engine();
        assert!(!engine.revoke("nope", "t").await);
        assert!(!engine.revoke("credentials", "t").await);
    }

    #[test]
    fn duplicate_provider_is_rejected() {
        let engine = engine();
        let again = CredentialsProvider::new(|_: CredentialsInput| async move {
            Ok::<_, BoxError>(InternalResponse::<Value>::new())
        });
        assert!(matches!(engine.with_provider(again), Err(Error::Config(_))));
    }

    #[test]
    fn routing_respects_base_path() {
        let engine = engine_with(
            EngineConfig::new(SECRET).unwrap().with_base_path("/api/auth"),
            false,
        );
        assert!(matches!(engine.route("/api/auth/login/acme"), Route::Login("acme")));
        assert!(matches!(engine.route("/api/auth/callback/acme/"), Route::Callback("acme")));
        assert!(matches!(engine.route("/api/auth/logout"), Route::Logout));
        assert!(matches!(engine.route("/api/auth/session"), Route::Session));
        assert!(matches!(engine.route("/auth/login/acme"), Route::PassThrough));
        assert!(matches!(engine.route("/api/authx/login/acme"), Route::PassThrough));
        assert!(matches!(engine.route("/api/auth/login/a/b"), Route::PassThrough));
        assert!(engine.is_auth_route("/api/auth/logout"));
        assert!(!engine.is_auth_route("/api/users"));
    }
}
