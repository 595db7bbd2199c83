use std::sync::Arc;
use std::time::Duration as StdDuration;

use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Duration;
use url::Url;

use super::FlowContext;
use crate::cookies::{Cookie, CookieOptions, SameSite};
use crate::error::{Error, UpstreamOperation, ValidationCode};
use crate::pkce::{self, PkcePair};
use crate::request::InternalRequest;
use crate::response::InternalResponse;
use crate::traits::{ProfileMapper, ProfileMapperDyn};
use crate::types::ProviderId;

/// Default timeout for token, userinfo and revocation requests.
pub const DEFAULT_HTTP_TIMEOUT: StdDuration = StdDuration::from_secs(10);

/// `OAuth2` authorization-server descriptor for one provider.
///
/// Required fields are constructor parameters; endpoints and scopes come from a
/// preset (see [`presets`](super::presets)) or from the `with_*` methods.
///
/// ```rust,ignore
/// use authflow::provider::{presets, OAuthOverrides};
///
/// let config = presets::github("client-id", "client-secret", redirect_uri)
///     .merge(OAuthOverrides {
///         scopes: Some(vec!["read:user".into()]),
///         ..OAuthOverrides::default()
///     });
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct OAuthConfig {
    pub(crate) id: ProviderId,
    pub(crate) client_id: String,
    pub(crate) client_secret: Option<String>,
    pub(crate) auth_url: Url,
    pub(crate) token_url: Url,
    pub(crate) userinfo_url: Url,
    pub(crate) revocation_url: Option<Url>,
    pub(crate) redirect_uri: Url,
    pub(crate) scopes: Vec<String>,
    pub(crate) pkce: bool,
    pub(crate) form_post: bool,
    pub(crate) extra_auth_params: Vec<(String, String)>,
}

/// Caller overrides, merged field by field over a preset: every `Some` wins.
#[derive(Debug, Clone, Default)]
pub struct OAuthOverrides {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub auth_url: Option<Url>,
    pub token_url: Option<Url>,
    pub userinfo_url: Option<Url>,
    pub revocation_url: Option<Url>,
    pub redirect_uri: Option<Url>,
    pub scopes: Option<Vec<String>>,
    pub pkce: Option<bool>,
    pub form_post: Option<bool>,
    pub extra_auth_params: Option<Vec<(String, String)>>,
}

impl OAuthConfig {
    /// Creates a configuration with explicit endpoints, PKCE on and no scopes.
    #[must_use]
    pub fn new(
        id: ProviderId,
        client_id: impl Into<String>,
        redirect_uri: Url,
        auth_url: Url,
        token_url: Url,
        userinfo_url: Url,
    ) -> Self {
        Self {
            id,
            client_id: client_id.into(),
            client_secret: None,
            auth_url,
            token_url,
            userinfo_url,
            revocation_url: None,
            redirect_uri,
            scopes: Vec::new(),
            pkce: true,
            form_post: false,
            extra_auth_params: Vec::new(),
        }
    }

    /// Applies `overrides` over `self` (shallow merge).
    #[must_use]
    pub fn merge(self, overrides: OAuthOverrides) -> Self {
        Self {
            id: self.id,
            client_id: overrides.client_id.unwrap_or(self.client_id),
            client_secret: overrides.client_secret.or(self.client_secret),
            auth_url: overrides.auth_url.unwrap_or(self.auth_url),
            token_url: overrides.token_url.unwrap_or(self.token_url),
            userinfo_url: overrides.userinfo_url.unwrap_or(self.userinfo_url),
            revocation_url: overrides.revocation_url.or(self.revocation_url),
            redirect_uri: overrides.redirect_uri.unwrap_or(self.redirect_uri),
            scopes: overrides.scopes.unwrap_or(self.scopes),
            pkce: overrides.pkce.unwrap_or(self.pkce),
            form_post: overrides.form_post.unwrap_or(self.form_post),
            extra_auth_params: overrides.extra_auth_params.unwrap_or(self.extra_auth_params),
        }
    }

    /// Reads overrides from `{PREFIX}_*` environment variables.
    ///
    /// # Recognised env vars
    /// - `{PREFIX}_CLIENT_ID`, `{PREFIX}_CLIENT_SECRET`
    /// - `{PREFIX}_AUTH_URL`, `{PREFIX}_TOKEN_URL`, `{PREFIX}_USERINFO_URL`,
    ///   `{PREFIX}_REVOCATION_URL`, `{PREFIX}_REDIRECT_URI`
    /// - `{PREFIX}_SCOPES`: comma-separated
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a URL variable does not parse.
    pub fn overrides_from_env(prefix: &str) -> Result<OAuthOverrides, Error> {
        let var = |name: &str| std::env::var(format!("{prefix}_{name}")).ok();
        let url_var = |name: &str| -> Result<Option<Url>, Error> {
            var(name)
                .map(|raw| {
                    raw.parse()
                        .map_err(|e| Error::Config(format!("{prefix}_{name}: {e}")))
                })
                .transpose()
        };

        Ok(OAuthOverrides {
            client_id: var("CLIENT_ID"),
            client_secret: var("CLIENT_SECRET"),
            auth_url: url_var("AUTH_URL")?,
            token_url: url_var("TOKEN_URL")?,
            userinfo_url: url_var("USERINFO_URL")?,
            revocation_url: url_var("REVOCATION_URL")?,
            redirect_uri: url_var("REDIRECT_URI")?,
            scopes: var("SCOPES")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect()),
            pkce: None,
            form_post: None,
            extra_auth_params: None,
        })
    }

    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_revocation_url(mut self, url: Url) -> Self {
        self.revocation_url = Some(url);
        self
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Enable or disable PKCE (default: enabled).
    #[must_use]
    pub fn with_pkce(mut self, enabled: bool) -> Self {
        self.pkce = enabled;
        self
    }

    /// Request `response_mode=form_post`: the authorization server POSTs the
    /// callback from its own origin. The flow cookie is then issued with
    /// `SameSite=None; Secure`, since browsers withhold `Lax` cookies on
    /// cross-site POSTs.
    #[must_use]
    pub fn with_form_post(mut self, enabled: bool) -> Self {
        self.form_post = enabled;
        self
    }

    /// Extra query parameter on the authorization URL (e.g. `prompt=consent`).
    #[must_use]
    pub fn with_auth_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_auth_params.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn id(&self) -> &ProviderId {
        &self.id
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn auth_url(&self) -> &Url {
        &self.auth_url
    }

    #[must_use]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    #[must_use]
    pub fn userinfo_url(&self) -> &Url {
        &self.userinfo_url
    }

    #[must_use]
    pub fn revocation_url(&self) -> Option<&Url> {
        self.revocation_url.as_ref()
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    #[must_use]
    pub fn pkce(&self) -> bool {
        self.pkce
    }

    #[must_use]
    pub fn form_post(&self) -> bool {
        self.form_post
    }
}

/// Authorization URL plus the secrets that must survive until the callback.
#[non_exhaustive]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
    pub code_verifier: Option<String>,
}

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

/// Everything the profile mapper sees after a successful exchange.
#[derive(Debug, Clone)]
pub struct OAuthProfile {
    pub provider: ProviderId,
    /// Raw userinfo JSON, fetched fresh on every callback.
    pub raw: Value,
    pub tokens: TokenResponse,
}

/// Transient flow state, signed into a short-lived cookie at login.
#[derive(Debug, Serialize, Deserialize)]
struct FlowState {
    provider: ProviderId,
    state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code_verifier: Option<String>,
}

/// `OAuth2` authorization-code provider.
pub struct OAuthProvider<U> {
    config: OAuthConfig,
    http: reqwest::Client,
    mapper: Arc<dyn ProfileMapperDyn<U>>,
}

impl<U: Send + 'static> OAuthProvider<U> {
    /// Creates a provider whose users are produced by `mapper`.
    pub fn new(config: OAuthConfig, mapper: impl ProfileMapper<U>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .user_agent(concat!("authflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            config,
            http,
            mapper: Arc::new(mapper),
        }
    }

    /// Use a custom HTTP client (for connection pool reuse, proxies, or other timeouts).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn id(&self) -> &ProviderId {
        &self.config.id
    }

    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Generates an authorization URL with a fresh `state` and, if enabled, PKCE.
    #[must_use]
    pub fn authorization_url(&self) -> AuthorizationRequest {
        let state = pkce::generate_state();
        let pkce = self.config.pkce.then(PkcePair::generate);
        let scope = self.config.scopes.join(" ");

        let mut url = self.config.auth_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", self.config.redirect_uri.as_str())
                .append_pair("scope", &scope)
                .append_pair("state", &state);
            if let Some(pkce) = &pkce {
                query
                    .append_pair("code_challenge", &pkce.challenge)
                    .append_pair("code_challenge_method", "S256");
            }
            if self.config.form_post {
                query.append_pair("response_mode", "form_post");
            }
            for (key, value) in &self.config.extra_auth_params {
                query.append_pair(key, value);
            }
        }

        AuthorizationRequest {
            url: url.into(),
            state,
            code_verifier: pkce.map(|p| p.verifier),
        }
    }

    fn flow_cookie_name(&self, ctx: &FlowContext<'_>) -> String {
        format!("{}.flow.{}", ctx.cookie_prefix, self.config.id)
    }

    fn flow_cookie_options(&self, ctx: &FlowContext<'_>) -> CookieOptions {
        let mut options = ctx.cookie_options.clone();
        if self.config.form_post {
            options.same_site = SameSite::None;
            options.secure = true;
        }
        options
    }

    /// IDLE → AWAITING_CALLBACK: redirect to the authorization endpoint and
    /// remember `state`/verifier in a signed cookie.
    pub(crate) fn login(&self, ctx: &FlowContext<'_>) -> InternalResponse<U> {
        let auth_req = self.authorization_url();
        let flow = FlowState {
            provider: self.config.id.clone(),
            state: auth_req.state,
            code_verifier: auth_req.code_verifier,
        };

        let token = match ctx.codec.sign(&flow, ctx.flow_ttl_secs) {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(error = %e, provider = %self.config.id, "Flow cookie signing failed");
                return InternalResponse::from_error(e);
            }
        };

        let cookie = Cookie::set(
            self.flow_cookie_name(ctx),
            token,
            Duration::seconds(i64::try_from(ctx.flow_ttl_secs).unwrap_or(i64::MAX)),
            self.flow_cookie_options(ctx),
        );

        InternalResponse::redirect(auth_req.url).with_cookie(cookie)
    }

    /// AWAITING_CALLBACK → COMPLETED. The flow cookie is cleared whatever the outcome.
    pub(crate) async fn callback<E: Sync>(
        &self,
        req: &InternalRequest<E>,
        ctx: &FlowContext<'_>,
    ) -> InternalResponse<U> {
        let clear = Cookie::clear(self.flow_cookie_name(ctx), self.flow_cookie_options(ctx));
        match self.complete_flow(req, ctx).await {
            Ok(user) => InternalResponse::with_user(user).with_cookie(clear),
            Err(e) => InternalResponse::from_error(e).with_cookie(clear),
        }
    }

    async fn complete_flow<E: Sync>(
        &self,
        req: &InternalRequest<E>,
        ctx: &FlowContext<'_>,
    ) -> Result<U, Error> {
        let params = callback_params(req).await?;
        let param = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .filter(|v| !v.is_empty())
        };

        if let Some(error) = param("error") {
            let desc = param("error_description").unwrap_or("Unknown error");
            tracing::warn!(error = %error, description = %desc, provider = %self.config.id, "OAuth2 error from authorization server");
            return Err(Error::Upstream {
                operation: UpstreamOperation::Authorization,
                status: None,
                detail: format!("{error}: {desc}"),
            });
        }

        let mismatch = |detail: String| Error::validation(ValidationCode::StateMismatch, detail);

        let received_state =
            param("state").ok_or_else(|| mismatch("missing state parameter".into()))?;

        let raw_flow = req
            .cookie(&self.flow_cookie_name(ctx))
            .ok_or_else(|| mismatch("missing flow cookie".into()))?;
        let flow: FlowState = ctx
            .codec
            .verify(raw_flow)
            .map_err(|e| mismatch(format!("flow cookie: {e}")))?;

        if flow.provider != self.config.id {
            return Err(mismatch("flow cookie issued for another provider".into()));
        }
        if !pkce::constant_time_eq(&flow.state, received_state) {
            tracing::warn!(provider = %self.config.id, "OAuth state mismatch");
            return Err(mismatch("state does not match".into()));
        }

        let code = param("code").ok_or_else(|| {
            Error::validation(ValidationCode::MissingCode, "missing code parameter")
        })?;
        if self.config.pkce && flow.code_verifier.is_none() {
            return Err(Error::validation(
                ValidationCode::MissingVerifier,
                "flow cookie has no verifier",
            ));
        }

        let tokens = self
            .exchange_code(code, flow.code_verifier.as_deref())
            .await
            .inspect_err(|e| tracing::error!(error = %e, provider = %self.config.id, "Token exchange failed"))?;

        let raw = self
            .get_user_info(&tokens.access_token)
            .await
            .inspect_err(|e| tracing::error!(error = %e, provider = %self.config.id, "Userinfo request failed"))?;

        let profile = OAuthProfile {
            provider: self.config.id.clone(),
            raw,
            tokens,
        };

        self.mapper
            .map_profile_dyn(profile)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, provider = %self.config.id, "Profile mapping failed");
                Error::callback("map_profile", e)
            })
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure or timeout, or
    /// [`Error::Upstream`] if the token endpoint rejects the code.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse, Error> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }

        let response = self
            .http
            .post(self.config.token_url.clone())
            .header(http::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        let response = Self::ensure_success(response, UpstreamOperation::TokenExchange).await?;
        let status = response.status().as_u16();
        let body: Value = response.json().await?;

        // Some servers (GitHub) report errors with a 200 status.
        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(Error::Upstream {
                operation: UpstreamOperation::TokenExchange,
                status: Some(status),
                detail: error.to_owned(),
            });
        }

        serde_json::from_value(body).map_err(|e| Error::Upstream {
            operation: UpstreamOperation::TokenExchange,
            status: Some(status),
            detail: format!("malformed token response: {e}"),
        })
    }

    /// Fetch the raw user profile with an access token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or
    /// [`Error::Upstream`] if the userinfo endpoint returns an error.
    pub async fn get_user_info(&self, access_token: &str) -> Result<Value, Error> {
        let response = self
            .http
            .get(self.config.userinfo_url.clone())
            .header(http::header::ACCEPT, "application/json")
            .bearer_auth(access_token)
            .send()
            .await?;

        let response = Self::ensure_success(response, UpstreamOperation::UserInfo).await?;
        response.json::<Value>().await.map_err(Into::into)
    }

    /// RFC 7009 token revocation. `false` when no revocation endpoint is
    /// configured or the call does not succeed.
    pub async fn revoke(&self, token: &str) -> bool {
        let Some(url) = &self.config.revocation_url else {
            return false;
        };

        let mut params = vec![
            ("token", token),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            params.push(("client_secret", secret));
        }

        match self.http.post(url.clone()).form(&params).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(provider = %self.config.id, "Token revoked");
                true
            }
            Ok(response) => {
                tracing::debug!(provider = %self.config.id, status = response.status().as_u16(), "Token revocation rejected");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, provider = %self.config.id, "Token revocation request failed");
                false
            }
        }
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: UpstreamOperation,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Upstream {
            operation,
            status: Some(status),
            detail: body,
        })
    }
}

/// Callback parameters from the query string, or from the form body for
/// `response_mode=form_post`.
async fn callback_params<E>(req: &InternalRequest<E>) -> Result<Vec<(String, String)>, Error> {
    if *req.method() == Method::POST {
        let body = req.body().await?;
        return Ok(url::form_urlencoded::parse(body).into_owned().collect());
    }
    Ok(req.url().query_pairs().into_owned().collect())
}
