//! Authentication providers.
//!
//! [`Provider`] is a closed set of variants sharing the same three operations:
//! `login`, `callback` and `logout`. The engine dispatches by [`ProviderId`].

mod credentials;
mod oauth;
pub mod presets;

pub use credentials::CredentialsProvider;
pub use oauth::{
    AuthorizationRequest, OAuthConfig, OAuthOverrides, OAuthProfile, OAuthProvider, TokenResponse,
};

use http::Method;

use crate::cookies::CookieOptions;
use crate::request::InternalRequest;
use crate::response::InternalResponse;
use crate::token::TokenCodec;
use crate::types::ProviderId;

const OAUTH_LOGIN_METHODS: &[Method] = &[Method::GET];
// `response_mode=form_post` servers POST the callback; see `OAuthConfig::with_form_post`.
const OAUTH_CALLBACK_METHODS: &[Method] = &[Method::GET, Method::POST];

/// Per-engine settings a provider needs to issue and read its flow cookie.
#[derive(Debug, Clone)]
pub(crate) struct FlowContext<'a> {
    pub(crate) codec: &'a TokenCodec,
    pub(crate) cookie_prefix: &'a str,
    /// Options for the flow cookie; `path` is the auth base path.
    pub(crate) cookie_options: CookieOptions,
    pub(crate) flow_ttl_secs: u64,
}

pub enum Provider<U> {
    OAuth(OAuthProvider<U>),
    Credentials(CredentialsProvider<U>),
}

impl<U> From<OAuthProvider<U>> for Provider<U> {
    fn from(p: OAuthProvider<U>) -> Self {
        Self::OAuth(p)
    }
}

impl<U> From<CredentialsProvider<U>> for Provider<U> {
    fn from(p: CredentialsProvider<U>) -> Self {
        Self::Credentials(p)
    }
}

impl<U: Send + 'static> Provider<U> {
    #[must_use]
    pub fn id(&self) -> &ProviderId {
        match self {
            Self::OAuth(p) => p.id(),
            Self::Credentials(p) => p.id(),
        }
    }

    /// HTTP methods accepted on the login route.
    #[must_use]
    pub fn login_methods(&self) -> &[Method] {
        match self {
            Self::OAuth(_) => OAUTH_LOGIN_METHODS,
            Self::Credentials(p) => p.methods(),
        }
    }

    /// HTTP methods accepted on the callback route.
    #[must_use]
    pub fn callback_methods(&self) -> &[Method] {
        match self {
            Self::OAuth(_) => OAUTH_CALLBACK_METHODS,
            Self::Credentials(p) => p.methods(),
        }
    }

    pub(crate) async fn login<E: Sync>(
        &self,
        req: &InternalRequest<E>,
        ctx: &FlowContext<'_>,
    ) -> InternalResponse<U> {
        match self {
            Self::OAuth(p) => p.login(ctx),
            Self::Credentials(p) => p.login(req).await,
        }
    }

    pub(crate) async fn callback<E: Sync>(
        &self,
        req: &InternalRequest<E>,
        ctx: &FlowContext<'_>,
    ) -> InternalResponse<U> {
        match self {
            Self::OAuth(p) => p.callback(req, ctx).await,
            Self::Credentials(p) => p.login(req).await,
        }
    }

    /// Best-effort revocation of `token` at the provider. `true` only if the
    /// provider confirmed it; never errors.
    pub async fn logout(&self, token: &str) -> bool {
        match self {
            Self::OAuth(p) => p.revoke(token).await,
            Self::Credentials(_) => false,
        }
    }
}
