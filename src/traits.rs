//! Caller-supplied callbacks.
//!
//! The engine owns no storage: user lookup, session bookkeeping and revocation
//! all happen behind these traits.

use std::future::Future;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::BoxError;
use crate::provider::OAuthProfile;
use crate::response::InternalResponse;
use crate::session::{RefreshedTokens, SessionPair};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Maps a freshly fetched OAuth profile to the application user.
///
/// Closures `Fn(OAuthProfile) -> impl Future<Output = Result<U, BoxError>>`
/// implement this trait.
///
/// # Example
///
/// ```rust,ignore
/// let mapper = |profile: OAuthProfile| async move {
///     let id = profile.raw["id"].as_u64().ok_or("profile without id")?;
///     Ok::<_, BoxError>(AppUser { id })
/// };
/// ```
pub trait ProfileMapper<U>: Send + Sync + 'static {
    fn map_profile(
        &self,
        profile: OAuthProfile,
    ) -> impl Future<Output = Result<U, BoxError>> + Send;
}

impl<U, F, Fut> ProfileMapper<U> for F
where
    F: Fn(OAuthProfile) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<U, BoxError>> + Send,
{
    fn map_profile(
        &self,
        profile: OAuthProfile,
    ) -> impl Future<Output = Result<U, BoxError>> + Send {
        self(profile)
    }
}

/// Submitted credentials plus client details for rate limiting or audit.
#[derive(Debug, Clone)]
pub struct CredentialsInput {
    /// Form fields (as strings) or the JSON object body.
    pub fields: Map<String, Value>,
    pub user_agent: Option<String>,
    pub client_ip: Option<String>,
}

impl CredentialsInput {
    /// String field lookup, e.g. `input.field("username")`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

/// Checks first-party credentials and returns the response to send.
///
/// Return [`InternalResponse::with_user`] on success. An `Ok` response without a
/// user (for instance a 401 body, or a 307 redirect to a second factor) is
/// passed through as is.
pub trait CredentialsAuthorizer<U>: Send + Sync + 'static {
    fn authorize(
        &self,
        input: CredentialsInput,
    ) -> impl Future<Output = Result<InternalResponse<U>, BoxError>> + Send;
}

impl<U, F, Fut> CredentialsAuthorizer<U> for F
where
    F: Fn(CredentialsInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<InternalResponse<U>, BoxError>> + Send,
{
    fn authorize(
        &self,
        input: CredentialsInput,
    ) -> impl Future<Output = Result<InternalResponse<U>, BoxError>> + Send {
        self(input)
    }
}

/// Session lifecycle callbacks.
///
/// `Session` is signed into the short-lived session cookie and `Refresh` into
/// the long-lived refresh cookie. Both must round-trip through serde.
///
/// # Example
///
/// ```rust,ignore
/// impl SessionHandler<AppUser> for MyState {
///     type Session = Claims;
///     type Refresh = RefreshClaims;
///
///     async fn create_session(&self, user: &AppUser) -> Result<SessionPair<Claims, RefreshClaims>, BoxError> {
///         let family = self.db.new_refresh_family(user.id).await?;
///         Ok(SessionPair::new(Claims::from(user), RefreshClaims { user_id: user.id, family }))
///     }
///
///     async fn handle_refresh(&self, refresh: RefreshClaims) -> Result<Option<RefreshedTokens<Claims, RefreshClaims>>, BoxError> {
///         if self.db.is_revoked(refresh.family).await? {
///             return Ok(None);
///         }
///         let user = self.db.user(refresh.user_id).await?;
///         Ok(Some(RefreshedTokens::both(Claims::from(&user), refresh)))
///     }
/// }
/// ```
pub trait SessionHandler<U>: Send + Sync + 'static {
    type Session: Serialize + DeserializeOwned + Send + Sync + 'static;
    type Refresh: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Called once per successful login, before any cookie is issued.
    fn create_session(
        &self,
        user: &U,
    ) -> impl Future<Output = Result<SessionPair<Self::Session, Self::Refresh>, BoxError>> + Send;

    /// Called when the session token is missing or expired but the refresh token
    /// is valid. `Ok(None)` means "cannot refresh" and signs the client out.
    fn handle_refresh(
        &self,
        refresh: Self::Refresh,
    ) -> impl Future<
        Output = Result<Option<RefreshedTokens<Self::Session, Self::Refresh>>, BoxError>,
    > + Send;

    /// Revocation bookkeeping before both cookies are cleared. Failures are
    /// logged and never prevent the cookies from being cleared.
    fn on_invalidate_session(
        &self,
        _session: Option<&Self::Session>,
    ) -> impl Future<Output = Result<(), BoxError>> + Send {
        async { Ok(()) }
    }
}

/// Object-safe wrapper for [`ProfileMapper`] (needed for `Arc<dyn>`).
pub(crate) trait ProfileMapperDyn<U>: Send + Sync {
    fn map_profile_dyn(&self, profile: OAuthProfile) -> BoxFuture<'_, Result<U, BoxError>>;
}

impl<U: Send + 'static, T: ProfileMapper<U>> ProfileMapperDyn<U> for T {
    fn map_profile_dyn(&self, profile: OAuthProfile) -> BoxFuture<'_, Result<U, BoxError>> {
        Box::pin(self.map_profile(profile))
    }
}

/// Object-safe wrapper for [`CredentialsAuthorizer`].
pub(crate) trait CredentialsAuthorizerDyn<U>: Send + Sync {
    fn authorize_dyn(
        &self,
        input: CredentialsInput,
    ) -> BoxFuture<'_, Result<InternalResponse<U>, BoxError>>;
}

impl<U: Send + 'static, T: CredentialsAuthorizer<U>> CredentialsAuthorizerDyn<U> for T {
    fn authorize_dyn(
        &self,
        input: CredentialsInput,
    ) -> BoxFuture<'_, Result<InternalResponse<U>, BoxError>> {
        Box::pin(self.authorize(input))
    }
}
