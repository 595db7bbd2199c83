//! Stateless session lifecycle over two signed cookies.
//!
//! The session cookie is short-lived and proves authentication on its own; the
//! refresh cookie lives longer and is only ever handed to
//! [`SessionHandler::handle_refresh`] to mint a new session. Nothing is kept in
//! server memory between requests.

use std::marker::PhantomData;
use std::sync::Arc;

use time::Duration;

use crate::cookies::{Cookie, CookieOptions};
use crate::error::Error;
use crate::request::InternalRequest;
use crate::token::TokenCodec;
use crate::traits::SessionHandler;

/// Payloads produced by [`SessionHandler::create_session`].
#[derive(Debug, Clone)]
pub struct SessionPair<S, R> {
    pub session: S,
    pub refresh: R,
}

impl<S, R> SessionPair<S, R> {
    #[must_use]
    pub fn new(session: S, refresh: R) -> Self {
        Self { session, refresh }
    }
}

/// Result of [`SessionHandler::handle_refresh`]. Only the `Some` fields are
/// re-signed; a `None` field leaves the client's current cookie untouched.
/// Both fields `None` counts as a declined refresh.
#[derive(Debug, Clone)]
pub struct RefreshedTokens<S, R> {
    pub session: Option<S>,
    pub refresh: Option<R>,
}

impl<S, R> RefreshedTokens<S, R> {
    #[must_use]
    pub fn both(session: S, refresh: R) -> Self {
        Self {
            session: Some(session),
            refresh: Some(refresh),
        }
    }

    /// New session, keep the current refresh token.
    #[must_use]
    pub fn session_only(session: S) -> Self {
        Self {
            session: Some(session),
            refresh: None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.session.is_none() && self.refresh.is_none()
    }
}

/// A newly created session and the cookies that carry it.
#[derive(Debug)]
pub struct IssuedSession<S> {
    pub session: S,
    pub cookies: Vec<Cookie>,
}

/// Outcome of the per-request session check.
#[derive(Debug)]
pub enum SessionState<S> {
    /// No session cookie and no refresh cookie.
    Anonymous,
    /// Session cookie is valid.
    Active(S),
    /// Session was re-minted from the refresh token. `session` is `None` when the
    /// handler rotated only the refresh token.
    Refreshed { session: Option<S>, cookies: Vec<Cookie> },
    /// Tokens were present but unusable; `cookies` clear them.
    Cleared { cookies: Vec<Cookie> },
}

impl<S> SessionState<S> {
    #[must_use]
    pub fn session(&self) -> Option<&S> {
        match self {
            Self::Active(s) => Some(s),
            Self::Refreshed { session, .. } => session.as_ref(),
            Self::Anonymous | Self::Cleared { .. } => None,
        }
    }

    #[must_use]
    pub fn into_parts(self) -> (Option<S>, Vec<Cookie>) {
        match self {
            Self::Anonymous => (None, Vec::new()),
            Self::Active(s) => (Some(s), Vec::new()),
            Self::Refreshed { session, cookies } => (session, cookies),
            Self::Cleared { cookies } => (None, cookies),
        }
    }
}

/// Cookie names and lifetimes for the two session tokens.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub session_cookie_name: String,
    pub refresh_cookie_name: String,
    pub session_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    pub cookie_options: CookieOptions,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            session_cookie_name: "authflow.session".into(),
            refresh_cookie_name: "authflow.refresh".into(),
            session_ttl_secs: 60 * 60,
            refresh_ttl_secs: 30 * 24 * 60 * 60,
            cookie_options: CookieOptions::default(),
        }
    }
}

/// Issues, refreshes and clears the session cookies for users of type `U`.
pub struct SessionManager<U, H> {
    codec: TokenCodec,
    handler: Arc<H>,
    settings: SessionSettings,
    _user: PhantomData<fn(&U)>,
}

// Manual Clone: avoid derive adding `U: Clone, H: Clone` bounds.
impl<U, H> Clone for SessionManager<U, H> {
    fn clone(&self) -> Self {
        Self {
            codec: self.codec.clone(),
            handler: self.handler.clone(),
            settings: self.settings.clone(),
            _user: PhantomData,
        }
    }
}

impl<U, H: SessionHandler<U>> SessionManager<U, H> {
    #[must_use]
    pub fn new(codec: TokenCodec, handler: Arc<H>, settings: SessionSettings) -> Self {
        Self {
            codec,
            handler,
            settings,
            _user: PhantomData,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }

    fn clear_cookies(&self) -> Vec<Cookie> {
        vec![
            Cookie::clear(
                &self.settings.session_cookie_name,
                self.settings.cookie_options.clone(),
            ),
            Cookie::clear(
                &self.settings.refresh_cookie_name,
                self.settings.cookie_options.clone(),
            ),
        ]
    }

    fn signed_cookie<P: serde::Serialize>(
        &self,
        name: &str,
        payload: &P,
        ttl_secs: u64,
    ) -> Result<Cookie, Error> {
        let token = self.codec.sign(payload, ttl_secs)?;
        Ok(Cookie::set(
            name,
            token,
            Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX)),
            self.settings.cookie_options.clone(),
        ))
    }

    /// Verified session payload from the session cookie; `None` if missing,
    /// tampered or expired.
    pub fn get_session<E>(&self, req: &InternalRequest<E>) -> Option<H::Session> {
        let raw = req.cookie(&self.settings.session_cookie_name)?;
        match self.codec.verify(raw) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::debug!(error = %e, "Session token rejected");
                None
            }
        }
    }

    /// Runs the caller's session factory and signs both payloads.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Callback`] if `create_session` fails; no cookie is
    /// produced in that case.
    pub async fn create_session(&self, user: &U) -> Result<IssuedSession<H::Session>, Error> {
        let pair = self
            .handler
            .create_session(user)
            .await
            .map_err(|e| Error::callback("create_session", e))?;

        let cookies = vec![
            self.signed_cookie(
                &self.settings.session_cookie_name,
                &pair.session,
                self.settings.session_ttl_secs,
            )?,
            self.signed_cookie(
                &self.settings.refresh_cookie_name,
                &pair.refresh,
                self.settings.refresh_ttl_secs,
            )?,
        ];

        Ok(IssuedSession {
            session: pair.session,
            cookies,
        })
    }

    /// Decides whether the request carries a valid session, refreshes it
    /// silently when possible, or clears stale cookies.
    pub async fn resolve<E>(&self, req: &InternalRequest<E>) -> SessionState<H::Session> {
        let has_session_cookie = req.cookie(&self.settings.session_cookie_name).is_some();
        if let Some(session) = self.get_session(req) {
            return SessionState::Active(session);
        }

        let Some(raw_refresh) = req.cookie(&self.settings.refresh_cookie_name) else {
            if has_session_cookie {
                return SessionState::Cleared {
                    cookies: vec![Cookie::clear(
                        &self.settings.session_cookie_name,
                        self.settings.cookie_options.clone(),
                    )],
                };
            }
            return SessionState::Anonymous;
        };

        let refresh: H::Refresh = match self.codec.verify(raw_refresh) {
            Ok(refresh) => refresh,
            Err(e) => {
                tracing::debug!(error = %e, "Refresh token rejected");
                return SessionState::Cleared {
                    cookies: self.clear_cookies(),
                };
            }
        };

        let refreshed = match self.handler.handle_refresh(refresh).await {
            Ok(Some(tokens)) if !tokens.is_empty() => tokens,
            Ok(_) => {
                tracing::debug!("Refresh declined by handler");
                return SessionState::Cleared {
                    cookies: self.clear_cookies(),
                };
            }
            Err(e) => {
                tracing::warn!(error = %e, "handle_refresh failed");
                return SessionState::Cleared {
                    cookies: self.clear_cookies(),
                };
            }
        };

        match self.refreshed_cookies(&refreshed) {
            Ok(cookies) => {
                tracing::debug!(cookies = cookies.len(), "Session refreshed");
                SessionState::Refreshed {
                    session: refreshed.session,
                    cookies,
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Refreshed session could not be signed");
                SessionState::Cleared {
                    cookies: self.clear_cookies(),
                }
            }
        }
    }

    fn refreshed_cookies<S, R>(&self, tokens: &RefreshedTokens<S, R>) -> Result<Vec<Cookie>, Error>
    where
        S: serde::Serialize,
        R: serde::Serialize,
    {
        let mut cookies = Vec::with_capacity(2);
        if let Some(session) = &tokens.session {
            cookies.push(self.signed_cookie(
                &self.settings.session_cookie_name,
                session,
                self.settings.session_ttl_secs,
            )?);
        }
        if let Some(refresh) = &tokens.refresh {
            cookies.push(self.signed_cookie(
                &self.settings.refresh_cookie_name,
                refresh,
                self.settings.refresh_ttl_secs,
            )?);
        }
        Ok(cookies)
    }

    /// Runs `on_invalidate_session`, then clears both cookies regardless of its outcome.
    pub async fn invalidate<E>(&self, req: &InternalRequest<E>) -> Vec<Cookie> {
        let session = self.get_session(req);
        if let Err(e) = self.handler.on_invalidate_session(session.as_ref()).await {
            tracing::warn!(error = %e, "on_invalidate_session failed during logout");
        }
        self.clear_cookies()
    }
}
