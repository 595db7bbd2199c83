use crate::cookies::{CookieOptions, SameSite};
use crate::error::Error;
use crate::session::SessionSettings;
use crate::token::TokenCodec;

/// Engine-wide settings shared by routing, providers and the session manager.
#[derive(Debug, Clone)]
pub(crate) struct AuthSettings {
    pub(crate) base_path: String,
    pub(crate) cookie_prefix: String,
    pub(crate) secure_cookies: bool,
    pub(crate) same_site: SameSite,
    pub(crate) session_ttl_secs: u64,
    pub(crate) refresh_ttl_secs: u64,
    pub(crate) flow_ttl_secs: u64,
    pub(crate) login_redirect: String,
    pub(crate) logout_redirect: String,
    pub(crate) error_redirect: Option<String>,
}

impl AuthSettings {
    fn defaults() -> Self {
        Self {
            base_path: "/auth".into(),
            cookie_prefix: "authflow".into(),
            secure_cookies: true,
            same_site: SameSite::Lax,
            session_ttl_secs: 60 * 60,
            refresh_ttl_secs: 30 * 24 * 60 * 60,
            flow_ttl_secs: 5 * 60,
            login_redirect: "/".into(),
            logout_redirect: "/".into(),
            error_redirect: None,
        }
    }

    pub(crate) fn cookie_options(&self) -> CookieOptions {
        CookieOptions {
            path: "/".into(),
            http_only: true,
            secure: self.secure_cookies,
            same_site: self.same_site,
        }
    }

    /// Flow cookies are only sent back to the auth routes.
    pub(crate) fn flow_cookie_options(&self) -> CookieOptions {
        self.cookie_options().with_path(self.base_path.clone())
    }

    pub(crate) fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            session_cookie_name: format!("{}.session", self.cookie_prefix),
            refresh_cookie_name: format!("{}.refresh", self.cookie_prefix),
            session_ttl_secs: self.session_ttl_secs,
            refresh_ttl_secs: self.refresh_ttl_secs,
            cookie_options: self.cookie_options(),
        }
    }
}

/// Authentication engine configuration.
///
/// The signing secret is the only required field. Use
/// [`from_env()`](EngineConfig::from_env) for convention-based setup, or
/// [`new()`](EngineConfig::new) with `with_*` methods for full control.
pub struct EngineConfig {
    pub(crate) codec: TokenCodec,
    pub(crate) settings: AuthSettings,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl EngineConfig {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `secret` is shorter than 32 bytes.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, Error> {
        Ok(Self {
            codec: TokenCodec::new(secret.as_ref())?,
            settings: AuthSettings::defaults(),
        })
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `AUTH_SECRET`: token signing secret (at least 32 bytes)
    ///
    /// # Optional env vars
    /// - `AUTH_BASE_PATH`: route prefix (default `/auth`)
    /// - `AUTH_SECURE_COOKIES`: `"0"`/`"false"` to drop the `Secure` attribute (local HTTP)
    /// - `AUTH_SESSION_TTL_SECS`, `AUTH_REFRESH_TTL_SECS`: token lifetimes
    /// - `AUTH_LOGIN_REDIRECT`, `AUTH_LOGOUT_REDIRECT`, `AUTH_ERROR_REDIRECT`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `AUTH_SECRET` is missing or too short, or a
    /// TTL is not a positive integer.
    pub fn from_env() -> Result<Self, Error> {
        let secret = std::env::var("AUTH_SECRET")
            .map_err(|_| Error::Config("AUTH_SECRET is required".into()))?;
        let mut config = Self::new(secret)?;

        if let Ok(path) = std::env::var("AUTH_BASE_PATH") {
            config = config.with_base_path(path);
        }
        if let Ok(flag) = std::env::var("AUTH_SECURE_COOKIES") {
            config = config.with_secure_cookies(!matches!(flag.as_str(), "0" | "false"));
        }
        if let Some(ttl) = ttl_from_env("AUTH_SESSION_TTL_SECS")? {
            config = config.with_session_ttl_secs(ttl);
        }
        if let Some(ttl) = ttl_from_env("AUTH_REFRESH_TTL_SECS")? {
            config = config.with_refresh_ttl_secs(ttl);
        }
        if let Ok(path) = std::env::var("AUTH_LOGIN_REDIRECT") {
            config = config.with_login_redirect(path);
        }
        if let Ok(path) = std::env::var("AUTH_LOGOUT_REDIRECT") {
            config = config.with_logout_redirect(path);
        }
        if let Ok(path) = std::env::var("AUTH_ERROR_REDIRECT") {
            config = config.with_error_redirect(path);
        }

        Ok(config)
    }

    /// Route prefix; a trailing `/` is dropped.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.settings.base_path = path.trim_end_matches('/').to_owned();
        self
    }

    #[must_use]
    pub fn with_cookie_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.cookie_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.settings.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.settings.same_site = same_site;
        self
    }

    #[must_use]
    pub fn with_session_ttl_secs(mut self, secs: u64) -> Self {
        self.settings.session_ttl_secs = secs;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_secs(mut self, secs: u64) -> Self {
        self.settings.refresh_ttl_secs = secs;
        self
    }

    /// Lifetime of the `state`/PKCE cookie, i.e. how long the user has to
    /// finish signing in at the provider.
    #[must_use]
    pub fn with_flow_ttl_secs(mut self, secs: u64) -> Self {
        self.settings.flow_ttl_secs = secs;
        self
    }

    #[must_use]
    pub fn with_login_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.login_redirect = path.into();
        self
    }

    #[must_use]
    pub fn with_logout_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.logout_redirect = path.into();
        self
    }

    /// Send errors as a redirect to `path?error=<code>` instead of a JSON body.
    #[must_use]
    pub fn with_error_redirect(mut self, path: impl Into<String>) -> Self {
        self.settings.error_redirect = Some(path.into());
        self
    }

    /// The codec used for session, refresh and flow tokens.
    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }
}

fn ttl_from_env(name: &str) -> Result<Option<u64>, Error> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Some(secs)),
            _ => Err(Error::Config(format!("{name} must be a positive integer"))),
        },
        Err(_) => Ok(None),
    }
}
