//! Framework-agnostic cookie model.
//!
//! Adapters render [`Cookie`] with [`Cookie::to_header_value`] and feed the raw
//! `Cookie` request header through [`parse_cookie_header`].

use std::collections::BTreeMap;

use time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

impl From<SameSite> for cookie::SameSite {
    fn from(value: SameSite) -> Self {
        match value {
            SameSite::Strict => Self::Strict,
            SameSite::Lax => Self::Lax,
            SameSite::None => Self::None,
        }
    }
}

/// Attributes shared by every cookie the engine emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".into(),
            http_only: true,
            secure: true,
            same_site: SameSite::Lax,
        }
    }
}

impl CookieOptions {
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

/// A cookie to set or clear on the outgoing response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub max_age: Duration,
    pub options: CookieOptions,
}

impl Cookie {
    /// Cookie carrying `value` for `max_age`.
    #[must_use]
    pub fn set(
        name: impl Into<String>,
        value: impl Into<String>,
        max_age: Duration,
        options: CookieOptions,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age,
            options,
        }
    }

    /// Removal cookie: empty value, `Max-Age=0`, same path as the original.
    #[must_use]
    pub fn clear(name: impl Into<String>, options: CookieOptions) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
            max_age: Duration::ZERO,
            options,
        }
    }

    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.value.is_empty() || self.max_age <= Duration::ZERO
    }

    /// `Set-Cookie` header value.
    #[must_use]
    pub fn to_header_value(&self) -> String {
        cookie::Cookie::build((self.name.clone(), self.value.clone()))
            .path(self.options.path.clone())
            .http_only(self.options.http_only)
            .secure(self.options.secure)
            .same_site(self.options.same_site.into())
            .max_age(self.max_age.max(Duration::ZERO))
            .build()
            .to_string()
    }
}

/// Parses a `Cookie` request header (`a=1; b=2`). Malformed pairs are skipped;
/// for duplicate names the first occurrence wins.
#[must_use]
pub fn parse_cookie_header(header: &str) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    for parsed in cookie::Cookie::split_parse(header).flatten() {
        cookies
            .entry(parsed.name().to_owned())
            .or_insert_with(|| parsed.value().to_owned());
    }
    cookies
}
