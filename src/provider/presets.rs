//! Default endpoint and scope configuration for well-known providers.
//!
//! Presets are plain [`OAuthConfig`] values; adjust them with
//! [`OAuthConfig::merge`] or the `with_*` methods.

use url::Url;

use super::OAuthConfig;
use crate::types::ProviderId;

fn url(raw: &str) -> Url {
    raw.parse().expect("valid preset URL")
}

fn id(raw: &str) -> ProviderId {
    ProviderId::parse(raw).expect("valid preset id")
}

/// GitHub OAuth app. Profile: `GET /user`.
#[must_use]
pub fn github(
    client_id: impl Into<String>,
    client_secret: impl Into<String>,
    redirect_uri: Url,
) -> OAuthConfig {
    OAuthConfig::new(
        id("github"),
        client_id,
        redirect_uri,
        url("https://github.com/login/oauth/authorize"),
        url("https://github.com/login/oauth/access_token"),
        url("https://api.github.com/user"),
    )
    .with_client_secret(client_secret)
    .with_scopes(vec!["read:user".into(), "user:email".into()])
}

/// Google OpenID Connect. Profile: OIDC userinfo.
#[must_use]
pub fn google(
    client_id: impl Into<String>,
    client_secret: impl Into<String>,
    redirect_uri: Url,
) -> OAuthConfig {
    OAuthConfig::new(
        id("google"),
        client_id,
        redirect_uri,
        url("https://accounts.google.com/o/oauth2/v2/auth"),
        url("https://oauth2.googleapis.com/token"),
        url("https://openidconnect.googleapis.com/v1/userinfo"),
    )
    .with_client_secret(client_secret)
    .with_revocation_url(url("https://oauth2.googleapis.com/revoke"))
    .with_scopes(vec!["openid".into(), "email".into(), "profile".into()])
}

/// Discord. Profile: `GET /users/@me`.
#[must_use]
pub fn discord(
    client_id: impl Into<String>,
    client_secret: impl Into<String>,
    redirect_uri: Url,
) -> OAuthConfig {
    OAuthConfig::new(
        id("discord"),
        client_id,
        redirect_uri,
        url("https://discord.com/oauth2/authorize"),
        url("https://discord.com/api/oauth2/token"),
        url("https://discord.com/api/users/@me"),
    )
    .with_client_secret(client_secret)
    .with_revocation_url(url("https://discord.com/api/oauth2/token/revoke"))
    .with_scopes(vec!["identify".into(), "email".into()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::OAuthOverrides;

    fn redirect() -> Url {
        "https://app.example.com/auth/callback/github".parse().unwrap()
    }

    #[test]
    fn github_defaults() {
        let config = github("cid", "secret", redirect());
        assert_eq!(config.id().as_str(), "github");
        assert_eq!(
            config.token_url().as_str(),
            "https://github.com/login/oauth/access_token"
        );
        assert!(config.revocation_url().is_none());
        assert!(config.pkce());
    }

    #[test]
    fn google_has_revocation_endpoint() {
        let config = google("cid", "secret", redirect());
        assert_eq!(
            config.revocation_url().map(Url::as_str),
            Some("https://oauth2.googleapis.com/revoke")
        );
        assert_eq!(config.scopes(), &["openid", "email", "profile"]);
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let config = discord("cid", "secret", redirect()).merge(OAuthOverrides {
            userinfo_url: Some("https://proxy.example.com/me".parse().unwrap()),
            pkce: Some(false),
            ..OAuthOverrides::default()
        });
        assert_eq!(config.userinfo_url().as_str(), "https://proxy.example.com/me");
        assert!(!config.pkce());
        assert_eq!(config.client_id(), "cid");
        assert_eq!(config.scopes(), &["identify", "email"]);
    }
}
