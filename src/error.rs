use derive_more::Display;
use http::StatusCode;

/// Boxed error returned by caller-supplied callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Request failed validation (state mismatch, malformed callback, unknown route).
    #[error("Validation error ({code}): {detail}")]
    Validation { code: ValidationCode, detail: String },
    /// The authorization server answered with a non-2xx status or an error redirect.
    #[error("{operation} failed (status {status:?}): {detail}")]
    Upstream {
        operation: UpstreamOperation,
        status: Option<u16>,
        detail: String,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token verification error: {0}")]
    Token(String),
    /// A caller-supplied callback returned an error.
    #[error("Callback `{callback}` failed: {source}")]
    Callback {
        callback: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Why a request was rejected before reaching the authorization server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ValidationCode {
    /// `state` missing, flow cookie missing or invalid, or the two differ.
    StateMismatch,
    MissingCode,
    MissingVerifier,
    MalformedBody,
    MalformedRequest,
    UnknownRoute,
    UnknownProvider,
    MethodNotAllowed,
}

impl ValidationCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StateMismatch => "state_mismatch",
            Self::MissingCode => "missing_code",
            Self::MissingVerifier => "missing_verifier",
            Self::MalformedBody => "malformed_body",
            Self::MalformedRequest => "malformed_request",
            Self::UnknownRoute => "unknown_route",
            Self::UnknownProvider => "unknown_provider",
            Self::MethodNotAllowed => "method_not_allowed",
        }
    }

    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::UnknownRoute | Self::UnknownProvider => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl std::fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorization server call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[non_exhaustive]
pub enum UpstreamOperation {
    /// The server redirected back with `error=...`.
    #[display("authorization")]
    Authorization,
    #[display("token exchange")]
    TokenExchange,
    #[display("userinfo request")]
    UserInfo,
}

impl UpstreamOperation {
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Authorization => "access_denied",
            Self::TokenExchange => "token_exchange_failed",
            Self::UserInfo => "userinfo_failed",
        }
    }
}

/// Coarse classification used to pick a status code and a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Upstream,
    Token,
    CallbackContract,
    Config,
}

impl Error {
    pub(crate) fn validation(code: ValidationCode, detail: impl Into<String>) -> Self {
        Self::Validation {
            code,
            detail: detail.into(),
        }
    }

    pub(crate) fn callback(callback: &'static str, source: BoxError) -> Self {
        Self::Callback { callback, source }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Upstream { .. } | Self::Http(_) => ErrorKind::Upstream,
            Self::Token(_) => ErrorKind::Token,
            Self::Callback { .. } => ErrorKind::CallbackContract,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Short, stable identifier safe to expose in a redirect or response body.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. } => code.as_str(),
            Self::Upstream { operation, .. } => operation.code(),
            Self::Http(_) => "upstream_unreachable",
            Self::Token(_) => "invalid_token",
            Self::Callback { .. } => "callback_failed",
            Self::Config(_) => "configuration",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { code, .. } => code.status(),
            Self::Upstream { .. } | Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Token(_) => StatusCode::UNAUTHORIZED,
            Self::Callback { .. } | Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_codes_map_to_client_errors() {
        let err = Error::validation(ValidationCode::StateMismatch, "state differs");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.code(), "state_mismatch");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = Error::validation(ValidationCode::UnknownProvider, "nope");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::validation(ValidationCode::UnknownRoute, "nope").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::validation(ValidationCode::MethodNotAllowed, "PUT").status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert!(err.to_string().contains("(unknown_provider)"));
    }

    #[test]
    fn upstream_operations_have_distinct_codes() {
        let exchange = Error::Upstream {
            operation: UpstreamOperation::TokenExchange,
            status: Some(400),
            detail: "invalid_grant".into(),
        };
        let userinfo = Error::Upstream {
            operation: UpstreamOperation::UserInfo,
            status: Some(401),
            detail: String::new(),
        };
        assert_eq!(exchange.code(), "token_exchange_failed");
        assert_eq!(userinfo.code(), "userinfo_failed");
        assert_eq!(exchange.status(), StatusCode::BAD_GATEWAY);
        assert!(exchange.to_string().starts_with("token exchange failed"));

        let denied = Error::Upstream {
            operation: UpstreamOperation::Authorization,
            status: None,
            detail: "access_denied: user cancelled".into(),
        };
        assert_eq!(denied.code(), "access_denied");
    }

    #[test]
    fn callback_error_keeps_source() {
        let err = Error::callback("create_session", "db down".into());
        assert_eq!(err.kind(), ErrorKind::CallbackContract);
        assert!(err.to_string().contains("db down"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
