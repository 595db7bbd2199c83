use derive_more::{Display, Into};
use serde::{Deserialize, Serialize};

/// Provider identifier, the `<providerId>` segment of login and callback routes.
///
/// Lowercase ASCII letters, digits, `-` and `_` only, so it can be embedded in a
/// path segment and a cookie name without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, Into)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// Returns `None` if `id` is empty or contains characters outside `[a-z0-9_-]`.
    #[must_use]
    pub fn parse(id: &str) -> Option<Self> {
        let valid = !id.is_empty()
            && id
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_');
        valid.then(|| Self(id.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for ProviderId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ProviderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
