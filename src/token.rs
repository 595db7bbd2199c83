use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Minimum HMAC secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Serialize)]
struct SignClaims<'a, P> {
    iat: u64,
    exp: u64,
    data: &'a P,
}

#[derive(Deserialize)]
struct VerifyClaims<P> {
    exp: u64,
    data: P,
}

/// Signs and verifies compact HS256 tokens carrying an arbitrary serde payload.
///
/// The codec is pure: it holds only the secret. Tokens embed `iat` and `exp`;
/// the same payload signed at the same second under the same secret yields the
/// same token.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the secret is shorter than [`MIN_SECRET_LEN`].
    pub fn new(secret: &[u8]) -> Result<Self, Error> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(Error::Config(format!(
                "token secret must be at least {MIN_SECRET_LEN} bytes, got {}",
                secret.len()
            )));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        })
    }

    /// Signs `payload`, valid for `max_age_secs` from now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] if the payload cannot be serialized.
    pub fn sign<P: Serialize>(&self, payload: &P, max_age_secs: u64) -> Result<String, Error> {
        self.sign_at(payload, max_age_secs, now())
    }

    /// Signs `payload` as if issued at unix time `issued_at`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] if the payload cannot be serialized.
    pub fn sign_at<P: Serialize>(
        &self,
        payload: &P,
        max_age_secs: u64,
        issued_at: u64,
    ) -> Result<String, Error> {
        let claims = SignClaims {
            iat: issued_at,
            exp: issued_at.saturating_add(max_age_secs),
            data: payload,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Token(e.to_string()))
    }

    /// Verifies `token` against the current time and returns its payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] on a bad signature, malformed token, or expiry.
    pub fn verify<P: DeserializeOwned>(&self, token: &str) -> Result<P, Error> {
        self.verify_at(token, now())
    }

    /// Verifies `token` as of unix time `now`. A token is expired once `exp <= now`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Token`] on a bad signature, malformed token, or expiry.
    pub fn verify_at<P: DeserializeOwned>(&self, token: &str, now: u64) -> Result<P, Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<VerifyClaims<P>>(token, &self.decoding, &validation)
            .map_err(|e| Error::Token(e.to_string()))?;

        if data.claims.exp <= now {
            return Err(Error::Token("token expired".into()));
        }
        Ok(data.claims.data)
    }
}

pub(crate) fn now() -> u64 {
    u64::try_from(time::OffsetDateTime::now_utc().unix_timestamp()).unwrap_or(0)
}
