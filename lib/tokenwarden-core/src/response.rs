//! Token endpoint response schema.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

use crate::{GrantStrategy, SecureString, TokenError};

/// A successful token endpoint response.
///
/// `access_token` is required and must not be empty. Expiry is read from
/// `expires_on` (absolute epoch seconds) or, when absent, `expires_in`
/// (seconds from now); both accept string-encoded integers.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    access_token: SecureString,
    #[serde(default)]
    refresh_token: Option<SecureString>,
    #[serde(default, deserialize_with = "deserialize_seconds")]
    expires_on: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_seconds")]
    expires_in: Option<i64>,
}

fn deserialize_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(i64),
        Text(String),
    }

    match Option::<Seconds>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Seconds::Number(value)) => Ok(Some(value)),
        Some(Seconds::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| D::Error::custom(format!("invalid seconds '{text}': {err}"))),
    }
}

impl TokenResponse {
    /// Parses a response body.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Protocol`] if the body is not the expected JSON
    /// object or the access token is empty.
    pub fn parse(body: &str) -> Result<Self, TokenError> {
        let deserializer = &mut serde_json::Deserializer::from_str(body);
        let response: Self = serde_path_to_error::deserialize(deserializer).map_err(|err| {
            TokenError::protocol(format!(
                "cannot parse token response at '{}': {}",
                err.path(),
                err.inner()
            ))
        })?;

        if response.access_token.is_empty() {
            return Err(TokenError::protocol("token response has an empty access_token"));
        }

        Ok(response)
    }

    /// The issued access token.
    pub fn access_token(&self) -> &SecureString {
        &self.access_token
    }

    /// The issued refresh token, if any.
    pub fn refresh_token(&self) -> Option<&SecureString> {
        self.refresh_token.as_ref().filter(|token| !token.is_empty())
    }

    /// Resolves the absolute expiry in epoch seconds.
    ///
    /// The password strategy needs an expiry to schedule its refresh grant.
    /// The client-credentials strategy accepts a missing expiry and stores
    /// [`UNKNOWN_EXPIRY`](crate::store::UNKNOWN_EXPIRY), so the next call
    /// re-issues a token.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Protocol`] if the password strategy gets no expiry.
    pub fn expiry(&self, now: i64, strategy: GrantStrategy) -> Result<i64, TokenError> {
        let expiry = self
            .expires_on
            .or_else(|| self.expires_in.map(|seconds| now.saturating_add(seconds)));

        match (expiry, strategy) {
            (Some(expiry), _) => Ok(expiry),
            (None, GrantStrategy::ClientCredentials) => Ok(crate::store::UNKNOWN_EXPIRY),
            (None, GrantStrategy::Password) => Err(TokenError::protocol(
                "token response has neither expires_on nor expires_in",
            )),
        }
    }
}
