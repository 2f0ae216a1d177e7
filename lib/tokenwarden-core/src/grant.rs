//! Form-encoded grant requests sent to the token endpoint.

use std::fmt;

use crate::{SecureString, TokenConfig, TokenError};

/// Scope sent by the password and refresh grants.
const OPENID_SCOPE: &str = "openid";

/// OAuth2 `grant_type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
    /// `grant_type=password`
    Password,
    /// `grant_type=refresh_token`
    RefreshToken,
    /// `grant_type=client_credentials`
    ClientCredentials,
}

impl GrantType {
    /// The wire value of the grant type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::RefreshToken => "refresh_token",
            Self::ClientCredentials => "client_credentials",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The form fields of one exchange attempt.
///
/// Built fresh for every attempt and never persisted. Values are held as
/// [`SecureString`] and the `Debug` output only lists field names.
#[derive(Clone)]
pub struct GrantRequest {
    grant_type: GrantType,
    fields: Vec<(&'static str, SecureString)>,
}

impl GrantRequest {
    /// Initial resource-owner password grant.
    pub fn password(config: &TokenConfig) -> Self {
        Self::password_fields(config, GrantType::Password)
    }

    /// Refresh grant, sent with the password grant's credentials.
    pub fn password_refresh(config: &TokenConfig, refresh_token: &SecureString) -> Self {
        let mut request = Self::password_fields(config, GrantType::RefreshToken);
        request.push("refresh_token", refresh_token.clone());
        request
    }

    /// Initial client-credentials grant.
    pub fn client_credentials(config: &TokenConfig) -> Self {
        let mut request = Self {
            grant_type: GrantType::ClientCredentials,
            fields: Vec::with_capacity(4),
        };
        request.push("client_id", config.client_id.as_str().into());
        request.push("client_secret", config.client_secret.clone());
        request.push("scope", config.scope.as_str().into());
        request.push("grant_type", GrantType::ClientCredentials.as_str().into());
        request
    }

    fn password_fields(config: &TokenConfig, grant_type: GrantType) -> Self {
        let mut request = Self {
            grant_type,
            fields: Vec::with_capacity(8),
        };
        request.push("resource", config.resource_id.as_str().into());
        request.push("client_id", config.client_id.as_str().into());
        request.push("client_secret", config.client_secret.clone());
        request.push("username", config.username.as_str().into());
        request.push("password", config.password.clone());
        request.push("scope", OPENID_SCOPE.into());
        request.push("grant_type", grant_type.as_str().into());
        request
    }

    fn push(&mut self, name: &'static str, value: SecureString) {
        self.fields.push((name, value));
    }

    /// The grant type of this request.
    pub fn grant_type(&self) -> GrantType {
        self.grant_type
    }

    /// The names of the form fields, in order.
    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|(name, _)| *name)
    }

    /// Encodes the fields as an `application/x-www-form-urlencoded` body.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Configuration`] if the fields cannot be encoded.
    pub fn encode(&self) -> Result<String, TokenError> {
        let pairs = self
            .fields
            .iter()
            .map(|(name, value)| (*name, value.as_str()))
            .collect::<Vec<_>>();

        serde_urlencoded::to_string(pairs)
            .map_err(|err| TokenError::configuration(format!("cannot encode grant request: {err}")))
    }
}

impl fmt::Debug for GrantRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrantRequest")
            .field("grant_type", &self.grant_type)
            .field("fields", &self.field_names().collect::<Vec<_>>())
            .finish()
    }
}
