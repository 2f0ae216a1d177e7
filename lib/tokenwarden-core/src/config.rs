//! Credential configuration and builder.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::{SecureString, TokenError};

/// Scope requested by the client-credentials grant when none is configured.
pub const DEFAULT_CLIENT_CREDENTIALS_SCOPE: &str =
    "https://api.partnercenter.microsoft.com/.default";

/// Default timeout applied to each token endpoint request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of exchange attempts made by the retry wrapper.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// OAuth2 grant strategy used to obtain tokens.
///
/// The strategy is fixed for the lifetime of an acquirer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStrategy {
    /// Resource-owner password grant, renewed with the refresh-token grant.
    Password,
    /// Client-credentials grant, always re-issued when stale.
    #[default]
    ClientCredentials,
}

impl GrantStrategy {
    /// Returns the strategy name as written in configuration files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::ClientCredentials => "client_credentials",
        }
    }
}

impl fmt::Display for GrantStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GrantStrategy {
    type Err = TokenError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "password" => Ok(Self::Password),
            "client_credentials" | "client-credentials" => Ok(Self::ClientCredentials),
            other => Err(TokenError::configuration(format!(
                "unknown grant strategy '{other}', expected 'password' or 'client_credentials'"
            ))),
        }
    }
}

/// Resolved credential values for the token endpoint.
///
/// Field names follow the `AdTokenConfig` configuration section. Missing keys
/// deserialize as empty values so that [`TokenConfig::validate`] reports them;
/// unknown keys and mistyped values are rejected when parsing.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default, deny_unknown_fields)]
pub struct TokenConfig {
    pub(crate) tenant_id: String,
    #[serde(rename = "TokenGenerateUrl")]
    pub(crate) token_url_template: String,
    #[serde(rename = "WebAppClientId")]
    pub(crate) client_id: String,
    #[serde(rename = "WebAppClientSecret")]
    pub(crate) client_secret: SecureString,
    pub(crate) username: String,
    pub(crate) password: SecureString,
    pub(crate) resource_id: String,
    pub(crate) scope: String,
    pub(crate) strategy: GrantStrategy,
    #[serde(rename = "RequestTimeoutSecs", deserialize_with = "deserialize_secs")]
    pub(crate) request_timeout: Duration,
    pub(crate) max_attempts: usize,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            token_url_template: String::new(),
            client_id: String::new(),
            client_secret: SecureString::default(),
            username: String::new(),
            password: SecureString::default(),
            resource_id: String::new(),
            scope: DEFAULT_CLIENT_CREDENTIALS_SCOPE.to_string(),
            strategy: GrantStrategy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

fn deserialize_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

/// Name of the configuration section holding the credentials.
const SECTION: &str = "AdTokenConfig";

impl TokenConfig {
    /// Creates a builder for the resource-owner password strategy.
    pub fn password(
        tenant_id: impl Into<String>,
        token_url_template: impl Into<String>,
    ) -> TokenConfigBuilder {
        TokenConfigBuilder::new(GrantStrategy::Password, tenant_id, token_url_template)
    }

    /// Creates a builder for the client-credentials strategy.
    pub fn client_credentials(
        tenant_id: impl Into<String>,
        token_url_template: impl Into<String>,
    ) -> TokenConfigBuilder {
        TokenConfigBuilder::new(
            GrantStrategy::ClientCredentials,
            tenant_id,
            token_url_template,
        )
    }

    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Configuration`] if the document is not valid JSON
    /// or a field has the wrong type.
    pub fn from_json(json: &str) -> Result<Self, TokenError> {
        let document = serde_json::from_str(json)
            .map_err(|err| TokenError::configuration(format!("invalid JSON configuration: {err}")))?;
        Self::from_document(document)
    }

    /// Parses a YAML configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Configuration`] if the document is not valid YAML
    /// or a field has the wrong type.
    #[cfg(feature = "yaml")]
    pub fn from_yaml(yaml: &str) -> Result<Self, TokenError> {
        let document = serde_saphyr::from_str(yaml)
            .map_err(|err| TokenError::configuration(format!("invalid YAML configuration: {err}")))?;
        Self::from_document(document)
    }

    /// Reads the `AdTokenConfig` section if the document has one, the whole document otherwise.
    fn from_document(document: serde_json::Value) -> Result<Self, TokenError> {
        let (value, section) = match document {
            serde_json::Value::Object(mut map) => match map.remove(SECTION) {
                Some(section) => (section, Some(SECTION)),
                None => (serde_json::Value::Object(map), None),
            },
            other => (other, None),
        };

        serde_path_to_error::deserialize(value).map_err(|err| {
            let path = match section {
                Some(section) => format!("{section}.{}", err.path()),
                None => err.path().to_string(),
            };
            TokenError::configuration(format!(
                "invalid configuration at '{path}': {}",
                err.inner()
            ))
        })
    }

    /// The grant strategy of this configuration.
    pub fn strategy(&self) -> GrantStrategy {
        self.strategy
    }

    /// Returns a copy of this configuration using another grant strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: GrantStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Timeout applied to each token endpoint request.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Number of exchange attempts made by the retry wrapper (at least one).
    pub fn max_attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Builds the token endpoint by substituting the tenant into the URL template.
    ///
    /// Both the positional `{0}` and the named `{tenant}` placeholders are replaced.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Configuration`] if the result is not a valid URL.
    pub fn token_endpoint(&self) -> Result<Url, TokenError> {
        let url = self
            .token_url_template
            .replace("{0}", &self.tenant_id)
            .replace("{tenant}", &self.tenant_id);

        Url::parse(&url).map_err(|err| {
            TokenError::configuration(format!("invalid token endpoint URL '{url}': {err}"))
        })
    }

    /// Checks that the credentials required by the selected strategy are present.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Configuration`] naming every missing field.
    pub fn validate(&self) -> Result<(), TokenError> {
        let mut missing = Vec::new();
        if self.client_id.is_empty() {
            missing.push("WebAppClientId");
        }
        if self.client_secret.is_empty() {
            missing.push("WebAppClientSecret");
        }
        if self.strategy == GrantStrategy::Password {
            if self.username.is_empty() {
                missing.push("Username");
            }
            if self.password.is_empty() {
                missing.push("Password");
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(TokenError::configuration(format!(
                "missing required values for the {} strategy: {}",
                self.strategy,
                missing.join(", ")
            )))
        }
    }
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("tenant_id", &self.tenant_id)
            .field("token_url_template", &self.token_url_template)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("username", &self.username)
            .field("password", &self.password)
            .field("resource_id", &self.resource_id)
            .field("scope", &self.scope)
            .field("strategy", &self.strategy)
            .field("request_timeout", &self.request_timeout)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Builder for [`TokenConfig`].
///
/// Credentials are not checked here: a missing value is reported by every
/// token attempt, as a configuration error.
#[derive(Debug, Clone)]
pub struct TokenConfigBuilder {
    config: TokenConfig,
}

impl TokenConfigBuilder {
    /// Creates a new builder with the strategy and endpoint location.
    pub fn new(
        strategy: GrantStrategy,
        tenant_id: impl Into<String>,
        token_url_template: impl Into<String>,
    ) -> Self {
        Self {
            config: TokenConfig {
                tenant_id: tenant_id.into(),
                token_url_template: token_url_template.into(),
                strategy,
                ..TokenConfig::default()
            },
        }
    }

    /// Sets the client (application) id.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    /// Sets the client secret.
    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<SecureString>) -> Self {
        self.config.client_secret = secret.into();
        self
    }

    /// Sets the resource owner username (password strategy).
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.config.username = username.into();
        self
    }

    /// Sets the resource owner password (password strategy).
    #[must_use]
    pub fn with_password(mut self, password: impl Into<SecureString>) -> Self {
        self.config.password = password.into();
        self
    }

    /// Sets the resource id sent by the password strategy.
    #[must_use]
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.config.resource_id = resource_id.into();
        self
    }

    /// Sets the scope requested by the client-credentials strategy.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.config.scope = scope.into();
        self
    }

    /// Sets the timeout applied to each token endpoint request.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the number of exchange attempts made by the retry wrapper.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> TokenConfig {
        self.config
    }
}
