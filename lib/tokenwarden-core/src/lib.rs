//! # Tokenwarden Core
//!
//! Acquire, cache and renew the OAuth2 bearer token used to authenticate
//! outbound API calls.
//!
//! The crate has two cooperating pieces:
//! - **[`TokenStore`]** - the current access token, optional refresh token and
//!   absolute expiry, with skew-aware validity
//! - **[`TokenAcquirer`]** - consults the store, exchanges credentials with the
//!   token endpoint when the token is missing or about to expire, and retries a
//!   bounded number of times
//!
//! Two grant strategies are supported, selected once per acquirer by
//! [`GrantStrategy`]: the resource-owner password grant (renewed with a refresh
//! grant) and the client-credentials grant (re-issued when stale).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tokenwarden_core::{TokenAcquirer, TokenConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TokenConfig::client_credentials(
//!     "contoso.onmicrosoft.com",
//!     "https://login.microsoftonline.com/{0}/oauth2/v2.0/token",
//! )
//! .with_client_id("client-id")
//! .with_client_secret("client-secret")
//! .build();
//!
//! let acquirer = TokenAcquirer::new(config)?;
//!
//! // Empty string when every attempt failed
//! let token = acquirer.get_token_with_retries().await;
//! if token.is_empty() {
//!     return Err("no token".into());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Validity
//!
//! A token is valid while `now <= expiry - 300`: tokens within five minutes
//! of their expiry are renewed proactively. An expiry of `0` means "unknown"
//! and is never valid. Every failed exchange resets the expiry to `0`.
//!
//! ## Custom transport
//!
//! The HTTP exchange goes through the [`TokenTransport`] trait.
//! [`ReqwestTransport`] is the default; any implementation can be given to
//! [`TokenAcquirer::with_transport`].
//!
//! ## Features
//!
//! - `yaml`: [`TokenConfig::from_yaml`] using `serde-saphyr`

mod acquirer;
pub use self::acquirer::TokenAcquirer;

mod config;
pub use self::config::{
    DEFAULT_CLIENT_CREDENTIALS_SCOPE, DEFAULT_MAX_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT,
    GrantStrategy, TokenConfig, TokenConfigBuilder,
};

mod error;
pub use self::error::{TokenError, TokenErrorKind};

pub mod grant;
pub use self::grant::GrantRequest;

mod response;
pub use self::response::TokenResponse;

mod secure;
pub use self::secure::SecureString;

pub mod store;
pub use self::store::{TokenStatus, TokenStore};

mod transport;
pub use self::transport::{ReqwestTransport, TokenTransport, TransportResponse};
