//! HTTP transport used to reach the token endpoint.

use std::future::Future;
use std::time::Duration;

use http::StatusCode;
use http::header::CONTENT_TYPE;
use reqwest::redirect;
use tracing::debug;
use url::Url;

use crate::TokenError;

const FORM_URL_ENCODED: &str = "application/x-www-form-urlencoded";

/// Status and body of a token endpoint answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// Raw response body.
    pub body: String,
}

impl TransportResponse {
    /// Creates a response.
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Sends a form-encoded POST request to the token endpoint.
///
/// Implementations only report connection-level failures as errors; any HTTP
/// answer, whatever its status, is returned as a [`TransportResponse`].
pub trait TokenTransport {
    /// Posts `body` to `url` with `Content-Type: application/x-www-form-urlencoded`.
    fn post_form(
        &self,
        url: &Url,
        body: String,
    ) -> impl Future<Output = Result<TransportResponse, TokenError>> + Send;
}

/// [`TokenTransport`] backed by a `reqwest` client.
///
/// Redirects are not followed, and every request is bounded by a timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Configuration`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, TokenError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|err| TokenError::configuration(format!("cannot build HTTP client: {err}")))?;

        Ok(Self { client })
    }

    /// Wraps an existing `reqwest` client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl TokenTransport for ReqwestTransport {
    async fn post_form(&self, url: &Url, body: String) -> Result<TransportResponse, TokenError> {
        debug!(%url, "posting token request");

        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, FORM_URL_ENCODED)
            .body(body)
            .send()
            .await
            .map_err(|err| TokenError::transport(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TokenError::transport(format!("cannot read response body: {err}")))?;

        Ok(TransportResponse { status, body })
    }
}
