//! Token acquisition with caching, renewal and bounded retries.

use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use http::StatusCode;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::store::now_epoch_seconds;
use crate::{
    GrantRequest, GrantStrategy, ReqwestTransport, TokenConfig, TokenError, TokenResponse,
    TokenStore, TokenTransport,
};

/// Produces a currently-valid access token, exchanging credentials when needed.
///
/// The acquirer owns the [`TokenStore`]. One attempt (validity check, exchange
/// and store update) runs under a lock scoped to the acquirer, so concurrent
/// callers never issue duplicate exchanges. Share it with an `Arc`.
#[derive(Debug)]
pub struct TokenAcquirer<T = ReqwestTransport> {
    config: TokenConfig,
    transport: T,
    store: Mutex<TokenStore>,
}

impl TokenAcquirer<ReqwestTransport> {
    /// Creates an acquirer talking to the endpoint with `reqwest`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Configuration`] if the HTTP client cannot be built.
    pub fn new(config: TokenConfig) -> Result<Self, TokenError> {
        let transport = ReqwestTransport::new(config.request_timeout())?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T> TokenAcquirer<T>
where
    T: TokenTransport + Sync,
{
    /// Creates an acquirer over a custom transport, with an empty store.
    pub fn with_transport(config: TokenConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            store: Mutex::new(TokenStore::new()),
        }
    }

    /// Replaces the initial store, e.g. to resume from previously issued tokens.
    #[must_use]
    pub fn with_store(mut self, store: TokenStore) -> Self {
        self.store = Mutex::new(store);
        self
    }

    /// The grant strategy used by this acquirer.
    pub fn strategy(&self) -> GrantStrategy {
        self.config.strategy()
    }

    /// Returns a consistent copy of the stored token state.
    pub async fn snapshot(&self) -> TokenStore {
        self.store.lock().await.clone()
    }

    /// Forgets the stored expiry, forcing the next call to exchange again.
    pub async fn invalidate(&self) {
        self.store.lock().await.reset();
    }

    /// Returns the cached token if valid, otherwise performs one exchange.
    ///
    /// On failure the stored expiry is reset before returning.
    ///
    /// # Errors
    ///
    /// Returns a [`TokenError`] if the configuration is incomplete, the
    /// endpoint cannot be reached, or the endpoint does not issue a token.
    pub async fn get_token(&self) -> Result<String, TokenError> {
        let mut store = self.store.lock().await;
        let now = now_epoch_seconds();

        if store.is_valid(now) {
            debug!(
                expires_in = store.expiry_epoch_seconds() - now,
                "using cached token"
            );
            return Ok(store.access_token().as_str().to_string());
        }

        match self.exchange(&mut store, now).await {
            Ok(token) => Ok(token),
            Err(err) => {
                store.reset();
                debug!(kind = %err.kind(), error = %err, "token exchange failed, expiry reset");
                Err(err)
            }
        }
    }

    /// Calls [`Self::get_token`] until it succeeds or the attempts are exhausted.
    ///
    /// Returns an empty string when every attempt failed.
    pub async fn get_token_with_retries(&self) -> String {
        self.try_get_token_with_retries()
            .await
            .unwrap_or_default()
    }

    /// Like [`Self::get_token_with_retries`], but returns the last error.
    ///
    /// Attempts are immediate, with no delay between them.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt when every attempt failed.
    pub async fn try_get_token_with_retries(&self) -> Result<String, TokenError> {
        let max_attempts = self.config.max_attempts();
        let backoff = ConstantBuilder::default()
            .with_delay(Duration::ZERO)
            .with_max_times(max_attempts - 1);

        let mut attempt = 0_usize;
        let result = (|| self.get_token())
            .retry(backoff)
            .notify(|err: &TokenError, _| {
                attempt += 1;
                warn!(attempt, max_attempts, kind = %err.kind(), error = %err, "token attempt failed, retrying");
            })
            .await;

        if let Err(err) = &result {
            error!(max_attempts, kind = %err.kind(), error = %err, "token generation failed on every attempt");
        }
        result
    }

    async fn exchange(&self, store: &mut TokenStore, now: i64) -> Result<String, TokenError> {
        self.config.validate()?;
        let endpoint = self.config.token_endpoint()?;

        let Some(request) = self.grant_request(store, now) else {
            return Ok(store.access_token().as_str().to_string());
        };
        debug!(?request, "selected grant");

        let response = self
            .transport
            .post_form(&endpoint, request.encode()?)
            .await?;
        if response.status != StatusCode::OK {
            return Err(TokenError::protocol(format!(
                "token generation failed with status code: {}",
                response.status
            )));
        }

        let token = TokenResponse::parse(&response.body)?;
        let expiry = token.expiry(now, self.config.strategy())?;
        let access_token = token.access_token().as_str().to_string();
        store.update(
            token.access_token().clone(),
            token.refresh_token().cloned().unwrap_or_default(),
            expiry,
        );

        info!(grant_type = %request.grant_type(), expiry, "token acquired");
        Ok(access_token)
    }

    /// Picks the grant for an invalid store, `None` if the cached token is still usable.
    fn grant_request(&self, store: &TokenStore, now: i64) -> Option<GrantRequest> {
        let initial = || match self.config.strategy() {
            GrantStrategy::Password => GrantRequest::password(&self.config),
            GrantStrategy::ClientCredentials => GrantRequest::client_credentials(&self.config),
        };

        if store.needs_initial_grant() {
            Some(initial())
        } else if !store.is_valid(now) {
            // client credentials never stores a refresh token, but re-issue anyway
            match self.config.strategy() {
                GrantStrategy::Password => Some(GrantRequest::password_refresh(
                    &self.config,
                    store.refresh_token(),
                )),
                GrantStrategy::ClientCredentials => Some(initial()),
            }
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    use url::Url;

    use super::*;
    use crate::TransportResponse;
    use crate::grant::GrantType;

    const TEMPLATE: &str = "https://login.example.com/{0}/oauth2/token";

    /// Replays scripted answers and records every request.
    #[derive(Debug, Default)]
    struct StubTransport {
        answers: StdMutex<VecDeque<Result<TransportResponse, TokenError>>>,
        requests: StdMutex<Vec<(Url, String)>>,
        calls: AtomicUsize,
        latency: Duration,
    }

    impl StubTransport {
        fn answering(answers: impl IntoIterator<Item = Result<TransportResponse, TokenError>>) -> Self {
            Self {
                answers: StdMutex::new(answers.into_iter().collect()),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn bodies(&self) -> Vec<String> {
            self.requests
                .lock()
                .expect("lock requests")
                .iter()
                .map(|(_, body)| body.clone())
                .collect()
        }
    }

    impl TokenTransport for StubTransport {
        async fn post_form(&self, url: &Url, body: String) -> Result<TransportResponse, TokenError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests
                .lock()
                .expect("lock requests")
                .push((url.clone(), body));
            let answer = self
                .answers
                .lock()
                .expect("lock answers")
                .pop_front()
                .unwrap_or_else(|| Err(TokenError::transport("no scripted answer")));
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            answer
        }
    }

    fn ok(body: &str) -> Result<TransportResponse, TokenError> {
        Ok(TransportResponse::new(StatusCode::OK, body))
    }

    fn token_body(access: &str, refresh: Option<&str>, expires_on: i64) -> Result<TransportResponse, TokenError> {
        let body = match refresh {
            Some(refresh) => format!(
                r#"{{"access_token":"{access}","refresh_token":"{refresh}","expires_on":"{expires_on}"}}"#
            ),
            None => format!(r#"{{"access_token":"{access}","expires_on":"{expires_on}"}}"#),
        };
        ok(&body)
    }

    fn password_config() -> TokenConfig {
        TokenConfig::password("contoso", TEMPLATE)
            .with_client_id("client-id")
            .with_client_secret("client-secret")
            .with_username("user@contoso.com")
            .with_password("hunter2")
            .with_resource_id("https://api.partnercenter.microsoft.com")
            .build()
    }

    fn client_credentials_config() -> TokenConfig {
        TokenConfig::client_credentials("contoso", TEMPLATE)
            .with_client_id("client-id")
            .with_client_secret("client-secret")
            .build()
    }

    fn seeded(access: &str, refresh: &str, expiry: i64) -> TokenStore {
        let mut store = TokenStore::new();
        store.update(access.into(), refresh.into(), expiry);
        store
    }

    #[tokio::test]
    async fn should_acquire_then_serve_from_cache() {
        let now = now_epoch_seconds();
        let acquirer = TokenAcquirer::with_transport(
            password_config(),
            StubTransport::answering([token_body("A1", Some("R1"), now + 3600)]),
        );

        let token = acquirer.get_token().await.expect("should get token");
        assert_eq!(token, "A1");
        assert!(acquirer.snapshot().await.is_valid(now_epoch_seconds()));

        let token = acquirer.get_token().await.expect("should get cached token");
        assert_eq!(token, "A1");
        assert_eq!(acquirer.transport.calls(), 1);

        let url = acquirer.transport.requests.lock().expect("lock")[0].0.clone();
        assert_eq!(url.as_str(), "https://login.example.com/contoso/oauth2/token");
        assert!(acquirer.transport.bodies()[0].ends_with("grant_type=password"));
    }

    #[tokio::test]
    async fn should_not_call_endpoint_when_token_is_valid() {
        let now = now_epoch_seconds();
        let acquirer = TokenAcquirer::with_transport(password_config(), StubTransport::default())
            .with_store(seeded("cached", "refresh", now + 3600));

        let token = acquirer.get_token().await.expect("should get token");

        assert_eq!(token, "cached");
        assert_eq!(acquirer.transport.calls(), 0);
    }

    #[tokio::test]
    async fn should_refresh_token_inside_skew_window() {
        let now = now_epoch_seconds();
        let acquirer = TokenAcquirer::with_transport(
            password_config(),
            StubTransport::answering([token_body("A2", Some("R2"), now + 3600)]),
        )
        .with_store(seeded("A1", "R1", now + 200));

        let token = acquirer.get_token().await.expect("should refresh");

        assert_eq!(token, "A2");
        let bodies = acquirer.transport.bodies();
        assert!(bodies[0].contains("grant_type=refresh_token&refresh_token=R1"));
        let store = acquirer.snapshot().await;
        assert_eq!(store.refresh_token().as_str(), "R2");
        assert_eq!(store.expiry_epoch_seconds(), now + 3600);
    }

    #[tokio::test]
    async fn should_reissue_client_credentials_when_stale() {
        let now = now_epoch_seconds();
        let acquirer = TokenAcquirer::with_transport(
            client_credentials_config(),
            StubTransport::answering([token_body("C2", None, now + 3600)]),
        )
        .with_store(seeded("C1", "", now + 200));

        let token = acquirer.get_token().await.expect("should reissue");

        assert_eq!(token, "C2");
        let body = &acquirer.transport.bodies()[0];
        assert!(body.ends_with("grant_type=client_credentials"));
        assert!(!body.contains("refresh_token"));
    }

    #[tokio::test]
    async fn should_reissue_client_credentials_without_expiry_on_every_call() {
        let acquirer = TokenAcquirer::with_transport(
            client_credentials_config(),
            StubTransport::answering([ok(r#"{"access_token":"C1"}"#), ok(r#"{"access_token":"C2"}"#)]),
        );

        assert_eq!(acquirer.get_token().await.ok().as_deref(), Some("C1"));
        assert_eq!(acquirer.get_token().await.ok().as_deref(), Some("C2"));
        assert_eq!(acquirer.transport.calls(), 2);
    }

    #[tokio::test]
    async fn should_reset_expiry_on_failed_exchange() {
        let now = now_epoch_seconds();
        let acquirer = TokenAcquirer::with_transport(
            password_config(),
            StubTransport::answering([Ok(TransportResponse::new(
                StatusCode::UNAUTHORIZED,
                r#"{"error":"invalid_grant"}"#,
            ))]),
        )
        .with_store(seeded("A1", "R1", now + 200));

        let err = acquirer.get_token().await.expect_err("should fail");

        assert!(matches!(err, TokenError::Protocol { .. }));
        assert!(err.to_string().contains("401"));
        let store = acquirer.snapshot().await;
        assert_eq!(store.expiry_epoch_seconds(), 0);
        assert_eq!(store.access_token().as_str(), "A1");
    }

    #[tokio::test]
    async fn should_fall_back_to_initial_grant_after_failure() {
        let now = now_epoch_seconds();
        let acquirer = TokenAcquirer::with_transport(
            password_config(),
            StubTransport::answering([
                Err(TokenError::transport("connection reset")),
                token_body("A2", Some("R2"), now + 3600),
            ]),
        )
        .with_store(seeded("A1", "R1", now + 200));

        assert!(acquirer.get_token().await.is_err());
        assert_eq!(acquirer.get_token().await.ok().as_deref(), Some("A2"));

        let bodies = acquirer.transport.bodies();
        assert!(bodies[0].contains("grant_type=refresh_token"));
        assert!(bodies[1].ends_with("grant_type=password"));
    }

    #[tokio::test]
    async fn should_reject_empty_access_token() {
        let now = now_epoch_seconds();
        let acquirer = TokenAcquirer::with_transport(
            password_config(),
            StubTransport::answering([token_body("", Some("R1"), now + 3600)]),
        );

        let err = acquirer.get_token().await.expect_err("should fail");

        assert!(matches!(err, TokenError::Protocol { .. }));
        assert_eq!(acquirer.snapshot().await.expiry_epoch_seconds(), 0);
    }

    #[tokio::test]
    async fn should_fail_on_missing_credentials_without_network() {
        let config = TokenConfig::password("contoso", TEMPLATE)
            .with_client_id("client-id")
            .build();
        let acquirer = TokenAcquirer::with_transport(config, StubTransport::default());

        let err = acquirer.get_token().await.expect_err("should fail");

        assert!(matches!(err, TokenError::Configuration { .. }));
        assert_eq!(acquirer.transport.calls(), 0);
    }

    #[tokio::test]
    async fn should_stop_after_three_failed_attempts() {
        let acquirer = TokenAcquirer::with_transport(
            client_credentials_config(),
            StubTransport::answering([
                Err(TokenError::transport("down")),
                Err(TokenError::transport("down")),
                Err(TokenError::transport("down")),
                token_body("never", None, now_epoch_seconds() + 3600),
            ]),
        );

        let token = acquirer.get_token_with_retries().await;

        assert_eq!(token, "");
        assert_eq!(acquirer.transport.calls(), 3);
        assert_eq!(acquirer.snapshot().await.expiry_epoch_seconds(), 0);
    }

    #[tokio::test]
    async fn should_return_token_on_third_attempt() {
        let now = now_epoch_seconds();
        let acquirer = TokenAcquirer::with_transport(
            password_config(),
            StubTransport::answering([
                Ok(TransportResponse::new(StatusCode::SERVICE_UNAVAILABLE, "")),
                ok("not json"),
                token_body("tok1", Some("R1"), now + 3600),
            ]),
        );

        let token = acquirer.get_token_with_retries().await;

        assert_eq!(token, "tok1");
        assert_eq!(acquirer.transport.calls(), 3);
    }

    /// Counts retry warnings and exhaustion errors emitted by the retry wrapper.
    #[derive(Debug, Clone, Default)]
    struct RetryEvents {
        retries: Arc<AtomicUsize>,
        exhausted: Arc<AtomicUsize>,
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for RetryEvents {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            match *event.metadata().level() {
                tracing::Level::WARN => self.retries.fetch_add(1, Ordering::SeqCst),
                tracing::Level::ERROR => self.exhausted.fetch_add(1, Ordering::SeqCst),
                _ => 0,
            };
        }
    }

    #[tokio::test]
    async fn should_burn_attempts_on_configuration_error() {
        use tracing_subscriber::layer::SubscriberExt;

        let events = RetryEvents::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(events.clone()));

        let config = TokenConfig::client_credentials("contoso", TEMPLATE)
            .with_max_attempts(4)
            .build();
        let acquirer = TokenAcquirer::with_transport(config, StubTransport::default());

        let err = acquirer
            .try_get_token_with_retries()
            .await
            .expect_err("should fail");

        assert!(matches!(err, TokenError::Configuration { .. }));
        assert_eq!(acquirer.transport.calls(), 0);
        // one warning per retried attempt, then one error for the last attempt
        assert_eq!(events.retries.load(Ordering::SeqCst), 3);
        assert_eq!(events.exhausted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn should_honor_configured_max_attempts() {
        let config = TokenConfig::client_credentials("contoso", TEMPLATE)
            .with_client_id("client-id")
            .with_client_secret("client-secret")
            .with_max_attempts(5)
            .build();
        let acquirer = TokenAcquirer::with_transport(config, StubTransport::default());

        assert_eq!(acquirer.get_token_with_retries().await, "");
        assert_eq!(acquirer.transport.calls(), 5);
    }

    #[tokio::test]
    async fn should_exchange_once_for_concurrent_callers() {
        let now = now_epoch_seconds();
        let transport = StubTransport {
            latency: Duration::from_millis(50),
            ..StubTransport::answering([token_body("A1", Some("R1"), now + 3600)])
        };
        let acquirer = Arc::new(TokenAcquirer::with_transport(password_config(), transport));

        let tasks = (0..8)
            .map(|_| {
                let acquirer = Arc::clone(&acquirer);
                tokio::spawn(async move { acquirer.get_token().await })
            })
            .collect::<Vec<_>>();

        for task in tasks {
            let token = task.await.expect("task should complete");
            assert_eq!(token.ok().as_deref(), Some("A1"));
        }
        assert_eq!(acquirer.transport.calls(), 1);
    }

    #[tokio::test]
    async fn should_force_exchange_after_invalidate() {
        let now = now_epoch_seconds();
        let acquirer = TokenAcquirer::with_transport(
            client_credentials_config(),
            StubTransport::answering([token_body("C2", None, now + 3600)]),
        )
        .with_store(seeded("C1", "", now + 3600));

        assert_eq!(acquirer.get_token().await.ok().as_deref(), Some("C1"));
        acquirer.invalidate().await;
        assert_eq!(acquirer.get_token().await.ok().as_deref(), Some("C2"));
        assert_eq!(acquirer.transport.calls(), 1);
    }

    #[test]
    fn should_select_grant_from_store_state() {
        let now = 1_700_000_000;
        let acquirer = TokenAcquirer::with_transport(password_config(), StubTransport::default());

        let grant = |store: &TokenStore| {
            acquirer
                .grant_request(store, now)
                .map(|request| request.grant_type())
        };

        assert_eq!(grant(&TokenStore::new()), Some(GrantType::Password));
        assert_eq!(grant(&seeded("A", "", now + 200)), Some(GrantType::Password));
        assert_eq!(
            grant(&seeded("A", "R", now + 200)),
            Some(GrantType::RefreshToken)
        );
        assert_eq!(grant(&seeded("A", "R", now + 3600)), None);
    }
}
