//! Token state container with expiry-aware validity.

use crate::SecureString;

/// Safety margin before the actual expiry at which a token is treated as invalid.
pub const RENEWAL_SKEW_SECONDS: i64 = 300;

/// Sentinel expiry meaning "unknown or never set".
pub const UNKNOWN_EXPIRY: i64 = 0;

/// Returns the current time as epoch seconds.
pub fn now_epoch_seconds() -> i64 {
    jiff::Timestamp::now().as_second()
}

/// Lifecycle of the stored token, as seen at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// No expiry is known: nothing was issued yet, or the last exchange failed.
    Unissued,
    /// The token can be used without renewal.
    Valid,
    /// The token is within the renewal skew of its expiry, or past it.
    Expiring,
}

/// Holds the current access token, the optional refresh token and the expiry.
///
/// An expiry of [`UNKNOWN_EXPIRY`] always makes the store invalid, whatever the
/// token contents. All three fields are replaced together by [`TokenStore::update`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TokenStore {
    access_token: SecureString,
    refresh_token: SecureString,
    expiry_epoch_seconds: i64,
}

impl TokenStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the stored token can be used at `now` without renewal.
    pub fn is_valid(&self, now: i64) -> bool {
        self.expiry_epoch_seconds != UNKNOWN_EXPIRY
            && now <= self.expiry_epoch_seconds.saturating_sub(RENEWAL_SKEW_SECONDS)
    }

    /// Classifies the stored token at `now`.
    pub fn status(&self, now: i64) -> TokenStatus {
        if self.expiry_epoch_seconds == UNKNOWN_EXPIRY {
            TokenStatus::Unissued
        } else if self.is_valid(now) {
            TokenStatus::Valid
        } else {
            TokenStatus::Expiring
        }
    }

    /// Forgets the expiry so the next call does not trust the stored token.
    ///
    /// Token values are kept; they are not used for authorization until the
    /// next successful exchange.
    pub fn reset(&mut self) {
        self.expiry_epoch_seconds = UNKNOWN_EXPIRY;
    }

    /// Replaces the access token, refresh token and expiry together.
    pub fn update(
        &mut self,
        access_token: SecureString,
        refresh_token: SecureString,
        expiry_epoch_seconds: i64,
    ) {
        *self = Self {
            access_token,
            refresh_token,
            expiry_epoch_seconds,
        };
    }

    /// Returns `true` when nothing usable for a refresh grant is stored.
    pub fn needs_initial_grant(&self) -> bool {
        self.expiry_epoch_seconds == UNKNOWN_EXPIRY
            || self.access_token.is_empty()
            || self.refresh_token.is_empty()
    }

    /// The stored access token; empty if none was ever issued.
    pub fn access_token(&self) -> &SecureString {
        &self.access_token
    }

    /// The stored refresh token; empty if the flow does not provide one.
    pub fn refresh_token(&self) -> &SecureString {
        &self.refresh_token
    }

    /// The stored expiry as epoch seconds, [`UNKNOWN_EXPIRY`] if unknown.
    pub fn expiry_epoch_seconds(&self) -> i64 {
        self.expiry_epoch_seconds
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("access_token", &self.access_token)
            .field("refresh_token", &self.refresh_token)
            .field("expiry_epoch_seconds", &self.expiry_epoch_seconds)
            .finish()
    }
}
