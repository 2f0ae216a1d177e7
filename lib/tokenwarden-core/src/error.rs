//! Token acquisition error types.

use std::fmt;

/// Errors that can occur while acquiring a token.
///
/// Every variant is caught at the single-attempt boundary by the retry
/// wrapper; callers of [`TokenAcquirer::get_token`](crate::TokenAcquirer::get_token)
/// see them directly.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Error, derive_more::Display)]
pub enum TokenError {
    /// Required credential fields are missing, or the endpoint template is unusable.
    #[display("Token configuration error: {reason}")]
    Configuration {
        /// Description of the configuration issue.
        reason: String,
    },

    /// The token endpoint could not be reached.
    #[display("Network error during token request: {reason}")]
    Transport {
        /// Description of the network error.
        reason: String,
    },

    /// The token endpoint answered with something other than a usable token.
    #[display("Invalid token endpoint response: {reason}")]
    Protocol {
        /// Description of what was invalid.
        reason: String,
    },
}

impl TokenError {
    /// Returns the kind of this error, for structured logging.
    pub fn kind(&self) -> TokenErrorKind {
        match self {
            Self::Configuration { .. } => TokenErrorKind::Configuration,
            Self::Transport { .. } => TokenErrorKind::Transport,
            Self::Protocol { .. } => TokenErrorKind::Protocol,
        }
    }

    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }
}

/// Classification of a [`TokenError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenErrorKind {
    /// See [`TokenError::Configuration`].
    Configuration,
    /// See [`TokenError::Transport`].
    Transport,
    /// See [`TokenError::Protocol`].
    Protocol,
}

impl fmt::Display for TokenErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::Transport => "transport",
            Self::Protocol => "protocol",
        };
        f.write_str(name)
    }
}
