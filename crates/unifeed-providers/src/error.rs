//! Error types at the adapter/orchestrator boundary.
//!
//! Every failure an adapter or the credential provider can produce is
//! classified into one [`AdapterErrorKind`]. The orchestrator decides
//! retry-with-backoff versus terminal-until-reauth purely from the kind;
//! nothing else about the error participates in control flow.

use std::fmt;
use thiserror::Error;

/// Classification of an adapter-boundary error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterErrorKind {
    /// Connection failure, timeout, DNS error, 5xx. Retried with backoff.
    TransientNetwork,
    /// Too many requests. Retried with backoff.
    RateLimited,
    /// Access token expired and could not be refreshed. Terminal until
    /// the user re-authorizes.
    AuthExpired,
    /// Credentials rejected or grant revoked. Terminal until the user
    /// re-authorizes.
    AuthInvalid,
    /// Source data unparsable. Retried with backoff, since a temporarily
    /// bad document may resolve on the next fetch.
    MalformedSource,
    /// Source configuration is wrong (bad URL, unknown calendar id).
    /// Terminal until the user fixes the configuration.
    ConfigInvalid,
}

impl AdapterErrorKind {
    /// Returns `true` if the orchestrator should retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork | Self::RateLimited | Self::MalformedSource
        )
    }

    /// Returns `true` if this failure means the source needs the user to
    /// re-authorize before any further attempt can succeed.
    pub fn needs_reauth(&self) -> bool {
        matches!(self, Self::AuthExpired | Self::AuthInvalid)
    }

    /// Stable snake_case name for logs and status displays.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient_network",
            Self::RateLimited => "rate_limited",
            Self::AuthExpired => "auth_expired",
            Self::AuthInvalid => "auth_invalid",
            Self::MalformedSource => "malformed_source",
            Self::ConfigInvalid => "config_invalid",
        }
    }
}

impl fmt::Display for AdapterErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error from a source adapter or the credential provider.
#[derive(Debug, Error)]
pub struct AdapterError {
    /// The classification of this error.
    kind: AdapterErrorKind,
    /// A human-readable message.
    message: String,
    /// The source name this error relates to, when known.
    source_name: Option<String>,
    /// The underlying cause, if any.
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AdapterError {
    /// Creates a new error with the given kind and message.
    pub fn new(kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source_name: None,
            source: None,
        }
    }

    /// Creates a transient network error.
    pub fn transient_network(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::TransientNetwork, message)
    }

    /// Creates a rate limit error.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::RateLimited, message)
    }

    /// Creates an expired-auth error.
    pub fn auth_expired(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::AuthExpired, message)
    }

    /// Creates an invalid-auth error.
    pub fn auth_invalid(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::AuthInvalid, message)
    }

    /// Creates a malformed-source error.
    pub fn malformed_source(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::MalformedSource, message)
    }

    /// Creates a configuration error.
    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::ConfigInvalid, message)
    }

    /// Sets the source name for this error.
    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }

    /// Sets the underlying cause.
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(cause));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> AdapterErrorKind {
        self.kind
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` if the orchestrator should retry with backoff.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns `true` if the source must transition to needs-reauth.
    pub fn needs_reauth(&self) -> bool {
        self.kind.needs_reauth()
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref name) = self.source_name {
            write!(f, "[{}] ", name)?;
        }
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A specialized `Result` for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_classification() {
        assert!(AdapterErrorKind::TransientNetwork.is_retryable());
        assert!(AdapterErrorKind::RateLimited.is_retryable());
        assert!(AdapterErrorKind::MalformedSource.is_retryable());
        assert!(!AdapterErrorKind::AuthExpired.is_retryable());
        assert!(!AdapterErrorKind::ConfigInvalid.is_retryable());

        assert!(AdapterErrorKind::AuthExpired.needs_reauth());
        assert!(AdapterErrorKind::AuthInvalid.needs_reauth());
        assert!(!AdapterErrorKind::TransientNetwork.needs_reauth());
        assert!(!AdapterErrorKind::ConfigInvalid.needs_reauth());
    }

    #[test]
    fn error_display() {
        let err = AdapterError::rate_limited("too many requests").with_source_name("Work");
        let shown = err.to_string();
        assert!(shown.contains("[Work]"));
        assert!(shown.contains("rate_limited"));
        assert!(shown.contains("too many requests"));
    }

    #[test]
    fn error_with_cause() {
        use std::error::Error;
        let io_err = std::io::Error::other("connection reset");
        let err = AdapterError::transient_network("fetch failed").with_cause(io_err);
        assert!(err.source().is_some());
        assert_eq!(err.kind(), AdapterErrorKind::TransientNetwork);
    }
}
