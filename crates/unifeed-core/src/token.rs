//! Feed access tokens.
//!
//! A [`FeedToken`] is the opaque capability that authorizes reading one
//! user's published feed. It is the only authentication the feed endpoint
//! has, so it must be unguessable and rotatable.

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of alphanumeric characters in a generated token.
///
/// 48 characters of [A-Za-z0-9] is ~285 bits, far beyond brute force.
const TOKEN_LEN: usize = 48;

/// Opaque, unguessable feed access token bound 1:1 to a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedToken(String);

impl FeedToken {
    /// Generates a fresh random token.
    pub fn generate() -> Self {
        let token: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        Self(token)
    }

    /// Wraps an existing token string (e.g. loaded from persistence).
    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The token value, for embedding in a feed URL.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Display redacts the value so tokens never end up in logs verbatim.
impl fmt::Display for FeedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible = &self.0[..self.0.len().min(4)];
        write!(f, "{visible}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_unique() {
        let a = FeedToken::generate();
        let b = FeedToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), TOKEN_LEN);
        assert!(a.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn display_redacts() {
        let token = FeedToken::from_string("abcdefghijklmnop");
        let shown = token.to_string();
        assert!(shown.starts_with("abcd"));
        assert!(!shown.contains("efgh"));
    }

    #[test]
    fn serde_roundtrip() {
        let token = FeedToken::generate();
        let json = serde_json::to_string(&token).unwrap();
        let parsed: FeedToken = serde_json::from_str(&json).unwrap();
        assert_eq!(token, parsed);
    }
}
