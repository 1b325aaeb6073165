//! Feed token registry.
//!
//! Maintains the 1:1 mapping between users and their feed tokens. A token
//! is issued when the user is registered and can be rotated at any time;
//! rotation invalidates the previous token immediately, in the same
//! critical section that installs the new one.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::info;

use unifeed_core::{FeedToken, UserId};

#[derive(Debug, Default)]
struct TokenMaps {
    by_token: HashMap<String, UserId>,
    by_user: HashMap<UserId, FeedToken>,
}

/// Registry of feed tokens, 1:1 with users.
#[derive(Debug, Default)]
pub struct FeedTokenRegistry {
    inner: RwLock<TokenMaps>,
}

impl FeedTokenRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the user's token, issuing one on first call.
    pub fn issue(&self, user: UserId) -> FeedToken {
        let mut maps = self.write();
        if let Some(existing) = maps.by_user.get(&user) {
            return existing.clone();
        }
        let token = FeedToken::generate();
        maps.by_token.insert(token.as_str().to_string(), user);
        maps.by_user.insert(user, token.clone());
        info!(user_id = %user, "issued feed token");
        token
    }

    /// Rotates the user's token. The old token stops resolving before this
    /// method returns.
    pub fn rotate(&self, user: UserId) -> FeedToken {
        let mut maps = self.write();
        if let Some(old) = maps.by_user.remove(&user) {
            maps.by_token.remove(old.as_str());
        }
        let token = FeedToken::generate();
        maps.by_token.insert(token.as_str().to_string(), user);
        maps.by_user.insert(user, token.clone());
        info!(user_id = %user, "rotated feed token");
        token
    }

    /// Resolves a presented token to its user, if it is current.
    pub fn resolve(&self, token: &str) -> Option<UserId> {
        self.read().by_token.get(token).copied()
    }

    /// Drops a user's token (on user removal).
    pub fn revoke(&self, user: UserId) {
        let mut maps = self.write();
        if let Some(old) = maps.by_user.remove(&user) {
            maps.by_token.remove(old.as_str());
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, TokenMaps> {
        self.inner.read().expect("token lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, TokenMaps> {
        self.inner.write().expect("token lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_is_idempotent() {
        let registry = FeedTokenRegistry::new();
        let first = registry.issue(UserId(1));
        let second = registry.issue(UserId(1));
        assert_eq!(first, second);
        assert_eq!(registry.resolve(first.as_str()), Some(UserId(1)));
    }

    #[test]
    fn tokens_map_to_exactly_one_user() {
        let registry = FeedTokenRegistry::new();
        let token1 = registry.issue(UserId(1));
        let token2 = registry.issue(UserId(2));

        assert_ne!(token1, token2);
        assert_eq!(registry.resolve(token1.as_str()), Some(UserId(1)));
        assert_eq!(registry.resolve(token2.as_str()), Some(UserId(2)));
        assert_eq!(registry.resolve("no-such-token"), None);
    }

    #[test]
    fn rotation_invalidates_old_token_immediately() {
        let registry = FeedTokenRegistry::new();
        let old = registry.issue(UserId(1));

        let new = registry.rotate(UserId(1));
        assert_ne!(old, new);
        assert_eq!(registry.resolve(old.as_str()), None);
        assert_eq!(registry.resolve(new.as_str()), Some(UserId(1)));
    }

    #[test]
    fn revoke_removes_both_directions() {
        let registry = FeedTokenRegistry::new();
        let token = registry.issue(UserId(1));
        registry.revoke(UserId(1));
        assert_eq!(registry.resolve(token.as_str()), None);

        // A fresh issue hands out a new token.
        let reissued = registry.issue(UserId(1));
        assert_ne!(token, reissued);
    }
}
