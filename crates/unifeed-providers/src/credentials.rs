//! Credential resolution with single-flight OAuth refresh.
//!
//! The [`CredentialProvider`] hands adapters ready-to-use credentials. The
//! decrypted secrets are installed by the embedding service (encrypted
//! storage is an external responsibility); this module only keeps them in
//! memory for the lifetime of the process.
//!
//! For OAuth sources it returns a currently-valid access token, refreshing
//! through the injected [`TokenRefresher`] when the token is expired or
//! inside the expiry skew margin. Refreshes are single-flight per source:
//! the per-source mutex is held across the refresh call, so concurrent
//! resolvers wait for the in-flight refresh and then read the fresh grant
//! instead of racing their own refresh against it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use unifeed_core::{CalendarSource, SourceId, SourceKind};

use crate::adapter::BoxFuture;
use crate::error::{AdapterError, AdapterResult};

/// Default margin before actual expiry at which a token counts as expired.
pub const DEFAULT_EXPIRY_SKEW: Duration = Duration::from_secs(120);

/// Ready-to-use credentials for one fetch call.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// OAuth bearer token.
    Bearer(String),
    /// Username/password pair (CalDAV Basic auth).
    Password {
        /// Account username.
        username: String,
        /// Decrypted account password.
        password: String,
    },
    /// No credentials required (public ICS feeds).
    None,
}

// Debug redacts secret material so credentials never leak into logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer(_) => write!(f, "Credentials::Bearer(…)"),
            Self::Password { username, .. } => {
                write!(f, "Credentials::Password {{ username: {username:?}, password: … }}")
            }
            Self::None => write!(f, "Credentials::None"),
        }
    }
}

/// A stored OAuth grant for one source.
#[derive(Debug, Clone)]
pub struct OauthGrant {
    /// Current access token.
    pub access_token: String,
    /// Refresh token, if the provider issued one.
    pub refresh_token: Option<String>,
    /// When the access token expires. `None` means it does not expire.
    pub expires_at: Option<DateTime<Utc>>,
}

impl OauthGrant {
    /// Creates a grant from token-endpoint response data.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: Option<i64>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: expires_in_secs.map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
        }
    }

    /// Returns `true` if the access token is expired or within `skew` of
    /// expiring.
    pub fn is_expired(&self, skew: Duration) -> bool {
        match self.expires_at {
            Some(at) => {
                let skew = chrono::Duration::from_std(skew).unwrap_or_else(|_| chrono::Duration::zero());
                Utc::now() + skew >= at
            }
            None => false,
        }
    }
}

/// Result of one refresh call against the token endpoint.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    /// The new access token.
    pub access_token: String,
    /// A rotated refresh token, when the provider returns one.
    pub refresh_token: Option<String>,
    /// Lifetime of the new access token in seconds.
    pub expires_in: Option<i64>,
}

/// Performs the actual token refresh call.
///
/// Injected so the engine can be driven entirely offline in tests.
pub trait TokenRefresher: Send + Sync {
    /// Exchanges a refresh token for a new access token.
    fn refresh(&self, refresh_token: &str) -> BoxFuture<'_, AdapterResult<RefreshedToken>>;
}

/// Per-source secret material.
#[derive(Debug)]
enum SourceSecrets {
    Oauth(OauthGrant),
    Password { username: String, password: String },
}

/// Resolves per-source credentials, refreshing OAuth grants on demand.
pub struct CredentialProvider {
    refresher: Arc<dyn TokenRefresher>,
    skew: Duration,
    // Outer lock only guards the map shape; the per-source mutex is what
    // serializes refreshes and is held across await points.
    slots: StdMutex<HashMap<SourceId, Arc<Mutex<SourceSecrets>>>>,
}

impl CredentialProvider {
    /// Creates a provider with the default expiry skew.
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self::with_skew(refresher, DEFAULT_EXPIRY_SKEW)
    }

    /// Creates a provider with an explicit expiry skew margin.
    pub fn with_skew(refresher: Arc<dyn TokenRefresher>, skew: Duration) -> Self {
        Self {
            refresher,
            skew,
            slots: StdMutex::new(HashMap::new()),
        }
    }

    /// Installs a decrypted password credential for a source.
    pub fn install_password(
        &self,
        source: SourceId,
        username: impl Into<String>,
        password: impl Into<String>,
    ) {
        self.install(
            source,
            SourceSecrets::Password {
                username: username.into(),
                password: password.into(),
            },
        );
    }

    /// Installs a decrypted OAuth grant for a source.
    pub fn install_oauth(&self, source: SourceId, grant: OauthGrant) {
        self.install(source, SourceSecrets::Oauth(grant));
    }

    /// Replaces a source's grant after the user re-authorized out of band.
    pub fn reauthorize(&self, source: SourceId, grant: OauthGrant) {
        info!(source_id = %source, "installing re-authorized grant");
        self.install_oauth(source, grant);
    }

    /// Drops a source's secrets (on source removal).
    pub fn remove(&self, source: SourceId) {
        self.slots.lock().expect("slots lock poisoned").remove(&source);
    }

    fn install(&self, source: SourceId, secrets: SourceSecrets) {
        self.slots
            .lock()
            .expect("slots lock poisoned")
            .insert(source, Arc::new(Mutex::new(secrets)));
    }

    fn slot(&self, source: SourceId) -> Option<Arc<Mutex<SourceSecrets>>> {
        self.slots
            .lock()
            .expect("slots lock poisoned")
            .get(&source)
            .cloned()
    }

    /// Resolves ready-to-use credentials for a source.
    ///
    /// # Errors
    ///
    /// - `ConfigInvalid` when a source that needs credentials has none
    ///   installed.
    /// - `AuthExpired` / `AuthInvalid` when an OAuth grant cannot be
    ///   refreshed (terminal: the orchestrator transitions the source to
    ///   needs-reauth).
    /// - Transient kinds when the refresh call itself fails temporarily.
    pub async fn resolve(&self, source: &CalendarSource) -> AdapterResult<Credentials> {
        if source.kind() == SourceKind::Ics {
            return Ok(Credentials::None);
        }

        let slot = self.slot(source.id).ok_or_else(|| {
            AdapterError::config_invalid("no credentials installed for source")
                .with_source_name(&source.name)
        })?;

        let mut secrets = slot.lock().await;
        match &mut *secrets {
            SourceSecrets::Password { username, password } => Ok(Credentials::Password {
                username: username.clone(),
                password: password.clone(),
            }),
            SourceSecrets::Oauth(grant) => {
                if !grant.is_expired(self.skew) {
                    return Ok(Credentials::Bearer(grant.access_token.clone()));
                }

                let refresh_token = grant.refresh_token.clone().ok_or_else(|| {
                    AdapterError::auth_expired("access token expired and no refresh token on file")
                        .with_source_name(&source.name)
                })?;

                debug!(source_id = %source.id, "access token expired, refreshing");
                let refreshed = self
                    .refresher
                    .refresh(&refresh_token)
                    .await
                    .map_err(|e| e.with_source_name(&source.name))?;

                grant.access_token = refreshed.access_token.clone();
                if let Some(rotated) = refreshed.refresh_token {
                    grant.refresh_token = Some(rotated);
                }
                grant.expires_at = refreshed
                    .expires_in
                    .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

                info!(source_id = %source.id, "access token refreshed");
                Ok(Credentials::Bearer(refreshed.access_token))
            }
        }
    }
}

/// Token refresher that posts `grant_type=refresh_token` to a real OAuth
/// token endpoint.
pub struct HttpTokenRefresher {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

impl HttpTokenRefresher {
    /// Creates a refresher for the given token endpoint and client.
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to create HTTP client");
        Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl TokenRefresher for HttpTokenRefresher {
    fn refresh(&self, refresh_token: &str) -> BoxFuture<'_, AdapterResult<RefreshedToken>> {
        let refresh_token = refresh_token.to_string();
        Box::pin(async move {
            let params = [
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ];

            let response = self
                .http
                .post(&self.token_url)
                .form(&params)
                .send()
                .await
                .map_err(|e| {
                    AdapterError::transient_network(format!("token refresh request failed: {e}"))
                })?;

            let status = response.status();
            let body = response.text().await.map_err(|e| {
                AdapterError::transient_network(format!("failed to read refresh response: {e}"))
            })?;

            if !status.is_success() {
                // invalid_grant means the refresh token itself is dead:
                // revoked, expired, or reused. Only the user can fix that.
                if body.contains("invalid_grant") {
                    return Err(AdapterError::auth_expired(
                        "refresh token rejected (invalid_grant)",
                    ));
                }
                if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    return Err(AdapterError::rate_limited("token endpoint rate limited"));
                }
                if status.is_server_error() {
                    return Err(AdapterError::transient_network(format!(
                        "token endpoint error ({status})"
                    )));
                }
                return Err(AdapterError::auth_invalid(format!(
                    "token refresh rejected ({status})"
                )));
            }

            let parsed: TokenResponse = serde_json::from_str(&body).map_err(|e| {
                AdapterError::malformed_source(format!("invalid token response: {e}"))
            })?;

            Ok(RefreshedToken {
                access_token: parsed.access_token,
                refresh_token: parsed.refresh_token,
                expires_in: parsed.expires_in,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AdapterErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use unifeed_core::{CalendarSource, Connection, UserId};

    struct CountingRefresher {
        calls: AtomicUsize,
        result: fn() -> AdapterResult<RefreshedToken>,
    }

    impl CountingRefresher {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result: || {
                    Ok(RefreshedToken {
                        access_token: "fresh-token".into(),
                        refresh_token: None,
                        expires_in: Some(3600),
                    })
                },
            }
        }

        fn invalid_grant() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result: || Err(AdapterError::auth_expired("invalid_grant")),
            }
        }
    }

    impl TokenRefresher for CountingRefresher {
        fn refresh(&self, _refresh_token: &str) -> BoxFuture<'_, AdapterResult<RefreshedToken>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let result = (self.result)();
            // Hold the refresh open briefly so concurrent resolvers pile up
            // behind the per-source lock.
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                result
            })
        }
    }

    fn oauth_source(id: u64) -> CalendarSource {
        CalendarSource::new(
            SourceId(id),
            UserId(1),
            "Cal",
            Connection::OauthCalendar {
                calendar_id: "primary".into(),
            },
        )
    }

    fn expired_grant() -> OauthGrant {
        OauthGrant {
            access_token: "stale-token".into(),
            refresh_token: Some("refresh-1".into()),
            expires_at: Some(Utc::now() - chrono::Duration::hours(1)),
        }
    }

    #[tokio::test]
    async fn ics_sources_need_no_credentials() {
        let provider = CredentialProvider::new(Arc::new(CountingRefresher::ok()));
        let source = CalendarSource::new(
            SourceId(1),
            UserId(1),
            "Feed",
            Connection::Ics {
                url: "https://example.com/cal.ics".into(),
            },
        );
        assert_eq!(provider.resolve(&source).await.unwrap(), Credentials::None);
    }

    #[tokio::test]
    async fn missing_credentials_is_config_error() {
        let provider = CredentialProvider::new(Arc::new(CountingRefresher::ok()));
        let err = provider.resolve(&oauth_source(1)).await.unwrap_err();
        assert_eq!(err.kind(), AdapterErrorKind::ConfigInvalid);
    }

    #[tokio::test]
    async fn valid_token_is_returned_without_refresh() {
        let refresher = Arc::new(CountingRefresher::ok());
        let provider = CredentialProvider::new(refresher.clone());
        provider.install_oauth(
            SourceId(1),
            OauthGrant::new("live-token", Some("refresh-1".into()), Some(3600)),
        );

        let creds = provider.resolve(&oauth_source(1)).await.unwrap();
        assert_eq!(creds, Credentials::Bearer("live-token".into()));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_token_is_refreshed() {
        let refresher = Arc::new(CountingRefresher::ok());
        let provider = CredentialProvider::new(refresher.clone());
        provider.install_oauth(SourceId(1), expired_grant());

        let creds = provider.resolve(&oauth_source(1)).await.unwrap();
        assert_eq!(creds, Credentials::Bearer("fresh-token".into()));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        // The refreshed grant is reused without another call.
        let creds = provider.resolve(&oauth_source(1)).await.unwrap();
        assert_eq!(creds, Credentials::Bearer("fresh-token".into()));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolves_share_one_refresh() {
        let refresher = Arc::new(CountingRefresher::ok());
        let provider = Arc::new(CredentialProvider::new(refresher.clone()));
        provider.install_oauth(SourceId(1), expired_grant());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let provider = provider.clone();
            handles.push(tokio::spawn(async move {
                provider.resolve(&oauth_source(1)).await
            }));
        }
        for handle in handles {
            let creds = handle.await.unwrap().unwrap();
            assert_eq!(creds, Credentials::Bearer("fresh-token".into()));
        }

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn permanent_refresh_failure_propagates_auth_expired() {
        let provider = CredentialProvider::new(Arc::new(CountingRefresher::invalid_grant()));
        provider.install_oauth(SourceId(1), expired_grant());

        let err = provider.resolve(&oauth_source(1)).await.unwrap_err();
        assert_eq!(err.kind(), AdapterErrorKind::AuthExpired);
        assert!(err.needs_reauth());
    }

    #[tokio::test]
    async fn expired_token_without_refresh_token_is_auth_expired() {
        let provider = CredentialProvider::new(Arc::new(CountingRefresher::ok()));
        provider.install_oauth(
            SourceId(1),
            OauthGrant {
                access_token: "stale".into(),
                refresh_token: None,
                expires_at: Some(Utc::now() - chrono::Duration::hours(1)),
            },
        );

        let err = provider.resolve(&oauth_source(1)).await.unwrap_err();
        assert_eq!(err.kind(), AdapterErrorKind::AuthExpired);
    }

    #[tokio::test]
    async fn password_credentials_pass_through() {
        let provider = CredentialProvider::new(Arc::new(CountingRefresher::ok()));
        provider.install_password(SourceId(2), "alice", "hunter2");

        let source = CalendarSource::new(
            SourceId(2),
            UserId(1),
            "Dav",
            Connection::CalDav {
                url: url::Url::parse("https://dav.example.com/cal/").unwrap(),
                username: "alice".into(),
            },
        );
        let creds = provider.resolve(&source).await.unwrap();
        assert_eq!(
            creds,
            Credentials::Password {
                username: "alice".into(),
                password: "hunter2".into()
            }
        );
    }

    #[test]
    fn debug_redacts_secrets() {
        let bearer = format!("{:?}", Credentials::Bearer("super-secret".into()));
        assert!(!bearer.contains("super-secret"));

        let password = format!(
            "{:?}",
            Credentials::Password {
                username: "alice".into(),
                password: "hunter2".into()
            }
        );
        assert!(password.contains("alice"));
        assert!(!password.contains("hunter2"));
    }

    #[test]
    fn grant_expiry_respects_skew() {
        let grant = OauthGrant::new("t", None, Some(60));
        // 60s lifetime is inside the 120s default skew margin.
        assert!(grant.is_expired(DEFAULT_EXPIRY_SKEW));
        assert!(!grant.is_expired(Duration::ZERO));

        let eternal = OauthGrant::new("t", None, None);
        assert!(!eternal.is_expired(DEFAULT_EXPIRY_SKEW));
    }
}
