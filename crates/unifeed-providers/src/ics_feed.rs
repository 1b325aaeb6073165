//! Static ICS/webcal feed adapter.
//!
//! Fetches a published calendar file over HTTPS and parses it with the
//! shared iCalendar pipeline. `webcal://` and `webcals://` URLs are the
//! subscription-link convention for plain HTTPS feeds and are rewritten
//! accordingly.

use std::time::Duration;

use tracing::debug;

use unifeed_core::{CalendarSource, Connection, SourceKind, TimeWindow};

use crate::adapter::{BoxFuture, SourceAdapter};
use crate::credentials::Credentials;
use crate::error::{AdapterError, AdapterResult};
use crate::ics::parse_ics_content;
use crate::raw_event::RawEvent;

/// Adapter for static ICS feeds.
#[derive(Debug)]
pub struct IcsFeedAdapter {
    http: reqwest::Client,
}

impl IcsFeedAdapter {
    /// Creates an adapter with the given per-call timeout.
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("unifeed/0.1")
            .build()
            .expect("failed to create HTTP client");
        Self { http }
    }

    async fn fetch_document(&self, url: &str) -> AdapterResult<String> {
        let response = self
            .http
            .get(url)
            .header("Accept", "text/calendar, application/calendar+json, */*")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::transient_network("feed request timeout")
                } else {
                    AdapterError::transient_network(format!("feed request failed: {e}"))
                }
            })?;

        let status = response.status();
        match status {
            s if s.is_success() => response.text().await.map_err(|e| {
                AdapterError::transient_network(format!("failed to read feed body: {e}"))
            }),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => Err(
                AdapterError::auth_invalid(format!("feed access denied ({status})")),
            ),
            reqwest::StatusCode::NOT_FOUND => {
                Err(AdapterError::config_invalid("feed URL not found"))
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                Err(AdapterError::rate_limited("feed host rate limited the request"))
            }
            s if s.is_server_error() => Err(AdapterError::transient_network(format!(
                "feed host error ({status})"
            ))),
            _ => Err(AdapterError::malformed_source(format!(
                "unexpected feed response ({status})"
            ))),
        }
    }
}

impl SourceAdapter for IcsFeedAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Ics
    }

    fn fetch_events(
        &self,
        source: CalendarSource,
        _credentials: Credentials,
        window: TimeWindow,
    ) -> BoxFuture<'_, AdapterResult<Vec<RawEvent>>> {
        Box::pin(async move {
            let Connection::Ics { ref url } = source.connection else {
                return Err(AdapterError::config_invalid("source is not an ICS feed"));
            };

            let https_url = normalize_feed_url(url);
            debug!(url = %https_url, "fetching ICS feed");

            let document = self
                .fetch_document(&https_url)
                .await
                .map_err(|e| e.with_source_name(&source.name))?;

            parse_ics_content(&document, &window).map_err(|e| e.with_source_name(&source.name))
        })
    }
}

/// Rewrites `webcal://` and `webcals://` subscription URLs to `https://`.
pub fn normalize_feed_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("webcals://") {
        return format!("https://{rest}");
    }
    if let Some(rest) = url.strip_prefix("webcal://") {
        return format!("https://{rest}");
    }
    url.to_string()
}
