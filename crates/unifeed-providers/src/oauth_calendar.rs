//! OAuth calendar API adapter.
//!
//! Talks to a Google-style events API: a JSON list endpoint per calendar,
//! authorized with a bearer token, paginated with `nextPageToken`. The
//! pagination cursor is adapter-internal; the contract-level result is the
//! complete window's events or a typed error.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Deserialize;
use tracing::debug;

use unifeed_core::{CalendarSource, Connection, SourceKind, TimeWindow};

use crate::adapter::{BoxFuture, SourceAdapter};
use crate::credentials::Credentials;
use crate::error::{AdapterError, AdapterResult};
use crate::raw_event::{RawEvent, RawEventTime};

/// Default API base URL (Google Calendar v3).
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Page size for event list calls.
const PAGE_SIZE: usize = 250;

/// Adapter for OAuth-authorized calendar APIs.
#[derive(Debug)]
pub struct OauthCalendarAdapter {
    http: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct EventListResponse {
    #[serde(default)]
    items: Vec<ApiEvent>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiEvent {
    id: Option<String>,
    status: Option<String>,
    summary: Option<String>,
    description: Option<String>,
    location: Option<String>,
    updated: Option<DateTime<Utc>>,
    start: Option<ApiEventTime>,
    end: Option<ApiEventTime>,
    #[serde(rename = "originalStartTime")]
    original_start_time: Option<ApiEventTime>,
}

#[derive(Debug, Deserialize)]
struct ApiEventTime {
    date: Option<NaiveDate>,
    #[serde(rename = "dateTime")]
    date_time: Option<DateTime<FixedOffset>>,
    #[serde(rename = "timeZone")]
    time_zone: Option<String>,
}

impl ApiEventTime {
    fn to_raw(&self) -> Option<RawEventTime> {
        if let Some(dt) = self.date_time {
            return Some(RawEventTime::DateTime(dt.with_timezone(&Utc)));
        }
        self.date.map(RawEventTime::Date)
    }
}

impl OauthCalendarAdapter {
    /// Creates an adapter against the given API base URL.
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to create HTTP client");
        Self {
            http,
            api_base: api_base.into(),
        }
    }

    async fn fetch_all_pages(
        &self,
        calendar_id: &str,
        token: &str,
        window: &TimeWindow,
    ) -> AdapterResult<Vec<RawEvent>> {
        let url = format!(
            "{}/calendars/{}/events",
            self.api_base,
            urlencoding::encode(calendar_id)
        );

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self.http.get(&url).bearer_auth(token).query(&[
                ("timeMin", window.start.to_rfc3339()),
                ("timeMax", window.end.to_rfc3339()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
                ("maxResults", PAGE_SIZE.to_string()),
            ]);
            if let Some(ref cursor) = page_token {
                request = request.query(&[("pageToken", cursor.as_str())]);
            }

            let response = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    AdapterError::transient_network("request timeout")
                } else {
                    AdapterError::transient_network(format!("request failed: {e}"))
                }
            })?;

            let status = response.status();
            let body = response.text().await.map_err(|e| {
                AdapterError::transient_network(format!("failed to read response: {e}"))
            })?;

            if !status.is_success() {
                return Err(classify_status(status, &body));
            }

            let page: EventListResponse = serde_json::from_str(&body).map_err(|e| {
                AdapterError::malformed_source(format!("failed to parse event list: {e}"))
            })?;

            events.extend(page.items.iter().filter_map(convert_item));

            match page.next_page_token {
                Some(cursor) => page_token = Some(cursor),
                None => break,
            }
        }

        debug!(calendar_id = %calendar_id, count = events.len(), "fetched events");
        Ok(events)
    }
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> AdapterError {
    use reqwest::StatusCode;
    match status {
        StatusCode::UNAUTHORIZED => AdapterError::auth_expired("access token rejected"),
        StatusCode::FORBIDDEN => AdapterError::auth_invalid("access to calendar denied"),
        StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => {
            AdapterError::config_invalid(format!("calendar request rejected ({status})"))
        }
        StatusCode::TOO_MANY_REQUESTS => AdapterError::rate_limited("API rate limit exceeded"),
        s if s.is_server_error() => {
            AdapterError::transient_network(format!("API server error ({status})"))
        }
        _ => AdapterError::malformed_source(format!("unexpected API response ({status}): {body}")),
    }
}

/// Converts one API item into a [`RawEvent`]. Items without an id or a
/// usable time range (e.g. tombstones of deleted events) are skipped.
fn convert_item(item: &ApiEvent) -> Option<RawEvent> {
    let id = item.id.as_ref()?;
    let start = item.start.as_ref()?.to_raw()?;
    let end = item
        .end
        .as_ref()
        .and_then(ApiEventTime::to_raw)
        .unwrap_or_else(|| start.clone());

    let mut raw = RawEvent::new(id, start, end);
    raw.summary = item.summary.clone();
    raw.description = item.description.clone();
    raw.location = item.location.clone();
    raw.status = item.status.clone();
    raw.last_modified = item.updated;
    raw.timezone = item
        .start
        .as_ref()
        .and_then(|t| t.time_zone.clone());
    raw.instance = item
        .original_start_time
        .as_ref()
        .and_then(ApiEventTime::to_raw)
        .map(|t| t.ics_marker());
    Some(raw)
}

impl SourceAdapter for OauthCalendarAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::OauthCalendar
    }

    fn fetch_events(
        &self,
        source: CalendarSource,
        credentials: Credentials,
        window: TimeWindow,
    ) -> BoxFuture<'_, AdapterResult<Vec<RawEvent>>> {
        Box::pin(async move {
            let Connection::OauthCalendar { ref calendar_id } = source.connection else {
                return Err(AdapterError::config_invalid(
                    "source is not an OAuth calendar",
                ));
            };
            let Credentials::Bearer(ref token) = credentials else {
                return Err(AdapterError::config_invalid(
                    "OAuth calendar requires a bearer token",
                ));
            };

            self.fetch_all_pages(calendar_id, token, &window)
                .await
                .map_err(|e| e.with_source_name(&source.name))
        })
    }
}
