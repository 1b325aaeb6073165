//! CalDAV adapter.
//!
//! Issues a `calendar-query` REPORT with a time-range filter against the
//! configured collection URL and parses the multistatus response's
//! `calendar-data` payloads as iCalendar. Recurrence is expanded
//! client-side: plenty of servers ignore the `expand` request, so relying
//! on it loses occurrences silently.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, Event as XmlEvent};
use std::io::Cursor;
use tracing::{debug, warn};

use unifeed_core::{CalendarSource, Connection, SourceKind, TimeWindow};

use crate::adapter::{BoxFuture, SourceAdapter};
use crate::credentials::Credentials;
use crate::error::{AdapterError, AdapterResult};
use crate::ics::parse_ics_content;
use crate::raw_event::RawEvent;

/// Adapter for CalDAV collections.
#[derive(Debug)]
pub struct CalDavAdapter {
    http: reqwest::Client,
}

impl CalDavAdapter {
    /// Creates an adapter with the given per-call timeout.
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to create HTTP client");
        Self { http }
    }

    async fn report(
        &self,
        url: &str,
        username: &str,
        password: &str,
        window: &TimeWindow,
    ) -> AdapterResult<String> {
        let method = reqwest::Method::from_bytes(b"REPORT").expect("static method name is valid");
        let body = calendar_query_body(window);

        let response = self
            .http
            .request(method, url)
            .header("Authorization", basic_auth(username, password))
            .header("Content-Type", "application/xml; charset=utf-8")
            .header("Depth", "1")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::transient_network("REPORT request timeout")
                } else {
                    AdapterError::transient_network(format!("REPORT request failed: {e}"))
                }
            })?;

        let status = response.status();
        match status {
            s if s == reqwest::StatusCode::MULTI_STATUS || s == reqwest::StatusCode::OK => {
                response.text().await.map_err(|e| {
                    AdapterError::transient_network(format!("failed to read response: {e}"))
                })
            }
            reqwest::StatusCode::UNAUTHORIZED => {
                Err(AdapterError::auth_invalid("credentials rejected by server"))
            }
            reqwest::StatusCode::FORBIDDEN => {
                Err(AdapterError::auth_invalid("access to collection denied"))
            }
            reqwest::StatusCode::NOT_FOUND => {
                Err(AdapterError::config_invalid("collection not found"))
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                Err(AdapterError::rate_limited("server rate limited the request"))
            }
            s if s.is_server_error() => Err(AdapterError::transient_network(format!(
                "server error ({status})"
            ))),
            _ => Err(AdapterError::malformed_source(format!(
                "unexpected REPORT response ({status})"
            ))),
        }
    }
}

impl SourceAdapter for CalDavAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::CalDav
    }

    fn fetch_events(
        &self,
        source: CalendarSource,
        credentials: Credentials,
        window: TimeWindow,
    ) -> BoxFuture<'_, AdapterResult<Vec<RawEvent>>> {
        Box::pin(async move {
            let Connection::CalDav { ref url, .. } = source.connection else {
                return Err(AdapterError::config_invalid("source is not a CalDAV source"));
            };
            let Credentials::Password {
                ref username,
                ref password,
            } = credentials
            else {
                return Err(AdapterError::config_invalid(
                    "CalDAV requires username/password credentials",
                ));
            };

            let xml = self
                .report(url.as_str(), username, password, &window)
                .await
                .map_err(|e| e.with_source_name(&source.name))?;

            let payloads = parse_report_response(&xml);
            debug!(url = %url, count = payloads.len(), "received calendar-data payloads");

            let mut events = Vec::new();
            for (href, ics) in payloads {
                match parse_ics_content(&ics, &window) {
                    Ok(parsed) => events.extend(parsed),
                    Err(e) => {
                        // One broken object must not take down the whole
                        // collection; the document-level error stays typed
                        // for whole-response failures.
                        warn!(href = %href, error = %e, "skipping unparsable calendar object");
                    }
                }
            }

            Ok(events)
        })
    }
}

fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{username}:{password}")))
}

/// Builds the `calendar-query` REPORT body for a time window.
fn calendar_query_body(window: &TimeWindow) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    let mut query = BytesStart::new("c:calendar-query");
    query.push_attribute(("xmlns:d", "DAV:"));
    query.push_attribute(("xmlns:c", "urn:ietf:params:xml:ns:caldav"));
    writer.write_event(XmlEvent::Start(query)).expect("in-memory write");

    writer
        .write_event(XmlEvent::Start(BytesStart::new("d:prop")))
        .expect("in-memory write");
    writer
        .write_event(XmlEvent::Empty(BytesStart::new("d:getetag")))
        .expect("in-memory write");
    writer
        .write_event(XmlEvent::Empty(BytesStart::new("c:calendar-data")))
        .expect("in-memory write");
    writer
        .write_event(XmlEvent::End(BytesEnd::new("d:prop")))
        .expect("in-memory write");

    writer
        .write_event(XmlEvent::Start(BytesStart::new("c:filter")))
        .expect("in-memory write");

    let mut vcal = BytesStart::new("c:comp-filter");
    vcal.push_attribute(("name", "VCALENDAR"));
    writer.write_event(XmlEvent::Start(vcal)).expect("in-memory write");

    let mut vevent = BytesStart::new("c:comp-filter");
    vevent.push_attribute(("name", "VEVENT"));
    writer.write_event(XmlEvent::Start(vevent)).expect("in-memory write");

    let mut time_range = BytesStart::new("c:time-range");
    time_range.push_attribute((
        "start",
        window.start.format("%Y%m%dT%H%M%SZ").to_string().as_str(),
    ));
    time_range.push_attribute((
        "end",
        window.end.format("%Y%m%dT%H%M%SZ").to_string().as_str(),
    ));
    writer
        .write_event(XmlEvent::Empty(time_range))
        .expect("in-memory write");

    writer
        .write_event(XmlEvent::End(BytesEnd::new("c:comp-filter")))
        .expect("in-memory write");
    writer
        .write_event(XmlEvent::End(BytesEnd::new("c:comp-filter")))
        .expect("in-memory write");
    writer
        .write_event(XmlEvent::End(BytesEnd::new("c:filter")))
        .expect("in-memory write");
    writer
        .write_event(XmlEvent::End(BytesEnd::new("c:calendar-query")))
        .expect("in-memory write");

    String::from_utf8(writer.into_inner().into_inner()).expect("writer emits UTF-8")
}

/// Parses a multistatus REPORT response into `(href, calendar-data)` pairs.
fn parse_report_response(xml: &str) -> Vec<(String, String)> {
    let mut results = Vec::new();

    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut current_href: Option<String> = None;
    let mut current_data: Option<String> = None;
    let mut current_element: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(XmlEvent::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match local_name(&name) {
                    "response" => {
                        current_href = None;
                        current_data = None;
                    }
                    local @ ("href" | "calendar-data") => {
                        current_element = Some(local.to_string());
                    }
                    _ => {}
                }
            }
            Ok(XmlEvent::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if local_name(&name) == "response"
                    && let (Some(href), Some(data)) = (current_href.take(), current_data.take())
                {
                    results.push((href, data));
                }
                current_element = None;
            }
            Ok(XmlEvent::Text(e)) => {
                if let Some(ref elem) = current_element {
                    let text = e.unescape().unwrap_or_default().to_string();
                    match elem.as_str() {
                        "href" => current_href = Some(text),
                        "calendar-data" => current_data = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(XmlEvent::CData(e)) => {
                if let Some(ref elem) = current_element {
                    let text = String::from_utf8_lossy(&e).to_string();
                    match elem.as_str() {
                        "href" => current_href = Some(text),
                        "calendar-data" => current_data = Some(text),
                        _ => {}
                    }
                }
            }
            Ok(XmlEvent::Eof) => break,
            Err(e) => {
                warn!(error = %e, "stopping multistatus parse on XML error");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    results
}

/// Strips the namespace prefix from an element name.
fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn query_body_contains_time_range() {
        let body = calendar_query_body(&sample_window());
        assert!(body.contains("c:calendar-query"));
        assert!(body.contains(r#"name="VEVENT""#));
        assert!(body.contains(r#"start="20250201T000000Z""#));
        assert!(body.contains(r#"end="20250301T000000Z""#));
    }

    #[test]
    fn basic_auth_encoding() {
        assert_eq!(basic_auth("alice", "secret"), "Basic YWxpY2U6c2VjcmV0");
    }

    #[test]
    fn parses_multistatus_response() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/calendars/alice/work/event-1.ics</d:href>
    <d:propstat>
      <d:prop>
        <d:getetag>"abc123"</d:getetag>
        <c:calendar-data>BEGIN:VCALENDAR
VERSION:2.0
BEGIN:VEVENT
UID:event-1@example.com
DTSTART:20250205T100000Z
DTEND:20250205T110000Z
SUMMARY:Review
END:VEVENT
END:VCALENDAR</c:calendar-data>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

        let payloads = parse_report_response(xml);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].0, "/calendars/alice/work/event-1.ics");
        assert!(payloads[0].1.contains("UID:event-1@example.com"));

        let events = parse_ics_content(&payloads[0].1, &sample_window()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].summary.as_deref(), Some("Review"));
    }

    #[test]
    fn empty_multistatus_yields_no_payloads() {
        let xml = r#"<?xml version="1.0"?><d:multistatus xmlns:d="DAV:"></d:multistatus>"#;
        assert!(parse_report_response(xml).is_empty());
    }
}
