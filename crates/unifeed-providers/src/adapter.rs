//! The `SourceAdapter` contract.
//!
//! One capability (fetch the events of a source for a time window) with
//! one implementation per [`SourceKind`], selected by the source's kind
//! field. Adapters are read-only: they never mutate any persisted state,
//! and whatever pagination or retry they do internally, the contract-level
//! result is the complete window's events or a typed error.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use unifeed_core::{CalendarSource, SourceKind, TimeWindow};

use crate::caldav::CalDavAdapter;
use crate::credentials::Credentials;
use crate::error::AdapterResult;
use crate::ics_feed::IcsFeedAdapter;
use crate::oauth_calendar::OauthCalendarAdapter;
use crate::raw_event::RawEvent;

/// A boxed future for async trait methods.
///
/// Async functions in traits do not yet compose with dynamic dispatch, so
/// the trait returns boxed futures to stay object-safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The core abstraction over calendar backends.
///
/// # Contract
///
/// - `fetch_events` returns every occurrence overlapping `window`, with
///   recurring series already expanded into concrete occurrences.
/// - Adapters must not mutate persisted state; commit/rollback decisions
///   belong to the orchestrator.
/// - Failures use the [`crate::error::AdapterErrorKind`] taxonomy so the
///   orchestrator can decide retry versus terminal handling.
pub trait SourceAdapter: Send + Sync {
    /// The source kind this adapter serves.
    fn kind(&self) -> SourceKind;

    /// Fetches all occurrences of `source` overlapping `window`.
    fn fetch_events(
        &self,
        source: CalendarSource,
        credentials: Credentials,
        window: TimeWindow,
    ) -> BoxFuture<'_, AdapterResult<Vec<RawEvent>>>;
}

/// The full set of adapters, one per source kind.
pub struct AdapterSet {
    oauth_calendar: Box<dyn SourceAdapter>,
    caldav: Box<dyn SourceAdapter>,
    ics: Box<dyn SourceAdapter>,
}

impl AdapterSet {
    /// Assembles a set from explicit adapters (tests inject fakes here).
    ///
    /// # Panics
    ///
    /// Panics if an adapter is registered under the wrong slot.
    pub fn new(
        oauth_calendar: Box<dyn SourceAdapter>,
        caldav: Box<dyn SourceAdapter>,
        ics: Box<dyn SourceAdapter>,
    ) -> Self {
        assert_eq!(oauth_calendar.kind(), SourceKind::OauthCalendar);
        assert_eq!(caldav.kind(), SourceKind::CalDav);
        assert_eq!(ics.kind(), SourceKind::Ics);
        Self {
            oauth_calendar,
            caldav,
            ics,
        }
    }

    /// The standard production set with the given per-call HTTP timeout.
    pub fn standard(timeout: Duration) -> Self {
        Self::new(
            Box::new(OauthCalendarAdapter::new(
                crate::oauth_calendar::DEFAULT_API_BASE,
                timeout,
            )),
            Box::new(CalDavAdapter::new(timeout)),
            Box::new(IcsFeedAdapter::new(timeout)),
        )
    }

    /// Selects the adapter for a source kind.
    pub fn for_kind(&self, kind: SourceKind) -> &dyn SourceAdapter {
        match kind {
            SourceKind::OauthCalendar => self.oauth_calendar.as_ref(),
            SourceKind::CalDav => self.caldav.as_ref(),
            SourceKind::Ics => self.ics.as_ref(),
        }
    }
}
