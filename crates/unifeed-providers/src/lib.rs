//! SourceAdapter trait and implementations.
//!
//! This crate is the abstraction layer between the sync engine and the
//! calendar backends:
//!
//! - [`SourceAdapter`] - one capability (fetch a window of events), one
//!   implementation per source kind
//! - [`RawEvent`] - adapter-agnostic raw occurrence data
//! - [`normalize_events`] - pipeline from raw occurrences to canonical
//!   [`unifeed_core::Event`]s
//! - [`CredentialProvider`] - ready-to-use credentials with single-flight
//!   OAuth refresh
//! - [`AdapterError`] - the error taxonomy the orchestrator's state
//!   machine runs on
//!
//! ```text
//! ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//! │ Calendar API │  │ CalDAV server│  │ ICS feed     │
//! └──────┬───────┘  └──────┬───────┘  └──────┬───────┘
//!        ▼                 ▼                 ▼
//! ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//! │OauthCalendar │  │CalDavAdapter │  │IcsFeedAdapter│
//! └──────┬───────┘  └──────┬───────┘  └──────┬───────┘
//!        │        SourceAdapter (RawEvent)   │
//!        └─────────────────┼─────────────────┘
//!                          ▼ normalize_events()
//!                   canonical Event
//! ```

pub mod adapter;
pub mod caldav;
pub mod credentials;
pub mod error;
pub mod ics;
pub mod ics_feed;
pub mod normalize;
pub mod oauth_calendar;
pub mod raw_event;

pub use adapter::{AdapterSet, BoxFuture, SourceAdapter};
pub use caldav::CalDavAdapter;
pub use credentials::{
    CredentialProvider, Credentials, DEFAULT_EXPIRY_SKEW, HttpTokenRefresher, OauthGrant,
    RefreshedToken, TokenRefresher,
};
pub use error::{AdapterError, AdapterErrorKind, AdapterResult};
pub use ics::parse_ics_content;
pub use ics_feed::{IcsFeedAdapter, normalize_feed_url};
pub use normalize::{UNTITLED, normalize_event, normalize_events};
pub use oauth_calendar::{DEFAULT_API_BASE, OauthCalendarAdapter};
pub use raw_event::{RawEvent, RawEventTime};
