//! Calendar source configuration and sync state.
//!
//! A [`CalendarSource`] describes one configured origin of events for a
//! user: what kind of backend it is, how to reach it, whether its events
//! are masked in the published feed, and the current sync status. The
//! status/timestamp/error fields are mutated only by the sync orchestrator;
//! configuration fields only by user action through the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Identifier of a configured calendar source.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a user owning sources and a feed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of backend a source talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// OAuth-authorized calendar API (paginated JSON events endpoint).
    OauthCalendar,
    /// CalDAV collection queried with REPORT.
    CalDav,
    /// Static ICS/webcal feed fetched with GET.
    Ics,
}

impl SourceKind {
    /// Stable lowercase name, used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OauthCalendar => "oauth_calendar",
            Self::CalDav => "caldav",
            Self::Ics => "ics",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Connection parameters, tagged by source kind.
///
/// Selecting an adapter happens on this tag; there is deliberately no
/// catch-all variant and no downcasting anywhere downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Connection {
    /// OAuth calendar API: which calendar to list events from.
    OauthCalendar {
        /// Provider-side calendar identifier ("primary" by convention).
        calendar_id: String,
    },
    /// CalDAV collection URL plus the account username. The password is
    /// supplied by the credential provider, never stored here.
    CalDav {
        /// Collection URL to REPORT against.
        url: Url,
        /// Account username for Basic auth.
        username: String,
    },
    /// Static ICS feed URL (`https://`, `webcal://` or `webcals://`).
    Ics {
        /// Feed URL as configured by the user.
        url: String,
    },
}

impl Connection {
    /// The source kind this connection belongs to.
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::OauthCalendar { .. } => SourceKind::OauthCalendar,
            Self::CalDav { .. } => SourceKind::CalDav,
            Self::Ics { .. } => SourceKind::Ics,
        }
    }
}

/// Per-source privacy policy applied by the feed generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskingPolicy {
    /// Emit title, description and location unchanged.
    #[default]
    Off,
    /// Emit a fixed "Busy" placeholder and the time range only.
    BusyOnly,
}

/// Sync lifecycle state of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Never attempted.
    Pending,
    /// An attempt is in flight.
    Syncing,
    /// Last attempt committed successfully.
    Success,
    /// Last attempt failed with a retryable error; eligible again after
    /// the backoff delay.
    Failed,
    /// Credentials are expired or revoked. Terminal until the user
    /// re-authorizes; never retried automatically.
    NeedsReauth,
}

impl SyncStatus {
    /// Returns `true` if a new attempt may be scheduled from this state.
    ///
    /// `Syncing` is excluded by mutual exclusion, `NeedsReauth` by
    /// terminality (a manual trigger may still override the latter).
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Pending | Self::Success | Self::Failed)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::NeedsReauth => "needs_reauth",
        };
        write!(f, "{s}")
    }
}

/// One configured calendar source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSource {
    /// Source identifier.
    pub id: SourceId,
    /// Owning user.
    pub user: UserId,
    /// Display name chosen by the user.
    pub name: String,
    /// Connection parameters (also determines the kind).
    pub connection: Connection,
    /// Privacy policy for the published feed.
    pub masking: MaskingPolicy,
    /// Whether the scheduler syncs this source.
    pub enabled: bool,
    /// Current sync status. Orchestrator-owned.
    pub status: SyncStatus,
    /// When the last successful sync committed. Orchestrator-owned.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// When the last attempt started, successful or not. Orchestrator-owned.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Error detail of the last failed attempt. Orchestrator-owned.
    pub last_error: Option<String>,
    /// Classification of the last failure (snake_case error kind). Lets the
    /// scheduler exclude non-retryable failures such as bad configuration.
    /// Orchestrator-owned.
    pub last_error_kind: Option<String>,
    /// Consecutive failed attempts, drives backoff. Orchestrator-owned.
    pub consecutive_failures: u32,
}

impl CalendarSource {
    /// Creates a new enabled, unmasked source in the `Pending` state.
    pub fn new(id: SourceId, user: UserId, name: impl Into<String>, connection: Connection) -> Self {
        Self {
            id,
            user,
            name: name.into(),
            connection,
            masking: MaskingPolicy::Off,
            enabled: true,
            status: SyncStatus::Pending,
            last_sync_at: None,
            last_attempt_at: None,
            last_error: None,
            last_error_kind: None,
            consecutive_failures: 0,
        }
    }

    /// Builder method to set the masking policy.
    pub fn with_masking(mut self, masking: MaskingPolicy) -> Self {
        self.masking = masking;
        self
    }

    /// Builder method to set the enabled flag.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The source kind, derived from the connection variant.
    pub fn kind(&self) -> SourceKind {
        self.connection.kind()
    }
}
