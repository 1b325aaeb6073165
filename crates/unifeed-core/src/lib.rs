//! Core types: time, events, sources, masking, feed tokens.

pub mod event;
pub mod mask;
pub mod source;
pub mod time;
pub mod token;
pub mod tracing;

pub use event::{Event, OccurrenceId};
pub use mask::{BUSY_PLACEHOLDER, apply_masking};
pub use source::{
    CalendarSource, Connection, MaskingPolicy, SourceId, SourceKind, SyncStatus, UserId,
};
pub use time::{EventTime, TimeWindow};
pub use token::FeedToken;
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
