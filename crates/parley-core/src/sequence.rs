//! Server-assigned message ids and timestamps.

use chrono::{DateTime, SecondsFormat, Utc};

/// Hands out message ids that are unique and strictly increasing for the
/// lifetime of the process.
///
/// Ids track wall-clock milliseconds (`max(now_ms, last + 1)`), so they read
/// like epoch timestamps but never repeat when two messages land in the
/// same millisecond or the clock steps backwards.
#[derive(Debug, Default)]
pub struct MessageIdSource {
    last: u64,
}

impl MessageIdSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id using the current wall clock.
    pub fn next_id(&mut self) -> u64 {
        self.next_at(Utc::now())
    }

    /// Next id given an explicit clock reading.
    pub fn next_at(&mut self, now: DateTime<Utc>) -> u64 {
        let now_ms = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        self.last = now_ms.max(self.last.saturating_add(1));
        self.last
    }

    /// The most recently issued id, `0` if none yet.
    pub fn last(&self) -> u64 {
        self.last
    }
}

/// ISO-8601 UTC timestamp with millisecond precision, e.g.
/// `2026-10-16T08:30:00.123Z`.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
