use chrono::{DateTime, Duration, Utc};

use crate::api::IngestError;
use crate::event::EventReport;

/// Six hours; no single production-line event runs longer.
pub const MAX_DURATION_MS: i64 = 6 * 60 * 60 * 1000;

/// Device clocks drift; event times further ahead than this are rejected.
pub const MAX_FUTURE_SKEW_MINUTES: i64 = 15;

/// Structural checks applied before a report is allowed anywhere near the
/// store. Pure; the clock is passed in.
pub fn validate(report: &EventReport, now: DateTime<Utc>) -> Result<(), IngestError> {
    if report.duration_ms < 0 || report.duration_ms > MAX_DURATION_MS {
        return Err(IngestError::InvalidDuration);
    }

    if report.event_time > now + Duration::minutes(MAX_FUTURE_SKEW_MINUTES) {
        return Err(IngestError::FutureEvent);
    }

    Ok(())
}
