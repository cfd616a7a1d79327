use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single submission from a device. The same logical event may be reported
/// several times, possibly out of order; `event_id` is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReport {
    pub event_id: String,
    pub event_time: DateTime<Utc>,
    // Devices buffering offline may omit this; the server clock fills in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_time: Option<DateTime<Utc>>,
    pub machine_id: String,
    pub factory_id: String,
    pub line_id: String,
    pub duration_ms: i64,
    pub defect_count: i32,
}

/// The chunk of data needed to write a record - everything except the
/// store-assigned surrogate key and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub event_id: String,
    pub event_time: DateTime<Utc>,
    pub received_time: DateTime<Utc>,
    pub machine_id: String,
    pub factory_id: String,
    pub line_id: String,
    pub duration_ms: i64,
    pub defect_count: i32,
}

impl NewEvent {
    pub fn from_report(report: &EventReport, received_time: DateTime<Utc>) -> Self {
        Self {
            event_id: report.event_id.clone(),
            event_time: report.event_time,
            received_time,
            machine_id: report.machine_id.clone(),
            factory_id: report.factory_id.clone(),
            line_id: report.line_id.clone(),
            duration_ms: report.duration_ms,
            defect_count: report.defect_count,
        }
    }
}

/// The canonical stored record, at most one per `event_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: i64,
    pub event_id: String,
    pub event_time: DateTime<Utc>,
    pub received_time: DateTime<Utc>,
    pub machine_id: String,
    pub factory_id: String,
    pub line_id: String,
    pub duration_ms: i64,
    pub defect_count: i32,
    // Bumped on every overwrite; conditional updates compare against it.
    pub version: i64,
}

impl EventRecord {
    /// Payload identity for dedup purposes: event time, duration and defect
    /// count. Location fields are deliberately not part of the comparison.
    pub fn payload_matches(&self, report: &EventReport) -> bool {
        self.event_time == report.event_time
            && self.duration_ms == report.duration_ms
            && self.defect_count == report.defect_count
    }
}
