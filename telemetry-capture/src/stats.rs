use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::{DynEventStore, StoreError};

/// Average defects-per-hour at or above which a machine window is flagged.
pub const DEFECT_RATE_WARNING_THRESHOLD: f64 = 2.0;

pub const DEFAULT_TOP_LINES_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    Healthy,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineWindowStats {
    pub machine_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub events_count: i64,
    pub defects_count: i64,
    pub avg_defect_rate: f64,
    pub status: HealthStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineDefectStats {
    pub line_id: String,
    pub total_defects: i64,
    pub event_count: i64,
    pub defects_percent: f64,
}

/// Event count, defect sum and derived rate/status for one machine over
/// `[start, end)`. "No data" sums count as zero.
pub async fn machine_window_stats(
    store: &DynEventStore,
    machine_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<MachineWindowStats, StoreError> {
    let events_count = store.count_events(machine_id, start, end).await?;
    let defects_count = store
        .sum_defects(machine_id, start, end)
        .await?
        .unwrap_or(0);

    let hours = (end - start).num_seconds() as f64 / 3600.0;
    let avg_defect_rate = if hours == 0.0 {
        0.0
    } else {
        defects_count as f64 / hours
    };
    let status = if avg_defect_rate < DEFECT_RATE_WARNING_THRESHOLD {
        HealthStatus::Healthy
    } else {
        HealthStatus::Warning
    };

    Ok(MachineWindowStats {
        machine_id: machine_id.to_string(),
        start,
        end,
        events_count,
        defects_count,
        avg_defect_rate,
        status,
    })
}

/// Lines of one factory ranked by defect percentage over `[from, to)`,
/// truncated to `limit`. Ties rank in unspecified order.
pub async fn top_defect_lines(
    store: &DynEventStore,
    factory_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<LineDefectStats>, StoreError> {
    let mut lines: Vec<LineDefectStats> = store
        .line_defect_totals(factory_id, from, to)
        .await?
        .into_iter()
        .map(|totals| {
            let defects_percent = if totals.event_count == 0 {
                0.0
            } else {
                round2(totals.total_defects as f64 * 100.0 / totals.event_count as f64)
            };
            LineDefectStats {
                line_id: totals.line_id,
                total_defects: totals.total_defects,
                event_count: totals.event_count,
                defects_percent,
            }
        })
        .collect();

    lines.sort_by(|a, b| b.defects_percent.total_cmp(&a.defects_percent));
    lines.truncate(limit);
    Ok(lines)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
