use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::instrument;

use crate::api::IngestError;
use crate::batch::{self, BatchSummary};
use crate::event::EventReport;
use crate::prometheus::report_batch_outcomes;
use crate::router;
use crate::stats::{self, LineDefectStats, MachineWindowStats, DEFAULT_TOP_LINES_LIMIT};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub machine_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopLinesQuery {
    pub factory_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_TOP_LINES_LIMIT
}

/// `POST /events/batch`. Always answers 200 with the full tally; per-report
/// failures are embedded as rejections rather than failing the request.
#[instrument(skip(state, reports), fields(batch_size = reports.len()))]
pub async fn ingest_batch(
    state: State<router::State>,
    Json(reports): Json<Vec<EventReport>>,
) -> Json<BatchSummary> {
    metrics::histogram!("telemetry_ingest_batch_size").record(reports.len() as f64);

    let summary = batch::ingest_batch(state.reconciler.clone(), reports).await;
    report_batch_outcomes(&summary);
    Json(summary)
}

/// `GET /stats?machineId=&start=&end=`
#[instrument(skip(state))]
pub async fn machine_stats(
    state: State<router::State>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<MachineWindowStats>, IngestError> {
    let stats =
        stats::machine_window_stats(&state.store, &query.machine_id, query.start, query.end)
            .await?;
    Ok(Json(stats))
}

/// `GET /stats/top-defect-lines?factoryId=&from=&to=&limit=`
#[instrument(skip(state))]
pub async fn top_defect_lines(
    state: State<router::State>,
    Query(query): Query<TopLinesQuery>,
) -> Result<Json<Vec<LineDefectStats>>, IngestError> {
    let lines = stats::top_defect_lines(
        &state.store,
        &query.factory_id,
        query.from,
        query.to,
        query.limit,
    )
    .await?;
    Ok(Json(lines))
}
