// prometheus exporter setup

use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
};
use metrics::counter;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::batch::BatchSummary;

pub const EVENTS_INGESTED_TOTAL: &str = "telemetry_events_ingested_total";
pub const EVENTS_REJECTED_TOTAL: &str = "telemetry_events_rejected_total";
pub const RECONCILE_CONFLICTS_TOTAL: &str = "telemetry_reconcile_conflicts_total";

/// One increment per terminal outcome in the batch, rejections tagged by
/// reason.
pub fn report_batch_outcomes(summary: &BatchSummary) {
    counter!(EVENTS_INGESTED_TOTAL, "outcome" => "accepted").increment(summary.accepted);
    counter!(EVENTS_INGESTED_TOTAL, "outcome" => "updated").increment(summary.updated);
    counter!(EVENTS_INGESTED_TOTAL, "outcome" => "deduped").increment(summary.deduped);
    for rejection in &summary.rejections {
        counter!(EVENTS_REJECTED_TOTAL, "reason" => rejection.reason.clone()).increment(1);
    }
}

/// A write lost its race against a concurrent reconciliation and is being
/// retried; `op` is "insert" or "update".
pub fn report_reconcile_conflict(op: &'static str) {
    counter!(RECONCILE_CONFLICTS_TOTAL, "op" => op).increment(1);
}

pub fn setup_metrics_recorder() -> PrometheusHandle {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];
    const BATCH_SIZES: &[f64] = &[
        1.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_string()),
            EXPONENTIAL_SECONDS,
        )
        .unwrap()
        .set_buckets_for_metric(Matcher::Suffix("_batch_size".to_string()), BATCH_SIZES)
        .unwrap()
        .install_recorder()
        .unwrap()
}

/// Middleware to record some common HTTP metrics
pub async fn track_metrics(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let path = if let Some(matched_path) = req.extensions().get::<MatchedPath>() {
        matched_path.as_str().to_owned()
    } else {
        req.uri().path().to_owned()
    };

    let method = req.method().clone();

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    let labels = [
        ("method", method.to_string()),
        ("path", path),
        ("status", status),
    ];

    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels).record(latency);

    response
}
