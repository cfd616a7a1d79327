use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::event::EventReport;
use crate::reconcile::{ReconcileOutcome, Reconciler};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub event_id: String,
    pub reason: String,
}

/// Aggregate result of one ingestion batch. The four counts plus the
/// rejection list always account for every input report exactly once.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub accepted: u64,
    pub updated: u64,
    pub deduped: u64,
    pub rejected: u64,
    pub rejections: Vec<Rejection>,
}

impl BatchSummary {
    pub fn tally(&mut self, outcome: ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Accepted => self.accepted += 1,
            ReconcileOutcome::Updated => self.updated += 1,
            ReconcileOutcome::Deduped => self.deduped += 1,
        }
    }

    pub fn reject(&mut self, event_id: String, reason: &str) {
        self.rejected += 1;
        self.rejections.push(Rejection {
            event_id,
            reason: reason.to_string(),
        });
    }

    pub fn total(&self) -> u64 {
        self.accepted + self.updated + self.deduped + self.rejected
    }
}

/// Fans a batch out to the reconciler, one task per report, and joins before
/// returning. No ordering is promised across reports; a failing report only
/// ever affects its own slot in the tally.
pub async fn ingest_batch(reconciler: Arc<Reconciler>, reports: Vec<EventReport>) -> BatchSummary {
    let tasks: Vec<_> = reports
        .into_iter()
        .map(|report| {
            let reconciler = Arc::clone(&reconciler);
            let event_id = report.event_id.clone();
            let handle = tokio::spawn(async move { reconciler.reconcile(&report).await });
            async move { (event_id, handle.await) }
        })
        .collect();

    let mut summary = BatchSummary::default();
    for (event_id, joined) in join_all(tasks).await {
        match joined {
            Ok(Ok(outcome)) => summary.tally(outcome),
            Ok(Err(err)) => {
                summary.reject(event_id, err.reason_code());
            }
            // A panicked reconciliation is isolated like any other failure.
            Err(join_err) => {
                error!(event_id = %event_id, error = %join_err, "reconcile task died");
                summary.reject(event_id, "INTERNAL_ERROR");
            }
        }
    }
    summary
}
