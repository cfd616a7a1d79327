use std::sync::Arc;

use tracing::warn;

use crate::api::IngestError;
use crate::event::{EventReport, NewEvent};
use crate::prometheus::report_reconcile_conflict;
use crate::store::{DynEventStore, StoreError};
use crate::time::TimeSource;
use crate::validation::validate;

/// Terminal outcome of reconciling one report against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// First record for this event id.
    Accepted,
    /// A strictly newer report overwrote the stored record.
    Updated,
    /// Duplicate, older, or time-ambiguous report; nothing written.
    Deduped,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Accepted => "accepted",
            ReconcileOutcome::Updated => "updated",
            ReconcileOutcome::Deduped => "deduped",
        }
    }
}

/// Decides insert/update/discard per report. Holds no lock of its own: races
/// between writers to the same event id surface as store conflicts, and the
/// losing side re-reads and re-decides. Writers to different event ids never
/// contend here.
pub struct Reconciler {
    store: DynEventStore,
    timesource: Arc<dyn TimeSource + Send + Sync>,
    max_attempts: u32,
}

impl Reconciler {
    pub fn new(
        store: DynEventStore,
        timesource: Arc<dyn TimeSource + Send + Sync>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            timesource,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn reconcile(&self, report: &EventReport) -> Result<ReconcileOutcome, IngestError> {
        validate(report, self.timesource.now())?;

        for _attempt in 0..self.max_attempts {
            match self.store.find_by_event_id(&report.event_id).await? {
                None => {
                    let received_time = report
                        .received_time
                        .unwrap_or_else(|| self.timesource.now());
                    let event = NewEvent::from_report(report, received_time);
                    match self.store.insert(&event).await {
                        Ok(_) => return Ok(ReconcileOutcome::Accepted),
                        // Lost the insert race; decide again against the
                        // record the winner just created.
                        Err(StoreError::UniqueViolation) => {
                            report_reconcile_conflict("insert");
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }

                Some(existing) => {
                    if existing.payload_matches(report) {
                        return Ok(ReconcileOutcome::Deduped);
                    }

                    // Only a strictly newer received time is authoritative.
                    // Absent or equal-timestamp reports never overwrite.
                    let Some(received_time) = report.received_time else {
                        return Ok(ReconcileOutcome::Deduped);
                    };
                    if received_time <= existing.received_time {
                        return Ok(ReconcileOutcome::Deduped);
                    }

                    let event = NewEvent::from_report(report, received_time);
                    match self
                        .store
                        .update(&report.event_id, existing.version, &event)
                        .await
                    {
                        Ok(_) => return Ok(ReconcileOutcome::Updated),
                        // Someone else updated the record since our read;
                        // re-read and re-decide rather than blindly writing.
                        Err(StoreError::VersionConflict) => {
                            report_reconcile_conflict("update");
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        warn!(
            event_id = %report.event_id,
            attempts = self.max_attempts,
            "reconciliation retries exhausted"
        );
        Err(IngestError::RetriesExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    use crate::event::EventRecord;
    use crate::store::memory::MemoryEventStore;
    use crate::store::{EventStore, LineDefectTotals};
    use crate::time::FixedTime;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
    }

    fn received(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, second).unwrap()
    }

    fn sample(event_id: &str, defect_count: i32, received_time: Option<DateTime<Utc>>) -> EventReport {
        EventReport {
            event_id: event_id.to_string(),
            event_time: Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
            received_time,
            machine_id: "M1".to_string(),
            factory_id: "F1".to_string(),
            line_id: "L1".to_string(),
            duration_ms: 1000,
            defect_count,
        }
    }

    fn reconciler(store: Arc<MemoryEventStore>) -> Reconciler {
        Reconciler::new(store, Arc::new(FixedTime { time: now() }), 3)
    }

    #[tokio::test]
    async fn duplicate_is_deduped() {
        let store = Arc::new(MemoryEventStore::default());
        let reconciler = reconciler(store.clone());
        let report = sample("E1", 1, Some(received(0)));

        assert_eq!(
            reconciler.reconcile(&report).await.unwrap(),
            ReconcileOutcome::Accepted
        );
        assert_eq!(
            reconciler.reconcile(&report).await.unwrap(),
            ReconcileOutcome::Deduped
        );
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn newer_received_time_updates() {
        let store = Arc::new(MemoryEventStore::default());
        let reconciler = reconciler(store.clone());

        reconciler
            .reconcile(&sample("E2", 1, Some(received(5))))
            .await
            .unwrap();
        let outcome = reconciler
            .reconcile(&sample("E2", 2, Some(received(10))))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Updated);
        assert_eq!(store.record_count(), 1);
        let record = store.find_by_event_id("E2").await.unwrap().unwrap();
        assert_eq!(record.defect_count, 2);
        assert_eq!(record.received_time, received(10));
        assert_eq!(record.version, 2);
    }

    #[tokio::test]
    async fn older_received_time_is_ignored() {
        let store = Arc::new(MemoryEventStore::default());
        let reconciler = reconciler(store.clone());

        reconciler
            .reconcile(&sample("E3", 1, Some(received(10))))
            .await
            .unwrap();
        let outcome = reconciler
            .reconcile(&sample("E3", 2, Some(received(5))))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Deduped);
        let record = store.find_by_event_id("E3").await.unwrap().unwrap();
        assert_eq!(record.defect_count, 1);
    }

    #[tokio::test]
    async fn equal_received_time_never_overwrites() {
        // First writer for a given received time wins, even when the payload
        // differs.
        let store = Arc::new(MemoryEventStore::default());
        let reconciler = reconciler(store.clone());

        reconciler
            .reconcile(&sample("E4", 1, Some(received(5))))
            .await
            .unwrap();
        let outcome = reconciler
            .reconcile(&sample("E4", 7, Some(received(5))))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Deduped);
        let record = store.find_by_event_id("E4").await.unwrap().unwrap();
        assert_eq!(record.defect_count, 1);
    }

    #[tokio::test]
    async fn missing_received_time_never_overwrites() {
        let store = Arc::new(MemoryEventStore::default());
        let reconciler = reconciler(store.clone());

        reconciler
            .reconcile(&sample("E5", 1, Some(received(5))))
            .await
            .unwrap();
        let outcome = reconciler.reconcile(&sample("E5", 2, None)).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Deduped);
        let record = store.find_by_event_id("E5").await.unwrap().unwrap();
        assert_eq!(record.defect_count, 1);
    }

    #[tokio::test]
    async fn missing_received_time_filled_from_server_clock() {
        let store = Arc::new(MemoryEventStore::default());
        let reconciler = reconciler(store.clone());

        reconciler.reconcile(&sample("E6", 1, None)).await.unwrap();

        let record = store.find_by_event_id("E6").await.unwrap().unwrap();
        assert_eq!(record.received_time, now());
    }

    #[tokio::test]
    async fn validation_failure_reaches_no_store() {
        let store = Arc::new(MemoryEventStore::default());
        let reconciler = reconciler(store.clone());

        let mut report = sample("E7", 1, Some(received(0)));
        report.duration_ms = -10;
        let err = reconciler.reconcile(&report).await.unwrap_err();

        assert_eq!(err.reason_code(), "INVALID_DURATION");
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_same_id_reports_store_once() {
        let store = Arc::new(MemoryEventStore::default());
        let reconciler = Arc::new(reconciler(store.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let reconciler = reconciler.clone();
            handles.push(tokio::spawn(async move {
                reconciler
                    .reconcile(&sample("E8", 1, Some(received(0))))
                    .await
                    .unwrap()
            }));
        }

        let mut accepted = 0;
        let mut deduped = 0;
        for handle in handles {
            match handle.await.unwrap() {
                ReconcileOutcome::Accepted => accepted += 1,
                ReconcileOutcome::Deduped => deduped += 1,
                ReconcileOutcome::Updated => panic!("identical payloads never update"),
            }
        }

        assert_eq!(store.record_count(), 1);
        assert_eq!(accepted, 1);
        assert_eq!(deduped, 7);
    }

    /// Store wrapper that makes insert/update calls lose their race: the
    /// conflicting write is applied to the inner store first (as a concurrent
    /// winner would) and the caller gets the conflict error. The injected
    /// winner's received time is the caller's shifted by `winner_skew_secs`.
    struct RacingStore {
        inner: MemoryEventStore,
        steal_inserts: AtomicUsize,
        steal_updates: AtomicUsize,
        winner_skew_secs: i64,
    }

    impl RacingStore {
        fn new(steal_inserts: usize, steal_updates: usize, winner_skew_secs: i64) -> Self {
            Self {
                inner: MemoryEventStore::default(),
                steal_inserts: AtomicUsize::new(steal_inserts),
                steal_updates: AtomicUsize::new(steal_updates),
                winner_skew_secs,
            }
        }

        fn take(counter: &AtomicUsize) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }

        fn winner_for(&self, event: &NewEvent) -> NewEvent {
            let mut winner = event.clone();
            winner.received_time =
                winner.received_time + chrono::Duration::seconds(self.winner_skew_secs);
            winner.defect_count = 99;
            winner
        }
    }

    #[async_trait]
    impl EventStore for RacingStore {
        async fn find_by_event_id(
            &self,
            event_id: &str,
        ) -> Result<Option<EventRecord>, StoreError> {
            self.inner.find_by_event_id(event_id).await
        }

        async fn insert(&self, event: &NewEvent) -> Result<EventRecord, StoreError> {
            if Self::take(&self.steal_inserts) {
                self.inner.insert(&self.winner_for(event)).await?;
                return Err(StoreError::UniqueViolation);
            }
            self.inner.insert(event).await
        }

        async fn update(
            &self,
            event_id: &str,
            expected_version: i64,
            event: &NewEvent,
        ) -> Result<EventRecord, StoreError> {
            if Self::take(&self.steal_updates) {
                self.inner
                    .update(event_id, expected_version, &self.winner_for(event))
                    .await?;
                return Err(StoreError::VersionConflict);
            }
            self.inner.update(event_id, expected_version, event).await
        }

        async fn count_events(
            &self,
            machine_id: &str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<i64, StoreError> {
            self.inner.count_events(machine_id, start, end).await
        }

        async fn sum_defects(
            &self,
            machine_id: &str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Option<i64>, StoreError> {
            self.inner.sum_defects(machine_id, start, end).await
        }

        async fn line_defect_totals(
            &self,
            factory_id: &str,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<LineDefectTotals>, StoreError> {
            self.inner.line_defect_totals(factory_id, from, to).await
        }
    }

    #[tokio::test]
    async fn lost_insert_race_falls_through_to_dedupe() {
        let store = Arc::new(RacingStore::new(1, 0, 0));
        let reconciler = Reconciler::new(store.clone(), Arc::new(FixedTime { time: now() }), 3);

        // The "winner" stored a differing payload with the same received
        // time, so the loser re-reads and dedupes instead of erroring.
        let outcome = reconciler
            .reconcile(&sample("E9", 1, Some(received(0))))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Deduped);
        let record = store.find_by_event_id("E9").await.unwrap().unwrap();
        assert_eq!(record.defect_count, 99);
    }

    #[tokio::test]
    async fn lost_update_race_rereads_fresh_record() {
        let store = Arc::new(RacingStore::new(0, 1, 30));
        let reconciler = Reconciler::new(store.clone(), Arc::new(FixedTime { time: now() }), 3);

        reconciler
            .reconcile(&sample("E10", 1, Some(received(0))))
            .await
            .unwrap();

        // This report is newer than the stored record, but the injected
        // concurrent writer lands an even newer one first; after the re-read
        // the incoming report is no longer authoritative.
        let outcome = reconciler
            .reconcile(&sample("E10", 2, Some(received(10))))
            .await
            .unwrap();

        assert_eq!(outcome, ReconcileOutcome::Deduped);
        let record = store.find_by_event_id("E10").await.unwrap().unwrap();
        assert_eq!(record.defect_count, 99);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_transient_failure() {
        // Every attempt loses its update race to a winner that stays older
        // than the incoming report, so the decision never settles.
        let store = Arc::new(RacingStore::new(0, usize::MAX, -1));
        let reconciler = Reconciler::new(store.clone(), Arc::new(FixedTime { time: now() }), 3);

        reconciler
            .reconcile(&sample("E11", 1, Some(received(0))))
            .await
            .unwrap();

        let err = reconciler
            .reconcile(&sample("E11", 2, Some(received(10))))
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "RETRY_EXHAUSTED");
    }
}
