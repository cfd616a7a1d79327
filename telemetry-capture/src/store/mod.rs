use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::event::{EventRecord, NewEvent};

pub mod memory;
pub mod postgres;

pub type DynEventStore = Arc<dyn EventStore + Send + Sync>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("a record with this event id already exists")]
    UniqueViolation,
    #[error("the record changed since it was read")]
    VersionConflict,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Per-line defect totals for one factory window, as returned by the store's
/// grouping query. Ranking and percentage math happen in `stats`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LineDefectTotals {
    pub line_id: String,
    pub total_defects: i64,
    pub event_count: i64,
}

/// What reconciliation requires from the persistence collaborator: a lookup,
/// an insert that fails distinguishably on the `event_id` uniqueness
/// constraint, an update conditioned on the version observed at read time,
/// and the three read-side aggregations.
#[async_trait]
pub trait EventStore {
    async fn find_by_event_id(&self, event_id: &str) -> Result<Option<EventRecord>, StoreError>;

    /// Insert a new record with version 1. Returns `UniqueViolation` if any
    /// record for this `event_id` exists, committed or concurrent.
    async fn insert(&self, event: &NewEvent) -> Result<EventRecord, StoreError>;

    /// Overwrite every mutable field of the record, provided its version is
    /// still `expected_version`. Returns `VersionConflict` otherwise.
    async fn update(
        &self,
        event_id: &str,
        expected_version: i64,
        event: &NewEvent,
    ) -> Result<EventRecord, StoreError>;

    /// Count of records for the machine with `start <= event_time < end`.
    async fn count_events(
        &self,
        machine_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    /// Sum of non-negative defect counts over the same window; `None` when no
    /// record matches.
    async fn sum_defects(
        &self,
        machine_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<i64>, StoreError>;

    /// Per-line totals for the factory window, excluding negative-defect
    /// sentinel records from both the sums and the counts.
    async fn line_defect_totals(
        &self,
        factory_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LineDefectTotals>, StoreError>;
}
