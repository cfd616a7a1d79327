use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::event::{EventRecord, NewEvent};
use crate::store::{EventStore, LineDefectTotals, StoreError};

/// Mutex-protected map standing in for the relational store. Used by tests
/// and by local development (`USE_MEMORY_STORE=true`); enforces the same
/// uniqueness and version semantics as the Postgres implementation.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    records: HashMap<String, EventRecord>,
}

impl MemoryEventStore {
    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("event store mutex poisoned")
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn find_by_event_id(&self, event_id: &str) -> Result<Option<EventRecord>, StoreError> {
        Ok(self.lock().records.get(event_id).cloned())
    }

    async fn insert(&self, event: &NewEvent) -> Result<EventRecord, StoreError> {
        let mut inner = self.lock();
        if inner.records.contains_key(&event.event_id) {
            return Err(StoreError::UniqueViolation);
        }

        inner.next_id += 1;
        let record = EventRecord {
            id: inner.next_id,
            event_id: event.event_id.clone(),
            event_time: event.event_time,
            received_time: event.received_time,
            machine_id: event.machine_id.clone(),
            factory_id: event.factory_id.clone(),
            line_id: event.line_id.clone(),
            duration_ms: event.duration_ms,
            defect_count: event.defect_count,
            version: 1,
        };
        inner.records.insert(event.event_id.clone(), record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        event_id: &str,
        expected_version: i64,
        event: &NewEvent,
    ) -> Result<EventRecord, StoreError> {
        let mut inner = self.lock();
        let record = inner
            .records
            .get_mut(event_id)
            .ok_or(StoreError::VersionConflict)?;
        if record.version != expected_version {
            return Err(StoreError::VersionConflict);
        }

        record.event_time = event.event_time;
        record.received_time = event.received_time;
        record.machine_id = event.machine_id.clone();
        record.factory_id = event.factory_id.clone();
        record.line_id = event.line_id.clone();
        record.duration_ms = event.duration_ms;
        record.defect_count = event.defect_count;
        record.version += 1;
        Ok(record.clone())
    }

    async fn count_events(
        &self,
        machine_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let count = self
            .lock()
            .records
            .values()
            .filter(|r| r.machine_id == machine_id && r.event_time >= start && r.event_time < end)
            .count();
        Ok(count as i64)
    }

    async fn sum_defects(
        &self,
        machine_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<i64>, StoreError> {
        let defects: Vec<i64> = self
            .lock()
            .records
            .values()
            .filter(|r| {
                r.machine_id == machine_id
                    && r.defect_count >= 0
                    && r.event_time >= start
                    && r.event_time < end
            })
            .map(|r| i64::from(r.defect_count))
            .collect();

        if defects.is_empty() {
            return Ok(None);
        }
        Ok(Some(defects.iter().sum()))
    }

    async fn line_defect_totals(
        &self,
        factory_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LineDefectTotals>, StoreError> {
        let mut by_line: HashMap<String, LineDefectTotals> = HashMap::new();
        for record in self.lock().records.values() {
            if record.factory_id != factory_id
                || record.defect_count < 0
                || record.event_time < from
                || record.event_time >= to
            {
                continue;
            }
            let entry = by_line
                .entry(record.line_id.clone())
                .or_insert_with(|| LineDefectTotals {
                    line_id: record.line_id.clone(),
                    total_defects: 0,
                    event_count: 0,
                });
            entry.total_defects += i64::from(record.defect_count);
            entry.event_count += 1;
        }
        Ok(by_line.into_values().collect())
    }
}
