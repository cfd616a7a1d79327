use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use tracing::instrument;

use crate::event::{EventRecord, NewEvent};
use crate::store::{EventStore, LineDefectTotals, StoreError};

const RECORD_COLUMNS: &str = "id, event_id, event_time, received_time, machine_id, factory_id, line_id, duration_ms, defect_count, version";

pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = common_database::get_pool(url, max_connections).await?;
        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(skip(self))]
    async fn find_by_event_id(&self, event_id: &str) -> Result<Option<EventRecord>, StoreError> {
        let record = sqlx::query_as::<_, EventRecord>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM machine_events
            WHERE event_id = $1
            "#
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[instrument(skip(self, event), fields(event_id = %event.event_id))]
    async fn insert(&self, event: &NewEvent) -> Result<EventRecord, StoreError> {
        let record = sqlx::query_as::<_, EventRecord>(&format!(
            r#"
            INSERT INTO machine_events
                (event_id, event_time, received_time, machine_id, factory_id, line_id, duration_ms, defect_count, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1)
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(&event.event_id)
        .bind(event.event_time)
        .bind(event.received_time)
        .bind(&event.machine_id)
        .bind(&event.factory_id)
        .bind(&event.line_id)
        .bind(event.duration_ms)
        .bind(event.defect_count)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if common_database::is_unique_violation_error(&e) {
                StoreError::UniqueViolation
            } else {
                StoreError::Database(e)
            }
        })?;

        Ok(record)
    }

    #[instrument(skip(self, event), fields(event_id = %event.event_id))]
    async fn update(
        &self,
        event_id: &str,
        expected_version: i64,
        event: &NewEvent,
    ) -> Result<EventRecord, StoreError> {
        let record = sqlx::query_as::<_, EventRecord>(&format!(
            r#"
            UPDATE machine_events
            SET event_time = $3,
                received_time = $4,
                machine_id = $5,
                factory_id = $6,
                line_id = $7,
                duration_ms = $8,
                defect_count = $9,
                version = version + 1
            WHERE event_id = $1 AND version = $2
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(event_id)
        .bind(expected_version)
        .bind(event.event_time)
        .bind(event.received_time)
        .bind(&event.machine_id)
        .bind(&event.factory_id)
        .bind(&event.line_id)
        .bind(event.duration_ms)
        .bind(event.defect_count)
        .fetch_optional(&self.pool)
        .await?;

        // Zero rows means another writer moved the version since our read.
        record.ok_or(StoreError::VersionConflict)
    }

    async fn count_events(
        &self,
        machine_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM machine_events
            WHERE machine_id = $1
              AND event_time >= $2 AND event_time < $3
            "#,
        )
        .bind(machine_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn sum_defects(
        &self,
        machine_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<i64>, StoreError> {
        let sum = sqlx::query_scalar::<_, Option<i64>>(
            r#"
            SELECT SUM(defect_count)::BIGINT
            FROM machine_events
            WHERE machine_id = $1
              AND defect_count >= 0
              AND event_time >= $2 AND event_time < $3
            "#,
        )
        .bind(machine_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(sum)
    }

    async fn line_defect_totals(
        &self,
        factory_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LineDefectTotals>, StoreError> {
        let totals = sqlx::query_as::<_, LineDefectTotals>(
            r#"
            SELECT line_id, SUM(defect_count)::BIGINT AS total_defects, COUNT(*) AS event_count
            FROM machine_events
            WHERE factory_id = $1
              AND defect_count >= 0
              AND event_time >= $2 AND event_time < $3
            GROUP BY line_id
            "#,
        )
        .bind(factory_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(totals)
    }
}
