//! Postgres-backed event store.
//!
//! The unique constraint on `(aggregate_id, sequence_number)` is the optimistic
//! lock: two transactions that read the same stream version both try to insert
//! the same next sequence number and one of them fails with `23505`.
//!
//! | SQLx error                  | Code    | EventStoreError |
//! |-----------------------------|---------|-----------------|
//! | Database (unique violation) | `23505` | `Concurrency`   |
//! | Database (check violation)  | `23514` | `InvalidAppend` |
//! | Database (other)            | any     | `Backend`       |
//! | PoolClosed / IO / other     | n/a     | `Backend`       |
//!
//! The `EventStore` trait is synchronous (the domain runs on plain threads), so
//! the store keeps a runtime handle and blocks on it. Call it from a blocking
//! context (`spawn_blocking` or a worker thread), never from inside an async task.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::instrument;

use stockflow_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

const SCHEMA: &str = include_str!("../../migrations/0001_events.sql");

#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    runtime: Handle,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    /// Create the `events` table and indexes if they are missing.
    pub async fn migrate(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(aggregate_id = %aggregate_id), err)]
    pub async fn load_stream_async(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                payload
            FROM events
            WHERE aggregate_id = $1
            ORDER BY sequence_number ASC
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        rows.iter()
            .map(|row| {
                StoredEventRow::from_pg_row(row)
                    .map(StoredEvent::from)
                    .map_err(|e| EventStoreError::Backend(format!("failed to read event row: {e}")))
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    pub async fn load_by_aggregate_type_async(
        &self,
        aggregate_type: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                aggregate_id,
                aggregate_type,
                sequence_number,
                event_type,
                event_version,
                occurred_at,
                payload
            FROM events
            WHERE aggregate_type = $1
            ORDER BY aggregate_id ASC, sequence_number ASC
            "#,
        )
        .bind(aggregate_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_by_aggregate_type", e))?;

        rows.iter()
            .map(|row| {
                StoredEventRow::from_pg_row(row)
                    .map(StoredEvent::from)
                    .map_err(|e| EventStoreError::Backend(format!("failed to read event row: {e}")))
            })
            .collect()
    }

    #[instrument(
        skip(self, events),
        fields(event_count = events.len(), expected_version = ?expected_version),
        err
    )]
    pub async fn append_async(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some(first) = events.first() else {
            return Ok(vec![]);
        };
        let aggregate_id = first.aggregate_id;
        let aggregate_type = first.aggregate_type.clone();

        if let Some(idx) = events.iter().position(|e| e.aggregate_id != aggregate_id) {
            return Err(EventStoreError::InvalidAppend(format!(
                "batch contains multiple aggregate_ids (index {idx})"
            )));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let (current_version, existing_type) = check_stream_version(&mut tx, aggregate_id).await?;

        if let Some(existing_type) = existing_type {
            if existing_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{existing_type}', attempted append with '{aggregate_type}'"
                )));
            }
        }

        if !expected_version.matches(current_version) {
            return Err(EventStoreError::Concurrency(format!(
                "stream {aggregate_id}: expected {expected_version:?}, found {current_version}"
            )));
        }

        let mut stored_events = Vec::with_capacity(events.len());
        for (event, sequence_number) in events.into_iter().zip(current_version + 1..) {
            let sequence = i64::try_from(sequence_number).map_err(|_| {
                EventStoreError::InvalidAppend(format!("sequence number {sequence_number} overflows"))
            })?;

            sqlx::query(
                r#"
                INSERT INTO events (
                    event_id,
                    aggregate_id,
                    aggregate_type,
                    sequence_number,
                    event_type,
                    event_version,
                    occurred_at,
                    payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id)
            .bind(aggregate_id.as_uuid())
            .bind(&aggregate_type)
            .bind(sequence)
            .bind(&event.event_type)
            .bind(i32::try_from(event.event_version).unwrap_or(i32::MAX))
            .bind(event.occurred_at)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    EventStoreError::Concurrency(format!(
                        "stream {aggregate_id}: sequence {sequence_number} already written"
                    ))
                } else {
                    map_sqlx_error("insert_event", e)
                }
            })?;

            stored_events.push(StoredEvent {
                event_id: event.event_id,
                aggregate_id: event.aggregate_id,
                aggregate_type: event.aggregate_type,
                sequence_number,
                event_type: event.event_type,
                event_version: event.event_version,
                occurred_at: event.occurred_at,
                payload: event.payload,
            });
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(stored_events)
    }
}

impl EventStore for PostgresEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.runtime.block_on(self.append_async(events, expected_version))
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.runtime.block_on(self.load_stream_async(aggregate_id))
    }

    fn load_by_aggregate_type(
        &self,
        aggregate_type: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.runtime
            .block_on(self.load_by_aggregate_type_async(aggregate_type))
    }
}

/// Current `(version, aggregate_type)` of a stream; `(0, None)` when it does not exist.
async fn check_stream_version(
    tx: &mut Transaction<'_, Postgres>,
    aggregate_id: AggregateId,
) -> Result<(u64, Option<String>), EventStoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(MAX(sequence_number), 0) AS current_version,
            MAX(aggregate_type) AS aggregate_type
        FROM events
        WHERE aggregate_id = $1
        "#,
    )
    .bind(aggregate_id.as_uuid())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_stream_version", e))?;

    let current_version: i64 = row
        .try_get("current_version")
        .map_err(|e| EventStoreError::Backend(format!("failed to read current_version: {e}")))?;
    let aggregate_type: Option<String> = row
        .try_get("aggregate_type")
        .map_err(|e| EventStoreError::Backend(format!("failed to read aggregate_type: {e}")))?;

    Ok((u64::try_from(current_version).unwrap_or(0), aggregate_type))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => EventStoreError::Concurrency(msg),
                Some("23514") => EventStoreError::InvalidAppend(msg),
                _ => EventStoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::Backend(format!("connection pool closed in {operation}"))
        }
        other => EventStoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505")
    )
}

struct StoredEventRow {
    event_id: uuid::Uuid,
    aggregate_id: uuid::Uuid,
    aggregate_type: String,
    sequence_number: i64,
    event_type: String,
    event_version: i32,
    occurred_at: DateTime<Utc>,
    payload: serde_json::Value,
}

impl StoredEventRow {
    fn from_pg_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            event_id: row.try_get("event_id")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_type: row.try_get("aggregate_type")?,
            sequence_number: row.try_get("sequence_number")?,
            event_type: row.try_get("event_type")?,
            event_version: row.try_get("event_version")?,
            occurred_at: row.try_get("occurred_at")?,
            payload: row.try_get("payload")?,
        })
    }
}

impl From<StoredEventRow> for StoredEvent {
    fn from(row: StoredEventRow) -> Self {
        StoredEvent {
            event_id: row.event_id,
            aggregate_id: AggregateId::from_uuid(row.aggregate_id),
            aggregate_type: row.aggregate_type,
            sequence_number: u64::try_from(row.sequence_number).unwrap_or(0),
            event_type: row.event_type,
            event_version: u32::try_from(row.event_version).unwrap_or(0),
            occurred_at: row.occurred_at,
            payload: row.payload,
        }
    }
}
