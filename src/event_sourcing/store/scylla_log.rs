use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use scylla::client::session::Session;
use scylla::statement::batch::Batch;
use scylla::value::{CqlValue, Row};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

use super::event_log::{EventLog, EventStream, LogError};

// ============================================================================
// ScyllaDB Event Log
// ============================================================================
//
// Stores every entity stream in one table:
//
//   entity_events (stream_id, sequence_number, event_id, payload, created_at)
//   PRIMARY KEY ((stream_id), sequence_number)
//
// Rows of one stream share a partition and are clustered by sequence
// number, so reading a partition returns the stream in append order.
// Payloads are JSON encoded with serde_json.
//
// Appends are a single-partition conditional batch (INSERT ... IF NOT
// EXISTS per sequence number). If another writer already took one of the
// sequence numbers, nothing from the batch is written and the append fails
// with Conflict.
//
// ============================================================================

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS entity_events (
    stream_id text,
    sequence_number bigint,
    event_id uuid,
    payload text,
    created_at timestamp,
    PRIMARY KEY ((stream_id), sequence_number)
) WITH CLUSTERING ORDER BY (sequence_number ASC)";

const INSERT_EVENT: &str = "INSERT INTO entity_events (
    stream_id, sequence_number, event_id, payload, created_at
) VALUES (?, ?, ?, ?, ?) IF NOT EXISTS";

pub struct ScyllaEventLog<E> {
    session: Arc<Session>,
    _phantom: PhantomData<fn() -> E>,
}

impl<E> ScyllaEventLog<E>
where
    E: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            _phantom: PhantomData,
        }
    }

    /// Create the events table in the session's current keyspace.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        self.session.query_unpaged(CREATE_TABLE, &[]).await?;
        tracing::info!("entity_events table ready");
        Ok(())
    }

    /// Current version (number of stored events) of a stream.
    pub async fn current_version(&self, stream: &str) -> anyhow::Result<u64> {
        let result = self
            .session
            .query_unpaged(
                "SELECT sequence_number FROM entity_events
                 WHERE stream_id = ?
                 ORDER BY sequence_number DESC LIMIT 1",
                (stream,),
            )
            .await?;

        let rows_result = result.into_rows_result()?;
        let latest = rows_result.maybe_first_row::<(i64,)>()?;
        Ok(latest.map_or(0, |(sequence,)| sequence as u64))
    }

    /// Write `events` after `expected_version`. `None` if the condition failed.
    async fn write_batch(&self, stream: &str, expected_version: u64, events: &[E]) -> anyhow::Result<Option<u64>> {
        let mut batch = Batch::default();
        let mut values = Vec::with_capacity(events.len());
        let mut version = expected_version;

        for event in events {
            version += 1;
            batch.append_statement(INSERT_EVENT);
            values.push((
                stream.to_string(),
                version as i64,
                Uuid::new_v4(),
                serde_json::to_string(event)?,
                Utc::now(),
            ));
        }

        let result = self.session.batch(&batch, values).await?;
        let rows_result = result.into_rows_result()?;
        let first = rows_result
            .maybe_first_row::<Row>()?
            .ok_or_else(|| anyhow::anyhow!("conditional batch returned no result row"))?;

        if batch_applied(&first)? {
            Ok(Some(version))
        } else {
            Ok(None)
        }
    }

    async fn load_rows(&self, stream: &str) -> anyhow::Result<Vec<(i64, String)>> {
        let result = self
            .session
            .query_unpaged(
                "SELECT sequence_number, event_id, payload, created_at
                 FROM entity_events
                 WHERE stream_id = ?
                 ORDER BY sequence_number ASC",
                (stream,),
            )
            .await?;

        let rows_result = result.into_rows_result()?;

        let mut rows = Vec::new();
        for row in rows_result.rows::<(i64, Uuid, String, DateTime<Utc>)>()? {
            let (sequence_number, event_id, payload, _created_at) = row?;
            tracing::trace!(stream = %stream, sequence_number, event_id = %event_id, "Loaded event row");
            rows.push((sequence_number, payload));
        }

        Ok(rows)
    }
}

#[async_trait]
impl<E> EventLog<E> for ScyllaEventLog<E>
where
    E: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn append(&self, stream: &str, expected_version: u64, events: &[E]) -> Result<u64, LogError> {
        if events.is_empty() {
            return Ok(expected_version);
        }

        let actual = self.current_version(stream).await?;
        if actual != expected_version {
            return Err(LogError::Conflict {
                stream: stream.to_string(),
                expected: expected_version,
                actual,
            });
        }

        // Another writer may still get in between the read and the batch;
        // the batch condition catches that.
        let Some(new_version) = self.write_batch(stream, expected_version, events).await? else {
            let actual = self.current_version(stream).await?;
            tracing::warn!(
                stream = %stream,
                expected = expected_version,
                actual,
                "Conditional append lost to a concurrent writer"
            );
            return Err(LogError::Conflict {
                stream: stream.to_string(),
                expected: expected_version,
                actual,
            });
        };

        tracing::debug!(
            stream = %stream,
            new_version,
            event_count = events.len(),
            "Appended events to ScyllaDB"
        );

        Ok(new_version)
    }

    async fn read_all(&self, stream: &str) -> Result<EventStream<'static, E>, LogError> {
        let rows = self.load_rows(stream).await?;
        let stream_name = stream.to_string();

        let items = rows.into_iter().enumerate().map(move |(position, (sequence, payload))| {
            let position = position as u64;
            if sequence as u64 != position + 1 {
                return Err(LogError::Corrupt {
                    stream: stream_name.clone(),
                    position,
                    reason: format!("sequence gap: found {}", sequence),
                });
            }
            serde_json::from_str::<E>(&payload).map_err(|e| LogError::Corrupt {
                stream: stream_name.clone(),
                position,
                reason: e.to_string(),
            })
        });

        Ok(stream::iter(items).boxed())
    }
}

/// The `[applied]` column leading the result of a conditional statement.
fn batch_applied(row: &Row) -> anyhow::Result<bool> {
    match row.columns.first() {
        Some(Some(CqlValue::Boolean(applied))) => Ok(*applied),
        other => Err(anyhow::anyhow!("unexpected conditional batch result: {:?}", other)),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
//
// Reads and writes need a running ScyllaDB node; they are exercised by the
// demo binary with SCYLLA_URI set. Here we only check the statements.
//
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_partitions_by_stream() {
        assert!(CREATE_TABLE.contains("PRIMARY KEY ((stream_id), sequence_number)"));
        assert!(CREATE_TABLE.contains("CLUSTERING ORDER BY (sequence_number ASC)"));
    }

    #[test]
    fn test_insert_binds_every_column() {
        assert_eq!(INSERT_EVENT.matches('?').count(), 5);
    }

    #[test]
    fn test_insert_is_conditional() {
        assert!(INSERT_EVENT.trim_end().ends_with("IF NOT EXISTS"));
    }

    #[test]
    fn test_batch_applied_reads_leading_column() {
        let applied = Row {
            columns: vec![Some(CqlValue::Boolean(true))],
        };
        assert!(batch_applied(&applied).unwrap());

        // A lost condition echoes the existing row after [applied].
        let lost = Row {
            columns: vec![
                Some(CqlValue::Boolean(false)),
                Some(CqlValue::Text("Ride-1".to_string())),
                Some(CqlValue::BigInt(4)),
            ],
        };
        assert!(!batch_applied(&lost).unwrap());
    }

    #[test]
    fn test_batch_applied_rejects_malformed_result() {
        assert!(batch_applied(&Row { columns: vec![] }).is_err());
        assert!(batch_applied(&Row {
            columns: vec![Some(CqlValue::Int(1))]
        })
        .is_err());
    }
}
