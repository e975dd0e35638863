//! `SQLite` database connection and the durable queue store.
//!
//! The database lives at `~/.caresync/queue.db` and holds the offline
//! mutation queue in the `offline_queue` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::migrations;
use super::store::QueueStore;
use crate::error::SyncError;
use crate::sync::{ItemStatus, OperationKind, QueueRecord};

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open the database at a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_at(path: &std::path::Path) -> Result<Self, SyncError> {
        let conn = Connection::open(path).map_err(|e| {
            SyncError::Database(format!("Failed to open database {}: {e}", path.display()))
        })?;

        // WAL keeps readers off the writer's back; FULL sync makes each
        // commit durable before the mutating call returns.
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = FULL;")
            .map_err(|e| SyncError::database("Failed to configure database", &e))?;

        let db = Self { conn };
        db.migrate()?;

        Ok(db)
    }

    /// Open an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SyncError::database("Failed to open in-memory database", &e))?;

        let db = Self { conn };
        db.migrate()?;

        Ok(db)
    }

    fn migrate(&self) -> Result<(), SyncError> {
        migrations::run(&self.conn)
    }

    /// Get the current schema version.
    ///
    /// # Errors
    ///
    /// Returns an error if the version cannot be read.
    pub fn schema_version(&self) -> Result<i32, SyncError> {
        migrations::get_version(&self.conn)
    }
}

impl QueueStore for Database {
    fn load_all(&self) -> Result<Vec<QueueRecord>, SyncError> {
        let mut stmt = self
            .conn
            .prepare(
                r"SELECT id, seq, kind, resource_type, payload, created_at, attempts,
                         priority, status, last_error, last_attempt_at
                  FROM offline_queue
                  ORDER BY seq ASC",
            )
            .map_err(|e| SyncError::database("Failed to prepare query", &e))?;

        let rows = stmt
            .query_map([], row_to_record)
            .map_err(|e| SyncError::database("Failed to load queue", &e))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|e| SyncError::database("Failed to read queue row", &e))?);
        }

        Ok(records)
    }

    fn put(&self, record: &QueueRecord) -> Result<(), SyncError> {
        let payload = serde_json::to_string(&record.payload)?;

        self.conn
            .execute(
                r"INSERT OR REPLACE INTO offline_queue
                  (id, seq, kind, resource_type, payload, created_at, attempts,
                   priority, status, last_error, last_attempt_at)
                  VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.id,
                    record.seq,
                    record.kind.as_str(),
                    record.resource_type,
                    payload,
                    record.created_at.to_rfc3339(),
                    record.attempts,
                    record.priority,
                    record.status.as_str(),
                    record.last_error,
                    record.last_attempt_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| SyncError::database("Failed to write queue item", &e))?;

        Ok(())
    }

    fn remove(&self, id: &str) -> Result<bool, SyncError> {
        let rows = self
            .conn
            .execute("DELETE FROM offline_queue WHERE id = ?1", [id])
            .map_err(|e| SyncError::database("Failed to remove queue item", &e))?;

        Ok(rows > 0)
    }

    fn remove_many(&self, ids: &[String]) -> Result<usize, SyncError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| SyncError::database("Failed to begin transaction", &e))?;

        let mut removed = 0;
        for id in ids {
            removed += tx
                .execute("DELETE FROM offline_queue WHERE id = ?1", [id])
                .map_err(|e| SyncError::database("Failed to remove queue item", &e))?;
        }

        tx.commit()
            .map_err(|e| SyncError::database("Failed to commit removal", &e))?;

        Ok(removed)
    }

    fn clear(&self) -> Result<(), SyncError> {
        self.conn
            .execute("DELETE FROM offline_queue", [])
            .map_err(|e| SyncError::database("Failed to clear queue", &e))?;

        Ok(())
    }
}

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn parse_timestamp(column: usize, value: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

fn row_to_record(row: &Row<'_>) -> Result<QueueRecord, rusqlite::Error> {
    let kind_str: String = row.get(2)?;
    let payload_str: String = row.get(4)?;
    let created_at_str: String = row.get(5)?;
    let status_str: String = row.get(8)?;
    let last_attempt_str: Option<String> = row.get(10)?;

    let kind = kind_str
        .parse::<OperationKind>()
        .map_err(|e| conversion_error(2, e))?;
    let status = status_str
        .parse::<ItemStatus>()
        .map_err(|e| conversion_error(8, e))?;
    let payload = serde_json::from_str(&payload_str).map_err(|e| conversion_error(4, e))?;
    let last_attempt_at = last_attempt_str
        .map(|s| parse_timestamp(10, &s))
        .transpose()?;

    Ok(QueueRecord {
        id: row.get(0)?,
        seq: row.get(1)?,
        kind,
        resource_type: row.get(3)?,
        payload,
        created_at: parse_timestamp(5, &created_at_str)?,
        attempts: row.get(6)?,
        priority: row.get(7)?,
        status,
        last_error: row.get(9)?,
        last_attempt_at,
    })
}
