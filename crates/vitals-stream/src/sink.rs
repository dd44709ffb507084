// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Destination store
//!
//! One reading becomes one row, written through a single positional insert
//! statement that is prepared once and reused for the life of the writer.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE patient_vitals (
//!     patient_id TEXT NOT NULL,
//!     recorded_time TEXT NOT NULL,
//!     heart_rate INTEGER NOT NULL,
//!     spo2 INTEGER NOT NULL,
//!     systolic_bp INTEGER NOT NULL,
//!     diastolic_bp INTEGER NOT NULL,
//!     body_temperature REAL NOT NULL,
//!     alert_flag TEXT NOT NULL
//! );
//! ```

use crate::config::validate_identifier;
use crate::error::{PipelineError, Result};
use crate::reading::{parse_timestamp, Reading};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, Statement};
use std::path::Path;

/// Sink trait
///
/// Persists one reading per call. Each call is its own transaction.
pub trait ReadingSink {
    /// Insert a reading as one row.
    ///
    /// Fails with `WriteRejected` when the store refuses the row and
    /// `StoreUnavailable` when the connection is unusable.
    fn insert(&mut self, reading: &Reading) -> Result<()>;
}

/// SQLite store handle
///
/// Owns the connection. Dropping the store closes it.
pub struct SqliteStore {
    conn: Connection,
    table: String,
}

impl SqliteStore {
    /// Open (or create) a file-based database
    pub fn open<P: AsRef<Path>>(path: P, table: &str, create_table: bool) -> Result<Self> {
        validate_identifier(table)?;
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            PipelineError::StoreUnavailable(format!(
                "failed to open {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::with_connection(conn, table, create_table)
    }

    /// Create an in-memory database (for testing)
    pub fn open_in_memory(table: &str) -> Result<Self> {
        validate_identifier(table)?;
        let conn = Connection::open_in_memory()
            .map_err(|e| PipelineError::StoreUnavailable(e.to_string()))?;

        Self::with_connection(conn, table, true)
    }

    fn with_connection(conn: Connection, table: &str, create_table: bool) -> Result<Self> {
        let store = Self {
            conn,
            table: table.to_string(),
        };
        if create_table {
            store.init_schema()?;
        }
        Ok(store)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        patient_id TEXT NOT NULL,
                        recorded_time TEXT NOT NULL,
                        heart_rate INTEGER NOT NULL,
                        spo2 INTEGER NOT NULL,
                        systolic_bp INTEGER NOT NULL,
                        diastolic_bp INTEGER NOT NULL,
                        body_temperature REAL NOT NULL,
                        alert_flag TEXT NOT NULL
                    )",
                    self.table
                ),
                [],
            )
            .map_err(|e| PipelineError::StoreUnavailable(format!("schema: {e}")))?;

        Ok(())
    }

    /// Destination table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Underlying connection (used by tests and maintenance commands)
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Prepare the insert statement and return a writer bound to it.
    pub fn writer(&self) -> Result<SqliteWriter<'_>> {
        let sql = format!(
            "INSERT INTO {} VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            self.table
        );
        let stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| PipelineError::StoreUnavailable(format!("prepare insert: {e}")))?;

        Ok(SqliteWriter { stmt })
    }

    /// Number of rows in the destination table
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }

    /// Number of distinct patients in the destination table
    pub fn patient_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(DISTINCT patient_id) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }

    /// Earliest and latest `recorded_time`, or `None` for an empty table.
    ///
    /// The canonical text form sorts chronologically, so SQL `MIN`/`MAX`
    /// over the column is exact.
    pub fn time_range(&self) -> Result<Option<(NaiveDateTime, NaiveDateTime)>> {
        let (min, max): (Option<String>, Option<String>) = self.conn.query_row(
            &format!(
                "SELECT MIN(recorded_time), MAX(recorded_time) FROM {}",
                self.table
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        match (min, max) {
            (Some(min), Some(max)) => Ok(Some((stored_time(&min)?, stored_time(&max)?))),
            _ => Ok(None),
        }
    }

    /// Row count per alert flag, ordered by flag
    pub fn alert_counts(&self) -> Result<Vec<(String, usize)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT alert_flag, COUNT(*) FROM {} GROUP BY alert_flag ORDER BY alert_flag",
            self.table
        ))?;

        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(counts)
    }

    /// All rows in insertion order
    pub fn load_all(&self) -> Result<Vec<Reading>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT patient_id, recorded_time, heart_rate, spo2, systolic_bp,
                    diastolic_bp, body_temperature, alert_flag
             FROM {}
             ORDER BY rowid ASC",
            self.table
        ))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i32>(2)?,
                    row.get::<_, i32>(3)?,
                    row.get::<_, i32>(4)?,
                    row.get::<_, i32>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(patient_id, ts, hr, spo2, sys, dia, temp, alert)| {
                let recorded_time = stored_time(&ts)?;
                Ok(Reading {
                    patient_id,
                    recorded_time,
                    heart_rate: hr,
                    spo2,
                    systolic_bp: sys,
                    diastolic_bp: dia,
                    body_temperature: temp,
                    alert_flag: alert,
                })
            })
            .collect()
    }
}

fn stored_time(text: &str) -> Result<NaiveDateTime> {
    parse_timestamp(text).ok_or(PipelineError::TypeMismatch {
        field: "recorded_time",
        expected: "date-time",
    })
}

/// Insert writer holding the prepared statement.
///
/// Borrows the store, so the statement cannot outlive its connection.
pub struct SqliteWriter<'conn> {
    stmt: Statement<'conn>,
}

impl ReadingSink for SqliteWriter<'_> {
    fn insert(&mut self, reading: &Reading) -> Result<()> {
        let changed = self.stmt.execute(params![
            reading.patient_id,
            reading.recorded_time_text(),
            reading.heart_rate,
            reading.spo2,
            reading.systolic_bp,
            reading.diastolic_bp,
            reading.body_temperature,
            reading.alert_flag,
        ])?;

        if changed != 1 {
            return Err(PipelineError::WriteRejected(format!(
                "expected 1 row inserted, store reported {}",
                changed
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::format_timestamp;
    use crate::record::decode_line;

    fn reading(line: &str) -> Reading {
        decode_line(line, b',', 2).unwrap()
    }

    #[test]
    fn test_sqlite_insert_and_load() {
        let store = SqliteStore::open_in_memory("patient_vitals").unwrap();
        let mut writer = store.writer().unwrap();

        let first = reading("P001,2024-01-01 10:00:00,88,97,120,80,36.6,normal");
        let second = reading("P002,2024-01-01 10:00:01,131,88,162,101,39.1,critical");
        writer.insert(&first).unwrap();
        writer.insert(&second).unwrap();
        drop(writer);

        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.load_all().unwrap(), vec![first, second]);
    }

    #[test]
    fn test_sqlite_row_matches_fields() {
        let store = SqliteStore::open_in_memory("patient_vitals").unwrap();
        store
            .writer()
            .unwrap()
            .insert(&reading("P001,2024-01-01 10:00:00,88,97,120,80,36.6,normal"))
            .unwrap();

        let row: (String, String, i64, i64, i64, i64, f64, String) = store
            .connection()
            .query_row("SELECT * FROM patient_vitals", [], |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                    r.get(5)?,
                    r.get(6)?,
                    r.get(7)?,
                ))
            })
            .unwrap();

        assert_eq!(
            row,
            (
                "P001".to_string(),
                "2024-01-01 10:00:00".to_string(),
                88,
                97,
                120,
                80,
                36.6,
                "normal".to_string()
            )
        );
    }

    #[test]
    fn test_sqlite_rejected_row_keeps_previous_rows() {
        let store = SqliteStore::open_in_memory("patient_vitals").unwrap();
        store
            .connection()
            .execute_batch(
                "CREATE TRIGGER reject_unknown BEFORE INSERT ON patient_vitals
                 WHEN NEW.patient_id = 'UNKNOWN'
                 BEGIN SELECT RAISE(ABORT, 'unknown patient'); END;",
            )
            .unwrap();

        let mut writer = store.writer().unwrap();
        writer
            .insert(&reading("P001,2024-01-01 10:00:00,88,97,120,80,36.6,normal"))
            .unwrap();

        let err = writer
            .insert(&reading("UNKNOWN,2024-01-01 10:00:01,90,96,121,79,36.7,normal"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::WriteRejected(_)));
        assert!(!err.is_fatal());

        // The writer stays usable after a rejection.
        writer
            .insert(&reading("P002,2024-01-01 10:00:02,91,98,119,81,36.5,normal"))
            .unwrap();
        drop(writer);

        let ids: Vec<String> = store
            .load_all()
            .unwrap()
            .into_iter()
            .map(|r| r.patient_id)
            .collect();
        assert_eq!(ids, vec!["P001", "P002"]);
    }

    #[test]
    fn test_sqlite_summary_ignores_insertion_order() {
        let store = SqliteStore::open_in_memory("patient_vitals").unwrap();
        assert_eq!(store.time_range().unwrap(), None);

        let mut writer = store.writer().unwrap();
        for line in [
            "P002,2024-01-01 10:00:05,90,97,120,80,36.6,normal",
            "P001,2024-01-01 09:59:59.250,131,88,162,101,39.1,critical",
            "P001,2024-01-01 10:00:10,88,97,120,80,36.6,normal",
            "P003,2024-01-01 10:00:00,110,92,145,95,38.2,warning",
        ] {
            writer.insert(&reading(line)).unwrap();
        }
        drop(writer);

        let (earliest, latest) = store.time_range().unwrap().unwrap();
        assert_eq!(format_timestamp(&earliest), "2024-01-01 09:59:59.250");
        assert_eq!(format_timestamp(&latest), "2024-01-01 10:00:10");

        assert_eq!(store.count().unwrap(), 4);
        assert_eq!(store.patient_count().unwrap(), 3);
        assert_eq!(
            store.alert_counts().unwrap(),
            vec![
                ("critical".to_string(), 1),
                ("normal".to_string(), 2),
                ("warning".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_sqlite_file_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vitals.db");

        {
            let store = SqliteStore::open(&path, "patient_vitals", true).unwrap();
            let mut writer = store.writer().unwrap();
            writer
                .insert(&reading("P001,2024-01-01 10:00:00,88,97,120,80,36.6,normal"))
                .unwrap();
        }

        let reopened = SqliteStore::open(&path, "patient_vitals", false).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }

    #[test]
    fn test_sqlite_missing_table_fails_at_prepare() {
        let store = SqliteStore::open_in_memory("patient_vitals").unwrap();
        store
            .connection()
            .execute_batch("DROP TABLE patient_vitals")
            .unwrap();

        let err = store.writer().err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_sqlite_rejects_bad_table_name() {
        assert!(SqliteStore::open_in_memory("vitals; DROP TABLE x").is_err());
    }
}
