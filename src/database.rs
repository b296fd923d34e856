// src/database.rs
use std::path::Path;

use rusqlite::{params, Connection, OpenFlags};
use tracing::{debug, error, info};

use crate::{errors::MeterRecorderError, models::Reading};

/// Append-only store of accepted meter readings
pub struct Database {
    connection: Connection,
}

impl Database {
    /// Open or create the database at `path` and make sure the schema exists
    pub fn open(path: &Path) -> Result<Self, MeterRecorderError> {
        let conn = match Self::open_database(path) {
            Ok(connection) => connection,
            Err(e) => {
                error!("Failed to open database: {}", e);
                return Err(e);
            }
        };

        match Self::create_tables_indices(&conn) {
            Ok(_) => Ok(Self { connection: conn }),
            Err(e) => {
                error!("Failed to create database tables: {}", e);
                Err(e)
            }
        }
    }

    fn open_database(path: &Path) -> Result<Connection, MeterRecorderError> {
        info!("Opening database at {}", path.display());
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_READ_WRITE,
        )
        .map_err(|e| MeterRecorderError::DatabaseOpenError {
            path: path.to_path_buf(),
            origin: e.to_string(),
        })?;

        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| MeterRecorderError::DatabaseConfigError {
                message: "Failed to set journal_mode".to_string(),
                origin: e.to_string(),
            })?;

        // Every commit reaches disk before the next decoder line is read.
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(|e| MeterRecorderError::DatabaseConfigError {
                message: "Failed to set synchronous mode".to_string(),
                origin: e.to_string(),
            })?;
        Ok(conn)
    }

    /// Create table `meter_readings` and its lookup index if absent.
    fn create_tables_indices(conn: &Connection) -> Result<(), MeterRecorderError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS meter_readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                datetime INTEGER NOT NULL,
                type TEXT NOT NULL,
                endpoint_id INTEGER NOT NULL,
                reading REAL NOT NULL
            )",
            [],
        )
        .map_err(|e| MeterRecorderError::TableCreationError {
            table: "meter_readings".to_string(),
            origin: e.to_string(),
        })?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_meter_readings_endpoint
                ON meter_readings(type, endpoint_id, datetime)",
            [],
        )
        .map_err(|e| MeterRecorderError::IndexCreationError {
            index: "idx_meter_readings_endpoint".to_string(),
            origin: e.to_string(),
        })?;

        Ok(())
    }

    /// Append one reading in its own transaction, returning the row id
    pub fn insert_reading(&mut self, reading: &Reading) -> Result<i64, MeterRecorderError> {
        let tx = self.connection.transaction()?;
        tx.execute(
            "INSERT INTO meter_readings (
                datetime, type, endpoint_id, reading
            ) VALUES (?1, ?2, ?3, ?4)",
            params![
                reading.timestamp,
                reading.meter_type,
                reading.endpoint_id,
                reading.consumption
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!(id, endpoint_id = reading.endpoint_id, "Persisted reading");
        Ok(id)
    }

    /// Total number of stored readings
    pub fn count_readings(&self) -> Result<i64, MeterRecorderError> {
        let count = self
            .connection
            .query_row("SELECT COUNT(*) FROM meter_readings", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn reading(timestamp: i64, endpoint_id: i64, consumption: f64) -> Reading {
        Reading {
            timestamp,
            meter_type: "SCM".to_string(),
            endpoint_id,
            consumption,
        }
    }

    #[test]
    fn test_insert_reading() -> Result<(), MeterRecorderError> {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let mut db = Database::open(&db_path)?;

        let id = db.insert_reading(&reading(1682954130, 42, 100.5))?;

        let conn = Connection::open(&db_path)?;
        let stored: (i64, String, i64, f64) = conn.query_row(
            "SELECT datetime, type, endpoint_id, reading FROM meter_readings WHERE id = ?1",
            [id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        assert_eq!(stored, (1682954130, "SCM".to_string(), 42, 100.5));
        Ok(())
    }

    #[test]
    fn test_schema_creation_is_idempotent() -> Result<(), MeterRecorderError> {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let mut db = Database::open(&db_path)?;
        db.insert_reading(&reading(1682954130, 42, 100.5))?;
        drop(db);

        let db = Database::open(&db_path)?;
        assert_eq!(db.count_readings()?, 1);

        let conn = Connection::open(&db_path)?;
        let tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'meter_readings'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(tables, 1);
        Ok(())
    }

    #[test]
    fn test_rows_keep_arrival_order() -> Result<(), MeterRecorderError> {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let mut db = Database::open(&db_path)?;

        let a = db.insert_reading(&reading(300, 1, 1.0))?;
        let b = db.insert_reading(&reading(100, 2, 2.0))?;
        let c = db.insert_reading(&reading(200, 3, 3.0))?;
        assert!(a < b && b < c);

        let conn = Connection::open(&db_path)?;
        let mut stmt = conn.prepare("SELECT endpoint_id FROM meter_readings ORDER BY id")?;
        let endpoints = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        assert_eq!(endpoints, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_open_fails_for_missing_directory() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("missing").join("test.db");

        assert!(matches!(
            Database::open(&db_path),
            Err(MeterRecorderError::DatabaseOpenError { .. })
        ));
    }
}
