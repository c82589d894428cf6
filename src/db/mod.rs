pub mod schema;

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Durable store shared by the mutation queue and the response cache.
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// In-memory database, used by tests and dry runs.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch("PRAGMA foreign_keys = ON;")
      .map_err(|e| eyre!("Failed to enable foreign keys: {}", e))?;

    let db = Self {
      conn: Mutex::new(conn),
    };
    db.run_migrations()?;

    Ok(db)
  }

  /// Get the default database path
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("fieldsync").join("fieldsync.db"))
  }

  /// Bring the schema up to `SCHEMA_VERSION`.
  ///
  /// A database written by a newer build is refused rather than touched.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn()?;

    let version: i64 = conn
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to read schema version: {}", e))?;

    if version > schema::SCHEMA_VERSION {
      return Err(eyre!(
        "Database schema version {} is newer than supported version {}",
        version,
        schema::SCHEMA_VERSION
      ));
    }

    conn
      .execute_batch(schema::SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;

    if version < schema::SCHEMA_VERSION {
      conn
        .execute_batch(&format!("PRAGMA user_version = {}", schema::SCHEMA_VERSION))
        .map_err(|e| eyre!("Failed to record schema version: {}", e))?;
      debug!(from = version, to = schema::SCHEMA_VERSION, "upgraded database schema");
    }

    Ok(())
  }

  /// Lock the connection for a single operation.
  pub fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_migrations_set_user_version() {
    let db = Database::open_in_memory().unwrap();
    let version: i64 = db
      .conn()
      .unwrap()
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .unwrap();
    assert_eq!(version, schema::SCHEMA_VERSION);
  }

  #[test]
  fn test_reopen_keeps_existing_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("fieldsync.db");

    {
      let db = Database::open(&path).unwrap();
      db.conn()
        .unwrap()
        .execute(
          "INSERT INTO queued_requests (url, method, headers, body, timestamp) VALUES ('https://x/a', 'POST', '[]', NULL, 1)",
          [],
        )
        .unwrap();
    }

    let db = Database::open(&path).unwrap();
    let count: i64 = db
      .conn()
      .unwrap()
      .query_row("SELECT COUNT(*) FROM queued_requests", [], |row| row.get(0))
      .unwrap();
    assert_eq!(count, 1);
  }

  #[test]
  fn test_newer_schema_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fieldsync.db");

    {
      let conn = Connection::open(&path).unwrap();
      conn
        .execute_batch(&format!("PRAGMA user_version = {}", schema::SCHEMA_VERSION + 1))
        .unwrap();
    }

    assert!(Database::open(&path).is_err());
  }
}
