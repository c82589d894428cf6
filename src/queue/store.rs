//! Queue store trait and SQLite implementation.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::sync::Arc;
use tracing::debug;

use crate::db::Database;

use super::types::{NewRequest, QueueMethod, QueuedRequest};

/// Durable FIFO of mutating requests that failed delivery.
pub trait QueueStore: Send + Sync + 'static {
  /// Persist a request and return it with its assigned id.
  ///
  /// Returns only after the write is committed. A store failure is an error,
  /// never a silent drop.
  fn enqueue(&self, request: NewRequest) -> Result<QueuedRequest>;

  /// Snapshot of every queued request in ascending id order.
  fn list_all(&self) -> Result<Vec<QueuedRequest>>;

  /// Delete by id. Removing a missing id succeeds.
  fn remove(&self, id: i64) -> Result<()>;

  /// Number of queued requests.
  fn count(&self) -> Result<usize>;
}

/// SQLite-backed queue store.
pub struct SqliteQueue {
  db: Arc<Database>,
}

impl SqliteQueue {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl QueueStore for SqliteQueue {
  fn enqueue(&self, request: NewRequest) -> Result<QueuedRequest> {
    let conn = self.db.conn()?;
    let timestamp = Utc::now().timestamp_millis();
    let headers = serde_json::to_string(&request.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT INTO queued_requests (url, method, headers, body, timestamp)
         VALUES (?, ?, ?, ?, ?)",
        params![
          request.url,
          request.method.as_str(),
          headers,
          request.body,
          timestamp
        ],
      )
      .map_err(|e| eyre!("Failed to insert queued request: {}", e))?;

    let id = conn.last_insert_rowid();
    debug!(id, method = request.method.as_str(), url = %request.url, "queued request");

    Ok(QueuedRequest {
      id,
      url: request.url,
      method: request.method,
      headers: request.headers,
      body: request.body,
      timestamp,
    })
  }

  fn list_all(&self) -> Result<Vec<QueuedRequest>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT id, url, method, headers, body, timestamp FROM queued_requests
         ORDER BY id ASC",
      )
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, Option<String>>(4)?,
          row.get::<_, i64>(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list queued requests: {}", e))?;

    let mut requests = Vec::new();
    for row in rows {
      let (id, url, method, headers, body, timestamp) =
        row.map_err(|e| eyre!("Failed to read queued request: {}", e))?;
      let headers = serde_json::from_str(&headers)
        .map_err(|e| eyre!("Failed to parse headers of queued request {}: {}", id, e))?;

      requests.push(QueuedRequest {
        id,
        url,
        method: QueueMethod::parse(&method)?,
        headers,
        body,
        timestamp,
      });
    }

    Ok(requests)
  }

  fn remove(&self, id: i64) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute("DELETE FROM queued_requests WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queued request {}: {}", id, e))?;
    Ok(())
  }

  fn count(&self) -> Result<usize> {
    let conn = self.db.conn()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM queued_requests", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count queued requests: {}", e))?;
    Ok(count as usize)
  }
}
