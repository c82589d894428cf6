//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::db::Database;
use crate::http::{Headers, HttpResponse};

/// A response found in a cache generation.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: HttpResponse,
  /// When the response was cached
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Caches are named generations. Entries are keyed by request URL; only GET
/// responses are ever stored.
pub trait CacheStorage: Send + Sync + 'static {
  /// Names of every cache generation currently stored.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Delete a generation and all of its entries. Returns false if it did not exist.
  fn delete_cache(&self, name: &str) -> Result<bool>;

  /// Store one response, creating the generation if needed.
  fn put(&self, cache_name: &str, url: &str, response: &HttpResponse) -> Result<()>;

  /// Store a batch of responses atomically: all of them or none.
  fn put_all(&self, cache_name: &str, entries: &[(String, HttpResponse)]) -> Result<()>;

  /// Look up a GET response by URL.
  fn lookup(&self, cache_name: &str, url: &str) -> Result<Option<CachedResponse>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteCacheStorage {
  db: Arc<Database>,
}

impl SqliteCacheStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

/// Stable, fixed-length key for a GET request.
fn request_key(url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(b"GET ");
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

fn insert_entry(
  conn: &rusqlite::Connection,
  cache_name: &str,
  url: &str,
  response: &HttpResponse,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR IGNORE INTO caches (name) VALUES (?)",
      params![cache_name],
    )
    .map_err(|e| eyre!("Failed to create cache {}: {}", cache_name, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries (cache_name, request_key, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        cache_name,
        request_key(url),
        url,
        response.status,
        headers,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to store cached response for {}: {}", url, e))?;

  Ok(())
}

impl CacheStorage for SqliteCacheStorage {
  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete_cache(&self, name: &str) -> Result<bool> {
    let conn = self.db.conn()?;
    let deleted = conn
      .execute("DELETE FROM caches WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;
    Ok(deleted > 0)
  }

  fn put(&self, cache_name: &str, url: &str, response: &HttpResponse) -> Result<()> {
    let conn = self.db.conn()?;
    insert_entry(&conn, cache_name, url, response)
  }

  fn put_all(&self, cache_name: &str, entries: &[(String, HttpResponse)]) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (url, response) in entries {
      insert_entry(&tx, cache_name, url, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn lookup(&self, cache_name: &str, url: &str) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE cache_name = ? AND request_key = ?",
        params![cache_name, request_key(url)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache: {}", e))?;

    match row {
      Some((status, headers, body, cached_at_str)) => {
        let headers: Headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to parse cached headers for {}: {}", url, e))?;
        Ok(Some(CachedResponse {
          response: HttpResponse {
            status,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at_str)?,
        }))
      }
      None => Ok(None),
    }
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
