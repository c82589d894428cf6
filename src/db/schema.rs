/// Current schema version, stored in `PRAGMA user_version`.
///
/// Every migration must be additive: queued requests written by an older
/// version have to survive the upgrade.
pub const SCHEMA_VERSION: i64 = 1;

pub const SCHEMA: &str = r#"
-- Mutating requests that could not be delivered (FIFO by id)
CREATE TABLE IF NOT EXISTS queued_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body TEXT,
    timestamp INTEGER NOT NULL
);

-- Cache generations, one row per version-tagged name
CREATE TABLE IF NOT EXISTS caches (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Captured GET responses
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_key),
    FOREIGN KEY (cache_name) REFERENCES caches(name) ON DELETE CASCADE
);
"#;
