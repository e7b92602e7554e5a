/// Schema for the worker's durable state.
pub const SCHEMA: &str = r#"
-- Cache generations (one row per named snapshot)
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    seq INTEGER NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Cached responses keyed by request identity within a generation
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    cache_key TEXT NOT NULL,
    identity TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, cache_key)
);

-- Pending mutations awaiting delivery to the backend
CREATE TABLE IF NOT EXISTS sync_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_pending ON sync_queue(synced, kind);

-- Lifecycle state (key/value)
CREATE TABLE IF NOT EXISTS worker_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Window clients opened or focused by the worker
CREATE TABLE IF NOT EXISTS window_clients (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    controller TEXT,
    opened_at TEXT NOT NULL DEFAULT (datetime('now')),
    focused_at TEXT
);
"#;
