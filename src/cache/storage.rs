//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use tracing::info;

use crate::db::{self, DbHandle};
use crate::http::{Request, Response};

/// A named snapshot of cached responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
  pub name: String,
  pub created_at: DateTime<Utc>,
  pub entry_count: usize,
}

/// A single cached response.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  /// Readable request identity (method + URL)
  pub identity: String,
  pub response: Response,
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Generations are ordered by creation; the most recently created (or
/// re-populated) one is current.
pub trait CacheStorage: Send + Sync {
  /// Store a single response in an existing generation.
  ///
  /// The generation is created only when none exist at all. A write to a
  /// generation that has since been deleted is dropped and returns false.
  fn put(&self, generation: &str, request: &Request, response: &Response) -> Result<bool>;

  /// Make `generation` the newest and store every entry, all in one transaction.
  fn populate(&self, generation: &str, entries: &[(Request, Response)]) -> Result<()>;

  /// Look up a response by request identity.
  fn lookup(&self, generation: &str, request: &Request) -> Result<Option<CachedEntry>>;

  /// All generations, oldest first.
  fn generations(&self) -> Result<Vec<Generation>>;

  /// Name of the newest generation.
  fn current(&self) -> Result<Option<String>>;

  /// Delete a generation and its entries. Returns whether it existed.
  fn delete(&self, generation: &str) -> Result<bool>;

  /// List entries of a generation.
  fn entries(&self, generation: &str) -> Result<Vec<CachedEntry>>;
}

/// SQLite-based cache storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
  conn: DbHandle,
}

impl SqliteStorage {
  pub fn new(conn: DbHandle) -> Self {
    Self { conn }
  }
}

const NEXT_SEQ: &str = "(SELECT COALESCE(MAX(seq), 0) + 1 FROM cache_generations)";

fn upsert_entry(
  conn: &rusqlite::Connection,
  generation: &str,
  request: &Request,
  response: &Response,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (generation, cache_key, identity, status, status_text, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        generation,
        request.cache_key(),
        request.identity(),
        response.status,
        response.status_text,
        headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

  Ok(())
}

type EntryRow = (String, u16, String, String, Vec<u8>, String);

fn entry_from_row(row: EntryRow) -> Result<CachedEntry> {
  let (identity, status, status_text, headers, body, cached_at) = row;
  let headers: Vec<(String, String)> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", identity, e))?;

  Ok(CachedEntry {
    identity,
    response: Response {
      status,
      status_text,
      headers,
      body,
    },
    cached_at: db::parse_datetime(&cached_at)?,
  })
}

impl CacheStorage for SqliteStorage {
  fn put(&self, generation: &str, request: &Request, response: &Response) -> Result<bool> {
    let mut conn = db::lock(&self.conn)?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let (exists, any): (bool, bool) = tx
      .query_row(
        "SELECT EXISTS(SELECT 1 FROM cache_generations WHERE name = ?),
                EXISTS(SELECT 1 FROM cache_generations)",
        params![generation],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .map_err(|e| eyre!("Failed to query cache generation {}: {}", generation, e))?;

    if !exists {
      if any {
        // Superseded and pruned while the write was in flight
        return Ok(false);
      }
      tx.execute(
        &format!("INSERT INTO cache_generations (name, seq) VALUES (?, {NEXT_SEQ})"),
        params![generation],
      )
      .map_err(|e| eyre!("Failed to create cache generation {}: {}", generation, e))?;
    }
    upsert_entry(&tx, generation, request, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(true)
  }

  fn populate(&self, generation: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut conn = db::lock(&self.conn)?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      &format!(
        "INSERT INTO cache_generations (name, seq, created_at) VALUES (?, {NEXT_SEQ}, datetime('now'))
         ON CONFLICT(name) DO UPDATE SET seq = excluded.seq, created_at = excluded.created_at"
      ),
      params![generation],
    )
    .map_err(|e| eyre!("Failed to create cache generation {}: {}", generation, e))?;

    for (request, response) in entries {
      upsert_entry(&tx, generation, request, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    info!(generation, entries = entries.len(), "cache generation populated");
    Ok(())
  }

  fn lookup(&self, generation: &str, request: &Request) -> Result<Option<CachedEntry>> {
    let conn = db::lock(&self.conn)?;

    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT identity, status, status_text, headers, body, cached_at FROM cache_entries
         WHERE generation = ? AND cache_key = ?",
        params![generation, request.cache_key()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    row.map(entry_from_row).transpose()
  }

  fn generations(&self) -> Result<Vec<Generation>> {
    let conn = db::lock(&self.conn)?;

    let mut stmt = conn
      .prepare(
        "SELECT g.name, g.created_at, COUNT(e.cache_key) FROM cache_generations g
         LEFT JOIN cache_entries e ON e.generation = g.name
         GROUP BY g.name
         ORDER BY g.seq",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String, usize)> = stmt
      .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
      .map_err(|e| eyre!("Failed to query generations: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read generation: {}", e))?;

    rows
      .into_iter()
      .map(|(name, created_at, entry_count)| {
        Ok(Generation {
          name,
          created_at: db::parse_datetime(&created_at)?,
          entry_count,
        })
      })
      .collect()
  }

  fn current(&self) -> Result<Option<String>> {
    let conn = db::lock(&self.conn)?;
    conn
      .query_row(
        "SELECT name FROM cache_generations ORDER BY seq DESC LIMIT 1",
        [],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query current generation: {}", e))
  }

  fn delete(&self, generation: &str) -> Result<bool> {
    let mut conn = db::lock(&self.conn)?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM cache_entries WHERE generation = ?",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to delete cache entries: {}", e))?;
    let removed = tx
      .execute(
        "DELETE FROM cache_generations WHERE name = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete cache generation: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(removed > 0)
  }

  fn entries(&self, generation: &str) -> Result<Vec<CachedEntry>> {
    let conn = db::lock(&self.conn)?;

    let mut stmt = conn
      .prepare(
        "SELECT identity, status, status_text, headers, body, cached_at FROM cache_entries
         WHERE generation = ?
         ORDER BY identity",
      )
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let rows: Vec<EntryRow> = stmt
      .query_map(params![generation], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    rows.into_iter().map(entry_from_row).collect()
  }
}
