//! Durable queue of mutations awaiting delivery.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use tracing::{info, warn};
use uuid::Uuid;

use super::mutation::{Mutation, MutationKind, PendingMutation, SyncTag};
use crate::backend::Backend;
use crate::db::{self, DbHandle};

/// Outcome of a single drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub attempted: usize,
  pub delivered: usize,
  pub failed: usize,
}

/// Write-behind log of mutations the backend has not acknowledged yet.
///
/// Delivery is at-least-once: there is no dedup token and no backoff. A
/// mutation that fails stays pending until the next drain.
#[derive(Clone)]
pub struct SyncQueue {
  conn: DbHandle,
}

type QueueRow = (String, String, String, String, bool, u32, Option<String>);

const SELECT_COLUMNS: &str =
  "SELECT id, kind, payload, created_at, synced, attempts, last_error FROM sync_queue";

fn pending_from_row(row: QueueRow) -> Result<PendingMutation> {
  let (id, kind, payload, created_at, synced, attempts, last_error) = row;

  Ok(PendingMutation {
    id: Uuid::parse_str(&id).map_err(|e| eyre!("Invalid mutation id '{}': {}", id, e))?,
    kind: MutationKind::parse(&kind).ok_or_else(|| eyre!("Unknown mutation kind '{}'", kind))?,
    mutation: serde_json::from_str(&payload)
      .map_err(|e| eyre!("Failed to deserialize mutation {}: {}", id, e))?,
    created_at: db::parse_datetime(&created_at)?,
    synced,
    attempts,
    last_error,
  })
}

/// Rows that cannot be decoded are logged and left in place so the rest of
/// the queue still drains.
fn decode_rows(rows: Vec<QueueRow>) -> Vec<PendingMutation> {
  rows
    .into_iter()
    .filter_map(|row| {
      let id = row.0.clone();
      match pending_from_row(row) {
        Ok(pending) => Some(pending),
        Err(e) => {
          warn!(id = %id, error = %e, "skipping undecodable queued mutation");
          None
        }
      }
    })
    .collect()
}

impl SyncQueue {
  pub fn new(conn: DbHandle) -> Self {
    Self { conn }
  }

  /// Append a mutation. Returns immediately with the stored record.
  pub fn enqueue(&self, mutation: Mutation) -> Result<PendingMutation> {
    let pending = PendingMutation {
      id: Uuid::new_v4(),
      kind: mutation.kind(),
      // Truncated to the stored precision so the returned record matches a reload
      created_at: db::parse_datetime(&db::format_datetime(Utc::now()))?,
      mutation,
      synced: false,
      attempts: 0,
      last_error: None,
    };
    let payload = serde_json::to_string(&pending.mutation)
      .map_err(|e| eyre!("Failed to serialize mutation: {}", e))?;

    let conn = db::lock(&self.conn)?;
    conn
      .execute(
        "INSERT INTO sync_queue (id, kind, payload, created_at) VALUES (?, ?, ?, ?)",
        params![
          pending.id.to_string(),
          pending.kind.as_str(),
          payload,
          db::format_datetime(pending.created_at),
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue mutation: {}", e))?;

    info!(id = %pending.id, kind = pending.kind.as_str(), "mutation queued");
    Ok(pending)
  }

  /// Unsynced mutations in enqueue order, optionally restricted to one kind.
  pub fn pending(&self, kind: Option<MutationKind>) -> Result<Vec<PendingMutation>> {
    let conn = db::lock(&self.conn)?;

    let mut stmt = conn
      .prepare(&format!(
        "{SELECT_COLUMNS} WHERE synced = 0 AND (?1 IS NULL OR kind = ?1) ORDER BY seq"
      ))
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows: Vec<QueueRow> = stmt
      .query_map(params![kind.map(|k| k.as_str())], read_row)
      .map_err(|e| eyre!("Failed to query queue: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read queue row: {}", e))?;

    Ok(decode_rows(rows))
  }

  /// Every queued mutation including delivered ones, in enqueue order.
  pub fn all(&self) -> Result<Vec<PendingMutation>> {
    let conn = db::lock(&self.conn)?;

    let mut stmt = conn
      .prepare(&format!("{SELECT_COLUMNS} ORDER BY seq"))
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows: Vec<QueueRow> = stmt
      .query_map([], read_row)
      .map_err(|e| eyre!("Failed to query queue: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read queue row: {}", e))?;

    Ok(decode_rows(rows))
  }

  pub fn mark_synced(&self, id: &Uuid) -> Result<()> {
    let conn = db::lock(&self.conn)?;
    conn
      .execute(
        "UPDATE sync_queue SET synced = 1, last_error = NULL WHERE id = ?",
        params![id.to_string()],
      )
      .map_err(|e| eyre!("Failed to mark mutation {} synced: {}", id, e))?;
    Ok(())
  }

  pub fn record_failure(&self, id: &Uuid, error: &str) -> Result<()> {
    let conn = db::lock(&self.conn)?;
    conn
      .execute(
        "UPDATE sync_queue SET attempts = attempts + 1, last_error = ? WHERE id = ?",
        params![error, id.to_string()],
      )
      .map_err(|e| eyre!("Failed to record failure for mutation {}: {}", id, e))?;
    Ok(())
  }

  /// Remove delivered mutations. Returns how many were removed.
  pub fn purge_synced(&self) -> Result<usize> {
    let conn = db::lock(&self.conn)?;
    conn
      .execute("DELETE FROM sync_queue WHERE synced = 1", [])
      .map_err(|e| eyre!("Failed to purge synced mutations: {}", e))
  }

  /// Attempt delivery of every pending mutation selected by `tag`.
  ///
  /// Mutations are attempted sequentially in enqueue order. A failed
  /// delivery is recorded and the drain moves on to the next item.
  pub async fn drain(&self, backend: &dyn Backend, tag: SyncTag) -> Result<DrainReport> {
    let pending = self.pending(tag.kind())?;
    let mut report = DrainReport::default();

    info!(tag = tag.as_str(), pending = pending.len(), "draining sync queue");

    for item in pending {
      report.attempted += 1;

      match backend.deliver(&item.mutation).await {
        Ok(()) => {
          report.delivered += 1;
          // If this write is lost the mutation is delivered again next time
          if let Err(e) = self.mark_synced(&item.id) {
            warn!(id = %item.id, error = %e, "delivered but failed to mark synced");
          }
        }
        Err(e) => {
          report.failed += 1;
          warn!(id = %item.id, kind = item.kind.as_str(), error = %e, "delivery failed, keeping mutation pending");
          if let Err(e) = self.record_failure(&item.id, &e.to_string()) {
            warn!(id = %item.id, error = %e, "failed to record delivery failure");
          }
        }
      }
    }

    info!(
      tag = tag.as_str(),
      delivered = report.delivered,
      failed = report.failed,
      "sync queue drained"
    );
    Ok(report)
  }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
    row.get(6)?,
  ))
}
