//! Window clients controlled by the worker.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{self, DbHandle};

/// An open page session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowClient {
  pub id: String,
  pub url: String,
  /// Cache generation controlling this client, if claimed
  pub controller: Option<String>,
}

#[async_trait]
pub trait WindowClients: Send + Sync {
  /// All open window clients, controlled or not.
  async fn list(&self) -> Result<Vec<WindowClient>>;

  /// Bring an existing client's page to the foreground.
  async fn focus(&self, id: &str) -> Result<()>;

  async fn open(&self, url: &str) -> Result<WindowClient>;

  /// Forget a client whose window is gone.
  async fn close(&self, id: &str) -> Result<()>;

  /// Take control of every open client. Returns the number claimed.
  async fn claim(&self, generation: &str) -> Result<usize>;
}

type Launcher = Box<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// Windows not opened or focused within this period are assumed closed
const STALE_AFTER: &str = "-12 hours";

fn launch_browser(url: &str) -> std::io::Result<()> {
  webbrowser::open(url)
}

/// Windows opened in the system browser, tracked in the worker database so
/// that repeated notifications to the same view reuse the recorded window.
///
/// The browser reports nothing back, so focusing re-opens the recorded URL
/// (the browser brings an existing tab forward where it can) and records
/// older than `STALE_AFTER` are dropped on the next listing.
pub struct BrowserWindows {
  conn: DbHandle,
  launch: Launcher,
}

impl BrowserWindows {
  pub fn new(conn: DbHandle) -> Self {
    Self {
      conn,
      launch: Box::new(launch_browser),
    }
  }

  #[cfg(test)]
  fn with_launcher(
    conn: DbHandle,
    launch: impl Fn(&str) -> std::io::Result<()> + Send + Sync + 'static,
  ) -> Self {
    Self {
      conn,
      launch: Box::new(launch),
    }
  }

  fn client_url(&self, id: &str) -> Result<Option<String>> {
    let conn = db::lock(&self.conn)?;
    conn
      .query_row(
        "SELECT url FROM window_clients WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query client {}: {}", id, e))
  }

  fn prune_stale(conn: &rusqlite::Connection) -> Result<()> {
    let removed = conn
      .execute(
        "DELETE FROM window_clients
         WHERE COALESCE(focused_at, opened_at) < datetime('now', ?)",
        params![STALE_AFTER],
      )
      .map_err(|e| eyre!("Failed to prune window clients: {}", e))?;
    if removed > 0 {
      debug!(removed, "pruned stale window clients");
    }
    Ok(())
  }
}

#[async_trait]
impl WindowClients for BrowserWindows {
  async fn list(&self) -> Result<Vec<WindowClient>> {
    let conn = db::lock(&self.conn)?;
    Self::prune_stale(&conn)?;

    let mut stmt = conn
      .prepare("SELECT id, url, controller FROM window_clients ORDER BY opened_at, id")
      .map_err(|e| eyre!("Failed to prepare client query: {}", e))?;

    let clients = stmt
      .query_map([], |row| {
        Ok(WindowClient {
          id: row.get(0)?,
          url: row.get(1)?,
          controller: row.get(2)?,
        })
      })
      .map_err(|e| eyre!("Failed to query clients: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read client: {}", e))?;

    Ok(clients)
  }

  async fn focus(&self, id: &str) -> Result<()> {
    let url = self
      .client_url(id)?
      .ok_or_else(|| eyre!("No window client with id {}", id))?;

    (self.launch)(&url).map_err(|e| eyre!("Failed to focus {} in a browser: {}", url, e))?;

    let conn = db::lock(&self.conn)?;
    conn
      .execute(
        "UPDATE window_clients SET focused_at = datetime('now') WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to focus client {}: {}", id, e))?;

    info!(client = id, %url, "focused window client");
    Ok(())
  }

  async fn open(&self, url: &str) -> Result<WindowClient> {
    (self.launch)(url).map_err(|e| eyre!("Failed to open {} in a browser: {}", url, e))?;

    let client = WindowClient {
      id: Uuid::new_v4().to_string(),
      url: url.to_string(),
      controller: None,
    };

    let conn = db::lock(&self.conn)?;
    conn
      .execute(
        "INSERT INTO window_clients (id, url) VALUES (?, ?)",
        params![client.id, client.url],
      )
      .map_err(|e| eyre!("Failed to record window client: {}", e))?;

    info!(client = %client.id, url, "opened window client");
    Ok(client)
  }

  async fn close(&self, id: &str) -> Result<()> {
    let conn = db::lock(&self.conn)?;
    conn
      .execute("DELETE FROM window_clients WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove window client {}: {}", id, e))?;
    info!(client = id, "closed window client");
    Ok(())
  }

  async fn claim(&self, generation: &str) -> Result<usize> {
    let conn = db::lock(&self.conn)?;
    conn
      .execute(
        "UPDATE window_clients SET controller = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to claim window clients: {}", e))
  }
}
