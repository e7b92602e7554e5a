//! Install/activate lifecycle and cache versioning.

use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::WindowClients;
use crate::db::{self, DbHandle};
use crate::http::{Request, Response};
use crate::network::Network;

/// Lifecycle states of the worker registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Installing,
  Activating,
  Active,
}

impl LifecycleState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Installing => "installing",
      Self::Activating => "activating",
      Self::Active => "active",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "installing" => Some(Self::Installing),
      "activating" => Some(Self::Activating),
      "active" => Some(Self::Active),
      _ => None,
    }
  }
}

/// Versioned list of app shell assets.
#[derive(Debug, Clone)]
pub struct Manifest {
  /// Generation name, e.g. `tamy-cache-v1`
  pub generation: String,
  pub entries: Vec<String>,
}

impl Manifest {
  /// Resolve entries against the origin. Absolute entries are kept as is.
  pub fn requests(&self, origin: &Url) -> Result<Vec<Request>> {
    self
      .entries
      .iter()
      .map(|entry| {
        origin
          .join(entry)
          .map(Request::get)
          .map_err(|e| eyre!("Invalid manifest entry '{}': {}", entry, e))
      })
      .collect()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub generation: String,
  pub cached: usize,
  /// Activation should follow immediately instead of waiting for clients to close
  pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
  pub generation: Option<String>,
  pub deleted: Vec<String>,
  pub claimed: usize,
}

/// Persisted lifecycle state.
#[derive(Clone)]
pub struct WorkerState {
  conn: DbHandle,
}

impl WorkerState {
  pub fn new(conn: DbHandle) -> Self {
    Self { conn }
  }

  fn get(&self, key: &str) -> Result<Option<String>> {
    let conn = db::lock(&self.conn)?;
    conn
      .query_row(
        "SELECT value FROM worker_state WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read worker state {}: {}", key, e))
  }

  fn set(&self, key: &str, value: &str) -> Result<()> {
    let conn = db::lock(&self.conn)?;
    conn
      .execute(
        "INSERT OR REPLACE INTO worker_state (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write worker state {}: {}", key, e))?;
    Ok(())
  }

  pub fn lifecycle(&self) -> Result<Option<LifecycleState>> {
    Ok(self.get("lifecycle")?.as_deref().and_then(LifecycleState::parse))
  }

  pub fn set_lifecycle(&self, state: LifecycleState) -> Result<()> {
    self.set("lifecycle", state.as_str())
  }

  /// Put back a state read before a failed transition; `None` clears it.
  pub fn restore_lifecycle(&self, previous: Option<LifecycleState>) -> Result<()> {
    match previous {
      Some(state) => self.set_lifecycle(state),
      None => {
        let conn = db::lock(&self.conn)?;
        conn
          .execute("DELETE FROM worker_state WHERE key = 'lifecycle'", [])
          .map_err(|e| eyre!("Failed to clear worker state lifecycle: {}", e))?;
        Ok(())
      }
    }
  }

  /// Generation that was current at the last completed activation.
  pub fn active_generation(&self) -> Result<Option<String>> {
    self.get("active_generation")
  }

  pub fn set_active_generation(&self, generation: &str) -> Result<()> {
    self.set("active_generation", generation)
  }
}

/// Drives install and activate transitions.
pub struct LifecycleController<S: CacheStorage> {
  storage: Arc<S>,
  network: Arc<dyn Network>,
  clients: Arc<dyn WindowClients>,
  state: WorkerState,
  manifest: Manifest,
  origin: Url,
  /// Serializes transitions so activation never races an install
  transition: Mutex<()>,
}

impl<S: CacheStorage> LifecycleController<S> {
  pub fn new(
    storage: Arc<S>,
    network: Arc<dyn Network>,
    clients: Arc<dyn WindowClients>,
    state: WorkerState,
    manifest: Manifest,
    origin: Url,
  ) -> Self {
    Self {
      storage,
      network,
      clients,
      state,
      manifest,
      origin,
      transition: Mutex::new(()),
    }
  }

  pub fn state(&self) -> &WorkerState {
    &self.state
  }

  /// Populate the manifest's generation with the app shell.
  ///
  /// All-or-nothing: if any entry cannot be fetched with a success status,
  /// nothing is written and the previously active generation stays in use.
  pub async fn install(&self) -> Result<InstallReport> {
    let _guard = self.transition.lock().await;
    let previous = self.state.lifecycle()?;
    let generation = self.manifest.generation.clone();

    info!(%generation, entries = self.manifest.entries.len(), "installing");
    self.state.set_lifecycle(LifecycleState::Installing)?;

    let installed = match self.fetch_app_shell().await {
      Ok(entries) => self
        .storage
        .populate(&generation, &entries)
        .map(|()| entries.len()),
      Err(e) => Err(e),
    };

    match installed {
      Ok(cached) => {
        info!(%generation, cached, "installed");
        Ok(InstallReport {
          generation,
          cached,
          skip_waiting: true,
        })
      }
      Err(e) => {
        error!(%generation, error = %e, "install failed");
        self.state.restore_lifecycle(previous)?;
        Err(e)
      }
    }
  }

  async fn fetch_app_shell(&self) -> Result<Vec<(Request, Response)>> {
    let requests = self.manifest.requests(&self.origin)?;
    let responses = join_all(requests.iter().map(|r| self.network.fetch(r))).await;

    let mut entries = Vec::with_capacity(requests.len());
    let mut failures = Vec::new();
    for (request, result) in requests.into_iter().zip(responses) {
      match result {
        Ok(response) if response.is_success() => entries.push((request, response)),
        Ok(response) => failures.push(format!("{} ({})", request.url, response.status)),
        Err(e) => failures.push(format!("{} ({})", request.url, e)),
      }
    }

    if !failures.is_empty() {
      return Err(eyre!(
        "Failed to cache {} of {} app shell entries: {}",
        failures.len(),
        entries.len() + failures.len(),
        failures.join(", ")
      ));
    }
    Ok(entries)
  }

  /// Delete every generation except the newest, then claim open clients.
  pub async fn activate(&self) -> Result<ActivationReport> {
    let _guard = self.transition.lock().await;
    self.state.set_lifecycle(LifecycleState::Activating)?;
    info!("activating");

    let mut generations = self.storage.generations()?;
    let newest = generations.pop().map(|g| g.name);

    let mut deleted = Vec::new();
    for stale in generations {
      info!(generation = %stale.name, "deleting old cache");
      if self.storage.delete(&stale.name)? {
        deleted.push(stale.name);
      }
    }

    let claimed = match &newest {
      Some(generation) => {
        self.state.set_active_generation(generation)?;
        self.clients.claim(generation).await?
      }
      None => 0,
    };

    self.state.set_lifecycle(LifecycleState::Active)?;
    info!(generation = ?newest, deleted = deleted.len(), claimed, "active");

    Ok(ActivationReport {
      generation: newest,
      deleted,
      claimed,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::db::Database;
  use crate::testing::{FakeWindows, ScriptedNetwork};

  const ORIGIN: &str = "https://tamy.example/";

  struct Fixture {
    storage: Arc<SqliteStorage>,
    network: Arc<ScriptedNetwork>,
    windows: Arc<FakeWindows>,
    conn: DbHandle,
  }

  impl Fixture {
    fn new() -> Self {
      let db = Database::open_in_memory().unwrap();
      Self {
        storage: Arc::new(SqliteStorage::new(db.handle())),
        network: Arc::new(ScriptedNetwork::new()),
        windows: Arc::new(FakeWindows::new()),
        conn: db.handle(),
      }
    }

    fn controller(&self, generation: &str, entries: &[&str]) -> LifecycleController<SqliteStorage> {
      LifecycleController::new(
        self.storage.clone(),
        self.network.clone(),
        self.windows.clone(),
        WorkerState::new(self.conn.clone()),
        Manifest {
          generation: generation.to_string(),
          entries: entries.iter().map(|e| e.to_string()).collect(),
        },
        Url::parse(ORIGIN).unwrap(),
      )
    }

    fn serve(&self, path: &str, body: &str) -> Response {
      let response = Response::new(200, body);
      self
        .network
        .serve(Url::parse(ORIGIN).unwrap().join(path).unwrap(), response.clone());
      response
    }
  }

  fn get(path: &str) -> Request {
    Request::get(Url::parse(ORIGIN).unwrap().join(path).unwrap())
  }

  #[tokio::test]
  async fn test_install_caches_every_manifest_entry_verbatim() {
    let fx = Fixture::new();
    let root = fx.serve("/", "<html>");
    let app = fx.serve("/app.js", "app();");
    let controller = fx.controller("tamy-cache-v1", &["/", "/app.js"]);

    let report = controller.install().await.unwrap();
    assert_eq!(report.cached, 2);
    assert!(report.skip_waiting);

    let current = fx.storage.current().unwrap().unwrap();
    assert_eq!(current, "tamy-cache-v1");
    let cached_root = fx.storage.lookup(&current, &get("/")).unwrap().unwrap();
    let cached_app = fx.storage.lookup(&current, &get("/app.js")).unwrap().unwrap();
    assert_eq!(cached_root.response, root);
    assert_eq!(cached_app.response, app);
  }

  #[tokio::test]
  async fn test_install_is_all_or_nothing() {
    let fx = Fixture::new();
    fx.serve("/", "<html>");
    // "/missing.css" answers 404
    let controller = fx.controller("tamy-cache-v1", &["/", "/missing.css"]);

    let err = controller.install().await.unwrap_err();
    assert!(err.to_string().contains("missing.css"));
    assert!(fx.storage.generations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_failed_install_keeps_previous_generation_active() {
    let fx = Fixture::new();
    fx.serve("/", "<html>");
    let v1 = fx.controller("tamy-cache-v1", &["/"]);
    v1.install().await.unwrap();
    v1.activate().await.unwrap();

    fx.network.set_online(false);
    let v2 = fx.controller("tamy-cache-v2", &["/"]);
    assert!(v2.install().await.is_err());

    assert_eq!(fx.storage.current().unwrap().as_deref(), Some("tamy-cache-v1"));
    assert_eq!(v2.state().lifecycle().unwrap(), Some(LifecycleState::Active));
  }

  #[tokio::test]
  async fn test_failed_first_install_leaves_no_state() {
    let fx = Fixture::new();
    fx.network.set_online(false);
    let controller = fx.controller("tamy-cache-v1", &["/"]);

    assert!(controller.install().await.is_err());
    assert_eq!(controller.state().lifecycle().unwrap(), None);
  }

  #[tokio::test]
  async fn test_failed_cache_write_restores_state() {
    let fx = Fixture::new();
    fx.serve("/", "<html>");
    let v1 = fx.controller("tamy-cache-v1", &["/"]);
    v1.install().await.unwrap();
    v1.activate().await.unwrap();

    fx.conn
      .lock()
      .unwrap()
      .execute_batch("DROP TABLE cache_entries")
      .unwrap();
    let v2 = fx.controller("tamy-cache-v2", &["/"]);

    assert!(v2.install().await.is_err());
    assert_eq!(v2.state().lifecycle().unwrap(), Some(LifecycleState::Active));
    assert_eq!(fx.storage.current().unwrap().as_deref(), Some("tamy-cache-v1"));
  }

  #[tokio::test]
  async fn test_activate_prunes_all_but_newest_and_claims_clients() {
    let fx = Fixture::new();
    fx.serve("/", "<html>");
    fx.windows.add("w1", "https://tamy.example/");

    fx.controller("tamy-cache-v1", &["/"]).install().await.unwrap();
    let v2 = fx.controller("tamy-cache-v2", &["/"]);
    v2.install().await.unwrap();

    let report = v2.activate().await.unwrap();
    assert_eq!(report.generation.as_deref(), Some("tamy-cache-v2"));
    assert_eq!(report.deleted, vec!["tamy-cache-v1"]);
    assert_eq!(report.claimed, 1);

    assert!(fx.storage.lookup("tamy-cache-v1", &get("/")).unwrap().is_none());
    assert!(fx.storage.lookup("tamy-cache-v2", &get("/")).unwrap().is_some());
    assert_eq!(
      v2.state().active_generation().unwrap().as_deref(),
      Some("tamy-cache-v2")
    );
    assert_eq!(v2.state().lifecycle().unwrap(), Some(LifecycleState::Active));
  }

  #[tokio::test]
  async fn test_activate_without_generations() {
    let fx = Fixture::new();
    let report = fx.controller("tamy-cache-v1", &[]).activate().await.unwrap();
    assert_eq!(report.generation, None);
    assert!(report.deleted.is_empty());
    assert_eq!(report.claimed, 0);
  }

  #[test]
  fn test_manifest_keeps_absolute_entries() {
    let manifest = Manifest {
      generation: "tamy-cache-v1".to_string(),
      entries: vec![
        "/assets/js/main.js".to_string(),
        "https://fonts.googleapis.com/icon?family=Material+Icons".to_string(),
      ],
    };
    let requests = manifest.requests(&Url::parse(ORIGIN).unwrap()).unwrap();
    assert_eq!(requests[0].url.as_str(), "https://tamy.example/assets/js/main.js");
    assert_eq!(requests[1].url.host_str(), Some("fonts.googleapis.com"));
  }
}
