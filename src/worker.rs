//! The worker: routes events to the component that handles them.
//!
//! Handlers never fail past this boundary. Errors are logged and reported
//! as `EventOutcome::Failed`.

use color_eyre::{
  eyre::{eyre, Report},
  Result,
};
use std::sync::Arc;
use tracing::{error, info};

use crate::backend::Backend;
use crate::cache::{FetchDisposition, NetworkFirst, SqliteStorage, StrategyResponse};
use crate::clients::WindowClients;
use crate::config::Config;
use crate::db::DbHandle;
use crate::event::Event;
use crate::lifecycle::{ActivationReport, InstallReport, LifecycleController, Manifest, WorkerState};
use crate::network::Network;
use crate::notify::{ClickOutcome, NotificationDispatcher, NotificationIntent, Notifier};
use crate::sync::{DrainReport, SyncQueue, SyncTag};

/// External collaborators the worker is built from.
pub struct Collaborators {
  pub network: Arc<dyn Network>,
  pub backend: Arc<dyn Backend>,
  pub notifier: Arc<dyn Notifier>,
  pub windows: Arc<dyn WindowClients>,
}

#[derive(Debug)]
pub enum EventOutcome {
  /// Activation follows immediately when the install asks to skip waiting
  Installed {
    install: InstallReport,
    activation: Option<ActivationReport>,
  },
  Activated(ActivationReport),
  Responded(StrategyResponse),
  Bypassed,
  Notified(NotificationIntent),
  Clicked(ClickOutcome),
  Synced(DrainReport),
  /// Nothing to do for this event
  Ignored,
  Failed(String),
}

pub struct Worker {
  storage: Arc<SqliteStorage>,
  lifecycle: LifecycleController<SqliteStorage>,
  strategy: NetworkFirst<SqliteStorage>,
  queue: SyncQueue,
  backend: Arc<dyn Backend>,
  notifications: NotificationDispatcher,
}

impl Worker {
  pub fn new(config: &Config, conn: DbHandle, parts: Collaborators) -> Result<Self> {
    let origin = config.origin_url()?;
    let generation = config.cache.generation_name();
    let storage = Arc::new(SqliteStorage::new(conn.clone()));

    let lifecycle = LifecycleController::new(
      storage.clone(),
      parts.network.clone(),
      parts.windows.clone(),
      WorkerState::new(conn.clone()),
      Manifest {
        generation: generation.clone(),
        entries: config.cache.manifest.clone(),
      },
      origin.clone(),
    );

    let offline_document = origin
      .join(&config.cache.offline_document)
      .map_err(|e| eyre!("Invalid offline document: {}", e))?;
    let strategy = NetworkFirst::new(
      storage.clone(),
      parts.network,
      generation,
      config.bypass.clone(),
      offline_document,
    )
    .with_bypass_prefixes(config.service_prefixes()?);

    let notifications = NotificationDispatcher::new(
      parts.notifier,
      parts.windows,
      config.notifications.clone(),
      origin,
    );

    Ok(Self {
      storage,
      lifecycle,
      strategy,
      queue: SyncQueue::new(conn),
      backend: parts.backend,
      notifications,
    })
  }

  pub fn storage(&self) -> &SqliteStorage {
    &self.storage
  }

  pub fn queue(&self) -> &SyncQueue {
    &self.queue
  }

  pub fn state(&self) -> &WorkerState {
    self.lifecycle.state()
  }

  /// Handle one event to completion.
  pub async fn dispatch(&self, event: Event) -> EventOutcome {
    match event {
      Event::Install => self.install().await,
      Event::Activate => match self.lifecycle.activate().await {
        Ok(report) => EventOutcome::Activated(report),
        Err(e) => failed("activate", e),
      },
      Event::Fetch(request) => match self.strategy.handle(&request).await {
        FetchDisposition::Respond(response) => EventOutcome::Responded(response),
        FetchDisposition::Bypass => EventOutcome::Bypassed,
      },
      Event::Push(payload) => EventOutcome::Notified(self.notifications.on_push(&payload).await),
      Event::NotificationClick(intent) => {
        EventOutcome::Clicked(self.notifications.on_notification_click(&intent).await)
      }
      Event::Sync(tag) => self.sync(tag).await,
      Event::Online => {
        info!("back online, draining sync queue");
        self.sync(SyncTag::All).await
      }
      Event::Offline => {
        info!("offline, requests will be served from cache");
        EventOutcome::Ignored
      }
    }
  }

  async fn install(&self) -> EventOutcome {
    let install = match self.lifecycle.install().await {
      Ok(report) => report,
      Err(e) => return failed("install", e),
    };

    let activation = if install.skip_waiting {
      match self.lifecycle.activate().await {
        Ok(report) => Some(report),
        Err(e) => return failed("activate", e),
      }
    } else {
      None
    };

    EventOutcome::Installed {
      install,
      activation,
    }
  }

  async fn sync(&self, tag: SyncTag) -> EventOutcome {
    match self.queue.drain(self.backend.as_ref(), tag).await {
      Ok(report) => EventOutcome::Synced(report),
      Err(e) => failed(tag.as_str(), e),
    }
  }
}

fn failed(handler: &str, e: Report) -> EventOutcome {
  error!(handler, error = %e, "event handler failed");
  EventOutcome::Failed(format!("{}: {}", handler, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheStorage, ResponseSource};
  use crate::db::Database;
  use crate::http::{Request, Response};
  use crate::sync::Mutation;
  use crate::testing::{FakeWindows, RecordingNotifier, ScriptedBackend, ScriptedNetwork};
  use url::Url;

  struct Fixture {
    worker: Worker,
    network: Arc<ScriptedNetwork>,
    backend: Arc<ScriptedBackend>,
  }

  fn url(path: &str) -> Url {
    Url::parse("https://tamy.example/").unwrap().join(path).unwrap()
  }

  fn fixture(manifest: &[&str]) -> Fixture {
    let mut config = Config::default();
    config.origin = "https://tamy.example/".to_string();
    config.cache.manifest = manifest.iter().map(|e| e.to_string()).collect();

    let network = Arc::new(ScriptedNetwork::new());
    let backend = Arc::new(ScriptedBackend::new());
    let worker = Worker::new(
      &config,
      Database::open_in_memory().unwrap().handle(),
      Collaborators {
        network: network.clone(),
        backend: backend.clone(),
        notifier: Arc::new(RecordingNotifier::new()),
        windows: Arc::new(FakeWindows::new()),
      },
    )
    .unwrap();

    Fixture {
      worker,
      network,
      backend,
    }
  }

  #[tokio::test]
  async fn test_installed_app_shell_served_offline() {
    let fx = fixture(&["/", "/app.js"]);
    fx.network.serve(url("/"), Response::new(200, "<html>"));
    fx.network.serve(url("/app.js"), Response::new(200, "app();"));

    match fx.worker.dispatch(Event::Install).await {
      EventOutcome::Installed {
        install,
        activation,
      } => {
        assert_eq!(install.cached, 2);
        let activation = activation.unwrap();
        assert_eq!(activation.generation.as_deref(), Some("tamy-cache-v1"));
      }
      other => panic!("unexpected outcome: {:?}", other),
    }

    fx.network.set_online(false);
    match fx.worker.dispatch(Event::Fetch(Request::get(url("/app.js")))).await {
      EventOutcome::Responded(response) => {
        assert_eq!(response.source, ResponseSource::Cache);
        assert_eq!(response.response.body, b"app();");
      }
      other => panic!("unexpected outcome: {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_failed_install_is_reported_not_thrown() {
    let fx = fixture(&["/"]);
    fx.network.set_online(false);

    assert!(matches!(
      fx.worker.dispatch(Event::Install).await,
      EventOutcome::Failed(_)
    ));
    assert!(fx.worker.storage().generations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_online_event_drains_queue() {
    let fx = fixture(&[]);
    fx.backend.set_down(true);
    fx.worker
      .queue()
      .enqueue(Mutation::Message {
        user_id: "u1".to_string(),
        content: "hi".to_string(),
        is_from_ai: false,
      })
      .unwrap();

    assert!(matches!(
      fx.worker.dispatch(Event::Offline).await,
      EventOutcome::Ignored
    ));

    fx.backend.set_down(false);
    match fx.worker.dispatch(Event::Online).await {
      EventOutcome::Synced(report) => assert_eq!(report.delivered, 1),
      other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(fx.worker.queue().pending(None).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_bypassed_fetch() {
    let fx = fixture(&[]);
    let request = Request::get(Url::parse("https://api.deepseek.com/v1/models").unwrap());
    assert!(matches!(
      fx.worker.dispatch(Event::Fetch(request)).await,
      EventOutcome::Bypassed
    ));
  }

  #[tokio::test]
  async fn test_backend_requests_are_never_cached() {
    let fx = fixture(&[]);
    let messages = Request::get(
      Url::parse("http://localhost:8080/api/users/u1/messages?order=asc&limit=50").unwrap(),
    );

    assert!(matches!(
      fx.worker.dispatch(Event::Fetch(messages)).await,
      EventOutcome::Bypassed
    ));
    assert!(fx.network.calls().is_empty());
    assert!(fx.worker.storage().generations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_push_and_click() {
    let fx = fixture(&[]);
    let intent = match fx.worker.dispatch(Event::Push(b"{}".to_vec())).await {
      EventOutcome::Notified(intent) => intent,
      other => panic!("unexpected outcome: {:?}", other),
    };
    assert!(matches!(
      fx.worker.dispatch(Event::NotificationClick(intent)).await,
      EventOutcome::Clicked(ClickOutcome::Opened(_))
    ));
  }
}
