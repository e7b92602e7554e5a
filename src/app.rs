use crate::backend::{Backend, RestBackend};
use crate::cache::CacheStorage;
use crate::chat::ChatSession;
use crate::clients::BrowserWindows;
use crate::commands::{self, CacheView, Command, QueueAction};
use crate::config::Config;
use crate::db::Database;
use crate::event::{ConnectivityMonitor, Event, EventHandler};
use crate::generation::ChatCompletionClient;
use crate::http::Request;
use crate::network::{HttpNetwork, Network, OfflineNetwork};
use crate::notify::{ConsoleNotifier, NotificationIntent};
use crate::sync::Mutation;
use crate::worker::{Collaborators, EventOutcome, Worker};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Command-line front end over the worker
pub struct App {
  config: Config,
  db: Database,
  backend: Arc<dyn Backend>,
}

impl App {
  pub fn new(config: Config, db_path: Option<&Path>) -> Result<Self> {
    let db = Database::open(db_path)?;
    let backend = Arc::new(RestBackend::new(&config)?);

    Ok(Self {
      config,
      db,
      backend,
    })
  }

  fn worker(&self, network: Arc<dyn Network>) -> Result<Worker> {
    Worker::new(
      &self.config,
      self.db.handle(),
      Collaborators {
        network,
        backend: self.backend.clone(),
        notifier: Arc::new(ConsoleNotifier),
        windows: Arc::new(BrowserWindows::new(self.db.handle())),
      },
    )
  }

  fn live_worker(&self) -> Result<Worker> {
    self.worker(Arc::new(HttpNetwork::new()?))
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Install => self.dispatch(Event::Install).await,
      Command::Activate => self.dispatch(Event::Activate).await,
      Command::Fetch {
        url,
        method,
        accept,
        offline,
        output,
      } => self.fetch(&url, &method, accept, offline, output.as_deref()).await,
      Command::Cache { view } => self.cache(view.unwrap_or(CacheView::Generations)),
      Command::Queue { action } => self.queue(action.unwrap_or(QueueAction::List { all: false })),
      Command::Sync { tag } => self.dispatch(Event::Sync(tag)).await,
      Command::Push { payload, click } => self.push(payload.unwrap_or_default(), click).await,
      Command::Click { url } => {
        let mut intent = NotificationIntent::from_payload(b"", &self.config.notifications);
        intent.target_url = url;
        self.dispatch(Event::NotificationClick(intent)).await
      }
      Command::Chat { user, text } => self.chat(&user, &text).await,
      Command::User { id, add_chats } => self.user(&id, add_chats).await,
      Command::Watch { interval } => self.watch(Duration::from_secs(interval.max(1))).await,
      Command::Status => self.status(),
    }
  }

  async fn dispatch(&self, event: Event) -> Result<()> {
    let worker = self.live_worker()?;
    report(&worker.dispatch(event).await)
  }

  async fn fetch(
    &self,
    url: &str,
    method: &str,
    accept: Option<String>,
    offline: bool,
    output: Option<&Path>,
  ) -> Result<()> {
    let url = self
      .config
      .origin_url()?
      .join(url)
      .map_err(|e| eyre!("Invalid url '{}': {}", url, e))?;
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
      .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;

    let mut request = Request::new(method, url);
    if let Some(accept) = accept {
      request = request.with_header("Accept", &accept);
    }

    let worker = if offline {
      self.worker(Arc::new(OfflineNetwork))?
    } else {
      self.live_worker()?
    };

    match worker.dispatch(Event::Fetch(request)).await {
      EventOutcome::Responded(result) => {
        eprintln!(
          "{} {} ({}, {})",
          result.response.status,
          result.response.status_text,
          result.source.as_str(),
          result.response.header("content-type").unwrap_or("no content-type")
        );
        match output {
          Some(path) => std::fs::write(path, &result.response.body)
            .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
          None => std::io::stdout().write_all(&result.response.body)?,
        }
        Ok(())
      }
      outcome => report(&outcome),
    }
  }

  fn cache(&self, view: CacheView) -> Result<()> {
    let worker = self.worker(Arc::new(OfflineNetwork))?;
    let storage = worker.storage();

    match view {
      CacheView::Generations => {
        let current = storage.current()?;
        for generation in storage.generations()? {
          let marker = if current.as_deref() == Some(generation.name.as_str()) {
            "*"
          } else {
            " "
          };
          println!(
            "{} {:<24} {:>5} entries  {}",
            marker,
            generation.name,
            generation.entry_count,
            generation.created_at.format("%Y-%m-%d %H:%M:%S")
          );
        }
      }
      CacheView::Entries { generation } => {
        let generation = match generation {
          Some(g) => g,
          None => storage
            .current()?
            .ok_or_else(|| eyre!("No cache generation installed"))?,
        };
        for entry in storage.entries(&generation)? {
          println!(
            "{} {:>8}B  {}  {}",
            entry.response.status,
            entry.response.body.len(),
            entry.cached_at.format("%Y-%m-%d %H:%M:%S"),
            entry.identity
          );
        }
      }
    }
    Ok(())
  }

  fn queue(&self, action: QueueAction) -> Result<()> {
    let worker = self.worker(Arc::new(OfflineNetwork))?;
    let queue = worker.queue();

    match action {
      QueueAction::List { all } => {
        let items = if all { queue.all()? } else { queue.pending(None)? };
        for item in items {
          println!(
            "{} {} {:<8} {:<12} attempts={} {}{}",
            item.id,
            item.created_at.format("%Y-%m-%d %H:%M:%S"),
            item.kind.as_str(),
            item.mutation.user_id(),
            item.attempts,
            if item.synced { "synced" } else { "pending" },
            item
              .last_error
              .as_deref()
              .map(|e| format!(" ({})", e))
              .unwrap_or_default()
          );
        }
      }
      QueueAction::Message { user, content, ai } => {
        let queued = queue.enqueue(Mutation::Message {
          user_id: user,
          content,
          is_from_ai: ai,
        })?;
        println!("{}", queued.id);
      }
      QueueAction::Profile { user, ai, fields } => {
        let fields = commands::parse_fields(&fields)?;
        let mutation = if ai {
          Mutation::AiProfile {
            user_id: user,
            fields,
          }
        } else {
          Mutation::UserProfile {
            user_id: user,
            fields,
          }
        };
        println!("{}", queue.enqueue(mutation)?.id);
      }
      QueueAction::Purge => {
        println!("Removed {} delivered mutations", queue.purge_synced()?);
      }
    }
    Ok(())
  }

  async fn push(&self, payload: String, click: bool) -> Result<()> {
    let worker = self.live_worker()?;
    let intent = match worker.dispatch(Event::Push(payload.into_bytes())).await {
      EventOutcome::Notified(intent) => intent,
      outcome => return report(&outcome),
    };

    if click {
      report(&worker.dispatch(Event::NotificationClick(intent)).await)?;
    }
    Ok(())
  }

  async fn chat(&self, user_id: &str, text: &str) -> Result<()> {
    let worker = self.worker(Arc::new(OfflineNetwork))?;
    let generator = Arc::new(ChatCompletionClient::new(&self.config.generation)?);
    let session = ChatSession::new(
      self.backend.clone(),
      generator,
      worker.queue().clone(),
      self.config.generation.persona.clone(),
      self.config.generation.history_window,
    );

    let turn = session.send(user_id, text).await?;
    println!("{}", turn.reply);
    if !turn.generated {
      eprintln!("No reply from the persona, nothing was saved for it");
    }
    if turn.queued > 0 {
      eprintln!("{} message(s) queued for background sync", turn.queued);
    }
    Ok(())
  }

  async fn user(&self, user_id: &str, add_chats: Option<u32>) -> Result<()> {
    if let Some(count) = add_chats {
      let remaining = self.backend.add_chats(user_id, count).await?;
      println!("Granted {} chats, {} remaining", count, remaining);
      return Ok(());
    }

    let profile = self.backend.get_user_profile(user_id).await?;
    let persona = self.backend.get_ai_profile(user_id).await?;
    let remaining = self.backend.get_remaining_chats(user_id).await?;

    println!("user:      {}", serde_json::to_string_pretty(&profile)?);
    println!("persona:   {}", serde_json::to_string_pretty(&persona)?);
    println!("remaining: {}", remaining);
    Ok(())
  }

  async fn watch(&self, interval: Duration) -> Result<()> {
    let network: Arc<dyn Network> = Arc::new(HttpNetwork::new()?);
    let worker = self.worker(network.clone())?;

    let mut events = EventHandler::new();
    let monitor = ConnectivityMonitor::new(network, Request::get(self.config.origin_url()?));
    let probe = events.watch(monitor, interval);
    info!(origin = %self.config.origin, ?interval, "watching connectivity");

    loop {
      tokio::select! {
        event = events.next() => match event {
          Some(event) => {
            // Failures are already logged by the worker
            let _ = report(&worker.dispatch(event).await);
          }
          None => break,
        },
        _ = tokio::signal::ctrl_c() => break,
      }
    }

    probe.abort();
    Ok(())
  }

  fn status(&self) -> Result<()> {
    let worker = self.worker(Arc::new(OfflineNetwork))?;
    let state = worker.state();

    println!(
      "lifecycle:   {}",
      state
        .lifecycle()?
        .map(|s| s.as_str())
        .unwrap_or("not installed")
    );
    println!(
      "active:      {}",
      state.active_generation()?.unwrap_or_else(|| "-".to_string())
    );
    println!("configured:  {}", self.config.cache.generation_name());
    println!("generations: {}", worker.storage().generations()?.len());
    println!("pending:     {}", worker.queue().pending(None)?.len());
    Ok(())
  }
}

fn report(outcome: &EventOutcome) -> Result<()> {
  match outcome {
    EventOutcome::Installed {
      install,
      activation,
    } => {
      println!("Installed {} ({} entries)", install.generation, install.cached);
      if let Some(activation) = activation {
        print_activation(activation.generation.as_deref(), &activation.deleted, activation.claimed);
      }
    }
    EventOutcome::Activated(activation) => {
      print_activation(activation.generation.as_deref(), &activation.deleted, activation.claimed)
    }
    EventOutcome::Responded(result) => println!(
      "{} {} ({})",
      result.response.status,
      result.response.status_text,
      result.source.as_str()
    ),
    EventOutcome::Bypassed => println!("Not handled by the worker"),
    EventOutcome::Notified(intent) => println!("Notified: {}", intent.title),
    EventOutcome::Clicked(outcome) => println!("{:?}", outcome),
    EventOutcome::Synced(report) => println!(
      "Synced {}/{} ({} failed)",
      report.delivered, report.attempted, report.failed
    ),
    EventOutcome::Ignored => {}
    EventOutcome::Failed(message) => return Err(eyre!("{}", message)),
  }
  Ok(())
}

fn print_activation(generation: Option<&str>, deleted: &[String], claimed: usize) {
  match generation {
    Some(generation) => println!(
      "Active: {} (deleted {}, claimed {} windows)",
      generation,
      if deleted.is_empty() {
        "none".to_string()
      } else {
        deleted.join(", ")
      },
      claimed
    ),
    None => println!("Active with no cache generation"),
  }
}
