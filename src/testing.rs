//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::backend::{Backend, BackendError, Profile, StoredMessage, DEFAULT_CHAT_ALLOWANCE};
use crate::clients::{WindowClient, WindowClients};
use crate::generation::{GenerationError, GenerationRequest, TextGenerator, Turn};
use crate::http::{Request, Response};
use crate::network::{FetchError, Network};
use crate::notify::{NotificationIntent, Notifier};
use crate::sync::Mutation;

/// Network serving canned responses by request identity. Unknown requests
/// answer 404; while offline every fetch fails.
pub struct ScriptedNetwork {
  routes: Mutex<HashMap<String, Response>>,
  online: AtomicBool,
  calls: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self {
      routes: Mutex::new(HashMap::new()),
      online: AtomicBool::new(true),
      calls: Mutex::new(Vec::new()),
    }
  }

  pub fn serve(&self, url: Url, response: Response) {
    self.serve_method(Method::GET, url, response);
  }

  pub fn serve_method(&self, method: Method, url: Url, response: Response) {
    let identity = Request::new(method, url).identity();
    self.routes.lock().unwrap().insert(identity, response);
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// Identities of every fetch attempted, online or not.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

#[async_trait]
impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let identity = request.identity();
    self.calls.lock().unwrap().push(identity.clone());

    if !self.online.load(Ordering::SeqCst) {
      return Err(FetchError::Offline);
    }
    Ok(
      self
        .routes
        .lock()
        .unwrap()
        .get(&identity)
        .cloned()
        .unwrap_or_else(|| Response::new(404, "not found")),
    )
  }
}

#[derive(Default)]
struct BackendState {
  down: bool,
  failing_users: HashSet<String>,
  messages: HashMap<String, Vec<StoredMessage>>,
  user_profiles: HashMap<String, Profile>,
  ai_profiles: HashMap<String, Profile>,
  chats: HashMap<String, u32>,
  deliveries: Vec<Mutation>,
}

/// Document store kept in memory, with switchable outages.
#[derive(Default)]
pub struct ScriptedBackend {
  state: Mutex<BackendState>,
}

impl ScriptedBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Every request for this user fails as unreachable.
  pub fn fail_user(&self, user_id: &str) {
    self.state.lock().unwrap().failing_users.insert(user_id.to_string());
  }

  pub fn set_down(&self, down: bool) {
    self.state.lock().unwrap().down = down;
  }

  /// Mutations delivered successfully, in delivery order.
  pub fn deliveries(&self) -> Vec<Mutation> {
    self.state.lock().unwrap().deliveries.clone()
  }

  pub fn stored_messages(&self, user_id: &str) -> Vec<StoredMessage> {
    self
      .state
      .lock()
      .unwrap()
      .messages
      .get(user_id)
      .cloned()
      .unwrap_or_default()
  }

  pub fn seed_message(&self, user_id: &str, content: &str, is_from_ai: bool) {
    let mut state = self.state.lock().unwrap();
    let messages = state.messages.entry(user_id.to_string()).or_default();
    let id = format!("m{}", messages.len());
    messages.push(StoredMessage {
      id,
      content: content.to_string(),
      is_from_ai,
      timestamp: Utc::now(),
    });
  }

  fn check(&self, user_id: &str) -> Result<(), BackendError> {
    let state = self.state.lock().unwrap();
    if state.down || state.failing_users.contains(user_id) {
      return Err(BackendError::Unavailable(format!("cannot reach store for {}", user_id)));
    }
    Ok(())
  }
}

fn merge(target: &mut Profile, fields: &Profile) {
  for (key, value) in fields {
    target.insert(key.clone(), value.clone());
  }
}

#[async_trait]
impl Backend for ScriptedBackend {
  async fn save_message(
    &self,
    user_id: &str,
    content: &str,
    is_from_ai: bool,
  ) -> Result<StoredMessage, BackendError> {
    self.check(user_id)?;
    self.seed_message(user_id, content, is_from_ai);
    let stored = self.stored_messages(user_id);
    stored
      .last()
      .cloned()
      .ok_or_else(|| BackendError::Decode("message not stored".to_string()))
  }

  async fn get_messages(
    &self,
    user_id: &str,
    limit: usize,
  ) -> Result<Vec<StoredMessage>, BackendError> {
    self.check(user_id)?;
    Ok(self.stored_messages(user_id).into_iter().take(limit).collect())
  }

  async fn save_user_profile(
    &self,
    user_id: &str,
    fields: &Profile,
  ) -> Result<Profile, BackendError> {
    self.check(user_id)?;
    let mut state = self.state.lock().unwrap();
    let profile = state.user_profiles.entry(user_id.to_string()).or_default();
    merge(profile, fields);
    Ok(profile.clone())
  }

  async fn get_user_profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError> {
    self.check(user_id)?;
    Ok(self.state.lock().unwrap().user_profiles.get(user_id).cloned())
  }

  async fn save_ai_profile(&self, user_id: &str, fields: &Profile) -> Result<Profile, BackendError> {
    self.check(user_id)?;
    let mut state = self.state.lock().unwrap();
    let profile = state.ai_profiles.entry(user_id.to_string()).or_default();
    merge(profile, fields);
    Ok(profile.clone())
  }

  async fn get_ai_profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError> {
    self.check(user_id)?;
    Ok(self.state.lock().unwrap().ai_profiles.get(user_id).cloned())
  }

  async fn get_remaining_chats(&self, user_id: &str) -> Result<u32, BackendError> {
    self.check(user_id)?;
    Ok(
      self
        .state
        .lock()
        .unwrap()
        .chats
        .get(user_id)
        .copied()
        .unwrap_or(DEFAULT_CHAT_ALLOWANCE),
    )
  }

  async fn add_chats(&self, user_id: &str, count: u32) -> Result<u32, BackendError> {
    self.check(user_id)?;
    let mut state = self.state.lock().unwrap();
    let remaining = state
      .chats
      .entry(user_id.to_string())
      .or_insert(DEFAULT_CHAT_ALLOWANCE);
    *remaining += count;
    Ok(*remaining)
  }

  async fn deliver(&self, mutation: &Mutation) -> Result<(), BackendError> {
    match mutation {
      Mutation::Message {
        user_id,
        content,
        is_from_ai,
      } => {
        self.save_message(user_id, content, *is_from_ai).await?;
      }
      Mutation::UserProfile { user_id, fields } => {
        self.save_user_profile(user_id, fields).await?;
      }
      Mutation::AiProfile { user_id, fields } => {
        self.save_ai_profile(user_id, fields).await?;
      }
    }
    self.state.lock().unwrap().deliveries.push(mutation.clone());
    Ok(())
  }
}

/// Generator returning a fixed reply or failing, recording the history it saw.
pub struct ScriptedGenerator {
  reply: Option<String>,
  histories: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedGenerator {
  pub fn replying(reply: &str) -> Self {
    Self {
      reply: Some(reply.to_string()),
      histories: Mutex::new(Vec::new()),
    }
  }

  pub fn failing() -> Self {
    Self {
      reply: None,
      histories: Mutex::new(Vec::new()),
    }
  }

  pub fn last_history(&self) -> Vec<Turn> {
    self.histories.lock().unwrap().last().cloned().unwrap_or_default()
  }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
  async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
    self.histories.lock().unwrap().push(request.history.to_vec());
    self
      .reply
      .clone()
      .ok_or_else(|| GenerationError::Request("connection reset".to_string()))
  }
}

#[derive(Default)]
pub struct RecordingNotifier {
  shown: Mutex<Vec<NotificationIntent>>,
  closed: Mutex<Vec<NotificationIntent>>,
  failing: AtomicBool,
}

impl RecordingNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  pub fn shown(&self) -> Vec<NotificationIntent> {
    self.shown.lock().unwrap().clone()
  }

  pub fn closed(&self) -> Vec<NotificationIntent> {
    self.closed.lock().unwrap().clone()
  }
}

#[async_trait]
impl Notifier for RecordingNotifier {
  async fn show(&self, intent: &NotificationIntent) -> Result<()> {
    if self.failing.load(Ordering::SeqCst) {
      return Err(eyre!("notifications blocked"));
    }
    self.shown.lock().unwrap().push(intent.clone());
    Ok(())
  }

  async fn close(&self, intent: &NotificationIntent) -> Result<()> {
    self.closed.lock().unwrap().push(intent.clone());
    Ok(())
  }
}

#[derive(Default)]
pub struct FakeWindows {
  clients: Mutex<Vec<WindowClient>>,
  focused: Mutex<Vec<String>>,
  opened: Mutex<Vec<String>>,
  closed: Mutex<Vec<String>>,
  fail_open: AtomicBool,
  fail_focus: AtomicBool,
}

impl FakeWindows {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add(&self, id: &str, url: &str) {
    self.clients.lock().unwrap().push(WindowClient {
      id: id.to_string(),
      url: url.to_string(),
      controller: None,
    });
  }

  pub fn set_fail_open(&self, fail: bool) {
    self.fail_open.store(fail, Ordering::SeqCst);
  }

  pub fn set_fail_focus(&self, fail: bool) {
    self.fail_focus.store(fail, Ordering::SeqCst);
  }

  pub fn closed(&self) -> Vec<String> {
    self.closed.lock().unwrap().clone()
  }

  pub fn focused(&self) -> Vec<String> {
    self.focused.lock().unwrap().clone()
  }

  pub fn opened(&self) -> Vec<String> {
    self.opened.lock().unwrap().clone()
  }
}

#[async_trait]
impl WindowClients for FakeWindows {
  async fn list(&self) -> Result<Vec<WindowClient>> {
    Ok(self.clients.lock().unwrap().clone())
  }

  async fn focus(&self, id: &str) -> Result<()> {
    if !self.clients.lock().unwrap().iter().any(|c| c.id == id) {
      return Err(eyre!("No window client with id {}", id));
    }
    if self.fail_focus.load(Ordering::SeqCst) {
      return Err(eyre!("window {} is gone", id));
    }
    self.focused.lock().unwrap().push(id.to_string());
    Ok(())
  }

  async fn open(&self, url: &str) -> Result<WindowClient> {
    if self.fail_open.load(Ordering::SeqCst) {
      return Err(eyre!("window open blocked"));
    }
    let mut clients = self.clients.lock().unwrap();
    let client = WindowClient {
      id: format!("w{}", clients.len() + 1),
      url: url.to_string(),
      controller: None,
    };
    clients.push(client.clone());
    self.opened.lock().unwrap().push(url.to_string());
    Ok(client)
  }

  async fn close(&self, id: &str) -> Result<()> {
    self.clients.lock().unwrap().retain(|c| c.id != id);
    self.closed.lock().unwrap().push(id.to_string());
    Ok(())
  }

  async fn claim(&self, generation: &str) -> Result<usize> {
    let mut clients = self.clients.lock().unwrap();
    for client in clients.iter_mut() {
      client.controller = Some(generation.to_string());
    }
    Ok(clients.len())
  }
}
