//! Message and profile document store.
//!
//! The worker only depends on the `Backend` trait; `RestBackend` talks to the
//! store over JSON/HTTP.

mod rest;

pub use rest::RestBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::sync::Mutation;

/// Remaining chats granted to a user without a stored profile.
pub const DEFAULT_CHAT_ALLOWANCE: u32 = 30;

/// Profile document (user or AI persona), merged field by field on save.
pub type Profile = Map<String, Value>;

#[derive(Error, Debug)]
pub enum BackendError {
  /// The store could not be reached.
  #[error("backend unavailable: {0}")]
  Unavailable(String),

  /// The store answered with a non-success status.
  #[error("backend rejected request ({status}): {message}")]
  Rejected { status: u16, message: String },

  /// The store answered with an unexpected body.
  #[error("unexpected backend response: {0}")]
  Decode(String),
}

/// A stored chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
  pub id: String,
  pub content: String,
  pub is_from_ai: bool,
  pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait Backend: Send + Sync {
  async fn save_message(
    &self,
    user_id: &str,
    content: &str,
    is_from_ai: bool,
  ) -> Result<StoredMessage, BackendError>;

  /// The first `limit` messages in chronological order. Once a
  /// conversation grows past `limit`, newer messages are not returned.
  async fn get_messages(&self, user_id: &str, limit: usize)
    -> Result<Vec<StoredMessage>, BackendError>;

  async fn save_user_profile(&self, user_id: &str, fields: &Profile)
    -> Result<Profile, BackendError>;

  async fn get_user_profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError>;

  async fn save_ai_profile(&self, user_id: &str, fields: &Profile)
    -> Result<Profile, BackendError>;

  async fn get_ai_profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError>;

  async fn get_remaining_chats(&self, user_id: &str) -> Result<u32, BackendError>;

  /// Grant additional chats. Returns the new remaining count.
  async fn add_chats(&self, user_id: &str, count: u32) -> Result<u32, BackendError>;

  /// Deliver a queued mutation. Delivering the same mutation twice must be harmless.
  async fn deliver(&self, mutation: &Mutation) -> Result<(), BackendError> {
    match mutation {
      Mutation::Message {
        user_id,
        content,
        is_from_ai,
      } => self.save_message(user_id, content, *is_from_ai).await.map(|_| ()),
      Mutation::UserProfile { user_id, fields } => {
        self.save_user_profile(user_id, fields).await.map(|_| ())
      }
      Mutation::AiProfile { user_id, fields } => {
        self.save_ai_profile(user_id, fields).await.map(|_| ())
      }
    }
  }
}
