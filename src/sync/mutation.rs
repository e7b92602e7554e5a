//! Pending mutation types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A change that must reach the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
  /// A chat message sent by the user or the AI persona
  Message {
    user_id: String,
    content: String,
    is_from_ai: bool,
  },
  /// A merge-update of the user's own profile
  UserProfile {
    user_id: String,
    fields: Map<String, Value>,
  },
  /// A merge-update of the AI persona profile owned by the user
  AiProfile {
    user_id: String,
    fields: Map<String, Value>,
  },
}

impl Mutation {
  pub fn kind(&self) -> MutationKind {
    match self {
      Self::Message { .. } => MutationKind::Message,
      Self::UserProfile { .. } | Self::AiProfile { .. } => MutationKind::Profile,
    }
  }

  pub fn user_id(&self) -> &str {
    match self {
      Self::Message { user_id, .. }
      | Self::UserProfile { user_id, .. }
      | Self::AiProfile { user_id, .. } => user_id,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
  Message,
  Profile,
}

impl MutationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Message => "message",
      Self::Profile => "profile",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "message" => Some(Self::Message),
      "profile" => Some(Self::Profile),
      _ => None,
    }
  }
}

/// A queued, not-yet-acknowledged mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation {
  pub id: Uuid,
  pub kind: MutationKind,
  pub mutation: Mutation,
  pub created_at: DateTime<Utc>,
  pub synced: bool,
  /// Failed delivery attempts so far
  pub attempts: u32,
  pub last_error: Option<String>,
}

/// Sync trigger tags. Each tag drains a subset of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SyncTag {
  #[value(name = "sync-messages")]
  Messages,
  #[value(name = "sync-profile")]
  Profile,
  #[value(name = "sync-all")]
  All,
}

impl SyncTag {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Messages => "sync-messages",
      Self::Profile => "sync-profile",
      Self::All => "sync-all",
    }
  }

  /// Kind of mutation drained by this tag, `None` for all kinds.
  pub fn kind(&self) -> Option<MutationKind> {
    match self {
      Self::Messages => Some(MutationKind::Message),
      Self::Profile => Some(MutationKind::Profile),
      Self::All => None,
    }
  }
}
