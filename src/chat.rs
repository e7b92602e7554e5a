//! A single chat exchange with the AI persona.
//!
//! Saves go straight to the backend when it is reachable; any save that fails
//! is queued for background sync instead of being dropped.

use color_eyre::Result;
use std::sync::Arc;
use tracing::warn;

use crate::backend::Backend;
use crate::generation::{GenerationRequest, Role, TextGenerator, Turn};
use crate::sync::{Mutation, SyncQueue};

/// Reply shown when the persona could not answer.
pub const RETRY_LATER_REPLY: &str = "Xin lỗi, tôi đang gặp vấn đề kết nối. Vui lòng thử lại sau.";

/// How many stored messages are fetched before trimming to the history window.
const HISTORY_FETCH_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
  pub reply: String,
  /// False when the reply is the retry-later message
  pub generated: bool,
  /// Messages that could not be saved and were queued for sync
  pub queued: usize,
}

pub struct ChatSession {
  backend: Arc<dyn Backend>,
  generator: Arc<dyn TextGenerator>,
  queue: SyncQueue,
  persona: String,
  history_window: usize,
}

impl ChatSession {
  pub fn new(
    backend: Arc<dyn Backend>,
    generator: Arc<dyn TextGenerator>,
    queue: SyncQueue,
    persona: impl Into<String>,
    history_window: usize,
  ) -> Self {
    Self {
      backend,
      generator,
      queue,
      persona: persona.into(),
      history_window,
    }
  }

  pub async fn send(&self, user_id: &str, text: &str) -> Result<ChatTurn> {
    let history = self.history(user_id).await;
    let mut queued = 0;

    if self.save_or_queue(user_id, text, false).await? {
      queued += 1;
    }

    let request = GenerationRequest {
      persona: &self.persona,
      history: &history,
      message: text,
    };

    match self.generator.generate(&request).await {
      Ok(reply) => {
        if self.save_or_queue(user_id, &reply, true).await? {
          queued += 1;
        }
        Ok(ChatTurn {
          reply,
          generated: true,
          queued,
        })
      }
      Err(e) => {
        warn!(user_id, error = %e, "generation failed");
        Ok(ChatTurn {
          reply: RETRY_LATER_REPLY.to_string(),
          generated: false,
          queued,
        })
      }
    }
  }

  async fn history(&self, user_id: &str) -> Vec<Turn> {
    let messages = match self.backend.get_messages(user_id, HISTORY_FETCH_LIMIT).await {
      Ok(messages) => messages,
      Err(e) => {
        warn!(user_id, error = %e, "failed to load history, continuing without it");
        return Vec::new();
      }
    };

    let skip = messages.len().saturating_sub(self.history_window);
    messages
      .into_iter()
      .skip(skip)
      .map(|m| Turn {
        role: if m.is_from_ai {
          Role::Assistant
        } else {
          Role::User
        },
        content: m.content,
      })
      .collect()
  }

  /// Returns true when the message had to be queued.
  async fn save_or_queue(&self, user_id: &str, content: &str, is_from_ai: bool) -> Result<bool> {
    let mutation = Mutation::Message {
      user_id: user_id.to_string(),
      content: content.to_string(),
      is_from_ai,
    };

    match self.backend.deliver(&mutation).await {
      Ok(()) => Ok(false),
      Err(e) => {
        warn!(user_id, error = %e, "save failed, queueing for sync");
        self.queue.enqueue(mutation)?;
        Ok(true)
      }
    }
  }
}
