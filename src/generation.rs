//! Chat-completion client for the AI persona.
//!
//! The endpoint is opaque to the worker: requests to it are bypassed by the
//! fetch strategy and never cached.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::{Config, GenerationConfig};

#[derive(Error, Debug)]
pub enum GenerationError {
  #[error("no API key configured (set TAMY_API_KEY)")]
  MissingApiKey,

  #[error("request failed: {0}")]
  Request(String),

  #[error("API error: {0}")]
  Api(String),

  #[error("empty response")]
  EmptyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  System,
  User,
  Assistant,
}

/// One prior turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
  pub role: Role,
  pub content: String,
}

/// Input for a single generation.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
  pub persona: &'a str,
  pub history: &'a [Turn],
  pub message: &'a str,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
  async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
  role: Role,
  content: &'a str,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
  model: &'a str,
  messages: Vec<ChatMessage<'a>>,
  temperature: f32,
  max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
  #[serde(default)]
  choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
  message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
  content: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
  error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
  message: String,
}

/// OpenAI-compatible chat-completion client
#[derive(Clone)]
pub struct ChatCompletionClient {
  client: reqwest::Client,
  url: Url,
  model: String,
  temperature: f32,
  max_tokens: u32,
  api_key: Option<String>,
}

impl ChatCompletionClient {
  pub fn new(config: &GenerationConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("tamy-sw/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create generation client: {}", e))?;

    Ok(Self {
      client,
      url: Url::parse(&config.url)
        .map_err(|e| eyre!("Invalid generation url '{}': {}", config.url, e))?,
      model: config.model.clone(),
      temperature: config.temperature,
      max_tokens: config.max_tokens,
      api_key: Config::get_api_key(),
    })
  }
}

/// Assemble the message list: persona, prior turns in order, then the new text.
fn build_messages<'a>(request: &'a GenerationRequest<'_>) -> Vec<ChatMessage<'a>> {
  let mut messages = Vec::with_capacity(request.history.len() + 2);
  messages.push(ChatMessage {
    role: Role::System,
    content: request.persona,
  });
  messages.extend(request.history.iter().map(|turn| ChatMessage {
    role: turn.role,
    content: &turn.content,
  }));
  messages.push(ChatMessage {
    role: Role::User,
    content: request.message,
  });
  messages
}

#[async_trait]
impl TextGenerator for ChatCompletionClient {
  async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
    let api_key = self.api_key.as_deref().ok_or(GenerationError::MissingApiKey)?;

    let body = CompletionBody {
      model: &self.model,
      messages: build_messages(request),
      temperature: self.temperature,
      max_tokens: self.max_tokens,
    };
    debug!(turns = request.history.len(), "requesting completion");

    let response = self
      .client
      .post(self.url.clone())
      .bearer_auth(api_key)
      .json(&body)
      .send()
      .await
      .map_err(|e| GenerationError::Request(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      let text = response.text().await.unwrap_or_default();
      let message = serde_json::from_str::<ApiErrorBody>(&text)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| format!("{} {}", status, text));
      return Err(GenerationError::Api(message));
    }

    let completion: CompletionResponse = response
      .json()
      .await
      .map_err(|e| GenerationError::Api(e.to_string()))?;

    completion
      .choices
      .into_iter()
      .next()
      .map(|c| c.message.content.trim().to_string())
      .filter(|content| !content.is_empty())
      .ok_or(GenerationError::EmptyResponse)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_messages_order_persona_history_then_new_text() {
    let history = vec![
      Turn {
        role: Role::User,
        content: "Chào em".to_string(),
      },
      Turn {
        role: Role::Assistant,
        content: "Dạ anh~".to_string(),
      },
    ];
    let request = GenerationRequest {
      persona: "Bạn là Tâm Ý",
      history: &history,
      message: "Em khỏe không?",
    };

    let json = serde_json::to_value(build_messages(&request)).unwrap();
    let roles: Vec<&str> = json
      .as_array()
      .unwrap()
      .iter()
      .map(|m| m["role"].as_str().unwrap())
      .collect();
    assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    assert_eq!(json[3]["content"], "Em khỏe không?");
  }

  #[test]
  fn test_completion_response_parsing() {
    let body = r#"{"choices":[{"message":{"role":"assistant","content":"  Hehe 😊 \n"}}]}"#;
    let parsed: CompletionResponse = serde_json::from_str(body).unwrap();
    assert_eq!(parsed.choices[0].message.content.trim(), "Hehe 😊");

    let empty: CompletionResponse = serde_json::from_str("{}").unwrap();
    assert!(empty.choices.is_empty());
  }

  #[tokio::test]
  async fn test_missing_api_key() {
    let client = ChatCompletionClient {
      api_key: None,
      ..ChatCompletionClient::new(&GenerationConfig::default()).unwrap()
    };
    let request = GenerationRequest {
      persona: "p",
      history: &[],
      message: "hi",
    };
    assert!(matches!(
      client.generate(&request).await,
      Err(GenerationError::MissingApiKey)
    ));
  }
}
