use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use super::{Backend, BackendError, Profile, StoredMessage, DEFAULT_CHAT_ALLOWANCE};
use crate::config::Config;

#[derive(Deserialize)]
struct ChatsResponse {
  remaining: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewMessage<'a> {
  content: &'a str,
  is_from_ai: bool,
}

/// Document store client over JSON/HTTP
#[derive(Clone)]
pub struct RestBackend {
  client: reqwest::Client,
  base: Url,
  token: Option<String>,
}

impl RestBackend {
  pub fn new(config: &Config) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("tamy-sw/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create backend client: {}", e))?;

    Ok(Self {
      client,
      base: config.backend_url()?,
      token: Config::get_backend_token(),
    })
  }

  /// Build an endpoint URL from path segments (each segment is percent-encoded)
  fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
    let mut url = self.base.clone();
    url
      .path_segments_mut()
      .map_err(|_| BackendError::Decode(format!("base url {} cannot have a path", self.base)))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  async fn send(
    &self,
    method: Method,
    url: Url,
    body: Option<serde_json::Value>,
  ) -> Result<reqwest::Response, BackendError> {
    let mut builder = self.client.request(method, url);
    if let Some(token) = &self.token {
      builder = builder.bearer_auth(token);
    }
    if let Some(body) = body {
      builder = builder.json(&body);
    }

    builder
      .send()
      .await
      .map_err(|e| BackendError::Unavailable(e.to_string()))
  }

  /// Send and decode a JSON body; `None` when the document does not exist
  async fn request<T: DeserializeOwned>(
    &self,
    method: Method,
    url: Url,
    body: Option<serde_json::Value>,
  ) -> Result<Option<T>, BackendError> {
    let response = self.send(method, url, body).await?;
    let status = response.status();

    if status == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    if !status.is_success() {
      let message = response.text().await.unwrap_or_default();
      return Err(BackendError::Rejected {
        status: status.as_u16(),
        message,
      });
    }

    response
      .json::<T>()
      .await
      .map(Some)
      .map_err(|e| BackendError::Decode(e.to_string()))
  }

  async fn require<T: DeserializeOwned>(
    &self,
    method: Method,
    url: Url,
    body: Option<serde_json::Value>,
  ) -> Result<T, BackendError> {
    let what = url.to_string();
    self
      .request(method, url, body)
      .await?
      .ok_or(BackendError::Rejected {
        status: StatusCode::NOT_FOUND.as_u16(),
        message: format!("{} not found", what),
      })
  }
}

#[async_trait]
impl Backend for RestBackend {
  async fn save_message(
    &self,
    user_id: &str,
    content: &str,
    is_from_ai: bool,
  ) -> Result<StoredMessage, BackendError> {
    let url = self.endpoint(&["users", user_id, "messages"])?;
    let body = serde_json::to_value(NewMessage {
      content,
      is_from_ai,
    })
    .map_err(|e| BackendError::Decode(e.to_string()))?;

    self.require(Method::POST, url, Some(body)).await
  }

  async fn get_messages(
    &self,
    user_id: &str,
    limit: usize,
  ) -> Result<Vec<StoredMessage>, BackendError> {
    let mut url = self.endpoint(&["users", user_id, "messages"])?;
    url
      .query_pairs_mut()
      .append_pair("order", "asc")
      .append_pair("limit", &limit.to_string());

    Ok(self.request(Method::GET, url, None).await?.unwrap_or_default())
  }

  async fn save_user_profile(
    &self,
    user_id: &str,
    fields: &Profile,
  ) -> Result<Profile, BackendError> {
    let url = self.endpoint(&["users", user_id])?;
    self
      .require(Method::PATCH, url, Some(serde_json::Value::Object(fields.clone())))
      .await
  }

  async fn get_user_profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError> {
    let url = self.endpoint(&["users", user_id])?;
    self.request(Method::GET, url, None).await
  }

  async fn save_ai_profile(&self, user_id: &str, fields: &Profile) -> Result<Profile, BackendError> {
    let url = self.endpoint(&["users", user_id, "ai-profile"])?;
    self
      .require(Method::PATCH, url, Some(serde_json::Value::Object(fields.clone())))
      .await
  }

  async fn get_ai_profile(&self, user_id: &str) -> Result<Option<Profile>, BackendError> {
    let url = self.endpoint(&["users", user_id, "ai-profile"])?;
    self.request(Method::GET, url, None).await
  }

  async fn get_remaining_chats(&self, user_id: &str) -> Result<u32, BackendError> {
    let url = self.endpoint(&["users", user_id, "chats"])?;
    let response: Option<ChatsResponse> = self.request(Method::GET, url, None).await?;
    Ok(
      response
        .map(|r| r.remaining)
        .unwrap_or(DEFAULT_CHAT_ALLOWANCE),
    )
  }

  async fn add_chats(&self, user_id: &str, count: u32) -> Result<u32, BackendError> {
    let url = self.endpoint(&["users", user_id, "chats"])?;
    let response: ChatsResponse = self
      .require(Method::POST, url, Some(json!({ "count": count })))
      .await?;
    Ok(response.remaining)
  }
}
