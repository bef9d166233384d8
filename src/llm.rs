//! Chat-completion client for the Xingyun agent platform.
//!
//! The client is built from an explicit [`LlmConfig`]; nothing is read from
//! the environment here. Responses are decoded once into [`ResponseShape`].

use log::{info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://www.xingyunlink.com/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

const COMPLETIONS_ENDPOINT: &str = "v1/chat/completions";

/// Body text kept in status errors
const MAX_ERROR_BODY_CHARS: usize = 1_024;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API请求失败: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API返回错误 (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("响应解析失败: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("无法识别的响应格式: {0}")]
    UnrecognizedShape(String),
}

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Clone, Debug, PartialEq)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: Option<String>,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct CompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub detail: bool,
    #[serde(rename = "chatId", skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<&'a str>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: MessageBody,
}

#[derive(Deserialize, Debug)]
struct MessageBody {
    content: String,
}

/// Known shapes of a completion response, checked in declaration order
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseShape {
    /// `{"choices": [{"message": {"content": ...}}, ...]}`
    Choices(String),
    /// `{"message": {"content": ...}}`
    Message(String),
    /// `{"content": ...}`
    Content(String),
    /// Anything else, kept as its JSON text
    UnrecognizedShape(String),
}

impl ResponseShape {
    /// Classifies a decoded response body
    ///
    /// An empty or malformed `choices` array falls through to the `message`
    /// and `content` shapes.
    pub fn decode(value: Value) -> Self {
        if let Some(choices) = value.get("choices") {
            if let Ok(mut choices) = serde_json::from_value::<Vec<Choice>>(choices.clone()) {
                if !choices.is_empty() {
                    return ResponseShape::Choices(choices.swap_remove(0).message.content);
                }
            }
        }
        if let Some(message) = value.get("message") {
            if let Ok(message) = serde_json::from_value::<MessageBody>(message.clone()) {
                return ResponseShape::Message(message.content);
            }
        }
        if let Some(Value::String(content)) = value.get("content") {
            return ResponseShape::Content(content.clone());
        }
        if let Value::String(raw) = value {
            return ResponseShape::Content(raw);
        }
        ResponseShape::UnrecognizedShape(value.to_string())
    }

    /// The document text, or an error for an unrecognized shape
    pub fn into_content(self) -> LlmResult<String> {
        match self {
            ResponseShape::Choices(content)
            | ResponseShape::Message(content)
            | ResponseShape::Content(content) => Ok(content),
            ResponseShape::UnrecognizedShape(raw) => {
                let mut shown: String = raw.chars().take(MAX_ERROR_BODY_CHARS).collect();
                if shown.len() < raw.len() {
                    shown.push_str("...");
                }
                Err(LlmError::UnrecognizedShape(shown))
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct LlmClient {
    config: LlmConfig,
    http_client: Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> LlmResult<Self> {
        let http_client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            COMPLETIONS_ENDPOINT
        )
    }

    /// Sends a chat completion and returns the decoded response shape
    pub async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        chat_id: Option<&str>,
    ) -> LlmResult<ResponseShape> {
        let body = CompletionRequest {
            model: self.config.model.as_deref(),
            messages,
            stream: false,
            detail: false,
            chat_id,
        };

        info!("发送对话请求: chat_id={:?}, stream=false", chat_id);
        let response = self
            .http_client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body: String = text.chars().take(MAX_ERROR_BODY_CHARS).collect();
            warn!("LLM API returned {}: {}", status, body);
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        let value: Value = serde_json::from_str(&text)?;
        Ok(ResponseShape::decode(value))
    }

    /// Sends one user message and returns the document it produced
    pub async fn chat_with_text(&self, text: &str, chat_id: Option<&str>) -> LlmResult<String> {
        self.chat_completion(vec![ChatMessage::user(text)], chat_id)
            .await?
            .into_content()
    }
}
