//! Language-model provider abstraction.
//!
//! The rewriter, answer generator, and model-backed sentiment classifier all
//! talk to a [`ChatModel`]: a single `complete(messages, temperature)` call
//! that returns text. [`OpenAIChatModel`] targets any OpenAI-compatible
//! `/chat/completions` endpoint; [`DisabledChatModel`] fails every call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::retry;

/// Speaker of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// One message of a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: PromptRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: PromptRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&crate::models::Message> for ChatMessage {
    fn from(msg: &crate::models::Message) -> Self {
        match msg.role {
            crate::models::Role::User => ChatMessage::user(msg.content.clone()),
            crate::models::Role::Assistant => ChatMessage::assistant(msg.content.clone()),
        }
    }
}

/// A text-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;
    /// Returns the completion text. Failures are [`Error::Generation`].
    async fn complete(&self, messages: &[ChatMessage], temperature: f32) -> Result<String>;
}

/// Used when `llm.provider = "disabled"`.
pub struct DisabledChatModel;

#[async_trait]
impl ChatModel for DisabledChatModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[ChatMessage], _temperature: f32) -> Result<String> {
        Err(Error::Generation(
            "language model is disabled; set [llm] provider in config".to_string(),
        ))
    }
}

/// Client for OpenAI-compatible chat completions.
///
/// Requires `OPENAI_API_KEY`. Retries 429 and 5xx responses with
/// exponential backoff; other 4xx responses fail immediately.
pub struct OpenAIChatModel {
    model: String,
    endpoint: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

impl OpenAIChatModel {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            temperature,
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| Error::Generation(format!("failed to encode request: {}", e)))?;

        let json = retry::post_json(
            &self.client,
            &self.endpoint,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await
        .map_err(Error::Generation)?;

        if let Some(usage) = json.get("usage") {
            debug!(
                model = %self.model,
                prompt_tokens = usage.get("prompt_tokens").and_then(|v| v.as_u64()),
                completion_tokens = usage.get("completion_tokens").and_then(|v| v.as_u64()),
                "completion succeeded"
            );
        }

        parse_completion(&json)
    }
}

/// Extracts `choices[0].message.content`.
fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            Error::Generation("invalid completion response: missing choices[0].message".into())
        })
}

/// Create the configured [`ChatModel`].
pub fn create_chat_model(config: &LlmConfig) -> anyhow::Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChatModel)),
        "openai" => Ok(Arc::new(OpenAIChatModel::new(config)?)),
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Hi there"}}]
        });
        assert_eq!(parse_completion(&json).unwrap(), "Hi there");
    }

    #[test]
    fn test_parse_completion_missing_choices() {
        let err = parse_completion(&serde_json::json!({"error": "x"})).unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }

    #[test]
    fn test_request_serializes_roles_lowercase() {
        let messages = vec![ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let request = CompletionRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            temperature: 0.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["temperature"], 0.0);
    }

    #[tokio::test]
    async fn test_disabled_model_fails() {
        let err = DisabledChatModel
            .complete(&[ChatMessage::user("hi")], 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }
}
