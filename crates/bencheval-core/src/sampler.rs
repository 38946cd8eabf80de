//! OpenRouter-compatible chat completion client.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::security::SecretValue;

/// One entry of a chat transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Generated text plus the exact message list that produced it.
#[derive(Debug, Clone)]
pub struct SamplerResponse {
    pub response_text: String,
    pub queried_messages: Vec<ChatMessage>,
}

/// A synchronous request/response chat model call.
#[async_trait]
pub trait Sampler: Send + Sync {
    async fn sample(&self, messages: &[ChatMessage]) -> Result<SamplerResponse>;
}

/// Chat client for OpenRouter-style `/chat/completions` endpoints.
pub struct OpenRouterSampler {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: SecretValue,
}

impl OpenRouterSampler {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretValue,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key,
        }
    }

}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

fn extract_content(body: &serde_json::Value) -> Result<String> {
    body.get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("chat response missing choices[0].message.content"))
}

#[async_trait]
impl Sampler for OpenRouterSampler {
    async fn sample(&self, messages: &[ChatMessage]) -> Result<SamplerResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages,
        };

        debug!(model = %self.model, message_count = messages.len(), "sending chat request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await
            .with_context(|| format!("chat request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("model API error {status}: {body}");
        }

        let body: serde_json::Value = response
            .json()
            .await
            .context("model API returned a non-JSON body")?;
        let response_text = extract_content(&body)?;

        Ok(SamplerResponse {
            response_text,
            queried_messages: messages.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(ChatMessage::system("s").role, "system");
        assert_eq!(ChatMessage::user("u").role, "user");
        assert_eq!(ChatMessage::assistant("a").role, "assistant");
    }

    #[test]
    fn extract_content_reads_first_choice() {
        let body = json!({
            "choices": [
                {"message": {"role": "assistant", "content": "hello"}},
                {"message": {"role": "assistant", "content": "ignored"}}
            ]
        });
        assert_eq!(extract_content(&body).expect("content"), "hello");
    }

    #[test]
    fn extract_content_rejects_malformed_bodies() {
        let body = json!({"choices": []});
        assert!(extract_content(&body).is_err());

        let body = json!({"error": {"message": "quota exceeded"}});
        assert!(extract_content(&body).is_err());
    }

    #[test]
    fn chat_request_serializes_message_list() {
        let messages = vec![ChatMessage::user("hi")];
        let request = ChatRequest {
            model: "test-model",
            messages: &messages,
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["model"], "test-model");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "hi");
    }
}
