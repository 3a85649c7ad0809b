//! OpenAI-compatible chat-completions adapter for the reasoning-provider
//! trait. Works against any deployment exposing the same wire format when a
//! base URL override is supplied.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use agent_core::{ProviderError, ProviderSettings, ReasoningProvider};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    client: Client,
    model: String,
    api_key: String,
    base_url: String,
    timeout_ms: u64,
}

impl OpenAiProvider {
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let api_key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ProviderError::Transport("missing API key".to_string()))?
            .to_string();
        if settings.model.trim().is_empty() {
            return Err(ProviderError::Transport("missing model name".to_string()));
        }

        let timeout_ms = if settings.request_timeout_ms == 0 {
            60_000
        } else {
            settings.request_timeout_ms
        };
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            model: settings.model.trim().to_string(),
            api_key,
            base_url: settings
                .base_url
                .as_deref()
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout_ms,
        })
    }
}

#[async_trait]
impl ReasoningProvider for OpenAiProvider {
    async fn invoke(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        output_schema: &Value,
    ) -> Result<Value, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "structured_output",
                    "schema": output_schema,
                }
            },
            "temperature": 0,
        });

        debug!(model = %self.model, "dispatching chat completion request");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ProviderError::Timeout(self.timeout_ms)
                } else {
                    ProviderError::Transport(err.to_string())
                }
            })?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(ProviderError::RateLimited),
            status if !status.is_success() => {
                let detail = response.text().await.unwrap_or_default();
                return Err(ProviderError::Transport(format!(
                    "provider returned {status}: {}",
                    detail.chars().take(200).collect::<String>()
                )));
            }
            _ => {}
        }

        let payload: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Malformed(err.to_string()))?;
        let content = payload
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .ok_or_else(|| {
                ProviderError::Malformed("response contained no assistant message".to_string())
            })?;

        serde_json::from_str(content).map_err(|err| {
            ProviderError::Malformed(format!("assistant message is not valid JSON: {err}"))
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_settings_without_credentials() {
        let settings = ProviderSettings::new("gpt-4o-mini");
        assert!(OpenAiProvider::from_settings(&settings).is_err());
    }

    #[test]
    fn strips_trailing_slash_from_base_url() {
        let settings = ProviderSettings::new("gpt-4o-mini")
            .with_api_key("sk-test")
            .with_base_url("https://llm.internal/v1/");
        let provider = OpenAiProvider::from_settings(&settings).unwrap();
        assert_eq!(provider.base_url, "https://llm.internal/v1");
    }

    #[test]
    fn parses_chat_completion_payload() {
        let raw = r#"{ "choices": [ { "message": { "content": "{\"ok\":true}" } } ] }"#;
        let payload: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            payload.choices[0].message.content.as_deref(),
            Some("{\"ok\":true}")
        );
    }
}
