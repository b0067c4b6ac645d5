use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::{header::HeaderValue, Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

const MAX_RETRIES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Deepseek,
    Local,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Deepseek => "deepseek",
            LlmProvider::Local => "local",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Some(LlmProvider::OpenAi),
            "anthropic" => Some(LlmProvider::Anthropic),
            "deepseek" => Some(LlmProvider::Deepseek),
            "local" => Some(LlmProvider::Local),
            _ => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "gpt-5-mini",
            LlmProvider::Anthropic => "claude-3-5-haiku-latest",
            LlmProvider::Deepseek => "deepseek-chat",
            LlmProvider::Local => "local",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub user: String,
    /// Ask the provider for a bare JSON object where it supports that.
    pub json_mode: bool,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    provider: LlmProvider,
    model: String,
    config: ProviderConfig,
}

#[derive(Clone)]
enum ProviderConfig {
    /// OpenAI and wire-compatible chat completion endpoints.
    ChatCompletions { api_key: String, base_url: String },
    Anthropic { api_key: String, max_tokens: u32 },
    Local,
}

impl LlmClient {
    /// Builds a client whose HTTP requests give up after `request_timeout`.
    pub fn new(
        provider: LlmProvider,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let config = match provider {
            LlmProvider::OpenAi => ProviderConfig::ChatCompletions {
                api_key: read_api_key("OPENAI_API_KEY")?,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            },
            LlmProvider::Deepseek => ProviderConfig::ChatCompletions {
                api_key: read_api_key("DEEPSEEK_API_KEY")?,
                base_url: "https://api.deepseek.com/v1".to_string(),
            },
            LlmProvider::Anthropic => ProviderConfig::Anthropic {
                api_key: read_api_key("ANTHROPIC_API_KEY")?,
                max_tokens: env::var("ANTHROPIC_MAX_TOKENS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(2048),
            },
            LlmProvider::Local => ProviderConfig::Local,
        };
        Self::build(provider, model.into(), config, request_timeout)
    }

    /// Client for any OpenAI-compatible chat completion endpoint, with the
    /// key and base URL given directly instead of read from the environment.
    pub fn openai_compatible(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let config = ProviderConfig::ChatCompletions {
            api_key: api_key.into(),
            base_url: base_url.into(),
        };
        Self::build(LlmProvider::OpenAi, model.into(), config, request_timeout)
    }

    fn build(
        provider: LlmProvider,
        model: String,
        config: ProviderConfig,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            http,
            provider,
            model,
            config,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn chat(&self, req: &LlmRequest) -> Result<LlmResponse> {
        match &self.config {
            ProviderConfig::ChatCompletions { api_key, base_url } => {
                self.chat_completions(api_key, base_url, req).await
            }
            ProviderConfig::Anthropic {
                api_key,
                max_tokens,
            } => self.chat_anthropic(api_key, *max_tokens, req).await,
            ProviderConfig::Local => Ok(chat_local(req)),
        }
    }

    async fn chat_completions(
        &self,
        api_key: &str,
        base_url: &str,
        req: &LlmRequest,
    ) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let mut messages = Vec::new();
        if let Some(system) = &req.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": req.user }));
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
        });
        if req.json_mode {
            payload["response_format"] = json!({ "type": "json_object" });
        }
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match self
                .http
                .post(&url)
                .bearer_auth(api_key)
                .json(&payload)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) if err.is_timeout() => {
                    return Err(err).context("chat completion request timed out");
                }
                Err(err) => {
                    if attempt > MAX_RETRIES {
                        return Err(err).context("chat completion request failed");
                    }
                    sleep(backoff_delay(attempt, None)).await;
                    continue;
                }
            };
            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt > MAX_RETRIES {
                    return Err(anyhow!(
                        "{} rate limited after {MAX_RETRIES} retries",
                        self.provider.as_str()
                    ));
                }
                let wait = backoff_delay(attempt, response.headers().get("retry-after"));
                tracing::debug!(attempt, ?wait, "rate limited, backing off");
                sleep(wait).await;
                continue;
            }
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(anyhow!(
                    "{} returned error (status {status}): {body}",
                    self.provider.as_str()
                ));
            }
            let value: Value =
                serde_json::from_str(&body).context("failed to decode chat completion")?;
            let content = extract_chat_text(&value)
                .ok_or_else(|| anyhow!("missing text in chat completion response"))?;
            let usage: ChatUsage = value
                .get("usage")
                .and_then(|usage| serde_json::from_value(usage.clone()).ok())
                .unwrap_or_default();
            return Ok(LlmResponse {
                content,
                prompt_tokens: usage.prompt_tokens.unwrap_or(0),
                completion_tokens: usage.completion_tokens.unwrap_or(0),
            });
        }
    }

    async fn chat_anthropic(
        &self,
        api_key: &str,
        max_tokens: u32,
        req: &LlmRequest,
    ) -> Result<LlmResponse> {
        let mut payload = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": [ { "role": "user", "content": req.user } ],
        });
        if let Some(system) = &req.system {
            payload["system"] = json!(system);
        }
        let response = self
            .http
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&payload)
            .send()
            .await
            .context("anthropic request failed")?
            .error_for_status()
            .context("anthropic returned an error")?
            .json::<AnthropicResponse>()
            .await
            .context("failed to decode anthropic response")?;
        let text = response
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or_else(|| anyhow!("missing text in Anthropic response"))?;
        let usage = response.usage.unwrap_or_default();
        Ok(LlmResponse {
            content: text,
            prompt_tokens: usage.input_tokens.unwrap_or(0),
            completion_tokens: usage.output_tokens.unwrap_or(0),
        })
    }
}

/// Offline provider: answers JSON requests with an empty object, anything
/// else with an empty string.
fn chat_local(req: &LlmRequest) -> LlmResponse {
    let content = if req.json_mode { "{}" } else { "" };
    LlmResponse {
        content: content.to_string(),
        prompt_tokens: 0,
        completion_tokens: 0,
    }
}

fn backoff_delay(attempt: usize, retry_after: Option<&HeaderValue>) -> Duration {
    if let Some(secs) = retry_after
        .and_then(|value| value.to_str().ok())
        .and_then(|text| text.trim().parse::<u64>().ok())
    {
        return Duration::from_secs(secs.max(1));
    }
    let capped = attempt.min(5) as u32;
    Duration::from_secs(1u64 << capped)
}

fn read_api_key(var: &str) -> Result<String> {
    let value = env::var(var).map_err(|_| anyhow!("{var} is not set"))?;
    validate_api_key(var, &value)?;
    Ok(value)
}

fn validate_api_key(var: &str, value: &str) -> Result<()> {
    if var.contains("ANTHROPIC") && !value.starts_with("sk-ant-") {
        return Err(anyhow!("{var} must start with 'sk-ant-'"));
    }
    if (var.contains("OPENAI") || var.contains("DEEPSEEK")) && !value.starts_with("sk-") {
        return Err(anyhow!("{var} must start with 'sk-'"));
    }
    Ok(())
}

fn extract_chat_text(value: &Value) -> Option<String> {
    let message = value.get("choices")?.as_array()?.first()?.get("message")?;
    match message.get("content")? {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => parts
            .iter()
            .find_map(|part| part.get("text").and_then(|t| t.as_str()))
            .map(str::to_string),
        _ => None,
    }
}

#[derive(Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_roundtrip() {
        for provider in [
            LlmProvider::OpenAi,
            LlmProvider::Anthropic,
            LlmProvider::Deepseek,
            LlmProvider::Local,
        ] {
            assert_eq!(LlmProvider::from_str(provider.as_str()), Some(provider));
        }
        assert_eq!(LlmProvider::from_str(" OpenAI "), Some(LlmProvider::OpenAi));
        assert_eq!(LlmProvider::from_str("gemini"), None);
    }

    #[test]
    fn backoff_prefers_retry_after_header() {
        let header = HeaderValue::from_static("7");
        assert_eq!(backoff_delay(1, Some(&header)), Duration::from_secs(7));
        assert_eq!(backoff_delay(1, None), Duration::from_secs(2));
        assert_eq!(backoff_delay(9, None), Duration::from_secs(32));
    }

    #[test]
    fn chat_text_handles_string_and_part_content() {
        let plain = json!({"choices": [{"message": {"content": "{\"a\": null}"}}]});
        assert_eq!(extract_chat_text(&plain).as_deref(), Some("{\"a\": null}"));
        let parts = json!({"choices": [{"message": {"content": [{"type": "text", "text": "hi"}]}}]});
        assert_eq!(extract_chat_text(&parts).as_deref(), Some("hi"));
        assert!(extract_chat_text(&json!({"choices": []})).is_none());
    }

    #[test]
    fn key_validation_checks_prefixes() {
        assert!(validate_api_key("OPENAI_API_KEY", "sk-test").is_ok());
        assert!(validate_api_key("OPENAI_API_KEY", "test").is_err());
        assert!(validate_api_key("ANTHROPIC_API_KEY", "sk-test").is_err());
        assert!(validate_api_key("ANTHROPIC_API_KEY", "sk-ant-test").is_ok());
    }

    #[test]
    fn local_provider_answers_json_requests_with_empty_object() {
        let client =
            LlmClient::new(LlmProvider::Local, "local", Duration::from_secs(1)).unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let response = runtime
            .block_on(client.chat(&LlmRequest {
                system: None,
                user: "extract".to_string(),
                json_mode: true,
            }))
            .unwrap();
        assert_eq!(response.content, "{}");
        assert_eq!(response.total_tokens(), 0);
    }
}
