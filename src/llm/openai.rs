//! OpenAI-compatible chat completions provider.
//!
//! Groq, Cerebras and OpenAI all expose the same `/chat/completions`
//! endpoint, so one client serves the three of them with a different base
//! URL and default model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{
    GenerationRequest, InferenceProvider, ProviderError, ProviderKind, ProviderStats,
    UsageCounter,
};

// =============================================================================
// API Request/Response Types
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

// =============================================================================
// Provider
// =============================================================================

/// Client for any OpenAI-compatible chat completions API.
pub struct ChatCompletionsProvider {
    name: String,
    model: String,
    api_base: String,
    api_key: String,
    json_mode: bool,
    http: reqwest::Client,
    usage: UsageCounter,
}

impl std::fmt::Debug for ChatCompletionsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsProvider")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("json_mode", &self.json_mode)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsProvider {
    /// Default timeout for requests (2 minutes).
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    /// Build a client for `kind` with its default model and base URL.
    pub fn for_kind(kind: ProviderKind, api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new(kind.name(), kind.base_url(), kind.default_model(), api_key)
            // Cerebras rejects the response_format parameter for some models.
            .map(|p| p.with_json_mode(kind != ProviderKind::Cerebras))
    }

    pub fn new(
        name: impl Into<String>,
        api_base: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Self::DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self {
            name: name.into(),
            model: model.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            json_mode: true,
            http,
            usage: UsageCounter::default(),
        })
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Request `{"type": "json_object"}` output from the backend.
    #[must_use]
    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    fn build_body<'a>(&'a self, request: &GenerationRequest) -> ChatCompletionRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.user_content(),
        });

        ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: self.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        }
    }
}

#[async_trait]
impl InferenceProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError> {
        debug!(
            provider = %self.name,
            model = %self.model,
            "Sending chat completion ({} chars prompt)",
            request.prompt.len()
        );

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.build_body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_response(status.as_u16(), &body));
        }

        let parsed: ChatCompletionResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::MalformedResponse {
                message: "response contained no choices".to_string(),
            })?;

        let (prompt_tokens, completion_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or(((request.prompt.len() / 4) as u64, (content.len() / 4) as u64));
        self.usage.record(prompt_tokens, completion_tokens);

        Ok(content)
    }

    fn stats(&self) -> ProviderStats {
        self.usage.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_for_kind_uses_defaults() {
        let groq = ChatCompletionsProvider::for_kind(ProviderKind::Groq, "k").unwrap();
        assert_eq!(groq.name(), "groq");
        assert_eq!(groq.model(), "llama-3.3-70b-versatile");
        assert_eq!(
            groq.endpoint(),
            "https://api.groq.com/openai/v1/chat/completions"
        );
        assert!(groq.json_mode);

        let cerebras = ChatCompletionsProvider::for_kind(ProviderKind::Cerebras, "k").unwrap();
        assert!(!cerebras.json_mode);
    }

    #[test]
    fn test_request_body_shape() {
        let provider = ChatCompletionsProvider::new("t", "http://localhost/v1/", "m", "k").unwrap();
        let request = GenerationRequest::new("notes")
            .with_system("be brief")
            .with_max_tokens(100)
            .with_temperature(0.5);

        let body = serde_json::to_value(provider.build_body(&request)).unwrap();
        assert_eq!(body["model"], json!("m"));
        assert_eq!(body["max_tokens"], json!(100));
        assert_eq!(body["response_format"]["type"], json!("json_object"));
        assert_eq!(body["messages"][0]["role"], json!("system"));
        assert_eq!(body["messages"][1]["role"], json!("user"));
        assert_eq!(provider.endpoint(), "http://localhost/v1/chat/completions");
    }

    #[test]
    fn test_request_without_system_or_json_mode() {
        let provider = ChatCompletionsProvider::new("t", "http://x", "m", "k")
            .unwrap()
            .with_json_mode(false);
        let body = serde_json::to_value(provider.build_body(&GenerationRequest::new("p"))).unwrap();
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"{}"}}],
                      "usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15}}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "{}");
        assert_eq!(parsed.usage.unwrap().prompt_tokens, 12);
    }
}
