//! Inference provider abstraction and the fallback chain built on it.
//!
//! # Architecture
//!
//! The [`InferenceProvider`] trait is the seam every backend implements:
//!
//! - [`ChatCompletionsProvider`]: OpenAI-compatible HTTP API (Groq, Cerebras, OpenAI)
//! - [`GeminiProvider`]: Google's `generateContent` API
//! - [`MockProvider`]: scripted responses for tests and offline runs
//!
//! [`ProviderFallbackChain`] orders the providers that have credentials,
//! retries transient failures and fails over on fatal ones.
//!
//! # Example
//!
//! ```rust,ignore
//! use diary_pilot::llm::{GenerationRequest, ProviderCredentials, ProviderFallbackChain};
//!
//! let mut chain = ProviderFallbackChain::from_credentials(&ProviderCredentials::from_env(), None)?;
//! let value = chain.generate(&GenerationRequest::new("Summarise my day"), 3).await?;
//! ```

pub mod chain;
pub mod error;
pub mod gemini;
pub mod openai;

pub use chain::ProviderFallbackChain;
pub use error::{Outcome, ProviderError};
pub use gemini::GeminiProvider;
pub use openai::ChatCompletionsProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

/// Appended to every prompt so chat models stay on structured output.
pub const JSON_ONLY_SUFFIX: &str = "Output ONLY valid JSON.";

// =============================================================================
// Provider Trait
// =============================================================================

/// A single inference backend.
///
/// Implementations return the raw generated text; parsing into structured
/// data happens in the chain so every backend is held to the same contract.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Provider name as used in logs and configuration (e.g. "groq").
    fn name(&self) -> &str;

    /// Model identifier sent to the backend.
    fn model(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, ProviderError>;

    /// Token usage accumulated by this provider.
    fn stats(&self) -> ProviderStats {
        ProviderStats::default()
    }
}

// =============================================================================
// Requests and Usage
// =============================================================================

/// One generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationRequest {
    pub const DEFAULT_MAX_TOKENS: u32 = 2000;
    pub const DEFAULT_TEMPERATURE: f32 = 0.7;

    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            max_tokens: Self::DEFAULT_MAX_TOKENS,
            temperature: Self::DEFAULT_TEMPERATURE,
        }
    }

    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// The prompt with the structured-output instruction appended.
    #[must_use]
    pub fn user_content(&self) -> String {
        format!("{}\n\n{}", self.prompt, JSON_ONLY_SUFFIX)
    }
}

/// Token usage snapshot for one provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl ProviderStats {
    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Lock-free usage counters shared by the HTTP providers.
#[derive(Debug, Default)]
pub(crate) struct UsageCounter {
    requests: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

impl UsageCounter {
    pub(crate) fn record(&self, prompt_tokens: u64, completion_tokens: u64) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.prompt_tokens.fetch_add(prompt_tokens, Ordering::SeqCst);
        self.completion_tokens
            .fetch_add(completion_tokens, Ordering::SeqCst);
    }

    pub(crate) fn snapshot(&self) -> ProviderStats {
        ProviderStats {
            requests: self.requests.load(Ordering::SeqCst),
            prompt_tokens: self.prompt_tokens.load(Ordering::SeqCst),
            completion_tokens: self.completion_tokens.load(Ordering::SeqCst),
        }
    }
}

// =============================================================================
// Provider Kinds and Credentials
// =============================================================================

/// The backends the chain knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Groq,
    Gemini,
    Cerebras,
    #[serde(rename = "openai")]
    OpenAi,
    Mock,
}

impl ProviderKind {
    /// Fixed failover order: fastest free tiers first.
    pub const FALLBACK_ORDER: [ProviderKind; 4] =
        [Self::Groq, Self::Gemini, Self::Cerebras, Self::OpenAi];

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::Gemini => "gemini",
            Self::Cerebras => "cerebras",
            Self::OpenAi => "openai",
            Self::Mock => "mock",
        }
    }

    /// Parse a provider name. `auto` is not a kind and returns `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "groq" => Some(Self::Groq),
            "gemini" => Some(Self::Gemini),
            "cerebras" => Some(Self::Cerebras),
            "openai" => Some(Self::OpenAi),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }

    /// Environment variable holding the API key.
    #[must_use]
    pub const fn env_var(&self) -> Option<&'static str> {
        match self {
            Self::Groq => Some("GROQ_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Cerebras => Some("CEREBRAS_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Mock => None,
        }
    }

    #[must_use]
    pub const fn default_model(&self) -> &'static str {
        match self {
            Self::Groq => "llama-3.3-70b-versatile",
            Self::Gemini => "gemini-flash-lite-latest",
            Self::Cerebras => "gpt-oss-120b",
            Self::OpenAi => "gpt-4-turbo-preview",
            Self::Mock => "mock",
        }
    }

    #[must_use]
    pub const fn base_url(&self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Self::Cerebras => "https://api.cerebras.ai/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Mock => "",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// API keys per provider.
///
/// Keys set with [`with_key`](Self::with_key) take precedence over anything
/// read from the environment.
#[derive(Clone, Default)]
pub struct ProviderCredentials {
    keys: HashMap<ProviderKind, String>,
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.keys.keys().map(ProviderKind::name).collect();
        names.sort_unstable();
        f.debug_struct("ProviderCredentials")
            .field("configured", &names)
            .finish()
    }
}

impl ProviderCredentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read every known key from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read keys through `lookup`, which maps a variable name to its value.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut creds = Self::new();
        for kind in ProviderKind::FALLBACK_ORDER {
            if let Some(value) = kind.env_var().and_then(&lookup) {
                creds = creds.with_key(kind, value);
            }
        }
        creds
    }

    /// Set a key explicitly. Blank keys are ignored.
    #[must_use]
    pub fn with_key(mut self, kind: ProviderKind, key: impl Into<String>) -> Self {
        let key = key.into();
        if !key.trim().is_empty() {
            self.keys.insert(kind, key.trim().to_string());
        }
        self
    }

    #[must_use]
    pub fn key(&self, kind: ProviderKind) -> Option<&str> {
        self.keys.get(&kind).map(String::as_str)
    }

    #[must_use]
    pub fn has(&self, kind: ProviderKind) -> bool {
        self.keys.contains_key(&kind)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

// =============================================================================
// Structured Output
// =============================================================================

/// Parse generated text as a JSON object or array.
///
/// Markdown code fences around the payload are stripped first. Scalars are
/// rejected because every caller expects a record or a list of records.
pub fn parse_structured(text: &str) -> Result<serde_json::Value, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fences(text))?;
    if value.is_object() || value.is_array() {
        Ok(value)
    } else {
        Err(serde::de::Error::custom(format!(
            "expected a JSON object or array, got {value}"
        )))
    }
}

fn strip_code_fences(text: &str) -> &str {
    let mut clean = text.trim();
    if let Some(rest) = clean.strip_prefix("```json") {
        clean = rest;
    } else if let Some(rest) = clean.strip_prefix("```") {
        clean = rest;
    }
    if let Some(rest) = clean.strip_suffix("```") {
        clean = rest;
    }
    clean.trim()
}

// =============================================================================
// Mock Provider
// =============================================================================

/// Canned record returned by [`MockProvider::canned`].
const CANNED_RESPONSE: &str = r#"{
  "description": "Reviewed the module backlog, implemented the assigned feature and wrote unit tests for it.",
  "hours": 7,
  "learnings": "Structured logging makes failures in long runs much easier to trace.",
  "blockers": "None",
  "links": "None",
  "skills": ["Git", "Python"]
}"#;

/// Scripted provider for tests and offline runs.
///
/// Responses are consumed in order; once the script is empty the default
/// response is returned for every further call.
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    default_response: Option<String>,
    call_count: AtomicU32,
}

impl MockProvider {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            default_response: None,
            call_count: AtomicU32::new(0),
        }
    }

    /// Offline provider that always returns a plausible diary record.
    #[must_use]
    pub fn canned() -> Self {
        Self::new(ProviderKind::Mock.name()).with_default(CANNED_RESPONSE)
    }

    /// Queue a successful response.
    #[must_use]
    pub fn with_response(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    /// Queue a failure.
    #[must_use]
    pub fn with_error(self, error: ProviderError) -> Self {
        self.push(Err(error));
        self
    }

    /// Response used once the script runs out.
    #[must_use]
    pub fn with_default(mut self, text: impl Into<String>) -> Self {
        self.default_response = Some(text.into());
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    fn push(&self, item: Result<String, ProviderError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(item);
        }
    }
}

#[async_trait]
impl InferenceProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        ProviderKind::Mock.default_model()
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());

        match (next, &self.default_response) {
            (Some(item), _) => item,
            (None, Some(text)) => Ok(text.clone()),
            (None, None) => Err(ProviderError::Server {
                status: 500,
                message: format!("mock provider '{}' has no scripted response", self.name),
            }),
        }
    }

    fn stats(&self) -> ProviderStats {
        ProviderStats {
            requests: u64::from(self.call_count()),
            ..ProviderStats::default()
        }
    }
}
