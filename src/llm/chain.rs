//! Ordered provider failover with a sticky active provider.
//!
//! The chain walks providers in priority order. Each provider gets up to
//! `max_retries` attempts; transient failures and unparseable output are
//! retried with a delay, fatal failures move on immediately. Whichever
//! provider last succeeded stays active for the next call.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::ATTEMPT_BACKOFF_BASE;
use super::{
    parse_structured, ChatCompletionsProvider, GeminiProvider, GenerationRequest,
    InferenceProvider, MockProvider, Outcome, ProviderCredentials, ProviderKind, ProviderStats,
};
use crate::error::{PilotError, Result};
use crate::retry::backoff_delay;

/// Default wait after a throttling response.
pub const DEFAULT_THROTTLE_DELAY: Duration = Duration::from_secs(25);

/// One entry of the chain.
#[derive(Clone)]
pub struct ProviderDescriptor {
    pub name: String,
    pub kind: ProviderKind,
    client: Arc<dyn InferenceProvider>,
}

impl ProviderDescriptor {
    pub fn new(kind: ProviderKind, client: Arc<dyn InferenceProvider>) -> Self {
        Self {
            name: client.name().to_string(),
            kind,
            client,
        }
    }

    pub fn client(&self) -> &Arc<dyn InferenceProvider> {
        &self.client
    }
}

impl std::fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("model", &self.client.model())
            .finish()
    }
}

/// Inference providers in failover order.
///
/// `generate` takes `&mut self`: one chain serves one caller at a time.
#[derive(Debug)]
pub struct ProviderFallbackChain {
    providers: Vec<ProviderDescriptor>,
    /// Always a valid index into `providers`.
    active: usize,
    throttle_delay: Duration,
}

impl ProviderFallbackChain {
    /// Build the chain from whichever providers have credentials.
    ///
    /// `primary` moves one provider to the front; the rest follow in
    /// [`ProviderKind::FALLBACK_ORDER`]. A `Mock` primary is always available.
    pub fn from_credentials(
        credentials: &ProviderCredentials,
        primary: Option<ProviderKind>,
    ) -> Result<Self> {
        let mut order: Vec<ProviderKind> = primary.into_iter().collect();
        for kind in ProviderKind::FALLBACK_ORDER {
            if !order.contains(&kind) {
                order.push(kind);
            }
        }

        let mut providers = Vec::new();
        for kind in order {
            match build_provider(kind, credentials) {
                Ok(Some(client)) => providers.push(ProviderDescriptor::new(kind, client)),
                Ok(None) => debug!(provider = %kind, "No credential, skipping"),
                Err(e) => warn!(provider = %kind, "Failed to initialise provider: {}", e),
            }
        }

        Self::with_providers(providers)
    }

    /// Build the chain from ready-made providers, in the given order.
    pub fn with_providers(providers: Vec<ProviderDescriptor>) -> Result<Self> {
        if providers.is_empty() {
            return Err(PilotError::NoProvidersAvailable);
        }

        let names: Vec<&str> = providers.iter().map(|p| p.name.as_str()).collect();
        info!(
            "Initialised provider chain: {} (fallbacks: {:?})",
            names[0],
            &names[1..]
        );

        Ok(Self {
            providers,
            active: 0,
            throttle_delay: DEFAULT_THROTTLE_DELAY,
        })
    }

    #[must_use]
    pub fn with_throttle_delay(mut self, delay: Duration) -> Self {
        self.throttle_delay = delay;
        self
    }

    /// Name of the provider the next call starts with.
    pub fn active_provider(&self) -> &str {
        &self.providers[self.active].name
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn providers(&self) -> &[ProviderDescriptor] {
        &self.providers
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Usage per provider, in chain order.
    pub fn stats(&self) -> Vec<(String, ProviderStats)> {
        self.providers
            .iter()
            .map(|p| (p.name.clone(), p.client.stats()))
            .collect()
    }

    /// Generate structured output, failing over across providers.
    pub async fn generate(&mut self, request: &GenerationRequest, max_retries: u32) -> Result<Value> {
        let max_retries = max_retries.max(1);
        let count = self.providers.len();
        let mut tried: Vec<usize> = Vec::with_capacity(count);

        while tried.len() < count {
            let idx = self.active;
            if !tried.contains(&idx) {
                tried.push(idx);
            }

            if let Some(value) = self.attempt_provider(idx, request, max_retries).await {
                return Ok(value);
            }

            self.active = (self.active + 1) % count;
            if !tried.contains(&self.active) {
                info!("Falling back to: {}", self.providers[self.active].name);
            }
        }

        Err(PilotError::AllProvidersExhausted {
            attempted: tried
                .into_iter()
                .map(|i| self.providers[i].name.clone())
                .collect(),
        })
    }

    /// Run `requests` one after another on the same chain.
    pub async fn generate_many(
        &mut self,
        requests: &[GenerationRequest],
        max_retries: u32,
    ) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(requests.len());
        for request in requests {
            values.push(self.generate(request, max_retries).await?);
        }
        Ok(values)
    }

    /// All attempts on one provider. `None` means move on.
    async fn attempt_provider(
        &self,
        idx: usize,
        request: &GenerationRequest,
        max_retries: u32,
    ) -> Option<Value> {
        let provider = &self.providers[idx];
        let name = provider.name.as_str();

        for attempt in 0..max_retries {
            let last = attempt + 1 == max_retries;
            let result = provider.client.generate(request).await;

            let delay = match (Outcome::of(&result), result) {
                (_, Ok(text)) => match parse_structured(&text) {
                    Ok(value) => {
                        debug!(provider = name, attempt = attempt + 1, "Generation succeeded");
                        return Some(value);
                    }
                    Err(e) => {
                        warn!(provider = name, attempt = attempt + 1, "JSON parse failed: {}", e);
                        backoff_delay(ATTEMPT_BACKOFF_BASE, attempt)
                    }
                },
                (Outcome::Fatal, Err(e)) => {
                    warn!(provider = name, attempt = attempt + 1, "{}", e);
                    warn!(provider = name, "Fatal error, switching provider");
                    return None;
                }
                (_, Err(e)) => {
                    warn!(provider = name, attempt = attempt + 1, "{}", e);
                    e.retry_delay(attempt, self.throttle_delay)
                }
            };

            if last {
                break;
            }
            tokio::time::sleep(delay).await;
        }

        None
    }
}

fn build_provider(
    kind: ProviderKind,
    credentials: &ProviderCredentials,
) -> std::result::Result<Option<Arc<dyn InferenceProvider>>, super::ProviderError> {
    if kind == ProviderKind::Mock {
        return Ok(Some(Arc::new(MockProvider::canned())));
    }
    let Some(key) = credentials.key(kind) else {
        return Ok(None);
    };

    let client: Arc<dyn InferenceProvider> = match kind {
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(key)?),
        _ => Arc::new(ChatCompletionsProvider::for_kind(kind, key)?),
    };
    Ok(Some(client))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderError;
    use serde_json::json;

    fn descriptor(mock: &Arc<MockProvider>) -> ProviderDescriptor {
        ProviderDescriptor::new(
            ProviderKind::Mock,
            Arc::clone(mock) as Arc<dyn InferenceProvider>,
        )
    }

    fn chain(mocks: &[&Arc<MockProvider>]) -> ProviderFallbackChain {
        ProviderFallbackChain::with_providers(mocks.iter().map(|m| descriptor(m)).collect())
            .unwrap()
    }

    fn auth_error() -> ProviderError {
        ProviderError::from_response(401, "invalid key")
    }

    #[test]
    fn test_no_credentials_is_an_error() {
        let err = ProviderFallbackChain::from_credentials(&ProviderCredentials::new(), None)
            .unwrap_err();
        assert!(matches!(err, PilotError::NoProvidersAvailable));
    }

    #[test]
    fn test_order_follows_priority_filtered_by_credentials() {
        let creds = ProviderCredentials::new()
            .with_key(ProviderKind::OpenAi, "sk")
            .with_key(ProviderKind::Groq, "gsk");
        let chain = ProviderFallbackChain::from_credentials(&creds, None).unwrap();
        assert_eq!(chain.provider_names(), vec!["groq", "openai"]);
        assert_eq!(chain.active_provider(), "groq");
    }

    #[test]
    fn test_explicit_primary_moves_to_front() {
        let creds = ProviderCredentials::new()
            .with_key(ProviderKind::Groq, "gsk")
            .with_key(ProviderKind::Gemini, "g")
            .with_key(ProviderKind::OpenAi, "sk");
        let chain =
            ProviderFallbackChain::from_credentials(&creds, Some(ProviderKind::OpenAi)).unwrap();
        assert_eq!(chain.provider_names(), vec!["openai", "groq", "gemini"]);
    }

    #[test]
    fn test_primary_without_credential_is_skipped() {
        let creds = ProviderCredentials::new().with_key(ProviderKind::Gemini, "g");
        let chain =
            ProviderFallbackChain::from_credentials(&creds, Some(ProviderKind::Cerebras)).unwrap();
        assert_eq!(chain.provider_names(), vec!["gemini"]);
    }

    #[test]
    fn test_mock_primary_needs_no_credentials() {
        let chain =
            ProviderFallbackChain::from_credentials(&ProviderCredentials::new(), Some(ProviderKind::Mock))
                .unwrap();
        assert_eq!(chain.provider_names(), vec!["mock"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_fails_over_after_one_attempt_and_sticks() {
        let first = Arc::new(MockProvider::new("first").with_error(auth_error()));
        let second = Arc::new(MockProvider::new("second").with_default(r#"{"ok": true}"#));
        let third = Arc::new(MockProvider::new("third").with_default("{}"));
        let mut chain = chain(&[&first, &second, &third]);

        let value = chain.generate(&GenerationRequest::new("p"), 3).await.unwrap();
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(first.call_count(), 1);
        assert_eq!(second.call_count(), 1);
        assert_eq!(third.call_count(), 0);
        assert_eq!(chain.active_provider(), "second");

        chain.generate(&GenerationRequest::new("again"), 3).await.unwrap();
        assert_eq!(first.call_count(), 1);
        assert_eq!(second.call_count(), 2);
        assert_eq!(third.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_client_error_retries_same_provider() {
        let first = Arc::new(
            MockProvider::new("first")
                .with_error(ProviderError::from_response(400, "Bad request: upstream hiccup"))
                .with_response(r#"{"ok": true}"#),
        );
        let second = Arc::new(MockProvider::new("second").with_default("{}"));
        let mut chain = chain(&[&first, &second]);

        let start = tokio::time::Instant::now();
        let value = chain.generate(&GenerationRequest::new("p"), 3).await.unwrap();

        assert_eq!(value, json!({"ok": true}));
        assert_eq!(first.call_count(), 2);
        assert_eq!(second.call_count(), 0);
        assert_eq!(chain.active_provider(), "first");
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_output_retries_same_provider() {
        let first = Arc::new(
            MockProvider::new("first")
                .with_response("Sure! Here you go")
                .with_response("{broken")
                .with_response(r#"{"hours": 7}"#),
        );
        let second = Arc::new(MockProvider::new("second").with_default("{}"));
        let mut chain = chain(&[&first, &second]);

        let start = tokio::time::Instant::now();
        let value = chain.generate(&GenerationRequest::new("p"), 3).await.unwrap();

        assert_eq!(value, json!({"hours": 7}));
        assert_eq!(first.call_count(), 3);
        assert_eq!(second.call_count(), 0);
        assert_eq!(chain.active_provider(), "first");
        // 1s then 2s between the three attempts
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_waits_long_delay() {
        let only = Arc::new(
            MockProvider::new("only")
                .with_error(ProviderError::from_response(429, "slow down"))
                .with_response("[]"),
        );
        let mut chain = chain(&[&only]);

        let start = tokio::time::Instant::now();
        chain.generate(&GenerationRequest::new("p"), 3).await.unwrap();
        assert!(start.elapsed() >= DEFAULT_THROTTLE_DELAY);
        assert_eq!(only.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhaustion_moves_to_next_provider() {
        // An empty script answers every call with a 500.
        let flaky = Arc::new(MockProvider::new("flaky"));
        let backup = Arc::new(MockProvider::new("backup").with_default("{}"));
        let mut chain = chain(&[&flaky, &backup]);

        chain.generate(&GenerationRequest::new("p"), 2).await.unwrap();
        assert_eq!(flaky.call_count(), 2);
        assert_eq!(backup.call_count(), 1);
        assert_eq!(chain.active_provider(), "backup");
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_providers_exhausted() {
        let first = Arc::new(MockProvider::new("first").with_error(auth_error()));
        let second = Arc::new(MockProvider::new("second"));
        let mut chain = chain(&[&first, &second]);

        let err = chain
            .generate(&GenerationRequest::new("p"), 3)
            .await
            .unwrap_err();
        match err {
            PilotError::AllProvidersExhausted { attempted } => {
                assert_eq!(attempted, vec!["first".to_string(), "second".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(first.call_count(), 1);
        assert_eq!(second.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_still_makes_one_attempt() {
        let only = Arc::new(MockProvider::new("only").with_default("{}"));
        let mut chain = chain(&[&only]);
        chain.generate(&GenerationRequest::new("p"), 0).await.unwrap();
        assert_eq!(only.call_count(), 1);
    }

    #[tokio::test]
    async fn test_generate_many_runs_in_order() {
        let mock = Arc::new(
            MockProvider::new("m")
                .with_response(r#"{"n": 1}"#)
                .with_response(r#"{"n": 2}"#),
        );
        let mut chain = chain(&[&mock]);
        let requests = vec![GenerationRequest::new("a"), GenerationRequest::new("b")];

        let values = chain.generate_many(&requests, 1).await.unwrap();
        assert_eq!(values, vec![json!({"n": 1}), json!({"n": 2})]);
        assert_eq!(chain.stats()[0].1.requests, 2);
    }
}
