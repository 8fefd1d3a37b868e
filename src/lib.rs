//! diary-pilot - resilient portal submission and structured generation
//!
//! Automates two unreliable external interactions: generating structured
//! diary content through interchangeable inference providers, and driving a
//! web portal's UI to submit that content across many dates in one run.
//!
//! # Architecture
//!
//! - [`retry`] - Bounded retry with exponential backoff
//! - [`browser`] - The [`PageDriver`] capability and its WebDriver backend
//! - [`locator`] - Self-healing element resolution (cache, catalog, heuristic)
//! - [`submission`] - The login/select/fill/save state machine and progress tracking
//! - [`llm`] - Inference providers and the fallback chain
//! - [`config`] - Settings loading and validation
//! - [`error`] - Shared failure taxonomy
//! - [`testing`] - Scripted page for tests
//!
//! # Example
//!
//! ```rust,ignore
//! use diary_pilot::browser::{BrowserKind, WebDriverPage};
//! use diary_pilot::locator::{JsonSelectorStore, SelfHealingLocator};
//! use diary_pilot::submission::{Credentials, MachineConfig, ProgressTracker, SubmissionStateMachine};
//!
//! let page = Arc::new(WebDriverPage::launch(BrowserKind::Chrome, true).await?);
//! let locator = SelfHealingLocator::new(page, Box::new(JsonSelectorStore::in_dir("data")));
//! let mut machine = SubmissionStateMachine::new(locator, credentials, MachineConfig::default());
//! let results = machine.run(&entries, &ProgressTracker::new(entries.len())).await;
//! ```

pub mod browser;
pub mod config;
pub mod error;
pub mod llm;
pub mod locator;
pub mod persist;
pub mod retry;
pub mod submission;
pub mod testing;

// Re-export commonly used types
pub use error::{IntoPilotError, PilotError, Result};

pub use browser::{BrowserKind, ElementHandle, PageDriver, WebDriverPage};
pub use config::{PilotConfig, ValidationReport};
pub use llm::{
    GenerationRequest, InferenceProvider, MockProvider, Outcome, ProviderCredentials,
    ProviderError, ProviderFallbackChain, ProviderKind,
};
pub use locator::{JsonSelectorStore, MemorySelectorStore, SelectorStore, SelfHealingLocator};
pub use retry::RetryStrategy;
pub use submission::{
    Credentials, MachineConfig, ProgressTracker, SubmissionEntry, SubmissionResult,
    SubmissionStateMachine, SubmissionStatus,
};
