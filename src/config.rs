//! Settings for diary-pilot.
//!
//! Settings live in `<project>/.diary-pilot/settings.json`, layered over an
//! optional user-level file (see [`resolution`]). Every field has a default,
//! so a missing file or a partial file is valid.
//!
//! ```json
//! {
//!   "portal": { "loginUrl": "https://portal.example/sign-in" },
//!   "submission": { "entryDelaySecs": 5, "profile": "alice" },
//!   "llm": { "provider": "groq", "maxRetries": 2 }
//! }
//! ```

pub mod resolution;
pub mod validation;

pub use resolution::{ConfigLevel, ConfigLoader, ConfigSource};
pub use validation::ValidationReport;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PilotError, Result};
use crate::llm::ProviderKind;

/// Directory holding settings and runtime data inside a project.
pub const SETTINGS_DIR: &str = ".diary-pilot";

pub const SETTINGS_FILE: &str = "settings.json";

/// Provider selection value meaning "use the fallback order as is".
pub const AUTO_PROVIDER: &str = "auto";

// =============================================================================
// Sections
// =============================================================================

/// Where the portal lives and how to read its pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PortalSettings {
    pub login_url: String,
    pub diary_url: String,
    /// URL fragments that identify the sign-in page.
    pub login_markers: Vec<String>,
    /// Lower-case page text fragments meaning a date is already filled in.
    pub submitted_markers: Vec<String>,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            login_url: "https://vtu.internyet.in/sign-in".to_string(),
            diary_url: "https://vtu.internyet.in/dashboard/student/student-diary".to_string(),
            login_markers: ["sign-in", "login", "signin"].map(String::from).to_vec(),
            submitted_markers: [
                "already submitted",
                "already been submitted",
                "already filled",
                "entry already exists",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

/// Browser backend selection and timeouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrowserSettings {
    /// `auto`, `chrome` or `firefox`.
    pub kind: String,
    /// Attach to an already running WebDriver server instead of spawning one.
    pub webdriver_url: Option<String>,
    pub headless: bool,
    pub navigation_timeout_secs: u64,
    pub element_timeout_secs: u64,
    /// Upper bound for re-validating a learned selector.
    pub cache_probe_ms: u64,
    /// Timeout for each catalog candidate.
    pub candidate_probe_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            kind: "auto".to_string(),
            webdriver_url: None,
            headless: true,
            navigation_timeout_secs: 30,
            element_timeout_secs: 10,
            cache_probe_ms: 3000,
            candidate_probe_ms: 2000,
        }
    }
}

/// Pacing and bookkeeping for submission runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubmissionSettings {
    pub entry_delay_secs: f64,
    pub post_save_settle_secs: f64,
    pub form_timeout_secs: u64,
    pub step_pause_ms: u64,
    /// Capture a screenshot when an entry fails.
    pub screenshots: bool,
    /// Cookie profile name.
    pub profile: String,
    pub navigation_attempts: u32,
    pub backoff_factor: f64,
}

impl Default for SubmissionSettings {
    fn default() -> Self {
        Self {
            entry_delay_secs: 3.0,
            post_save_settle_secs: 3.0,
            form_timeout_secs: 15,
            step_pause_ms: 500,
            screenshots: true,
            profile: "default".to_string(),
            navigation_attempts: 3,
            backoff_factor: 2.0,
        }
    }
}

/// Inference provider chain settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LlmSettings {
    /// `auto` or a provider name to try first.
    pub provider: String,
    pub max_retries: u32,
    pub throttle_delay_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: AUTO_PROVIDER.to_string(),
            max_retries: 3,
            throttle_delay_secs: 25,
            max_tokens: 2000,
            temperature: 0.7,
        }
    }
}

/// Runtime data locations, relative to the settings directory unless absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PathSettings {
    /// Holds the learned selector cache.
    pub data_dir: PathBuf,
    /// Holds per-profile cookie files.
    pub session_dir: PathBuf,
    pub screenshot_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            session_dir: PathBuf::from("sessions"),
            screenshot_dir: PathBuf::from("screenshots"),
        }
    }
}

// =============================================================================
// PilotConfig
// =============================================================================

/// Complete settings for one project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PilotConfig {
    #[serde(default)]
    pub portal: PortalSettings,
    #[serde(default)]
    pub browser: BrowserSettings,
    #[serde(default)]
    pub submission: SubmissionSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub paths: PathSettings,
}

impl PilotConfig {
    /// Load settings for a project, layered over the user-level file.
    ///
    /// Missing files are ignored; a file that fails to parse is an error.
    pub fn load(project_dir: &Path) -> Result<Self> {
        ConfigLoader::new().load(project_dir)
    }

    /// Get the settings.json path for a project
    pub fn settings_path(project_dir: &Path) -> PathBuf {
        Self::data_root(project_dir).join(SETTINGS_FILE)
    }

    /// Directory that relative [`PathSettings`] entries resolve against.
    pub fn data_root(project_dir: &Path) -> PathBuf {
        project_dir.join(SETTINGS_DIR)
    }

    fn resolve(project_dir: &Path, path: &Path) -> PathBuf {
        Self::data_root(project_dir).join(path)
    }

    pub fn data_dir(&self, project_dir: &Path) -> PathBuf {
        Self::resolve(project_dir, &self.paths.data_dir)
    }

    pub fn session_dir(&self, project_dir: &Path) -> PathBuf {
        Self::resolve(project_dir, &self.paths.session_dir)
    }

    pub fn screenshot_dir(&self, project_dir: &Path) -> PathBuf {
        Self::resolve(project_dir, &self.paths.screenshot_dir)
    }

    /// Provider to move to the front of the chain, if one is named.
    pub fn primary_provider(&self) -> Result<Option<ProviderKind>> {
        let name = self.llm.provider.trim();
        if name.is_empty() || name.eq_ignore_ascii_case(AUTO_PROVIDER) {
            return Ok(None);
        }
        ProviderKind::parse(name)
            .map(Some)
            .ok_or_else(|| PilotError::InvalidConfig {
                field: "llm.provider".to_string(),
                reason: format!(
                    "unknown provider '{}'. Valid options: auto, groq, gemini, cerebras, openai, mock",
                    name
                ),
            })
    }

    /// Check every section. Errors make the settings unusable; warnings do not.
    pub fn validate(&self) -> ValidationReport {
        validation::validate(self)
    }

    /// Pretty JSON, as written to settings.json.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
