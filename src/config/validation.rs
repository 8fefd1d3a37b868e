//! Settings validation.

use super::PilotConfig;
use crate::browser::BrowserKind;

/// Errors and warnings found in a [`PilotConfig`].
///
/// An empty report is valid; warnings do not affect validity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// 0 if valid, 1 if invalid.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.is_valid() {
            0
        } else {
            1
        }
    }

    fn error(&mut self, field: &str, reason: impl std::fmt::Display) {
        self.errors.push(format!("{field}: {reason}"));
    }

    fn warn(&mut self, field: &str, reason: impl std::fmt::Display) {
        self.warnings.push(format!("{field}: {reason}"));
    }

    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_valid() {
            if self.warnings.is_empty() {
                "Configuration is valid.".to_string()
            } else {
                format!(
                    "Configuration is valid with {} warning(s).",
                    self.warnings.len()
                )
            }
        } else {
            format!(
                "Configuration is invalid with {} error(s).",
                self.errors.len()
            )
        }
    }

    /// Multi-line report listing every error and warning.
    #[must_use]
    pub fn verbose_report(&self) -> String {
        let mut lines = vec![
            "Configuration Validation Report".to_string(),
            "\u{2500}".repeat(50),
        ];

        if !self.errors.is_empty() {
            lines.push(String::new());
            lines.push(format!("Errors ({}):", self.errors.len()));
            for error in &self.errors {
                lines.push(format!("  \u{2717} {}", error));
            }
        }

        if !self.warnings.is_empty() {
            lines.push(String::new());
            lines.push(format!("Warnings ({}):", self.warnings.len()));
            for warning in &self.warnings {
                lines.push(format!("  \u{26a0} {}", warning));
            }
        }

        lines.push(String::new());
        lines.push(format!("Status: {}", self.summary()));
        lines.join("\n")
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

pub(super) fn validate(config: &PilotConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    // portal
    for (field, url) in [
        ("portal.loginUrl", &config.portal.login_url),
        ("portal.diaryUrl", &config.portal.diary_url),
    ] {
        if !is_http_url(url) {
            report.error(field, format!("'{url}' is not an http(s) URL"));
        }
    }
    if config.portal.login_markers.iter().all(|m| m.trim().is_empty()) {
        report.error("portal.loginMarkers", "at least one marker is required");
    }
    if config.portal.submitted_markers.is_empty() {
        report.warn(
            "portal.submittedMarkers",
            "already-submitted dates will be reported as failures",
        );
    }
    if config
        .portal
        .submitted_markers
        .iter()
        .any(|m| m.chars().any(char::is_uppercase))
    {
        report.warn(
            "portal.submittedMarkers",
            "markers are matched against lower-cased page text",
        );
    }

    // browser
    let kind = config.browser.kind.trim();
    if !kind.eq_ignore_ascii_case("auto") && BrowserKind::from_name(kind).is_none() {
        report.error(
            "browser.kind",
            format!("unknown browser '{kind}'. Valid options: auto, chrome, firefox"),
        );
    }
    if let Some(url) = &config.browser.webdriver_url {
        if !is_http_url(url) {
            report.error("browser.webdriverUrl", format!("'{url}' is not an http(s) URL"));
        }
    }
    if config.browser.navigation_timeout_secs == 0 {
        report.error("browser.navigationTimeoutSecs", "must be greater than zero");
    }
    if config.browser.element_timeout_secs == 0 {
        report.error("browser.elementTimeoutSecs", "must be greater than zero");
    }
    if config.browser.candidate_probe_ms == 0 {
        report.error("browser.candidateProbeMs", "must be greater than zero");
    }

    // submission
    for (field, value) in [
        ("submission.entryDelaySecs", config.submission.entry_delay_secs),
        (
            "submission.postSaveSettleSecs",
            config.submission.post_save_settle_secs,
        ),
        ("submission.backoffFactor", config.submission.backoff_factor),
    ] {
        if !value.is_finite() || value < 0.0 {
            report.error(field, format!("must be a non-negative number, got {value}"));
        }
    }
    if config.submission.form_timeout_secs == 0 {
        report.error("submission.formTimeoutSecs", "must be greater than zero");
    }
    if config.submission.navigation_attempts == 0 {
        report.error("submission.navigationAttempts", "must be at least 1");
    }
    let profile = &config.submission.profile;
    if profile.is_empty()
        || !profile
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        report.error(
            "submission.profile",
            format!("'{profile}' must be non-empty and use only letters, digits, '-' or '_'"),
        );
    }
    if config.submission.entry_delay_secs == 0.0 {
        report.warn(
            "submission.entryDelaySecs",
            "no pause between entries; the portal may throttle the session",
        );
    }

    // llm
    if let Err(e) = config.primary_provider() {
        report.errors.push(e.to_string());
    }
    if config.llm.max_retries == 0 {
        report.warn("llm.maxRetries", "0 is treated as a single attempt");
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        report.error(
            "llm.temperature",
            format!("must be between 0 and 2, got {}", config.llm.temperature),
        );
    }
    if config.llm.max_tokens == 0 {
        report.error("llm.maxTokens", "must be greater than zero");
    }

    report
}
