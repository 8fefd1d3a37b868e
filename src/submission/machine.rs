//! Sequential submission state machine.
//!
//! One page, one login, then every entry in order:
//!
//! ```text
//! LoggedOut ─► LoggingIn ─► Ready
//!                             │
//!        ┌────────────────────┘  (per entry)
//!        ▼
//! SelectingTarget ─► PickingDate ─► AwaitingForm ─► FillingFields ─► Saving
//!        │                               │                              │
//!        └──────► Skipped                └──► (one full retry) ──►  Success
//!                                                  │
//!                                                  └──► Failed
//! ```
//!
//! Every entry yields exactly one [`SubmissionResult`]; a failing entry never
//! stops the loop. Elements are resolved through the [`SelfHealingLocator`],
//! so selectors learned on one entry speed up the next.

use chrono::{Datelike, NaiveDate};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::entry::{SubmissionEntry, SubmissionResult};
use super::progress::ProgressTracker;
use super::session::CookieJar;
use crate::browser::{DomEvent, ElementHandle, Key, PageDriver};
use crate::config::PilotConfig;
use crate::error::{PilotError, Result};
use crate::locator::{catalog, SelfHealingLocator, Strategy};
use crate::retry::RetryStrategy;

/// Interval between form-presence checks.
const FORM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Option lists tried, in order, after opening the target selector.
const OPTION_SELECTORS: &[&str] = &[
    "css=[role='option'][aria-disabled='false']",
    "css=[role='option']",
    "css=option",
];

/// Skill options in the multi-select dropdown.
const SKILL_OPTION_SELECTOR: &str = "css=[role='option']";

// =============================================================================
// States
// =============================================================================

/// Session-level state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalState {
    LoggedOut,
    LoggingIn,
    Ready,
}

/// State of the entry currently being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    SelectingTarget,
    PickingDate,
    AwaitingForm,
    FillingFields,
    Saving,
    Success,
    Skipped,
    Failed,
}

// =============================================================================
// Configuration
// =============================================================================

/// Portal login credentials.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Tunables for a submission run.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub login_url: String,
    pub diary_url: String,
    /// URL fragments that mean "this is the sign-in page".
    pub login_markers: Vec<String>,
    /// Page text fragments that mean "this date is already filled in".
    pub submitted_markers: Vec<String>,
    pub profile: String,
    pub navigation_timeout: Duration,
    pub element_timeout: Duration,
    /// Total time to wait for the entry form after pressing Continue.
    pub form_timeout: Duration,
    /// Short pause after clicks that open menus or pickers.
    pub step_pause: Duration,
    pub post_save_settle: Duration,
    /// Fixed delay after each entry.
    pub entry_delay: Duration,
    pub navigation_retry: RetryStrategy,
    pub screenshot_dir: Option<PathBuf>,
    /// Highlight the save button instead of clicking it.
    pub dry_run: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self::from_config(&PilotConfig::default(), None)
    }
}

impl MachineConfig {
    /// Build from loaded settings. `data_root` resolves relative paths.
    #[must_use]
    pub fn from_config(config: &PilotConfig, data_root: Option<&std::path::Path>) -> Self {
        let screenshot_dir = config.submission.screenshots.then(|| match data_root {
            Some(root) => root.join(&config.paths.screenshot_dir),
            None => config.paths.screenshot_dir.clone(),
        });
        Self {
            login_url: config.portal.login_url.clone(),
            diary_url: config.portal.diary_url.clone(),
            login_markers: config.portal.login_markers.clone(),
            submitted_markers: config.portal.submitted_markers.clone(),
            profile: config.submission.profile.clone(),
            navigation_timeout: Duration::from_secs(config.browser.navigation_timeout_secs),
            element_timeout: Duration::from_secs(config.browser.element_timeout_secs),
            form_timeout: Duration::from_secs(config.submission.form_timeout_secs),
            step_pause: Duration::from_millis(config.submission.step_pause_ms),
            post_save_settle: seconds(config.submission.post_save_settle_secs),
            entry_delay: seconds(config.submission.entry_delay_secs),
            navigation_retry: RetryStrategy::new(
                config.submission.navigation_attempts,
                config.submission.backoff_factor,
            ),
            screenshot_dir,
            dry_run: false,
        }
    }

    /// A configuration with every pause removed, for scripted pages.
    #[must_use]
    pub fn without_delays(mut self) -> Self {
        self.step_pause = Duration::ZERO;
        self.post_save_settle = Duration::ZERO;
        self.entry_delay = Duration::ZERO;
        self.navigation_retry = RetryStrategy::new(self.navigation_retry.max_attempts, 0.0);
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn with_screenshot_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.screenshot_dir = dir;
        self
    }
}

// =============================================================================
// State machine
// =============================================================================

/// Drives the portal for a batch of entries.
pub struct SubmissionStateMachine {
    locator: SelfHealingLocator,
    driver: Arc<dyn PageDriver>,
    cookies: Option<CookieJar>,
    credentials: Credentials,
    config: MachineConfig,
    global: GlobalState,
    entry: Option<EntryState>,
}

impl SubmissionStateMachine {
    #[must_use]
    pub fn new(locator: SelfHealingLocator, credentials: Credentials, config: MachineConfig) -> Self {
        let driver = Arc::clone(locator.driver());
        Self {
            locator,
            driver,
            cookies: None,
            credentials,
            config,
            global: GlobalState::LoggedOut,
            entry: None,
        }
    }

    /// Restore and persist session cookies through `jar`.
    #[must_use]
    pub fn with_cookie_jar(mut self, jar: CookieJar) -> Self {
        self.cookies = Some(jar);
        self
    }

    #[must_use]
    pub fn global_state(&self) -> GlobalState {
        self.global
    }

    /// State of the current (or last) entry.
    #[must_use]
    pub fn entry_state(&self) -> Option<EntryState> {
        self.entry
    }

    #[must_use]
    pub fn locator(&self) -> &SelfHealingLocator {
        &self.locator
    }

    /// Submit every entry, in order.
    ///
    /// Always returns one result per entry. A login failure marks every
    /// entry failed and ends the tracker in the failed state.
    pub async fn run(
        &mut self,
        entries: &[SubmissionEntry],
        tracker: &ProgressTracker,
    ) -> Vec<SubmissionResult> {
        let total = entries.len();
        let mut results = Vec::with_capacity(total);

        tracker.set_current("Logging in");
        if let Err(e) = self.login().await {
            error!("Login failed, aborting run: {}", e);
            let screenshot = self.capture("session", e.screenshot_context()).await;
            let message = e.to_string();
            for entry in entries {
                tracker.record_failure();
                results.push(
                    SubmissionResult::failed(entry, message.clone())
                        .with_screenshot(screenshot.clone()),
                );
            }
            tracker.fail(message);
            return results;
        }
        info!("Logged in, starting {} submissions", total);

        for (i, entry) in entries.iter().enumerate() {
            let date = entry.date;
            tracker.set_current(format!("[{}/{}] {}", i + 1, total, date));

            let result = match self.submit_one(entry).await {
                Ok(()) => {
                    self.entry = Some(EntryState::Success);
                    tracker.record_success();
                    info!(%date, "[{}/{}] Submitted", i + 1, total);
                    SubmissionResult::success(entry)
                }
                Err(e) if e.is_skip() => {
                    self.entry = Some(EntryState::Skipped);
                    tracker.record_skipped();
                    info!(%date, "[{}/{}] Skipped: {}", i + 1, total, e);
                    SubmissionResult::skipped(entry, e.to_string())
                }
                Err(e) => {
                    self.entry = Some(EntryState::Failed);
                    tracker.record_failure();
                    error!(%date, "[{}/{}] Failed: {}", i + 1, total, e);
                    let screenshot = self
                        .capture(&date.to_string(), e.screenshot_context())
                        .await;
                    SubmissionResult::failed(entry, e.to_string()).with_screenshot(screenshot)
                }
            };
            results.push(result);
            pause(self.config.entry_delay).await;
        }

        tracker.finish();
        results
    }

    // -------------------------------------------------------------------------
    // Login
    // -------------------------------------------------------------------------

    /// Establish a logged-in session, reusing stored cookies when valid.
    pub async fn login(&mut self) -> Result<()> {
        self.global = GlobalState::LoggingIn;
        match self.perform_login().await {
            Ok(()) => {
                self.global = GlobalState::Ready;
                Ok(())
            }
            Err(e) => {
                self.global = GlobalState::LoggedOut;
                Err(match e {
                    PilotError::Login { .. } => e,
                    other => PilotError::login(other.to_string()),
                })
            }
        }
    }

    async fn perform_login(&mut self) -> Result<()> {
        let login_url = self.config.login_url.clone();
        self.navigate(&login_url).await?;

        if let Some(cookies) = self.stored_cookies() {
            self.driver.add_cookies(&cookies).await?;
            self.navigate(&login_url).await?;
        }

        if !self.on_login_page().await? {
            info!("Existing session valid, skipping login form");
            self.dismiss_popup().await;
            return Ok(());
        }

        if !self.credentials.is_complete() {
            return Err(PilotError::login(
                "no portal credentials configured and no valid stored session",
            ));
        }

        let timeout = self.config.element_timeout;
        let email = self.locator.find("email_field", timeout).await?;
        self.driver.fill(&email, &self.credentials.username).await?;
        let password = self.locator.find("password_field", timeout).await?;
        self.driver.fill(&password, &self.credentials.password).await?;
        let submit = self.locator.find("login_button", timeout).await?;
        self.driver.click(&submit).await?;
        self.driver
            .wait_for_settle(self.config.navigation_timeout)
            .await?;
        self.dismiss_popup().await;

        if self.on_login_page().await? {
            return Err(PilotError::login(
                "still on the sign-in page after submitting credentials",
            ));
        }

        self.save_cookies().await;
        info!("Auto-login successful");
        Ok(())
    }

    fn stored_cookies(&self) -> Option<Vec<crate::browser::Cookie>> {
        let jar = self.cookies.as_ref()?;
        match jar.load(&self.config.profile) {
            Ok(found) => found,
            Err(e) => {
                warn!("Could not read stored session: {}", e);
                None
            }
        }
    }

    async fn save_cookies(&self) {
        let Some(jar) = &self.cookies else {
            return;
        };
        let saved = match self.driver.cookies().await {
            Ok(cookies) => jar.save(&self.config.profile, &cookies),
            Err(e) => Err(e),
        };
        if let Err(e) = saved {
            warn!("Could not save session: {}", e);
        }
    }

    async fn on_login_page(&self) -> Result<bool> {
        let url = self.driver.current_url().await?.to_lowercase();
        Ok(self
            .config
            .login_markers
            .iter()
            .any(|m| url.contains(&m.to_lowercase())))
    }

    // -------------------------------------------------------------------------
    // Per-entry flow
    // -------------------------------------------------------------------------

    async fn submit_one(&mut self, entry: &SubmissionEntry) -> Result<()> {
        let date = entry.date;

        self.select_target(date, true).await?;
        self.choose_date(date).await;
        self.press_continue().await?;

        self.entry = Some(EntryState::AwaitingForm);
        if let Err(first) = self.wait_for_form().await {
            if self.page_reports_submitted().await {
                return Err(PilotError::AlreadySubmitted {
                    date: date.to_string(),
                });
            }
            warn!(%date, "Form not found ({}), retrying selection once", first);
            match self.retry_to_form(date).await {
                Ok(()) => {}
                Err(e) if e.is_skip() => return Err(e),
                Err(e) => {
                    return Err(PilotError::FatalForm {
                        date: date.to_string(),
                        message: e.to_string(),
                    })
                }
            }
        }

        self.fill_form(entry).await?;
        self.save().await
    }

    async fn retry_to_form(&mut self, date: NaiveDate) -> Result<()> {
        self.select_target(date, false).await?;
        self.choose_date(date).await;
        self.press_continue().await?;
        self.entry = Some(EntryState::AwaitingForm);
        self.wait_for_form().await
    }

    /// Open the diary page and pick the first enabled internship.
    async fn select_target(&mut self, date: NaiveDate, allow_relogin: bool) -> Result<()> {
        self.entry = Some(EntryState::SelectingTarget);
        let diary_url = self.config.diary_url.clone();
        let timeout = self.config.element_timeout;

        self.navigate(&diary_url).await?;
        self.dismiss_popup().await;

        let select = match self.locator.find("internship_select", timeout).await {
            Ok(select) => select,
            Err(e) => {
                if self.page_reports_submitted().await {
                    return Err(PilotError::AlreadySubmitted {
                        date: date.to_string(),
                    });
                }
                if !allow_relogin {
                    return Err(e);
                }
                warn!("Selection page not found, re-logging in");
                self.login().await?;
                self.navigate(&diary_url).await?;
                self.dismiss_popup().await;
                self.locator.find("internship_select", timeout).await?
            }
        };

        self.driver.click(&select).await?;
        pause(self.config.step_pause).await;

        for selector in OPTION_SELECTORS {
            let options = self.driver.locate_all(&Strategy::parse(selector)).await?;
            if let Some(option) = options.first() {
                self.driver.click(option).await?;
                pause(self.config.step_pause).await;
                return Ok(());
            }
        }
        Err(PilotError::driver(
            "select internship",
            "no selectable internship option",
        ))
    }

    /// Pick `date` in the calendar. Failures are logged, not returned.
    async fn choose_date(&mut self, date: NaiveDate) {
        self.entry = Some(EntryState::PickingDate);
        if let Err(e) = self.pick_date(date).await {
            warn!(%date, "Date selection failed: {}", e);
        }
    }

    async fn pick_date(&mut self, date: NaiveDate) -> Result<()> {
        let timeout = self.config.element_timeout;

        let picker = self.locator.find("date_picker", timeout).await?;
        self.driver.click(&picker).await?;
        pause(self.config.step_pause).await;

        let year = self.locator.find("year_select", timeout).await?;
        self.driver
            .select_option(&year, &date.year().to_string())
            .await?;

        // Month options are zero-based.
        let month = self.locator.find("month_select", timeout).await?;
        self.driver
            .select_option(&month, &date.month0().to_string())
            .await?;
        pause(self.config.step_pause).await;

        let day = date.day();
        let by_label = Strategy::css(format!("button[aria-label*='{},']", ordinal(day)));
        let by_text = Strategy::xpath(format!(
            "//button[normalize-space(text())='{day}' and not(@disabled)]"
        ));
        for strategy in [by_label, by_text] {
            if let Some(button) = self.driver.locate(&strategy, Duration::ZERO).await? {
                self.driver.click(&button).await?;
                debug!(%date, selector = %strategy, "Selected day");
                return Ok(());
            }
        }
        Err(PilotError::driver(
            "pick date",
            format!("no button for day {day}"),
        ))
    }

    async fn press_continue(&mut self) -> Result<()> {
        let button = self
            .locator
            .find("continue_button", self.config.element_timeout)
            .await?;
        self.driver.click(&button).await?;
        self.driver
            .wait_for_settle(self.config.navigation_timeout)
            .await?;
        pause(self.config.step_pause).await;
        Ok(())
    }

    /// Poll for the description field until the form timeout elapses.
    ///
    /// No lookup outlives the timeout, however many candidates the field has.
    async fn wait_for_form(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.config.form_timeout;
        loop {
            match self.locator.find_before("description_field", deadline).await {
                Ok(_) => return Ok(()),
                Err(e) if Instant::now() + FORM_POLL_INTERVAL >= deadline => return Err(e),
                Err(_) => tokio::time::sleep(FORM_POLL_INTERVAL).await,
            }
        }
    }

    async fn fill_form(&mut self, entry: &SubmissionEntry) -> Result<()> {
        self.entry = Some(EntryState::FillingFields);
        let hours = entry.hours_text();
        let fields = [
            ("description_field", entry.activities.as_str()),
            ("hours_field", hours.as_str()),
            ("links_field", entry.links_text()),
            ("learnings_field", entry.learnings.as_str()),
            ("blockers_field", entry.blockers_text()),
        ];

        for (field, value) in fields {
            let element = self
                .locator
                .find(field, self.config.element_timeout)
                .await?;
            self.driver.fill(&element, value).await?;
            self.driver
                .dispatch_events(&element, &DomEvent::AFTER_FILL)
                .await?;
        }

        for skill in &entry.skills {
            if let Err(e) = self.add_skill(skill).await {
                warn!(skill = %skill, "Skill selection failed: {}", e);
            }
        }
        Ok(())
    }

    async fn add_skill(&mut self, skill: &str) -> Result<()> {
        let input = self
            .locator
            .find("skills_input", self.config.element_timeout)
            .await?;
        self.driver.click(&input).await?;
        self.driver.type_text(&input, skill).await?;
        pause(self.config.step_pause).await;

        let options = self
            .driver
            .locate_all(&Strategy::parse(SKILL_OPTION_SELECTOR))
            .await?;
        if let Some(option) = self.best_skill_option(&options, skill).await {
            self.driver.click(&option).await?;
            debug!(skill, "Skill option clicked");
        } else {
            self.driver.press_key(Key::ArrowDown).await?;
            self.driver.press_key(Key::Enter).await?;
            debug!(skill, "Skill chosen from keyboard");
        }
        pause(self.config.step_pause).await;
        Ok(())
    }

    /// Exact text match first, then case-insensitive substring.
    async fn best_skill_option(
        &self,
        options: &[ElementHandle],
        skill: &str,
    ) -> Option<ElementHandle> {
        let mut texts = Vec::with_capacity(options.len());
        for option in options {
            let text = self.driver.text_of(option).await.unwrap_or_default();
            texts.push(text.trim().to_string());
        }
        if let Some(i) = texts.iter().position(|t| t == skill) {
            return options.get(i).cloned();
        }
        let wanted = skill.to_lowercase();
        texts
            .iter()
            .position(|t| t.to_lowercase().contains(&wanted))
            .and_then(|i| options.get(i).cloned())
    }

    async fn save(&mut self) -> Result<()> {
        self.entry = Some(EntryState::Saving);
        let button = self
            .locator
            .find("submit_button", self.config.element_timeout)
            .await?;
        self.driver.force_enable(&button).await?;
        if self.config.dry_run {
            info!("Dry run: highlighting save button instead of clicking");
            self.driver.highlight(&button).await?;
        } else {
            self.driver.click(&button).await?;
        }
        self.driver
            .wait_for_settle(self.config.navigation_timeout)
            .await?;
        pause(self.config.post_save_settle).await;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    async fn navigate(&self, url: &str) -> Result<()> {
        let driver = &self.driver;
        let timeout = self.config.navigation_timeout;
        self.config
            .navigation_retry
            .retry(|| driver.navigate(url, timeout))
            .await?;
        driver.wait_for_settle(timeout).await
    }

    /// Close the informational modal if it is showing. Never fails.
    async fn dismiss_popup(&self) {
        let Some(popup) = catalog::lookup("popup_dismiss") else {
            return;
        };
        for strategy in popup.strategies() {
            let Ok(Some(button)) = self.driver.locate(&strategy, Duration::ZERO).await else {
                continue;
            };
            if !self.driver.is_visible(&button).await.unwrap_or(false) {
                continue;
            }
            match self.driver.click(&button).await {
                Ok(()) => {
                    debug!(selector = %strategy, "Popup dismissed");
                    pause(self.config.step_pause).await;
                }
                Err(e) => debug!("Popup dismissal failed: {}", e),
            }
            return;
        }
    }

    async fn page_reports_submitted(&self) -> bool {
        let text = match self.driver.page_text().await {
            Ok(text) => text.to_lowercase(),
            Err(_) => return false,
        };
        self.config
            .submitted_markers
            .iter()
            .any(|m| text.contains(&m.to_lowercase()))
    }

    /// Save a screenshot as `<label>_<context>.png`, if enabled.
    async fn capture(&self, label: &str, context: &str) -> Option<PathBuf> {
        let dir = self.config.screenshot_dir.as_ref()?;
        let path = dir.join(format!("{label}_{context}.png"));
        let written = async {
            let bytes = self.driver.screenshot().await?;
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, bytes).await?;
            Ok::<_, PilotError>(())
        }
        .await;
        match written {
            Ok(()) => {
                info!("Screenshot saved to {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Screenshot failed: {}", e);
                None
            }
        }
    }
}

fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_default()
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// English ordinal as used in calendar day labels: `1st`, `2nd`, `11th`.
#[must_use]
pub fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::MemorySelectorStore;
    use crate::submission::{RunStatus, SubmissionStatus};
    use crate::testing::fixtures::*;
    use crate::testing::ScriptedPage;
    use tempfile::TempDir;

    fn test_config() -> MachineConfig {
        let mut config = MachineConfig::default()
            .without_delays()
            .with_screenshot_dir(None);
        config.login_url = LOGIN_URL.to_string();
        config.diary_url = DIARY_URL.to_string();
        config
    }

    fn machine(page: &ScriptedPage, credentials: Credentials) -> SubmissionStateMachine {
        let locator =
            SelfHealingLocator::new(Arc::new(page.clone()), Box::new(MemorySelectorStore::new()));
        SubmissionStateMachine::new(locator, credentials, test_config())
    }

    fn creds() -> Credentials {
        Credentials::new("student@example.edu", "hunter2")
    }

    #[test]
    fn test_ordinal_suffixes() {
        assert_eq!(ordinal(1), "1st");
        assert_eq!(ordinal(2), "2nd");
        assert_eq!(ordinal(3), "3rd");
        assert_eq!(ordinal(4), "4th");
        assert_eq!(ordinal(11), "11th");
        assert_eq!(ordinal(12), "12th");
        assert_eq!(ordinal(13), "13th");
        assert_eq!(ordinal(21), "21st");
        assert_eq!(ordinal(22), "22nd");
        assert_eq!(ordinal(31), "31st");
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let debug = format!("{:?}", creds());
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("student@example.edu"));
    }

    #[tokio::test]
    async fn test_single_entry_success_fills_every_field() {
        let portal = portal_page(true, |_| DiaryVisit::Normal);
        let mut machine = machine(&portal.page, creds());
        let entries = sample_entries(1);
        let tracker = ProgressTracker::new(1);

        let results = machine.run(&entries, &tracker).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, SubmissionStatus::Success);
        assert!(results[0].submitted_at.is_some());
        assert_eq!(machine.global_state(), GlobalState::Ready);
        assert_eq!(machine.entry_state(), Some(EntryState::Success));

        let page = &portal.page;
        assert_eq!(page.value_of(DESCRIPTION).unwrap(), entries[0].activities);
        assert_eq!(page.value_of(HOURS).unwrap(), "7");
        assert_eq!(page.value_of(LINKS).unwrap(), "None");
        assert_eq!(page.value_of(BLOCKERS).unwrap(), "None");
        assert_eq!(page.value_of(LEARNINGS).unwrap(), "Learned about retries");
        // The form replaces the calendar, so check the recorded selections.
        assert_eq!(page.count_calls(&format!("select {YEAR}=2025")), 1);
        // January is month zero.
        assert_eq!(page.count_calls(&format!("select {MONTH}=0")), 1);
        assert_eq!(page.click_count("css=button[aria-label*='6th,']"), 1);
        assert_eq!(page.count_calls("force_enable"), 1);
        assert_eq!(page.click_count(SAVE), 1);
        assert_eq!(page.click_count(SKILL_OPTION), 1);
        assert_eq!(page.count_calls(&format!("events {HOURS} input,change,blur")), 1);

        let snap = tracker.snapshot();
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_already_submitted_is_skipped_and_run_continues() {
        let portal = portal_page(true, |visit| {
            if visit == 2 {
                DiaryVisit::AlreadySubmitted
            } else {
                DiaryVisit::Normal
            }
        });
        let mut machine = machine(&portal.page, creds());
        let entries = sample_entries(3);
        let tracker = ProgressTracker::new(3);

        let results = machine.run(&entries, &tracker).await;

        let statuses: Vec<_> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                SubmissionStatus::Success,
                SubmissionStatus::Skipped,
                SubmissionStatus::Success
            ]
        );
        assert!(results[1].error.as_deref().unwrap().contains("already submitted"));
        assert_eq!(portal.page.click_count(SAVE), 2);

        let snap = tracker.snapshot();
        assert_eq!(snap.completed, 3);
        assert_eq!(snap.failed, 0);
    }

    #[tokio::test]
    async fn test_failure_on_third_of_five_still_yields_five_results() {
        let portal = portal_page(true, |visit| {
            if visit == 3 {
                DiaryVisit::BrokenForm
            } else {
                DiaryVisit::Normal
            }
        });
        let mut machine = machine(&portal.page, creds());
        let entries = sample_entries(5);
        let tracker = ProgressTracker::new(5);

        let results = machine.run(&entries, &tracker).await;

        assert_eq!(results.len(), 5);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.date, entries[i].date);
            if i == 2 {
                assert_eq!(result.status, SubmissionStatus::Failed);
                assert!(result.error.as_deref().unwrap().contains("hours_field"));
            } else {
                assert_eq!(result.status, SubmissionStatus::Success, "entry {i}");
            }
        }

        let snap = tracker.snapshot();
        assert_eq!(snap.completed, 4);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_learned_selectors_are_reused_across_entries() {
        let portal = portal_page(true, |_| DiaryVisit::Normal);
        let mut machine = machine(&portal.page, creds());

        machine
            .run(&sample_entries(2), &ProgressTracker::new(2))
            .await;

        let learned = machine.locator().learned();
        assert!(learned
            .iter()
            .any(|(field, selector)| field == "hours_field" && selector == HOURS));
        // One catalog probe plus one cache probe per entry.
        assert_eq!(portal.page.locate_count(HOURS), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_form_is_retried_once_then_succeeds() {
        let portal = portal_page(true, |visit| {
            if visit == 1 {
                DiaryVisit::NoForm
            } else {
                DiaryVisit::Normal
            }
        });
        let mut machine = machine(&portal.page, creds());

        let results = machine
            .run(&sample_entries(1), &ProgressTracker::new(1))
            .await;

        assert_eq!(results[0].status, SubmissionStatus::Success);
        assert_eq!(portal.diary_visits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_form_missing_after_retry_is_fatal_form_error() {
        let portal = portal_page(true, |_| DiaryVisit::NoForm);
        let mut machine = machine(&portal.page, creds());

        let results = machine
            .run(&sample_entries(1), &ProgressTracker::new(1))
            .await;

        assert_eq!(results[0].status, SubmissionStatus::Failed);
        assert!(results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("form failed to load"));
        assert_eq!(portal.diary_visits.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(portal.page.click_count(SAVE), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_form_wait_never_outlives_form_timeout() {
        let page = ScriptedPage::new().waiting_on_miss();
        let mut machine = machine(&page, creds());
        let start = Instant::now();

        let result = machine.wait_for_form().await;

        assert!(matches!(result, Err(PilotError::LocatorExhausted { .. })));
        let elapsed = start.elapsed();
        let limit = test_config().form_timeout;
        assert!(elapsed <= limit + Duration::from_millis(50), "{elapsed:?}");
        assert!(elapsed >= limit - FORM_POLL_INTERVAL, "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_during_form_retry_stays_failed() {
        let portal = portal_page(true, |visit| match visit {
            1 => DiaryVisit::NoForm,
            _ => DiaryVisit::Expired,
        });
        let mut machine = machine(&portal.page, creds());
        let tracker = ProgressTracker::new(1);

        let results = machine.run(&sample_entries(1), &tracker).await;

        assert_eq!(results[0].status, SubmissionStatus::Failed);
        assert!(results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("form failed to load"));
        // The second attempt must not log in again.
        assert_eq!(portal.page.click_count(SIGN_IN), 0);
        assert_eq!(portal.page.count_calls(&format!("fill {EMAIL}")), 0);
        assert_eq!(portal.diary_visits.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(portal.page.click_count(SAVE), 0);
        assert_eq!(tracker.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_unmatched_skill_falls_back_to_keyboard() {
        let portal = portal_page(true, |_| DiaryVisit::Normal);
        let mut machine = machine(&portal.page, creds());
        let mut entries = sample_entries(1);
        entries[0].skills = vec!["Rust".to_string()];

        let results = machine.run(&entries, &ProgressTracker::new(1)).await;

        assert_eq!(results[0].status, SubmissionStatus::Success);
        let page = &portal.page;
        assert_eq!(page.count_calls(&format!("type {SKILLS}=Rust")), 1);
        assert_eq!(page.click_count(SKILL_OPTION), 0);
        assert_eq!(page.count_calls("press ArrowDown"), 1);
        assert_eq!(page.count_calls("press Enter"), 1);
        let calls = page.calls();
        let down = calls.iter().position(|c| c == "press ArrowDown").unwrap();
        let enter = calls.iter().position(|c| c == "press Enter").unwrap();
        assert!(down < enter);
    }

    #[tokio::test]
    async fn test_missing_day_button_is_logged_and_entry_continues() {
        let portal = portal_page(true, |_| DiaryVisit::NoDayButtons);
        let mut machine = machine(&portal.page, creds());

        let results = machine
            .run(&sample_entries(1), &ProgressTracker::new(1))
            .await;

        assert_eq!(results[0].status, SubmissionStatus::Success);
        let page = &portal.page;
        assert_eq!(page.locate_count("css=button[aria-label*='6th,']"), 1);
        assert_eq!(
            page.count_calls("locate xpath=//button[normalize-space(text())='6'"),
            1
        );
        assert_eq!(page.click_count("css=button[aria-label*='6th,']"), 0);
        assert_eq!(page.click_count(CONTINUE), 1);
        assert_eq!(page.click_count(SAVE), 1);
    }

    #[tokio::test]
    async fn test_popup_dismissed_after_login_and_navigation() {
        let portal = portal_page(false, |_| DiaryVisit::Popup);
        let page = portal.page.clone().on_click(SIGN_IN, |state| {
            state.add(POPUP);
        });
        let mut machine = machine(&page, creds());

        let results = machine
            .run(&sample_entries(1), &ProgressTracker::new(1))
            .await;

        assert_eq!(results[0].status, SubmissionStatus::Success);
        assert_eq!(page.click_count(SIGN_IN), 1);
        assert_eq!(page.click_count(POPUP), 2);
        let calls = page.calls();
        let popup_clicks: Vec<_> = calls
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == format!("click {POPUP}"))
            .map(|(i, _)| i)
            .collect();
        let sign_in = calls
            .iter()
            .position(|c| *c == format!("click {SIGN_IN}"))
            .unwrap();
        let internship = calls
            .iter()
            .position(|c| *c == format!("click {INTERNSHIP}"))
            .unwrap();
        assert!(sign_in < popup_clicks[0]);
        assert!(popup_clicks[1] < internship);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_delay_follows_every_entry() {
        let portal = portal_page(true, |_| DiaryVisit::Normal);
        let locator = SelfHealingLocator::new(
            Arc::new(portal.page.clone()),
            Box::new(MemorySelectorStore::new()),
        );
        let mut config = test_config();
        config.entry_delay = Duration::from_secs(3);
        let mut machine = SubmissionStateMachine::new(locator, creds(), config);
        let start = Instant::now();

        let results = machine
            .run(&sample_entries(2), &ProgressTracker::new(2))
            .await;

        assert_eq!(results.len(), 2);
        assert!(start.elapsed() >= Duration::from_secs(6), "{:?}", start.elapsed());
    }

    #[tokio::test]
    async fn test_login_form_used_when_no_session() {
        let dir = TempDir::new().unwrap();
        let jar = CookieJar::new(dir.path());
        let portal = portal_page(false, |_| DiaryVisit::Normal);
        let mut machine = machine(&portal.page, creds()).with_cookie_jar(jar.clone());

        let results = machine
            .run(&sample_entries(1), &ProgressTracker::new(1))
            .await;

        assert_eq!(results[0].status, SubmissionStatus::Success);
        assert_eq!(
            portal
                .page
                .count_calls(&format!("fill {EMAIL}=student@example.edu")),
            1
        );
        assert_eq!(portal.page.click_count(SIGN_IN), 1);
        let saved = jar.load("default").unwrap().unwrap();
        assert!(saved.iter().any(|c| c.name == SESSION_COOKIE));
    }

    #[tokio::test]
    async fn test_stored_cookies_skip_login_form() {
        let dir = TempDir::new().unwrap();
        let jar = CookieJar::new(dir.path());
        jar.save("default", &[crate::browser::Cookie::new(SESSION_COOKIE, "stored")])
            .unwrap();
        let portal = portal_page(false, |_| DiaryVisit::Normal);
        let mut machine = machine(&portal.page, Credentials::default()).with_cookie_jar(jar);

        let results = machine
            .run(&sample_entries(1), &ProgressTracker::new(1))
            .await;

        assert_eq!(results[0].status, SubmissionStatus::Success);
        assert_eq!(portal.page.count_calls("add_cookies 1"), 1);
        assert_eq!(portal.page.click_count(SIGN_IN), 0);
    }

    #[tokio::test]
    async fn test_login_failure_marks_every_entry_failed() {
        let portal = portal_page(false, |_| DiaryVisit::Normal);
        let mut machine = machine(&portal.page, Credentials::default());
        let tracker = ProgressTracker::new(3);

        let results = machine.run(&sample_entries(3), &tracker).await;

        assert_eq!(results.len(), 3);
        assert!(results
            .iter()
            .all(|r| r.status == SubmissionStatus::Failed
                && r.error.as_deref().unwrap().contains("Login failed")));
        assert_eq!(machine.global_state(), GlobalState::LoggedOut);
        assert_eq!(portal.diary_visits.load(std::sync::atomic::Ordering::SeqCst), 0);

        let snap = tracker.snapshot();
        assert_eq!(snap.status, RunStatus::Failed);
        assert_eq!(snap.failed, 3);
    }

    #[tokio::test]
    async fn test_expired_session_relogs_in_and_retries_navigation() {
        let portal = portal_page(true, |visit| {
            if visit == 1 {
                DiaryVisit::Expired
            } else {
                DiaryVisit::Normal
            }
        });
        let mut machine = machine(&portal.page, creds());

        let results = machine
            .run(&sample_entries(1), &ProgressTracker::new(1))
            .await;

        assert_eq!(results[0].status, SubmissionStatus::Success);
        assert_eq!(portal.page.click_count(SIGN_IN), 1);
        assert_eq!(portal.diary_visits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dry_run_highlights_instead_of_saving() {
        let portal = portal_page(true, |_| DiaryVisit::Normal);
        let locator = SelfHealingLocator::new(
            Arc::new(portal.page.clone()),
            Box::new(MemorySelectorStore::new()),
        );
        let mut machine =
            SubmissionStateMachine::new(locator, creds(), test_config().with_dry_run(true));

        let results = machine
            .run(&sample_entries(1), &ProgressTracker::new(1))
            .await;

        assert_eq!(results[0].status, SubmissionStatus::Success);
        assert_eq!(portal.page.count_calls(&format!("highlight {SAVE}")), 1);
        assert_eq!(portal.page.click_count(SAVE), 0);
    }

    #[tokio::test]
    async fn test_failure_screenshot_named_by_date_and_context() {
        let dir = TempDir::new().unwrap();
        let portal = portal_page(true, |_| DiaryVisit::BrokenForm);
        let locator = SelfHealingLocator::new(
            Arc::new(portal.page.clone()),
            Box::new(MemorySelectorStore::new()),
        );
        let config = test_config().with_screenshot_dir(Some(dir.path().to_path_buf()));
        let mut machine = SubmissionStateMachine::new(locator, creds(), config);

        let results = machine
            .run(&sample_entries(1), &ProgressTracker::new(1))
            .await;

        let expected = dir.path().join("2025-01-06_locator_exhausted.png");
        assert_eq!(results[0].screenshot.as_deref(), Some(expected.as_path()));
        assert!(expected.exists());
    }
}
