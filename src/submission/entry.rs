//! Diary entries and per-entry results.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PilotError, Result};

fn default_hours() -> f64 {
    7.0
}

fn default_skills() -> Vec<String> {
    vec!["Git".to_string()]
}

/// Placeholder written into optional free-text fields left empty.
pub const EMPTY_FIELD_TEXT: &str = "None";

/// One day's worth of diary content, produced outside the submission core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionEntry {
    pub date: NaiveDate,
    #[serde(default = "default_hours")]
    pub hours: f64,
    #[serde(alias = "description")]
    pub activities: String,
    #[serde(default)]
    pub learnings: String,
    #[serde(default)]
    pub blockers: String,
    #[serde(default)]
    pub links: String,
    #[serde(default = "default_skills")]
    pub skills: Vec<String>,
}

impl SubmissionEntry {
    #[must_use]
    pub fn new(date: NaiveDate, activities: impl Into<String>) -> Self {
        Self {
            date,
            hours: default_hours(),
            activities: activities.into(),
            learnings: String::new(),
            blockers: String::new(),
            links: String::new(),
            skills: default_skills(),
        }
    }

    #[must_use]
    pub fn with_hours(mut self, hours: f64) -> Self {
        self.hours = hours;
        self
    }

    #[must_use]
    pub fn with_learnings(mut self, learnings: impl Into<String>) -> Self {
        self.learnings = learnings.into();
        self
    }

    #[must_use]
    pub fn with_skills(mut self, skills: &[&str]) -> Self {
        self.skills = skills.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Hours as typed into the form: whole numbers without a fraction.
    #[must_use]
    pub fn hours_text(&self) -> String {
        if self.hours.fract() == 0.0 {
            format!("{:.0}", self.hours)
        } else {
            format!("{}", self.hours)
        }
    }

    /// Links, or the placeholder when empty.
    #[must_use]
    pub fn links_text(&self) -> &str {
        non_empty_or_placeholder(&self.links)
    }

    /// Blockers, or the placeholder when empty.
    #[must_use]
    pub fn blockers_text(&self) -> &str {
        non_empty_or_placeholder(&self.blockers)
    }

    /// Load a JSON array of entries from `path`.
    pub fn load_all(path: &Path) -> Result<Vec<Self>> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PilotError::config_with_path(format!("Cannot read entries: {e}"), path.to_path_buf())
        })?;
        let entries: Vec<Self> = serde_json::from_str(&content)?;
        Ok(entries)
    }
}

fn non_empty_or_placeholder(text: &str) -> &str {
    if text.trim().is_empty() {
        EMPTY_FIELD_TEXT
    } else {
        text
    }
}

/// Terminal status of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Outcome record for one entry. Exactly one is produced per input entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub date: NaiveDate,
    pub status: SubmissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
    pub entry: SubmissionEntry,
}

impl SubmissionResult {
    #[must_use]
    pub fn success(entry: &SubmissionEntry) -> Self {
        Self {
            date: entry.date,
            status: SubmissionStatus::Success,
            submitted_at: Some(Utc::now()),
            error: None,
            screenshot: None,
            entry: entry.clone(),
        }
    }

    #[must_use]
    pub fn skipped(entry: &SubmissionEntry, reason: impl Into<String>) -> Self {
        Self {
            date: entry.date,
            status: SubmissionStatus::Skipped,
            submitted_at: None,
            error: Some(reason.into()),
            screenshot: None,
            entry: entry.clone(),
        }
    }

    #[must_use]
    pub fn failed(entry: &SubmissionEntry, error: impl Into<String>) -> Self {
        Self {
            date: entry.date,
            status: SubmissionStatus::Failed,
            submitted_at: None,
            error: Some(error.into()),
            screenshot: None,
            entry: entry.clone(),
        }
    }

    #[must_use]
    pub fn with_screenshot(mut self, path: Option<PathBuf>) -> Self {
        self.screenshot = path;
        self
    }
}
