//! Scripted portal used by state-machine tests.
//!
//! The page behaves like the diary portal: the sign-in URL shows a login form
//! unless a session cookie is present, the diary URL shows the selection
//! controls, and pressing Continue renders the entry form. What each diary
//! visit looks like is decided by a per-visit plan.

use chrono::NaiveDate;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use super::mocks::{PageState, ScriptedPage};
use crate::browser::Cookie;
use crate::submission::{ordinal, SubmissionEntry};

pub const LOGIN_URL: &str = "https://portal.test/sign-in";
pub const DIARY_URL: &str = "https://portal.test/dashboard/student/student-diary";
pub const DASHBOARD_URL: &str = "https://portal.test/dashboard";

pub const SESSION_COOKIE: &str = "sid";

pub const EMAIL: &str = "css=input[autocomplete='email']";
pub const PASSWORD: &str = "css=input[autocomplete='current-password']";
pub const SIGN_IN: &str = "xpath=//button[contains(., 'Sign In')]";
pub const INTERNSHIP: &str = "label=Select Internship";
pub const INTERNSHIP_OPTION: &str = "css=[role='option'][aria-disabled='false']";
pub const DATE_PICKER: &str = "xpath=//button[contains(., 'Pick a Date')]";
pub const YEAR: &str = "label=Choose the Year";
pub const MONTH: &str = "label=Choose the Month";
pub const CONTINUE: &str = "xpath=//button[contains(., 'Continue')]";
pub const DESCRIPTION: &str = "label=Briefly describe the work you";
pub const HOURS: &str = "placeholder=e.g.";
pub const LINKS: &str = "label=Paste one or more relevant";
pub const LEARNINGS: &str = "label=What did you learn or ship";
pub const BLOCKERS: &str = "label=Anything that slowed you down";
pub const SKILLS: &str = "css=input[id^='react-select-']";
pub const SKILL_OPTION: &str = "css=[role='option']";
pub const SAVE: &str = "xpath=//button[normalize-space()='Save']";
pub const POPUP: &str = "xpath=//button[contains(., 'I Understand')]";

/// What a single visit to the diary page renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiaryVisit {
    /// Selection controls, then a complete form.
    Normal,
    /// No selection controls; the page says the date is done.
    AlreadySubmitted,
    /// Complete selection, but the form lacks every hours control.
    BrokenForm,
    /// Continue does not render the form.
    NoForm,
    /// The session has expired: redirected to sign-in, cookie dropped.
    Expired,
    /// The calendar renders no day buttons.
    NoDayButtons,
    /// An informational modal covers the selection controls.
    Popup,
}

/// A scripted portal page plus visit counters.
pub struct PortalFixture {
    pub page: ScriptedPage,
    pub diary_visits: Arc<AtomicU32>,
}

/// Build a portal page. `logged_in` seeds a valid session cookie.
pub fn portal_page<P>(logged_in: bool, plan: P) -> PortalFixture
where
    P: Fn(u32) -> DiaryVisit + Send + Sync + 'static,
{
    let diary_visits = Arc::new(AtomicU32::new(0));
    let current = Arc::new(Mutex::new(DiaryVisit::Normal));

    let visits = Arc::clone(&diary_visits);
    let on_visit = Arc::clone(&current);
    let on_continue = Arc::clone(&current);

    let cookies = if logged_in {
        vec![Cookie::new(SESSION_COOKIE, "valid")]
    } else {
        Vec::new()
    };

    let page = ScriptedPage::new()
        .with_cookies(cookies)
        .on_navigate(move |_, url, state| {
            if url == LOGIN_URL {
                render_login(state);
            } else if url == DIARY_URL {
                let visit = visits.fetch_add(1, Ordering::SeqCst) + 1;
                let mode = plan(visit);
                if let Ok(mut current) = on_visit.lock() {
                    *current = mode;
                }
                render_diary(state, mode);
            }
        })
        .on_click(SIGN_IN, |state| {
            state.cookies.push(Cookie::new(SESSION_COOKIE, "fresh"));
            state.url = DASHBOARD_URL.to_string();
            state.clear();
        })
        .on_click(POPUP, |state| state.remove(POPUP))
        .on_click(INTERNSHIP, |state| {
            state.add_with_text(INTERNSHIP_OPTION, "EGDK");
        })
        .on_click(CONTINUE, move |state| {
            let mode = on_continue
                .lock()
                .map(|m| *m)
                .unwrap_or(DiaryVisit::Normal);
            render_form(state, mode);
        });

    PortalFixture { page, diary_visits }
}

fn has_session(state: &PageState) -> bool {
    state.cookies.iter().any(|c| c.name == SESSION_COOKIE)
}

fn render_login(state: &mut PageState) {
    state.clear();
    state.body_text.clear();
    if has_session(state) {
        state.url = DASHBOARD_URL.to_string();
        return;
    }
    state.add(EMAIL);
    state.add(PASSWORD);
    state.add(SIGN_IN);
}

fn render_diary(state: &mut PageState, mode: DiaryVisit) {
    state.clear();
    state.body_text.clear();
    match mode {
        DiaryVisit::AlreadySubmitted => {
            state.body_text = "Diary entry for this date has already been submitted.".into();
        }
        DiaryVisit::Expired => {
            state.cookies.clear();
            state.url = LOGIN_URL.to_string();
            render_login(state);
        }
        _ => {
            if mode == DiaryVisit::Popup {
                state.add(POPUP);
            }
            state.add(INTERNSHIP);
            state.add(DATE_PICKER);
            state.add(YEAR);
            state.add(MONTH);
            if mode != DiaryVisit::NoDayButtons {
                for day in 1..=31 {
                    state.add(&format!("css=button[aria-label*='{},']", ordinal(day)));
                }
            }
            state.add(CONTINUE);
        }
    }
}

fn render_form(state: &mut PageState, mode: DiaryVisit) {
    if mode == DiaryVisit::NoForm {
        return;
    }
    state.clear();
    state.add(DESCRIPTION);
    if mode != DiaryVisit::BrokenForm {
        state.add(HOURS);
    }
    state.add(LINKS);
    state.add(LEARNINGS);
    state.add(BLOCKERS);
    state.add(SKILLS);
    state.add_with_text(SKILL_OPTION, "Python");
    state.add_with_text(SKILL_OPTION, "Git");
    state.add(SAVE);
    state.disable(SAVE);
}

/// `n` consecutive entries starting 2025-01-06.
pub fn sample_entries(n: usize) -> Vec<SubmissionEntry> {
    let start = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap_or_default();
    start
        .iter_days()
        .take(n)
        .map(|date| {
            SubmissionEntry::new(date, format!("Worked on feature {date}"))
                .with_learnings("Learned about retries")
                .with_skills(&["Git"])
        })
        .collect()
}
