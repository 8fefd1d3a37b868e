//! Static catalog of known strategies per logical field.
//!
//! Order matters: the locator probes candidates front to back and promotes
//! the first one that resolves into the learned cache. Entries are never
//! removed at runtime.

use super::strategy::{Strategy, StrategyKind};

use StrategyKind::{Css, Label, Placeholder, XPath};

/// A logical UI field and its ordered candidate strategies.
#[derive(Debug, Clone, Copy)]
pub struct FieldStrategy {
    pub field: &'static str,
    candidates: &'static [(StrategyKind, &'static str)],
}

impl FieldStrategy {
    /// Candidate strategies in probe order.
    pub fn strategies(&self) -> impl Iterator<Item = Strategy> + '_ {
        self.candidates
            .iter()
            .map(|(kind, pattern)| Strategy::new(*kind, *pattern))
    }

    /// Number of candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Look up a field in the catalog.
#[must_use]
pub fn lookup(field: &str) -> Option<&'static FieldStrategy> {
    FIELD_CATALOG.iter().find(|f| f.field == field)
}

/// Names of all catalogued fields.
pub fn field_names() -> impl Iterator<Item = &'static str> {
    FIELD_CATALOG.iter().map(|f| f.field)
}

pub static FIELD_CATALOG: &[FieldStrategy] = &[
    // Login
    FieldStrategy {
        field: "email_field",
        candidates: &[
            (Css, "input[autocomplete='email']"),
            (Label, "Enter your email address"),
            (Css, "input[type='email']"),
            (Css, "input#email"),
            (Css, "input[name='email']"),
            (Placeholder, "email"),
            (XPath, "//label[contains(text(),'Email')]/following::input[1]"),
        ],
    },
    FieldStrategy {
        field: "password_field",
        candidates: &[
            (Css, "input[autocomplete='current-password']"),
            (Css, "input[autocomplete='new-password']"),
            (Css, "input[type='password']"),
            (Css, "input#password"),
            (Css, "input[name='password']"),
            (XPath, "//label[contains(text(),'Password')]/following::input[1]"),
        ],
    },
    FieldStrategy {
        field: "login_button",
        candidates: &[
            (XPath, "//button[contains(., 'Sign In')]"),
            (Css, "button[type='submit']"),
            (Css, "input[type='submit']"),
            (XPath, "//button[contains(., 'Log')]"),
            (Css, "button.login-btn"),
        ],
    },
    FieldStrategy {
        field: "popup_dismiss",
        candidates: &[
            (XPath, "//button[contains(., 'I Understand')]"),
            (XPath, "//button[contains(., 'Dismiss')]"),
            (Css, ".modal-footer button"),
            (Css, "button.close-modal"),
        ],
    },
    // Selection page
    FieldStrategy {
        field: "internship_select",
        candidates: &[
            (Label, "Select Internship"),
            (Css, "select[name='internship_id']"),
            (Css, "select#internship_id"),
            (XPath, "//label[contains(text(),'Internship')]/following::select[1]"),
            (Css, "[data-field='internship'] select"),
            (XPath, "//button[@role='combobox' and contains(., 'Internship')]"),
        ],
    },
    FieldStrategy {
        field: "date_picker",
        candidates: &[
            (XPath, "//button[contains(., 'Pick a Date')]"),
            (Css, "button[aria-label*='date' i]"),
            (Css, "input[type='date']"),
            (Css, ".react-datepicker__input-container input"),
            (Css, "[data-testid='date-picker']"),
            (XPath, "//button[contains(@class,'calendar')]"),
        ],
    },
    FieldStrategy {
        field: "year_select",
        candidates: &[
            (Label, "Choose the Year"),
            (Css, "select[aria-label*='year' i]"),
            (Css, "select.rdp-years_dropdown"),
        ],
    },
    FieldStrategy {
        field: "month_select",
        candidates: &[
            (Label, "Choose the Month"),
            (Css, "select[aria-label*='month' i]"),
            (Css, "select.rdp-months_dropdown"),
        ],
    },
    FieldStrategy {
        field: "continue_button",
        candidates: &[
            (XPath, "//button[contains(., 'Continue')]"),
            (XPath, "//button[@type='submit' and contains(., 'Continue')]"),
            (Css, "button[type='submit']"),
        ],
    },
    // Entry form
    FieldStrategy {
        field: "description_field",
        candidates: &[
            (Label, "Briefly describe the work you"),
            (Css, "textarea[name='description']"),
            (Css, "textarea[name='entry_text']"),
            (Css, "textarea[name='activities']"),
            (XPath, "//label[contains(text(),'Description')]/following::textarea[1]"),
            (XPath, "//label[contains(text(),'Activit')]/following::textarea[1]"),
            (Css, "div[data-field='description'] textarea"),
        ],
    },
    FieldStrategy {
        field: "hours_field",
        candidates: &[
            (Placeholder, "e.g."),
            (Css, "input[name='hours']"),
            (Css, "input[type='number']"),
            (XPath, "//label[contains(text(),'Hours')]/following::input[1]"),
            (XPath, "//label[contains(text(),'Duration')]/following::input[1]"),
        ],
    },
    FieldStrategy {
        field: "links_field",
        candidates: &[
            (Label, "Paste one or more relevant"),
            (Css, "input[name='links']"),
            (XPath, "//label[contains(text(),'Link')]/following::input[1]"),
            (XPath, "//label[contains(text(),'Reference')]/following::input[1]"),
            (Placeholder, "link"),
        ],
    },
    FieldStrategy {
        field: "learnings_field",
        candidates: &[
            (Label, "What did you learn or ship"),
            (Css, "textarea[name='learnings']"),
            (XPath, "//label[contains(text(),'Learning')]/following::textarea[1]"),
            (Css, "div[data-field='learnings'] textarea"),
        ],
    },
    FieldStrategy {
        field: "blockers_field",
        candidates: &[
            (Label, "Anything that slowed you down"),
            (Css, "textarea[name='blockers']"),
            (XPath, "//label[contains(text(),'Blocker')]/following::textarea[1]"),
            (XPath, "//label[contains(text(),'Challenge')]/following::textarea[1]"),
            (Css, "div[data-field='blockers'] textarea"),
        ],
    },
    FieldStrategy {
        field: "skills_input",
        candidates: &[
            (Css, "input[id^='react-select-']"),
            (Css, ".react-select__input input"),
            (Css, "[class*='select'] input[role='combobox']"),
            (Css, "input[aria-autocomplete='list']"),
            (XPath, "//div[contains(@class,'select')]//input"),
        ],
    },
    FieldStrategy {
        field: "submit_button",
        candidates: &[
            (XPath, "//button[normalize-space()='Save']"),
            (XPath, "//button[contains(text(),'Save')]"),
            (Css, "button[type='submit']"),
            (XPath, "//button[contains(text(),'Submit')]"),
            (Css, "button.btn-primary"),
            (Css, "button.submit-btn"),
        ],
    },
];
