//! Browser automation capability layer.
//!
//! The locator and the submission state machine never talk to a concrete
//! browser. They drive a [`PageDriver`], a small capability interface over a
//! single page: navigate, resolve elements, interact with them, read cookies
//! and take screenshots.
//!
//! # Backends
//!
//! - [`WebDriverPage`]: W3C WebDriver over HTTP (chromedriver, geckodriver)
//! - [`crate::testing::ScriptedPage`]: in-memory page for tests
//!
//! The backend is chosen once, at the composition root.
//!
//! # Example
//!
//! ```rust,ignore
//! use diary_pilot::browser::{PageDriver, WebDriverPage, BrowserKind};
//!
//! let page = WebDriverPage::launch(BrowserKind::Chrome, true).await?;
//! page.navigate("https://example.com", Duration::from_secs(30)).await?;
//! ```

pub mod webdriver;

pub use webdriver::{BrowserKind, WebDriverPage};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::Result;
use crate::locator::Strategy;

/// Opaque reference to a resolved element on the current page.
///
/// Handles are only valid until the next navigation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    /// Backend-specific element id.
    pub id: String,
    /// Canonical selector string the element was resolved with.
    pub selector: String,
}

impl ElementHandle {
    #[must_use]
    pub fn new(id: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            selector: selector.into(),
        }
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.selector, self.id)
    }
}

/// Keys the form flows need to press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    ArrowDown,
    Enter,
    Escape,
}

impl Key {
    /// W3C WebDriver code point for the key.
    #[must_use]
    pub const fn webdriver_code(&self) -> &'static str {
        match self {
            Self::ArrowDown => "\u{E015}",
            Self::Enter => "\u{E007}",
            Self::Escape => "\u{E00C}",
        }
    }
}

/// DOM events dispatched after filling a field so reactive forms register it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomEvent {
    Input,
    Change,
    Blur,
}

impl DomEvent {
    /// Events fired after every text fill.
    pub const AFTER_FILL: [DomEvent; 3] = [Self::Input, Self::Change, Self::Blur];

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Change => "change",
            Self::Blur => "blur",
        }
    }
}

/// A browser cookie, in the shape WebDriver returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

impl Cookie {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            secure: None,
            http_only: None,
            expiry: None,
            same_site: None,
        }
    }
}

/// Automation capabilities over a single browser page.
///
/// Element lookups return `Ok(None)` when nothing matched within the timeout;
/// `Err` is reserved for the backend itself failing (dead session, transport
/// error). The trait is object-safe and used as `Arc<dyn PageDriver>`.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Human-readable backend name for logs.
    fn backend_name(&self) -> &str;

    /// Load `url` and wait for the document to be ready.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// URL of the current document.
    async fn current_url(&self) -> Result<String>;

    /// First element matching `strategy` that appears within `timeout`.
    async fn locate(&self, strategy: &Strategy, timeout: Duration)
        -> Result<Option<ElementHandle>>;

    /// Every element currently matching `strategy`, without waiting.
    async fn locate_all(&self, strategy: &Strategy) -> Result<Vec<ElementHandle>>;

    /// Whether the element is rendered and visible.
    async fn is_visible(&self, element: &ElementHandle) -> Result<bool>;

    /// Replace the element's value with `text`.
    async fn fill(&self, element: &ElementHandle, text: &str) -> Result<()>;

    /// Type `text` key by key into the element.
    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<()>;

    /// Press a key in the focused element.
    async fn press_key(&self, key: Key) -> Result<()>;

    async fn click(&self, element: &ElementHandle) -> Result<()>;

    /// Fire DOM events on the element.
    async fn dispatch_events(&self, element: &ElementHandle, events: &[DomEvent]) -> Result<()>;

    /// Pick an option of a native `<select>` by its value.
    async fn select_option(&self, element: &ElementHandle, value: &str) -> Result<()>;

    /// Rendered text content of the element.
    async fn text_of(&self, element: &ElementHandle) -> Result<String>;

    /// Clear the `disabled` state so the element can be clicked.
    async fn force_enable(&self, element: &ElementHandle) -> Result<()>;

    /// Visually mark the element without interacting with it.
    async fn highlight(&self, element: &ElementHandle) -> Result<()>;

    /// Text of the whole page body.
    async fn page_text(&self) -> Result<String>;

    /// Give the page a chance to finish rendering after an interaction.
    async fn wait_for_settle(&self, timeout: Duration) -> Result<()>;

    /// PNG screenshot of the viewport.
    async fn screenshot(&self) -> Result<Vec<u8>>;

    async fn cookies(&self) -> Result<Vec<Cookie>>;

    async fn add_cookies(&self, cookies: &[Cookie]) -> Result<()>;

    /// End the session. Further calls fail.
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_json_uses_camel_case() {
        let mut cookie = Cookie::new("session", "abc");
        cookie.http_only = Some(true);
        let json = serde_json::to_value(&cookie).unwrap();
        assert_eq!(json["httpOnly"], true);
        assert!(json.get("domain").is_none());
    }

    #[test]
    fn test_cookie_deserializes_webdriver_shape() {
        let raw = r#"{"name":"sid","value":"1","domain":".portal.example","path":"/","secure":true,"httpOnly":false,"sameSite":"Lax"}"#;
        let cookie: Cookie = serde_json::from_str(raw).unwrap();
        assert_eq!(cookie.domain.as_deref(), Some(".portal.example"));
        assert_eq!(cookie.same_site.as_deref(), Some("Lax"));
        assert_eq!(cookie.http_only, Some(false));
    }

    #[test]
    fn test_dom_events_after_fill_order() {
        let names: Vec<_> = DomEvent::AFTER_FILL.iter().map(DomEvent::name).collect();
        assert_eq!(names, ["input", "change", "blur"]);
    }

    #[test]
    fn test_element_handle_display() {
        let handle = ElementHandle::new("el-1", "css=textarea");
        assert_eq!(handle.to_string(), "css=textarea (el-1)");
    }
}
