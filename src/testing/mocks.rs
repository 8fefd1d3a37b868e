//! Scripted page double.
//!
//! [`ScriptedPage`] implements [`PageDriver`] over an in-memory list of
//! elements keyed by canonical selector strings. Lookups never wait, every
//! call is recorded, and hooks let a test script how the page reacts to
//! navigations and clicks.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::browser::{Cookie, DomEvent, ElementHandle, Key, PageDriver};
use crate::error::{PilotError, Result};
use crate::locator::Strategy;

type NavigateHook = Arc<dyn Fn(u32, &str, &mut PageState) + Send + Sync>;
type ClickHook = Arc<dyn Fn(&mut PageState) + Send + Sync>;

/// One element on the scripted page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedElement {
    pub id: String,
    pub selector: String,
    pub text: String,
    pub value: String,
    pub visible: bool,
    pub disabled: bool,
}

/// Mutable page contents, handed to hooks.
#[derive(Debug, Default)]
pub struct PageState {
    pub url: String,
    pub body_text: String,
    pub elements: Vec<ScriptedElement>,
    pub cookies: Vec<Cookie>,
    next_id: u32,
}

impl PageState {
    /// Add a visible element matched by `selector` and return its id.
    pub fn add(&mut self, selector: &str) -> String {
        self.add_with_text(selector, "")
    }

    /// Add a visible element with rendered text.
    pub fn add_with_text(&mut self, selector: &str, text: &str) -> String {
        self.next_id += 1;
        let id = format!("el-{}", self.next_id);
        self.elements.push(ScriptedElement {
            id: id.clone(),
            selector: Strategy::parse(selector).selector(),
            text: text.to_string(),
            value: String::new(),
            visible: true,
            disabled: false,
        });
        id
    }

    /// Mark every element matched by `selector` as disabled.
    pub fn disable(&mut self, selector: &str) {
        let canonical = Strategy::parse(selector).selector();
        for el in self.elements.iter_mut().filter(|e| e.selector == canonical) {
            el.disabled = true;
        }
    }

    /// Remove every element matched by `selector`.
    pub fn remove(&mut self, selector: &str) {
        let canonical = Strategy::parse(selector).selector();
        self.elements.retain(|e| e.selector != canonical);
    }

    /// Remove every element.
    pub fn clear(&mut self) {
        self.elements.clear();
    }

    pub fn has(&self, selector: &str) -> bool {
        let canonical = Strategy::parse(selector).selector();
        self.elements.iter().any(|e| e.selector == canonical)
    }

    fn element_mut(&mut self, selector: &str) -> Option<&mut ScriptedElement> {
        let canonical = Strategy::parse(selector).selector();
        self.elements.iter_mut().rev().find(|e| e.selector == canonical)
    }

    fn by_id(&self, id: &str) -> Option<&ScriptedElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    fn by_id_mut(&mut self, id: &str) -> Option<&mut ScriptedElement> {
        self.elements.iter_mut().find(|e| e.id == id)
    }
}

/// In-memory [`PageDriver`] with call recording.
///
/// # Example
///
/// ```rust,ignore
/// let page = ScriptedPage::new()
///     .with_element("css=input[type='email']")
///     .on_click("css=button[type='submit']", |state| state.url = "https://portal/dashboard".into());
///
/// assert_eq!(page.locate_count("css=input[type='email']"), 0);
/// ```
#[derive(Default, Clone)]
pub struct ScriptedPage {
    state: Arc<Mutex<PageState>>,
    calls: Arc<Mutex<Vec<String>>>,
    navigations: Arc<AtomicU32>,
    navigate_hook: Option<NavigateHook>,
    click_hooks: Vec<(String, ClickHook)>,
    screenshot_bytes: Vec<u8>,
    wait_on_miss: bool,
}

impl std::fmt::Debug for ScriptedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedPage")
            .field("navigations", &self.navigations.load(Ordering::SeqCst))
            .field("click_hooks", &self.click_hooks.len())
            .finish()
    }
}

impl ScriptedPage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            screenshot_bytes: b"\x89PNG\r\n\x1a\nscripted".to_vec(),
            ..Self::default()
        }
    }

    /// Add a visible element.
    #[must_use]
    pub fn with_element(self, selector: &str) -> Self {
        self.state().add(selector);
        self
    }

    /// Add a visible element with rendered text.
    #[must_use]
    pub fn with_element_text(self, selector: &str, text: &str) -> Self {
        self.state().add_with_text(selector, text);
        self
    }

    /// Add an element that exists in the DOM but is not visible.
    #[must_use]
    pub fn with_hidden_element(self, selector: &str) -> Self {
        {
            let mut state = self.state();
            let id = state.add(selector);
            if let Some(el) = state.by_id_mut(&id) {
                el.visible = false;
            }
        }
        self
    }

    /// Add a disabled element.
    #[must_use]
    pub fn with_disabled_element(self, selector: &str) -> Self {
        {
            let mut state = self.state();
            let id = state.add(selector);
            if let Some(el) = state.by_id_mut(&id) {
                el.disabled = true;
            }
        }
        self
    }

    /// Text returned by `page_text`.
    #[must_use]
    pub fn with_page_text(self, text: &str) -> Self {
        self.state().body_text = text.to_string();
        self
    }

    #[must_use]
    pub fn with_cookies(self, cookies: Vec<Cookie>) -> Self {
        self.state().cookies = cookies;
        self
    }

    /// Make `locate` misses wait out their full timeout, the way a real
    /// driver's implicit wait does.
    #[must_use]
    pub fn waiting_on_miss(mut self) -> Self {
        self.wait_on_miss = true;
        self
    }

    /// React to navigations.
    ///
    /// The hook receives the 1-based navigation count and the requested URL
    /// after the page URL has already been set to it.
    #[must_use]
    pub fn on_navigate<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, &str, &mut PageState) + Send + Sync + 'static,
    {
        self.navigate_hook = Some(Arc::new(hook));
        self
    }

    /// React to clicks on elements matched by `selector`.
    #[must_use]
    pub fn on_click<F>(mut self, selector: &str, hook: F) -> Self
    where
        F: Fn(&mut PageState) + Send + Sync + 'static,
    {
        self.click_hooks
            .push((Strategy::parse(selector).selector(), Arc::new(hook)));
        self
    }

    /// Lock the page contents.
    ///
    /// # Panics
    ///
    /// Panics if a previous holder of the lock panicked.
    pub fn state(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().expect("scripted page state poisoned")
    }

    /// Every recorded call, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of recorded calls starting with `prefix`.
    #[must_use]
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// How often `selector` was probed with `locate`.
    #[must_use]
    pub fn locate_count(&self, selector: &str) -> usize {
        let wanted = format!("locate {}", Strategy::parse(selector).selector());
        self.calls().iter().filter(|c| **c == wanted).count()
    }

    /// How often an element matched by `selector` was clicked.
    #[must_use]
    pub fn click_count(&self, selector: &str) -> usize {
        let wanted = format!("click {}", Strategy::parse(selector).selector());
        self.calls().iter().filter(|c| **c == wanted).count()
    }

    /// Current value of the last element matched by `selector`.
    #[must_use]
    pub fn value_of(&self, selector: &str) -> Option<String> {
        self.state().element_mut(selector).map(|e| e.value.clone())
    }

    #[must_use]
    pub fn navigation_count(&self) -> u32 {
        self.navigations.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PageState>> {
        self.state
            .lock()
            .map_err(|_| PilotError::driver("state", "scripted page state poisoned"))
    }

    fn with_element_mut<T>(
        &self,
        operation: &str,
        element: &ElementHandle,
        f: impl FnOnce(&mut ScriptedElement) -> T,
    ) -> Result<T> {
        let mut state = self.lock()?;
        let el = state.by_id_mut(&element.id).ok_or_else(|| {
            PilotError::driver(operation, format!("stale element {}", element.selector))
        })?;
        Ok(f(el))
    }
}

#[async_trait]
impl PageDriver for ScriptedPage {
    fn backend_name(&self) -> &str {
        "scripted"
    }

    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        self.record(format!("navigate {url}"));
        let count = self.navigations.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.lock()?;
        state.url = url.to_string();
        if let Some(hook) = &self.navigate_hook {
            hook(count, url, &mut *state);
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.lock()?.url.clone())
    }

    async fn locate(
        &self,
        strategy: &Strategy,
        timeout: Duration,
    ) -> Result<Option<ElementHandle>> {
        let selector = strategy.selector();
        self.record(format!("locate {selector}"));
        let found = self
            .lock()?
            .elements
            .iter()
            .find(|e| e.selector == selector)
            .map(|e| ElementHandle::new(&e.id, &selector));
        if found.is_none() && self.wait_on_miss {
            tokio::time::sleep(timeout).await;
        }
        Ok(found)
    }

    async fn locate_all(&self, strategy: &Strategy) -> Result<Vec<ElementHandle>> {
        let selector = strategy.selector();
        self.record(format!("locate_all {selector}"));
        let state = self.lock()?;
        Ok(state
            .elements
            .iter()
            .filter(|e| e.selector == selector)
            .map(|e| ElementHandle::new(&e.id, &selector))
            .collect())
    }

    async fn is_visible(&self, element: &ElementHandle) -> Result<bool> {
        Ok(self
            .lock()?
            .by_id(&element.id)
            .map(|e| e.visible)
            .unwrap_or(false))
    }

    async fn fill(&self, element: &ElementHandle, text: &str) -> Result<()> {
        self.record(format!("fill {}={text}", element.selector));
        self.with_element_mut("fill", element, |el| el.value = text.to_string())
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<()> {
        self.record(format!("type {}={text}", element.selector));
        self.with_element_mut("type", element, |el| el.value.push_str(text))
    }

    async fn press_key(&self, key: Key) -> Result<()> {
        self.record(format!("press {key:?}"));
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        let disabled = self.with_element_mut("click", element, |el| el.disabled)?;
        if disabled {
            return Err(PilotError::driver(
                "click",
                format!("element {} is disabled", element.selector),
            ));
        }
        self.record(format!("click {}", element.selector));
        let mut state = self.lock()?;
        for (selector, hook) in &self.click_hooks {
            if *selector == element.selector {
                hook(&mut *state);
            }
        }
        Ok(())
    }

    async fn dispatch_events(&self, element: &ElementHandle, events: &[DomEvent]) -> Result<()> {
        let names: Vec<_> = events.iter().map(DomEvent::name).collect();
        self.record(format!("events {} {}", element.selector, names.join(",")));
        self.with_element_mut("events", element, |_| ())
    }

    async fn select_option(&self, element: &ElementHandle, value: &str) -> Result<()> {
        self.record(format!("select {}={value}", element.selector));
        self.with_element_mut("select", element, |el| el.value = value.to_string())
    }

    async fn text_of(&self, element: &ElementHandle) -> Result<String> {
        self.with_element_mut("text", element, |el| el.text.clone())
    }

    async fn force_enable(&self, element: &ElementHandle) -> Result<()> {
        self.record(format!("force_enable {}", element.selector));
        self.with_element_mut("force_enable", element, |el| el.disabled = false)
    }

    async fn highlight(&self, element: &ElementHandle) -> Result<()> {
        self.record(format!("highlight {}", element.selector));
        self.with_element_mut("highlight", element, |_| ())
    }

    async fn page_text(&self) -> Result<String> {
        Ok(self.lock()?.body_text.clone())
    }

    async fn wait_for_settle(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.record("screenshot".to_string());
        Ok(self.screenshot_bytes.clone())
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        Ok(self.lock()?.cookies.clone())
    }

    async fn add_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        self.record(format!("add_cookies {}", cookies.len()));
        self.lock()?.cookies.extend_from_slice(cookies);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record("close".to_string());
        Ok(())
    }
}
