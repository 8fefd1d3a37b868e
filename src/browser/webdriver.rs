//! W3C WebDriver backend.
//!
//! Speaks the WebDriver wire protocol over HTTP to a locally spawned (or
//! already running) chromedriver/geckodriver. Label and placeholder
//! strategies are translated into case-insensitive XPath so every
//! [`Strategy`] maps onto the two locator kinds the protocol knows.

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Cookie, DomEvent, ElementHandle, Key, PageDriver};
use crate::error::{IntoPilotError, PilotError, Result};
use crate::locator::{Strategy, StrategyKind};

/// JSON key identifying a web element reference.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Interval between element lookups while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long a freshly spawned driver has to answer `/status`.
const DRIVER_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport timeout for a single protocol command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";

// =============================================================================
// Browser kinds
// =============================================================================

/// Supported browsers and their driver binaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserKind {
    Chrome,
    Firefox,
}

impl BrowserKind {
    /// Parse a configured browser name. `auto` yields `None`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "chrome" | "chromium" => Some(Self::Chrome),
            "firefox" | "gecko" => Some(Self::Firefox),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Firefox => "firefox",
        }
    }

    /// Driver executable looked up on `PATH`.
    #[must_use]
    pub const fn driver_binary(&self) -> &'static str {
        match self {
            Self::Chrome => "chromedriver",
            Self::Firefox => "geckodriver",
        }
    }

    #[must_use]
    pub const fn default_port(&self) -> u16 {
        match self {
            Self::Chrome => 9515,
            Self::Firefox => 4444,
        }
    }

    fn driver_args(&self, port: u16) -> Vec<String> {
        match self {
            Self::Chrome => vec![format!("--port={port}")],
            Self::Firefox => vec!["--port".to_string(), port.to_string()],
        }
    }

    /// Find the first installed driver, Chrome preferred.
    #[must_use]
    pub fn detect() -> Option<(Self, PathBuf)> {
        [Self::Chrome, Self::Firefox]
            .into_iter()
            .find_map(|kind| which::which(kind.driver_binary()).ok().map(|p| (kind, p)))
    }

    /// New-session capabilities.
    ///
    /// Chrome is started with the automation banner and the
    /// `navigator.webdriver` blink feature switched off.
    #[must_use]
    pub fn capabilities(&self, headless: bool) -> Value {
        let always_match = match self {
            Self::Chrome => {
                let mut args = vec![
                    "--disable-blink-features=AutomationControlled",
                    "--no-sandbox",
                    "--disable-dev-shm-usage",
                    "--window-size=1366,900",
                ];
                if headless {
                    args.push("--headless=new");
                }
                json!({
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": args,
                        "excludeSwitches": ["enable-automation"],
                    }
                })
            }
            Self::Firefox => {
                let args: Vec<&str> = if headless { vec!["-headless"] } else { vec![] };
                json!({
                    "browserName": "firefox",
                    "moz:firefoxOptions": {
                        "args": args,
                        "prefs": { "dom.webdriver.enabled": false },
                    }
                })
            }
        };
        json!({ "capabilities": { "alwaysMatch": always_match } })
    }
}

// =============================================================================
// Locator translation
// =============================================================================

/// Quote `text` as an XPath string literal.
fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{text}'")
    } else if !text.contains('"') {
        format!("\"{text}\"")
    } else {
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

fn lowered(expr: &str) -> String {
    format!("translate({expr}, '{UPPER}', '{LOWER}')")
}

/// Map a strategy onto a WebDriver `(using, value)` pair.
fn to_locator(strategy: &Strategy) -> (&'static str, String) {
    match strategy.kind {
        StrategyKind::Css => ("css selector", strategy.pattern.clone()),
        StrategyKind::XPath => ("xpath", strategy.pattern.clone()),
        StrategyKind::Label => {
            let needle = xpath_literal(&strategy.pattern.to_lowercase());
            let label = format!("//label[contains({}, {needle})]", lowered("normalize-space(.)"));
            (
                "xpath",
                format!(
                    "//*[contains({aria}, {needle})] \
                     | //*[@id = {label}/@for] \
                     | {label}//*[self::input or self::textarea or self::select] \
                     | {label}/following::*[self::input or self::textarea or self::select or self::button][1]",
                    aria = lowered("@aria-label"),
                ),
            )
        }
        StrategyKind::Placeholder => {
            let needle = xpath_literal(&strategy.pattern.to_lowercase());
            (
                "xpath",
                format!("//*[contains({}, {needle})]", lowered("@placeholder")),
            )
        }
    }
}

fn element_ref(element: &ElementHandle) -> Value {
    json!({ ELEMENT_KEY: element.id })
}

/// Extract the protocol error from a response body, if any.
fn protocol_error(body: &Value) -> Option<(String, String)> {
    let value = body.get("value")?;
    let error = value.get("error")?.as_str()?;
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some((error.to_string(), message.to_string()))
}

// =============================================================================
// WebDriverPage
// =============================================================================

/// A single WebDriver session.
pub struct WebDriverPage {
    http: reqwest::Client,
    base_url: String,
    session_id: String,
    kind: BrowserKind,
    driver_process: Mutex<Option<Child>>,
}

impl std::fmt::Debug for WebDriverPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDriverPage")
            .field("base_url", &self.base_url)
            .field("session_id", &self.session_id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl WebDriverPage {
    /// Spawn the driver binary for `kind` and open a session on it.
    ///
    /// The driver process is killed when the page is dropped.
    pub async fn launch(kind: BrowserKind, headless: bool) -> Result<Self> {
        let binary = which::which(kind.driver_binary()).into_pilot_driver("launch")?;
        let port = kind.default_port();
        info!("Starting {} on port {}", binary.display(), port);

        let child = Command::new(&binary)
            .args(kind.driver_args(port))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let base_url = format!("http://127.0.0.1:{port}");
        let http = Self::http_client()?;
        Self::wait_for_driver(&http, &base_url).await?;

        let mut page = Self::open_session(http, base_url, kind, headless).await?;
        page.driver_process = Mutex::new(Some(child));
        Ok(page)
    }

    /// Open a session on an already running driver at `webdriver_url`.
    pub async fn connect(webdriver_url: &str, kind: BrowserKind, headless: bool) -> Result<Self> {
        let http = Self::http_client()?;
        let base_url = webdriver_url.trim_end_matches('/').to_string();
        Self::open_session(http, base_url, kind, headless).await
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn kind(&self) -> BrowserKind {
        self.kind
    }

    fn http_client() -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder().timeout(COMMAND_TIMEOUT).build()?)
    }

    async fn wait_for_driver(http: &reqwest::Client, base_url: &str) -> Result<()> {
        let deadline = Instant::now() + DRIVER_STARTUP_TIMEOUT;
        loop {
            if let Ok(resp) = http.get(format!("{base_url}/status")).send().await {
                if let Ok(body) = resp.json::<Value>().await {
                    if body["value"]["ready"].as_bool().unwrap_or(false) {
                        return Ok(());
                    }
                }
            }
            if Instant::now() >= deadline {
                return Err(PilotError::driver(
                    "launch",
                    format!("driver at {base_url} not ready after {DRIVER_STARTUP_TIMEOUT:?}"),
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn open_session(
        http: reqwest::Client,
        base_url: String,
        kind: BrowserKind,
        headless: bool,
    ) -> Result<Self> {
        let resp = http
            .post(format!("{base_url}/session"))
            .json(&kind.capabilities(headless))
            .send()
            .await?;
        let body: Value = resp.json().await?;
        if let Some((error, message)) = protocol_error(&body) {
            return Err(PilotError::driver("new session", format!("{error}: {message}")));
        }
        let session_id = body["value"]["sessionId"]
            .as_str()
            .ok_or_else(|| PilotError::driver("new session", "response carried no sessionId"))?
            .to_string();

        info!(browser = kind.name(), session = %session_id, "WebDriver session opened");
        Ok(Self {
            http,
            base_url,
            session_id,
            kind,
            driver_process: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/session/{}{}", self.base_url, self.session_id, path)
    }

    /// Send one protocol command and return its `value`.
    async fn command(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value> {
        let mut request = self.http.request(method, self.url(path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let resp = request.send().await?;
        let body: Value = resp.json().await?;
        if let Some((error, message)) = protocol_error(&body) {
            return Err(PilotError::driver(path, format!("{error}: {message}")));
        }
        Ok(body.get("value").cloned().unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.command(reqwest::Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.command(reqwest::Method::POST, path, Some(body)).await
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.post("/execute/sync", json!({ "script": script, "args": args }))
            .await
    }

    async fn find_elements(&self, strategy: &Strategy) -> Result<Vec<String>> {
        let (using, value) = to_locator(strategy);
        let found = self
            .post("/elements", json!({ "using": using, "value": value }))
            .await?;
        Ok(found
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get(ELEMENT_KEY).and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl PageDriver for WebDriverPage {
    fn backend_name(&self) -> &str {
        self.kind.name()
    }

    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.post("/timeouts", json!({ "pageLoad": millis })).await?;
        debug!(url, "Navigating");
        self.post("/url", json!({ "url": url })).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.get("/url").await?.as_str().unwrap_or_default().to_string())
    }

    async fn locate(
        &self,
        strategy: &Strategy,
        timeout: Duration,
    ) -> Result<Option<ElementHandle>> {
        let deadline = Instant::now() + timeout;
        loop {
            let ids = self.find_elements(strategy).await?;
            if let Some(id) = ids.into_iter().next() {
                return Ok(Some(ElementHandle::new(id, strategy.selector())));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn locate_all(&self, strategy: &Strategy) -> Result<Vec<ElementHandle>> {
        let selector = strategy.selector();
        Ok(self
            .find_elements(strategy)
            .await?
            .into_iter()
            .map(|id| ElementHandle::new(id, selector.clone()))
            .collect())
    }

    async fn is_visible(&self, element: &ElementHandle) -> Result<bool> {
        let value = self
            .get(&format!("/element/{}/displayed", element.id))
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn fill(&self, element: &ElementHandle, text: &str) -> Result<()> {
        self.post(&format!("/element/{}/clear", element.id), json!({}))
            .await?;
        self.type_text(element, text).await
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<()> {
        self.post(
            &format!("/element/{}/value", element.id),
            json!({ "text": text }),
        )
        .await?;
        Ok(())
    }

    async fn press_key(&self, key: Key) -> Result<()> {
        let code = key.webdriver_code();
        self.post(
            "/actions",
            json!({
                "actions": [{
                    "type": "key",
                    "id": "keyboard",
                    "actions": [
                        { "type": "keyDown", "value": code },
                        { "type": "keyUp", "value": code },
                    ]
                }]
            }),
        )
        .await?;
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        self.post(&format!("/element/{}/click", element.id), json!({}))
            .await?;
        Ok(())
    }

    async fn dispatch_events(&self, element: &ElementHandle, events: &[DomEvent]) -> Result<()> {
        let names: Vec<&str> = events.iter().map(DomEvent::name).collect();
        self.execute(
            "const el = arguments[0]; \
             for (const name of arguments[1]) { el.dispatchEvent(new Event(name, { bubbles: true })); }",
            vec![element_ref(element), json!(names)],
        )
        .await?;
        Ok(())
    }

    async fn select_option(&self, element: &ElementHandle, value: &str) -> Result<()> {
        self.execute(
            "const el = arguments[0]; el.value = arguments[1]; \
             el.dispatchEvent(new Event('change', { bubbles: true }));",
            vec![element_ref(element), json!(value)],
        )
        .await?;
        Ok(())
    }

    async fn text_of(&self, element: &ElementHandle) -> Result<String> {
        let value = self.get(&format!("/element/{}/text", element.id)).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn force_enable(&self, element: &ElementHandle) -> Result<()> {
        self.execute(
            "arguments[0].removeAttribute('disabled'); arguments[0].disabled = false;",
            vec![element_ref(element)],
        )
        .await?;
        Ok(())
    }

    async fn highlight(&self, element: &ElementHandle) -> Result<()> {
        self.execute(
            "arguments[0].style.border = '3px solid red'; \
             arguments[0].scrollIntoView({ block: 'center' });",
            vec![element_ref(element)],
        )
        .await?;
        Ok(())
    }

    async fn page_text(&self) -> Result<String> {
        let value = self
            .execute("return document.body ? document.body.innerText : '';", vec![])
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn wait_for_settle(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self
                .execute("return document.readyState;", vec![])
                .await?;
            if state.as_str() == Some("complete") || Instant::now() >= deadline {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let value = self.get("/screenshot").await?;
        let encoded = value.as_str().unwrap_or_default();
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .into_pilot_driver("screenshot")
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        let value = self.get("/cookie").await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn add_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        for cookie in cookies {
            if let Err(e) = self.post("/cookie", json!({ "cookie": cookie })).await {
                warn!(cookie = %cookie.name, "Could not restore cookie: {}", e);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.command(reqwest::Method::DELETE, "", None).await?;
        let child = self
            .driver_process
            .lock()
            .map(|mut guard| guard.take())
            .unwrap_or_default();
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                debug!("Driver process already gone: {}", e);
            }
        }
        Ok(())
    }
}
