use anyhow::{anyhow, Context, Result};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use scraper::{ElementRef, Html, Node, Selector};
use std::time::Duration;
use thirtyfour::prelude::*;
use thirtyfour::{CapabilitiesHelper, PageLoadStrategy, WindowHandle};
use tokio::sync::{Mutex, MutexGuard, Semaphore};
use tracing::{debug, info, warn};

use crate::config::{BrowserConfig, EnginePreference};
use crate::error::NavigationError;

pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36";

const READY_POLL: Duration = Duration::from_millis(150);

const DOCUMENT_STATE_JS: &str = "const nav = performance.getEntriesByType('navigation')[0]; \
     return { href: location.href, state: document.readyState, \
              status: nav && nav.responseStatus ? nav.responseStatus : null };";

/// Result of a committed navigation.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub text: String,
    pub href: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    WebDriver,
    Static,
}

/// One shared rendering context for the whole run. Pages are handed out per
/// logical check and every navigation goes through one global limiter.
pub struct BrowserSession {
    engine: Engine,
    navigation_limit: Semaphore,
    navigation_timeout: Duration,
}

enum Engine {
    WebDriver(WebDriverEngine),
    Static(StaticEngine),
}

impl BrowserSession {
    /// Launch the preferred engine. In `Auto` mode a WebDriver launch failure
    /// degrades to static rendering; failing that, there is no engine at all.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let engine = match config.engine {
            EnginePreference::Static => Engine::Static(StaticEngine::new(config)?),
            EnginePreference::WebDriver => {
                Engine::WebDriver(WebDriverEngine::launch(config).await?)
            }
            EnginePreference::Auto => match WebDriverEngine::launch(config).await {
                Ok(engine) => Engine::WebDriver(engine),
                Err(e) => {
                    warn!("WebDriver unavailable ({:#}); falling back to static rendering", e);
                    Engine::Static(
                        StaticEngine::new(config).context("No rendering engine available")?,
                    )
                }
            },
        };

        let session = Self::with_engine(engine, config);
        info!("Browser session ready ({:?} engine)", session.kind());
        Ok(session)
    }

    /// Static rendering only. No external browser process required.
    pub fn static_engine(config: &BrowserConfig) -> Result<Self> {
        Ok(Self::with_engine(Engine::Static(StaticEngine::new(config)?), config))
    }

    fn with_engine(engine: Engine, config: &BrowserConfig) -> Self {
        Self {
            engine,
            navigation_limit: Semaphore::new(config.navigation_limit.max(1)),
            navigation_timeout: config.navigation_timeout,
        }
    }

    pub fn kind(&self) -> EngineKind {
        match self.engine {
            Engine::WebDriver(_) => EngineKind::WebDriver,
            Engine::Static(_) => EngineKind::Static,
        }
    }

    /// A fresh isolated page. The caller must `close` it on every path.
    pub async fn acquire_page(&self) -> Result<Page<'_>, NavigationError> {
        let target = match &self.engine {
            Engine::WebDriver(engine) => PageTarget::Window(engine, engine.open_window().await?),
            Engine::Static(engine) => PageTarget::Static(engine),
        };
        Ok(Page {
            session: self,
            target,
            loaded: None,
        })
    }

    pub async fn shutdown(self) {
        if let Engine::WebDriver(engine) = self.engine {
            if let Err(e) = engine.driver.quit().await {
                warn!("Failed to quit WebDriver session: {}", e);
            }
        }
    }
}

enum PageTarget<'s> {
    Window(&'s WebDriverEngine, WindowHandle),
    Static(&'s StaticEngine),
}

struct Loaded {
    response: Response,
    html: String,
}

/// A single-use page bound to the shared session.
pub struct Page<'s> {
    session: &'s BrowserSession,
    target: PageTarget<'s>,
    loaded: Option<Loaded>,
}

impl Page<'_> {
    /// Guarded navigation: waits for a slot in the global limiter, then loads
    /// `url` within the session's navigation timeout. Non-2xx is an error.
    pub async fn navigate(&mut self, url: &str) -> Result<Response, NavigationError> {
        let session = self.session;
        let _permit = session
            .navigation_limit
            .acquire()
            .await
            .map_err(|_| NavigationError::LimiterClosed)?;

        let load = async {
            match &self.target {
                PageTarget::Window(engine, handle) => engine.load(handle, url).await,
                PageTarget::Static(engine) => engine.load(url).await,
            }
        };

        let loaded = tokio::time::timeout(session.navigation_timeout, load)
            .await
            .map_err(|_| NavigationError::Timeout {
                url: url.to_string(),
                after: session.navigation_timeout,
            })??;

        let response = loaded.response.clone();
        self.loaded = Some(loaded);
        if !(200..300).contains(&response.status) {
            return Err(NavigationError::Status {
                url: url.to_string(),
                status: response.status,
            });
        }
        debug!("Loaded {} ({})", response.url, response.status);
        Ok(response)
    }

    pub fn title(&self) -> String {
        self.loaded
            .as_ref()
            .map(|l| page_title(&l.html))
            .unwrap_or_default()
    }

    pub fn body_text(&self) -> String {
        self.loaded
            .as_ref()
            .map(|l| visible_body_text(&l.html))
            .unwrap_or_default()
    }

    pub fn anchors(&self) -> Vec<Anchor> {
        self.loaded
            .as_ref()
            .map(|l| page_anchors(&l.html))
            .unwrap_or_default()
    }

    /// Release the page. Errors are logged, never returned.
    pub async fn close(self) {
        if let PageTarget::Window(engine, handle) = self.target {
            if let Err(e) = engine.close_window(handle).await {
                debug!("Failed to close browser window: {}", e);
            }
        }
    }
}

// --- WebDriver engine ---

struct WebDriverEngine {
    driver: WebDriver,
    // WebDriver commands act on the focused window; hold this while switching.
    focus: Mutex<()>,
}

impl WebDriverEngine {
    async fn launch(config: &BrowserConfig) -> Result<Self> {
        let mut caps = DesiredCapabilities::chrome();
        if config.headless {
            caps.set_headless()?;
        }
        caps.add_arg("--disable-gpu")?;
        caps.add_arg(&format!("--user-agent={}", USER_AGENT))?;
        // Return from navigation at commit, readiness is polled per page.
        caps.set_page_load_strategy(PageLoadStrategy::None)?;

        let driver = WebDriver::new(&config.webdriver_url, caps)
            .await
            .map_err(|e| {
                anyhow!("Failed to start WebDriver session at {}: {}", config.webdriver_url, e)
            })?;

        Ok(Self {
            driver,
            focus: Mutex::new(()),
        })
    }

    async fn focus(&self, handle: &WindowHandle) -> WebDriverResult<MutexGuard<'_, ()>> {
        let guard = self.focus.lock().await;
        self.driver.switch_to_window(handle.clone()).await?;
        Ok(guard)
    }

    async fn open_window(&self) -> Result<WindowHandle, NavigationError> {
        let _guard = self.focus.lock().await;
        self.driver
            .new_window()
            .await
            .map_err(|source| NavigationError::WebDriver {
                url: "about:blank".to_string(),
                source,
            })
    }

    async fn close_window(&self, handle: WindowHandle) -> WebDriverResult<()> {
        let _focus = self.focus(&handle).await?;
        self.driver.close_window().await
    }

    async fn load(&self, handle: &WindowHandle, url: &str) -> Result<Loaded, NavigationError> {
        let wrap = |source| NavigationError::WebDriver {
            url: url.to_string(),
            source,
        };

        {
            let _focus = self.focus(handle).await.map_err(wrap)?;
            self.driver.goto(url).await.map_err(wrap)?;
        }

        let status = loop {
            let snapshot = {
                let _focus = self.focus(handle).await.map_err(wrap)?;
                self.driver
                    .execute(DOCUMENT_STATE_JS, Vec::new())
                    .await
                    .map_err(wrap)?
                    .json()
                    .clone()
            };
            match document_state(&snapshot) {
                DocumentState::Pending => tokio::time::sleep(READY_POLL).await,
                DocumentState::Ready(status) => break status,
                DocumentState::ErrorPage(shown) => {
                    return Err(NavigationError::ErrorPage {
                        url: url.to_string(),
                        shown,
                    });
                }
            }
        };

        let _focus = self.focus(handle).await.map_err(wrap)?;
        let final_url = self.driver.current_url().await.map_err(wrap)?.to_string();
        let html = self.driver.source().await.map_err(wrap)?;

        Ok(Loaded {
            response: Response {
                status,
                url: final_url,
            },
            html,
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
enum DocumentState {
    /// Still on the blank start page, or the new document is loading.
    Pending,
    Ready(u16),
    ErrorPage(String),
}

/// Classify a `DOCUMENT_STATE_JS` snapshot. Every page starts as a blank
/// window that already reports `complete`, so that document never counts.
fn document_state(snapshot: &serde_json::Value) -> DocumentState {
    let href = snapshot["href"].as_str().unwrap_or("");
    if href.is_empty() || href == "about:blank" {
        return DocumentState::Pending;
    }
    if href.starts_with("chrome-error:") || href.starts_with("about:neterror") {
        return DocumentState::ErrorPage(href.to_string());
    }
    match snapshot["state"].as_str() {
        Some("interactive") | Some("complete") => {}
        _ => return DocumentState::Pending,
    }
    // Browsers without Navigation Timing status support report nothing here.
    let status = snapshot["status"]
        .as_u64()
        .and_then(|s| u16::try_from(s).ok())
        .unwrap_or(200);
    DocumentState::Ready(status)
}

// --- Static engine ---

struct StaticEngine {
    client: reqwest::Client,
}

impl StaticEngine {
    fn new(config: &BrowserConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(config.navigation_timeout)
            .build()
            .context("Failed to build HTTP client for static rendering")?;
        Ok(Self { client })
    }

    async fn load(&self, url: &str) -> Result<Loaded, NavigationError> {
        let wrap = |source| NavigationError::Http {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().await.map_err(wrap)?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let html = response.text().await.map_err(wrap)?;
        Ok(Loaded {
            response: Response {
                status,
                url: final_url,
            },
            html,
        })
    }
}

// --- DOM snapshot readers ---

fn page_title(html: &str) -> String {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("title") else {
        return String::new();
    };
    document
        .select(&selector)
        .next()
        .map(|t| collapse(&t.text().collect::<Vec<_>>().join(" ")))
        .unwrap_or_default()
}

/// Text a reader would see: script, style and template contents are skipped.
fn visible_body_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("body") else {
        return String::new();
    };
    let Some(body) = document.select(&selector).next() else {
        return String::new();
    };

    let mut parts = Vec::new();
    for node in body.descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            ElementRef::wrap(a).is_some_and(|e| {
                matches!(e.value().name(), "script" | "style" | "noscript" | "template")
            })
        });
        if !hidden {
            parts.push(&**text);
        }
    }
    parts.join(" ")
}

fn page_anchors(html: &str) -> Vec<Anchor> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(|a| Anchor {
            text: collapse(&a.text().collect::<Vec<_>>().join(" ")),
            href: a
                .value()
                .attr("href")
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string),
        })
        .collect()
}

/// Collapse runs of whitespace into single spaces.
pub fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, TestResponse};

    const SAMPLE: &str = r#"<html><head><title>  Careers at
        Acme </title><style>.x { color: red }</style></head>
        <body><h1>Join us</h1><script>var jobs = 1;</script>
        <a href="/jobs/qa">QA   Engineer</a><a>No link</a><a href="  ">Blank</a>
        <noscript>enable js</noscript><p>Work with us</p></body></html>"#;

    fn fast_config() -> BrowserConfig {
        BrowserConfig {
            engine: EnginePreference::Static,
            navigation_timeout: Duration::from_millis(500),
            ..BrowserConfig::default()
        }
    }

    #[test]
    fn test_page_title_is_collapsed() {
        assert_eq!(page_title(SAMPLE), "Careers at Acme");
        assert_eq!(page_title("<html><body></body></html>"), "");
    }

    #[test]
    fn test_visible_body_text_skips_scripts_and_styles() {
        let text = collapse(&visible_body_text(SAMPLE));
        assert!(text.contains("Join us"));
        assert!(text.contains("Work with us"));
        assert!(!text.contains("var jobs"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("enable js"));
    }

    #[test]
    fn test_page_anchors() {
        let anchors = page_anchors(SAMPLE);
        assert_eq!(anchors.len(), 3);
        assert_eq!(anchors[0].text, "QA Engineer");
        assert_eq!(anchors[0].href.as_deref(), Some("/jobs/qa"));
        assert_eq!(anchors[1].href, None);
        assert_eq!(anchors[2].href, None);
    }

    #[tokio::test]
    async fn test_static_navigation_reads_snapshot() {
        let base = testutil::serve(|req, _base| match req.path.as_str() {
            "/careers" => TestResponse::html(SAMPLE),
            _ => TestResponse::not_found(),
        });
        let session = BrowserSession::static_engine(&fast_config()).unwrap();
        assert_eq!(session.kind(), EngineKind::Static);

        let mut page = session.acquire_page().await.unwrap();
        let response = page.navigate(&format!("{}careers", base)).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(page.title(), "Careers at Acme");
        assert_eq!(page.anchors().len(), 3);
        assert!(response.url.ends_with("/careers"));
        page.close().await;
    }

    #[tokio::test]
    async fn test_non_2xx_is_navigation_error() {
        let base = testutil::serve(|_req, _base| TestResponse::not_found());
        let session = BrowserSession::static_engine(&fast_config()).unwrap();
        let mut page = session.acquire_page().await.unwrap();
        let err = page.navigate(&format!("{}missing", base)).await.unwrap_err();
        assert!(matches!(err, NavigationError::Status { status: 404, .. }));
        page.close().await;
    }

    #[tokio::test]
    async fn test_slow_page_times_out() {
        let base = testutil::serve(|_req, _base| {
            std::thread::sleep(Duration::from_millis(1500));
            TestResponse::html("<html></html>")
        });
        let session = BrowserSession::static_engine(&fast_config()).unwrap();
        let mut page = session.acquire_page().await.unwrap();
        let err = page.navigate(&base).await.unwrap_err();
        assert!(matches!(
            err,
            NavigationError::Timeout { .. } | NavigationError::Http { .. }
        ));
        page.close().await;
    }

    #[tokio::test]
    async fn test_unreachable_host_is_navigation_error() {
        let session = BrowserSession::static_engine(&fast_config()).unwrap();
        let mut page = session.acquire_page().await.unwrap();
        let result = page.navigate(&testutil::closed_url()).await;
        assert!(result.is_err());
        assert!(page.title().is_empty());
        page.close().await;
    }

    fn snapshot(href: &str, state: &str, status: Option<u16>) -> serde_json::Value {
        serde_json::json!({ "href": href, "state": state, "status": status })
    }

    #[test]
    fn test_blank_start_page_is_never_ready() {
        let blank = snapshot("about:blank", "complete", None);
        assert_eq!(document_state(&blank), DocumentState::Pending);

        let loading = snapshot("https://acme.example/careers", "loading", None);
        assert_eq!(document_state(&loading), DocumentState::Pending);

        assert_eq!(document_state(&serde_json::Value::Null), DocumentState::Pending);
    }

    #[test]
    fn test_committed_document_reports_status() {
        let ok = snapshot("https://acme.example/careers", "interactive", Some(200));
        assert_eq!(document_state(&ok), DocumentState::Ready(200));

        let gone = snapshot("https://acme.example/old", "complete", Some(410));
        assert_eq!(document_state(&gone), DocumentState::Ready(410));

        let unreported = snapshot("https://acme.example/", "complete", None);
        assert_eq!(document_state(&unreported), DocumentState::Ready(200));
    }

    #[test]
    fn test_browser_error_page_is_a_failure() {
        let shown = snapshot("chrome-error://chromewebdata/", "complete", None);
        assert_eq!(
            document_state(&shown),
            DocumentState::ErrorPage("chrome-error://chromewebdata/".to_string())
        );
    }

    #[tokio::test]
    #[ignore] // Requires a running chromedriver
    async fn test_webdriver_waits_for_slow_page() {
        let base = testutil::serve(|req, _base| match req.path.as_str() {
            "/slow/careers" => {
                std::thread::sleep(Duration::from_millis(1200));
                TestResponse::html(SAMPLE)
            }
            _ => TestResponse::not_found(),
        });
        let config = BrowserConfig {
            engine: EnginePreference::WebDriver,
            ..BrowserConfig::default()
        };
        let session = BrowserSession::launch(&config).await.expect("chromedriver running");
        let mut page = session.acquire_page().await.unwrap();
        let response = page.navigate(&format!("{}slow/careers", base)).await.unwrap();
        assert!(response.url.ends_with("/slow/careers"));
        assert_eq!(page.title(), "Careers at Acme");
        assert_eq!(page.anchors().len(), 3);
        page.close().await;
        session.shutdown().await;
    }

    #[tokio::test]
    #[ignore] // Requires a running chromedriver
    async fn test_webdriver_session() {
        let config = BrowserConfig {
            engine: EnginePreference::WebDriver,
            ..BrowserConfig::default()
        };
        let session = BrowserSession::launch(&config).await.expect("chromedriver running");
        let mut page = session.acquire_page().await.unwrap();
        let response = page.navigate("https://example.com").await.unwrap();
        assert_eq!(response.status, 200);
        assert!(page.title().contains("Example"));
        page.close().await;
        session.shutdown().await;
    }
}
