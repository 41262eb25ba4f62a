//! Headless tab host.
//!
//! Windows and tabs are plain bookkeeping. Pages are fetched with `reqwest`
//! and handed to the tab's page context, so a navigation returns before the
//! document is ready, as it does in a real browser.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tabrelay_core::config::{BrowserConfig, ExecutorConfig};
use tabrelay_core::{ActionResult, Error, ExecutorMessage, Result};
use tabrelay_dispatcher::{TabApi, TabInfo, TabQuery, WindowKind, WindowScope};
use tracing::{debug, info, warn};
use url::Url;

use crate::page::{Loaded, PageHandle};

const BLANK_PAGE: &str = "<html><head></head><body></body></html>";

struct Window {
    id: i64,
    kind: WindowKind,
}

struct Tab {
    info: TabInfo,
    /// Bumped on every navigation; stale loads are discarded.
    seq: u64,
    loading: bool,
    page: PageHandle,
}

#[derive(Default)]
struct BrowserState {
    windows: Vec<Window>,
    /// Window ids, most recently focused last.
    focus_order: Vec<i64>,
    tabs: BTreeMap<i64, Tab>,
    next_window_id: i64,
    next_tab_id: i64,
}

impl BrowserState {
    fn window_kind(&self, window_id: i64) -> Option<WindowKind> {
        self.windows.iter().find(|w| w.id == window_id).map(|w| w.kind)
    }

    fn last_focused(&self) -> Option<i64> {
        self.focus_order.last().copied()
    }

    /// The most recently focused normal window.
    fn current(&self) -> Option<i64> {
        self.focus_order
            .iter()
            .rev()
            .copied()
            .find(|id| self.window_kind(*id) == Some(WindowKind::Normal))
    }

    fn focus(&mut self, window_id: i64) {
        self.focus_order.retain(|id| *id != window_id);
        self.focus_order.push(window_id);
    }

    fn open_window(&mut self, kind: WindowKind) -> i64 {
        self.next_window_id += 1;
        let id = self.next_window_id;
        self.windows.push(Window { id, kind });
        self.focus(id);
        id
    }

    fn tab_mut(&mut self, tab_id: i64) -> Result<&mut Tab> {
        self.tabs.get_mut(&tab_id).ok_or_else(|| no_tab(tab_id))
    }

    fn set_active(&mut self, tab_id: i64) -> Result<()> {
        let window_id = self.tab_mut(tab_id)?.info.window_id;
        for tab in self.tabs.values_mut().filter(|t| t.info.window_id == window_id) {
            tab.info.active = tab.info.id == tab_id;
        }
        Ok(())
    }
}

fn no_tab(tab_id: i64) -> Error {
    Error::Browser(format!("No tab with id: {}", tab_id))
}

struct Inner {
    executor: ExecutorConfig,
    client: reqwest::Client,
    state: Mutex<BrowserState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, BrowserState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetch a document. Returns the final URL and the markup.
    async fn fetch(&self, url: &Url, raw: &str) -> Result<(String, String)> {
        match url.scheme() {
            "about" if url.path() == "blank" => Ok((raw.to_string(), BLANK_PAGE.to_string())),
            "data" => Ok((raw.to_string(), decode_data_url(raw)?)),
            "http" | "https" => {
                let resp = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| Error::Browser(format!("Failed to load {}: {}", raw, e)))?;
                let final_url = resp.url().to_string();
                let status = resp.status();
                if !status.is_success() {
                    debug!(url = %raw, status = %status, "Page loaded with error status");
                }
                let body = resp
                    .text()
                    .await
                    .map_err(|e| Error::Browser(format!("Failed to read {}: {}", raw, e)))?;
                Ok((final_url, body))
            }
            other => Err(Error::Browser(format!("Unsupported URL scheme: {}", other))),
        }
    }

    fn finish_load(&self, tab_id: i64, seq: u64, url: String, title: Option<String>) {
        let mut state = self.state();
        if let Ok(tab) = state.tab_mut(tab_id) {
            if tab.seq == seq {
                tab.loading = false;
                tab.info.url = url;
                tab.info.title = title;
            }
        }
    }

    fn fail_load(&self, tab_id: i64, seq: u64) {
        let mut state = self.state();
        if let Ok(tab) = state.tab_mut(tab_id) {
            if tab.seq == seq {
                tab.loading = false;
            }
        }
    }
}

/// `data:text/html,<markup>`; base64 payloads are not supported.
fn decode_data_url(raw: &str) -> Result<String> {
    let rest = raw.strip_prefix("data:").unwrap_or(raw);
    let (meta, data) = rest
        .split_once(',')
        .ok_or_else(|| Error::Browser("Malformed data URL".to_string()))?;
    let mime = meta.split(';').next().unwrap_or("").trim();
    if !(mime.is_empty() || mime.eq_ignore_ascii_case("text/html")) {
        return Err(Error::Browser(format!("Unsupported data URL type: {}", mime)));
    }
    if meta.split(';').any(|p| p.trim().eq_ignore_ascii_case("base64")) {
        return Err(Error::Browser("base64 data URLs are not supported".to_string()));
    }
    urlencoding::decode(data)
        .map(|s| s.into_owned())
        .map_err(|e| Error::Browser(format!("Malformed data URL: {}", e)))
}

/// In-process browser exposing windows, tabs and per-tab page contexts.
#[derive(Clone)]
pub struct HeadlessBrowser {
    inner: Arc<Inner>,
}

impl HeadlessBrowser {
    pub fn new(config: BrowserConfig, executor: ExecutorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.fetch_timeout())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| Error::Browser(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            inner: Arc::new(Inner {
                executor,
                client,
                state: Mutex::new(BrowserState::default()),
            }),
        })
    }

    /// Open and focus a new, empty window.
    pub fn open_window(&self, kind: WindowKind) -> i64 {
        let id = self.inner.state().open_window(kind);
        debug!(window_id = id, kind = ?kind, "Window opened");
        id
    }

    /// Open an active tab in a specific window and start loading `url`.
    pub async fn open_tab(&self, window_id: i64, url: &str) -> Result<TabInfo> {
        let parsed = parse_url(url)?;
        let info = {
            let mut state = self.inner.state();
            if state.window_kind(window_id).is_none() {
                return Err(Error::Browser(format!("No window with id: {}", window_id)));
            }
            self.insert_tab(&mut state, window_id, url, true)?
        };
        self.start_load(info.id, parsed, url)?;
        Ok(info)
    }

    pub fn tab(&self, tab_id: i64) -> Option<TabInfo> {
        self.inner.state().tabs.get(&tab_id).map(|t| t.info.clone())
    }

    pub fn is_loading(&self, tab_id: i64) -> bool {
        self.inner
            .state()
            .tabs
            .get(&tab_id)
            .map(|t| t.loading)
            .unwrap_or(false)
    }

    fn insert_tab(&self, state: &mut BrowserState, window_id: i64, url: &str, active: bool) -> Result<TabInfo> {
        state.next_tab_id += 1;
        let id = state.next_tab_id;
        let info = TabInfo {
            id,
            window_id,
            url: url.to_string(),
            title: None,
            active: false,
            kind: state.window_kind(window_id).unwrap_or_default(),
        };
        let page = PageHandle::spawn(id, self.inner.executor.clone())?;
        state.tabs.insert(
            id,
            Tab {
                info,
                seq: 0,
                loading: false,
                page,
            },
        );
        if active {
            state.set_active(id)?;
        }
        let tab = state.tab_mut(id)?;
        Ok(tab.info.clone())
    }

    /// Unload the tab and fetch `url` in the background.
    fn start_load(&self, tab_id: i64, url: Url, raw: &str) -> Result<()> {
        let (seq, page) = {
            let mut state = self.inner.state();
            let tab = state.tab_mut(tab_id)?;
            tab.seq += 1;
            tab.loading = true;
            tab.info.url = raw.to_string();
            tab.info.title = None;
            (tab.seq, tab.page.clone())
        };
        page.unload(seq)?;

        let inner = Arc::clone(&self.inner);
        let raw = raw.to_string();
        tokio::spawn(async move {
            let (final_url, html) = match inner.fetch(&url, &raw).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(tab_id, url = %raw, error = %e, "Navigation failed");
                    inner.fail_load(tab_id, seq);
                    return;
                }
            };
            match page.load(seq, &final_url, html).await {
                Ok(Loaded::Ready { title }) => {
                    info!(tab_id, url = %final_url, "Tab loaded");
                    inner.finish_load(tab_id, seq, final_url, title);
                }
                Ok(Loaded::Superseded) => debug!(tab_id, url = %raw, "Navigation superseded"),
                Err(e) => warn!(tab_id, error = %e, "Page context gone"),
            }
        });
        Ok(())
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::Browser(format!("Invalid URL '{}': {}", raw, e)))
}

#[async_trait]
impl TabApi for HeadlessBrowser {
    async fn query(&self, query: TabQuery) -> Result<Vec<TabInfo>> {
        let state = self.inner.state();
        let window = match query.window {
            WindowScope::Any => None,
            WindowScope::Current => match state.current() {
                Some(id) => Some(id),
                None => return Ok(Vec::new()),
            },
            WindowScope::LastFocused => match state.last_focused() {
                Some(id) => Some(id),
                None => return Ok(Vec::new()),
            },
        };
        Ok(state
            .tabs
            .values()
            .map(|t| &t.info)
            .filter(|t| window.map(|w| t.window_id == w).unwrap_or(true))
            .filter(|t| query.active.map(|a| t.active == a).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn activate(&self, tab_id: i64) -> Result<()> {
        let mut state = self.inner.state();
        state.set_active(tab_id)?;
        let window_id = state.tab_mut(tab_id)?.info.window_id;
        state.focus(window_id);
        Ok(())
    }

    async fn update_url(&self, tab_id: i64, url: &str) -> Result<()> {
        let parsed = parse_url(url)?;
        self.start_load(tab_id, parsed, url)
    }

    async fn create(&self, url: &str, active: bool) -> Result<TabInfo> {
        let parsed = parse_url(url)?;
        let info = {
            let mut state = self.inner.state();
            let window_id = match state.current() {
                Some(id) => id,
                None => state.open_window(WindowKind::Normal),
            };
            if active {
                state.focus(window_id);
            }
            self.insert_tab(&mut state, window_id, url, active)?
        };
        self.start_load(info.id, parsed, url)?;
        Ok(info)
    }

    async fn send_message(&self, tab_id: i64, message: &ExecutorMessage) -> Result<ActionResult> {
        let page = {
            let state = self.inner.state();
            state.tabs.get(&tab_id).map(|t| t.page.clone()).ok_or_else(|| no_tab(tab_id))?
        };
        page.execute(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn browser() -> HeadlessBrowser {
        HeadlessBrowser::new(BrowserConfig::default(), ExecutorConfig::default()).unwrap()
    }

    async fn wait_ready(browser: &HeadlessBrowser, tab_id: i64) {
        for _ in 0..100 {
            if let Ok(result) = browser.send_message(tab_id, &ExecutorMessage::ping()).await {
                if result.ok {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("tab {} never became ready", tab_id);
    }

    #[test]
    fn test_decode_data_url() {
        assert_eq!(
            decode_data_url("data:text/html,<p>hi%20there</p>").unwrap(),
            "<p>hi there</p>"
        );
        assert_eq!(decode_data_url("data:,plain").unwrap(), "plain");
        assert!(decode_data_url("data:text/html;base64,PHA+").is_err());
        assert!(decode_data_url("data:image/png,xx").is_err());
    }

    #[tokio::test]
    async fn test_navigation_loads_page_in_background() {
        let browser = browser();
        let window = browser.open_window(WindowKind::Normal);
        let tab = browser.open_tab(window, "about:blank").await.unwrap();

        browser
            .update_url(tab.id, "data:text/html,<title>Inbox</title><p class=\"m\">one</p><p class=\"m\">two</p>")
            .await
            .unwrap();
        assert!(browser.is_loading(tab.id));
        assert!(browser.send_message(tab.id, &ExecutorMessage::ping()).await.is_err());

        wait_ready(&browser, tab.id).await;
        let found = browser
            .send_message(tab.id, &ExecutorMessage::new("find", json!({"selector": ".m"})))
            .await
            .unwrap();
        assert_eq!(found.get("nodes").and_then(Value::as_array).map(Vec::len), Some(2));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!browser.is_loading(tab.id));
        assert_eq!(browser.tab(tab.id).unwrap().title.as_deref(), Some("Inbox"));
    }

    #[tokio::test]
    async fn test_latest_navigation_wins() {
        let browser = browser();
        let window = browser.open_window(WindowKind::Normal);
        let tab = browser.open_tab(window, "about:blank").await.unwrap();

        browser.update_url(tab.id, "data:text/html,<p id=\"a\">a</p>").await.unwrap();
        browser.update_url(tab.id, "data:text/html,<p id=\"b\">b</p>").await.unwrap();
        wait_ready(&browser, tab.id).await;

        let found = browser
            .send_message(tab.id, &ExecutorMessage::new("find", json!({"selector": "#b"})))
            .await
            .unwrap();
        assert_eq!(found.get("nodes").and_then(Value::as_array).map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_window_scopes() {
        let browser = browser();
        let normal = browser.open_window(WindowKind::Normal);
        let tab = browser.open_tab(normal, "about:blank").await.unwrap();
        let panel = browser.open_window(WindowKind::Panel);
        let panel_tab = browser.open_tab(panel, "about:blank").await.unwrap();
        assert_eq!(panel_tab.kind, WindowKind::Panel);

        let current = browser.query(TabQuery::active_in(WindowScope::Current)).await.unwrap();
        assert_eq!(current.iter().map(|t| t.id).collect::<Vec<_>>(), vec![tab.id]);

        let focused = browser
            .query(TabQuery::active_in(WindowScope::LastFocused))
            .await
            .unwrap();
        assert_eq!(focused.iter().map(|t| t.id).collect::<Vec<_>>(), vec![panel_tab.id]);

        assert_eq!(browser.query(TabQuery::all()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_and_activate() {
        let browser = browser();
        // No normal window yet: one is opened.
        let first = browser.create("about:blank", true).await.unwrap();
        let second = browser.create("about:blank", true).await.unwrap();
        assert_eq!(first.window_id, second.window_id);
        assert!(!browser.tab(first.id).unwrap().active);
        assert!(browser.tab(second.id).unwrap().active);

        browser.activate(first.id).await.unwrap();
        assert!(browser.tab(first.id).unwrap().active);
        assert!(!browser.tab(second.id).unwrap().active);
        assert!(browser.activate(999).await.is_err());
    }

    #[tokio::test]
    async fn test_bad_urls_rejected() {
        let browser = browser();
        let tab = browser.create("about:blank", true).await.unwrap();
        assert!(browser.update_url(tab.id, "not a url").await.is_err());
        assert!(browser.update_url(999, "about:blank").await.is_err());

        // Unsupported schemes fail in the background and the tab never readies.
        browser.update_url(tab.id, "ftp://example.com/").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!browser.is_loading(tab.id));
        assert!(browser.send_message(tab.id, &ExecutorMessage::ping()).await.is_err());
    }
}
