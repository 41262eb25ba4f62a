//! In-memory doubles shared by the dispatcher tests.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tabrelay_core::{ActionResult, Error, ExecutorMessage, Result};
use tabrelay_executor::{HtmlDocument, PageExecutor};
use tabrelay_transport::FrameSink;

use crate::tabs::{TabApi, TabInfo, TabQuery, WindowKind, WindowScope};

pub struct RecordingSink {
    open: AtomicBool,
    frames: Mutex<Vec<Value>>,
}

impl RecordingSink {
    pub fn open() -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(true),
            frames: Mutex::new(Vec::new()),
        })
    }

    pub fn closed() -> Arc<Self> {
        let sink = Self::open();
        sink.set_open(false);
        sink
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<Value> {
        self.frames.lock().unwrap().clone()
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send_frame(&self, frame: &Value) -> bool {
        if !self.is_open() {
            return false;
        }
        self.frames.lock().unwrap().push(frame.clone());
        true
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Messages a tab accepts but never answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stall {
    Nothing,
    Pings,
    Actions,
}

struct FakeTab {
    info: TabInfo,
    html: String,
    ping_failures: u32,
    stall: Stall,
}

struct FakeState {
    tabs: Vec<FakeTab>,
    current_window: i64,
    last_focused_window: i64,
    next_id: i64,
    calls: Vec<String>,
}

/// Scripted tab API. Executor messages run a real `PageExecutor` against a
/// freshly parsed copy of the tab's HTML.
pub struct FakeTabs {
    state: Mutex<FakeState>,
}

impl FakeTabs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                tabs: Vec::new(),
                current_window: 1,
                last_focused_window: 1,
                next_id: 100,
                calls: Vec::new(),
            }),
        })
    }

    pub fn add_tab(&self, id: i64, window_id: i64, kind: WindowKind, active: bool, html: &str) {
        let mut state = self.state.lock().unwrap();
        state.tabs.push(FakeTab {
            info: TabInfo {
                id,
                window_id,
                url: format!("https://tab{}.test/", id),
                title: None,
                active,
                kind,
            },
            html: html.to_string(),
            ping_failures: 0,
            stall: Stall::Nothing,
        });
    }

    pub fn focus_window(&self, window_id: i64) {
        let mut state = self.state.lock().unwrap();
        state.current_window = window_id;
        state.last_focused_window = window_id;
    }

    /// The next `count` pings to the tab fail as if no executor were loaded.
    pub fn fail_pings(&self, tab_id: i64, count: u32) {
        let mut state = self.state.lock().unwrap();
        if let Some(tab) = state.tabs.iter_mut().find(|t| t.info.id == tab_id) {
            tab.ping_failures = count;
        }
    }

    pub fn stall(&self, tab_id: i64, stall: Stall) {
        let mut state = self.state.lock().unwrap();
        if let Some(tab) = state.tabs.iter_mut().find(|t| t.info.id == tab_id) {
            tab.stall = stall;
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn tab(&self, tab_id: i64) -> Option<TabInfo> {
        let state = self.state.lock().unwrap();
        state.tabs.iter().find(|t| t.info.id == tab_id).map(|t| t.info.clone())
    }
}

fn run_executor(html: &str, message: &ExecutorMessage) -> ActionResult {
    let mut doc = HtmlDocument::parse(html);
    PageExecutor::default().handle(&mut doc, message)
}

#[async_trait]
impl TabApi for FakeTabs {
    async fn query(&self, query: TabQuery) -> Result<Vec<TabInfo>> {
        let state = self.state.lock().unwrap();
        let window = match query.window {
            WindowScope::Any => None,
            WindowScope::Current => Some(state.current_window),
            WindowScope::LastFocused => Some(state.last_focused_window),
        };
        Ok(state
            .tabs
            .iter()
            .map(|t| &t.info)
            .filter(|t| window.map(|w| t.window_id == w).unwrap_or(true))
            .filter(|t| query.active.map(|a| t.active == a).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn activate(&self, tab_id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("activate {}", tab_id));
        let window_id = state
            .tabs
            .iter()
            .find(|t| t.info.id == tab_id)
            .map(|t| t.info.window_id)
            .ok_or_else(|| Error::Browser(format!("no tab with id: {}", tab_id)))?;
        for tab in state.tabs.iter_mut().filter(|t| t.info.window_id == window_id) {
            tab.info.active = tab.info.id == tab_id;
        }
        Ok(())
    }

    async fn update_url(&self, tab_id: i64, url: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("update {} {}", tab_id, url));
        let tab = state
            .tabs
            .iter_mut()
            .find(|t| t.info.id == tab_id)
            .ok_or_else(|| Error::Browser(format!("no tab with id: {}", tab_id)))?;
        tab.info.url = url.to_string();
        Ok(())
    }

    async fn create(&self, url: &str, active: bool) -> Result<TabInfo> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.calls.push(format!("create {} {}", id, url));
        let info = TabInfo {
            id,
            window_id: 1,
            url: url.to_string(),
            title: None,
            active,
            kind: WindowKind::Normal,
        };
        state.tabs.push(FakeTab {
            info: info.clone(),
            html: "<html><body></body></html>".to_string(),
            ping_failures: 0,
            stall: Stall::Nothing,
        });
        Ok(info)
    }

    async fn send_message(&self, tab_id: i64, message: &ExecutorMessage) -> Result<ActionResult> {
        let (html, stalled) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("{} {}", message.action, tab_id));
            let tab = state
                .tabs
                .iter_mut()
                .find(|t| t.info.id == tab_id)
                .ok_or_else(|| Error::Browser(format!("no tab with id: {}", tab_id)))?;
            if message.is_ping() && tab.ping_failures > 0 {
                tab.ping_failures -= 1;
                return Err(Error::NotReady("receiving end does not exist".into()));
            }
            let stalled = match tab.stall {
                Stall::Nothing => false,
                Stall::Pings => message.is_ping(),
                Stall::Actions => !message.is_ping(),
            };
            (tab.html.clone(), stalled)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(run_executor(&html, message))
    }
}
