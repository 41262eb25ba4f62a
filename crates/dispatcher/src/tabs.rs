use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tabrelay_core::{ActionResult, ExecutorMessage, Result};

/// Kind of window a tab lives in. Only `Normal` tabs are navigation targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    #[default]
    Normal,
    Panel,
    Popup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: i64,
    pub window_id: i64,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    pub active: bool,
    #[serde(rename = "type", default)]
    pub kind: WindowKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowScope {
    Any,
    /// The window the relay currently considers its own.
    Current,
    LastFocused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabQuery {
    pub active: Option<bool>,
    pub window: WindowScope,
}

impl TabQuery {
    pub fn active_in(window: WindowScope) -> Self {
        Self {
            active: Some(true),
            window,
        }
    }

    pub fn all() -> Self {
        Self {
            active: None,
            window: WindowScope::Any,
        }
    }
}

/// Browser-level tab operations plus the channel into each tab's page context.
#[async_trait]
pub trait TabApi: Send + Sync {
    async fn query(&self, query: TabQuery) -> Result<Vec<TabInfo>>;

    async fn activate(&self, tab_id: i64) -> Result<()>;

    /// Start loading `url` in the tab. Returns before the page is ready.
    async fn update_url(&self, tab_id: i64, url: &str) -> Result<()>;

    async fn create(&self, url: &str, active: bool) -> Result<TabInfo>;

    /// Deliver a message to the tab's executor. Fails while no executor is loaded.
    async fn send_message(&self, tab_id: i64, message: &ExecutorMessage) -> Result<ActionResult>;
}
