use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tabrelay_core::config::DispatcherConfig;
use tabrelay_core::{ActionRequest, ActionResult, Error, ExecutorMessage, Result};
use tabrelay_transport::FrameSink;
use tracing::{debug, info, warn};

use crate::dedup::{NavigationDebouncer, ProcessedIdSet};
use crate::tabs::{TabApi, TabQuery, WindowKind, WindowScope};
use crate::ui::{UiBridge, UiNotification};

/// Outcome of the synchronous admission step.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Id already seen within the retention window; drop silently.
    Duplicate,
    /// Refused before any side effect, with the reply to send.
    Rejected(ActionResult),
    Accepted,
}

fn is_navigation(action: &str) -> bool {
    matches!(action, "navigate" | "navTo")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Routes controller requests to local tab operations or to a tab's executor.
pub struct Dispatcher {
    config: DispatcherConfig,
    tabs: Arc<dyn TabApi>,
    sink: Arc<dyn FrameSink>,
    ui: UiBridge,
    processed: Mutex<ProcessedIdSet>,
    debouncer: Mutex<NavigationDebouncer>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        tabs: Arc<dyn TabApi>,
        sink: Arc<dyn FrameSink>,
        ui: UiBridge,
    ) -> Arc<Self> {
        let processed = ProcessedIdSet::new(config.dedup_retention());
        let debouncer = NavigationDebouncer::new(config.navigate_debounce());
        Arc::new(Self {
            config,
            tabs,
            sink,
            ui,
            processed: Mutex::new(processed),
            debouncer: Mutex::new(debouncer),
        })
    }

    /// Claim the request id and apply the navigation debounce.
    ///
    /// Runs without suspending, so two copies of one request can never both
    /// be accepted regardless of how their handling interleaves later.
    pub fn admit(&self, request: &ActionRequest) -> Admission {
        if let Some(id) = &request.id {
            if !lock(&self.processed).remember(id) {
                debug!(id = %id, action = %request.action, "Dropping duplicate request");
                return Admission::Duplicate;
            }
        }
        if is_navigation(&request.action) && !lock(&self.debouncer).try_accept() {
            debug!(action = %request.action, "Navigation debounced");
            return Admission::Rejected(ActionResult::failure("debounced"));
        }
        Admission::Accepted
    }

    /// Admit and handle one request on its own task.
    ///
    /// Returns false when the request was dropped as a duplicate.
    pub fn dispatch(self: &Arc<Self>, request: ActionRequest) -> bool {
        match self.admit(&request) {
            Admission::Duplicate => false,
            Admission::Rejected(result) => {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.reply(&request, result).await });
                true
            }
            Admission::Accepted => {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    if let Some(result) = this.execute(&request).await {
                        this.reply(&request, result).await;
                    }
                });
                true
            }
        }
    }

    /// Admit, run and reply inline.
    pub async fn handle(&self, request: &ActionRequest) -> Option<ActionResult> {
        let result = match self.admit(request) {
            Admission::Duplicate => return None,
            Admission::Rejected(result) => result,
            Admission::Accepted => self.execute(request).await?,
        };
        self.reply(request, result.clone()).await;
        Some(result)
    }

    /// Run an already admitted request. `None` means no reply is produced.
    pub async fn execute(&self, request: &ActionRequest) -> Option<ActionResult> {
        info!(action = %request.action, id = ?request.id, tab_id = ?request.tab_id, "Handling action");
        let outcome = match request.action.as_str() {
            "ping" => {
                self.ui.notify(UiNotification::Pong);
                return None;
            }
            "getActiveTab" => self.active_tab().await,
            "switchTab" => self.switch_tab(request).await,
            action if is_navigation(action) => self.navigate(request).await,
            _ => self.delegate(request).await,
        };
        Some(outcome.unwrap_or_else(|e| {
            warn!(action = %request.action, error = %e, "Action failed");
            ActionResult::from(e)
        }))
    }

    async fn reply(&self, request: &ActionRequest, result: ActionResult) {
        let frame = result.reply_frame(&request.action, request.id.as_deref());
        if !self.sink.send_frame(&frame).await {
            debug!(action = %request.action, "Reply dropped; controller not connected");
        }
        self.ui.notify(UiNotification::Result {
            action: request.action.clone(),
            result,
        });
    }

    async fn active_tab(&self) -> Result<ActionResult> {
        let tab = self
            .tabs
            .query(TabQuery::active_in(WindowScope::Current))
            .await?
            .into_iter()
            .next();
        self.ui.notify(UiNotification::ActiveTab { tab: tab.clone() });
        let tab = match tab {
            Some(t) => serde_json::to_value(t)?,
            None => Value::Null,
        };
        Ok(ActionResult::success().with("tab", tab))
    }

    async fn switch_tab(&self, request: &ActionRequest) -> Result<ActionResult> {
        let Some(tab_id) = request
            .payload
            .as_ref()
            .and_then(|p| p.get("tabId"))
            .and_then(Value::as_i64)
        else {
            return Ok(ActionResult::failure("missing tabId"));
        };
        self.tabs.activate(tab_id).await?;
        Ok(ActionResult::success().with("tabId", tab_id))
    }

    async fn navigate(&self, request: &ActionRequest) -> Result<ActionResult> {
        let Some(url) = request.payload_str("url").filter(|u| !u.is_empty()) else {
            return Ok(ActionResult::failure("missing url"));
        };
        let tab_id = match self.navigation_target(request).await? {
            Some(tab_id) => {
                self.tabs.update_url(tab_id, url).await?;
                tab_id
            }
            None => {
                debug!(url = %url, "No normal tab to reuse; creating one");
                self.tabs.create(url, true).await?.id
            }
        };
        self.wait_until_ready(tab_id).await?;
        Ok(ActionResult::success().with("tabId", tab_id))
    }

    /// Explicit tab, else the active normal tab of the last-focused window.
    async fn navigation_target(&self, request: &ActionRequest) -> Result<Option<i64>> {
        if let Some(tab_id) = request.tab_id {
            return Ok(Some(tab_id));
        }
        let candidates = self
            .tabs
            .query(TabQuery::active_in(WindowScope::LastFocused))
            .await?;
        Ok(candidates
            .into_iter()
            .find(|t| t.kind == WindowKind::Normal)
            .map(|t| t.id))
    }

    async fn delegate(&self, request: &ActionRequest) -> Result<ActionResult> {
        let tab_id = match request.tab_id {
            Some(tab_id) => Some(tab_id),
            None => self
                .tabs
                .query(TabQuery::active_in(WindowScope::Current))
                .await?
                .first()
                .map(|t| t.id),
        };
        let Some(tab_id) = tab_id else {
            return Ok(ActionResult::failure("no target tab"));
        };

        self.wait_until_ready(tab_id).await?;
        let message = request.to_executor_message();
        tokio::time::timeout(self.config.message_timeout(), self.tabs.send_message(tab_id, &message))
            .await
            .map_err(|_| Error::Timeout(format!("no response from tab {}", tab_id)))?
    }

    /// Ping the tab's executor until it answers or the attempts run out.
    async fn wait_until_ready(&self, tab_id: i64) -> Result<()> {
        let ping = ExecutorMessage::ping();
        let attempts = self.config.ready_probe_attempts.max(1);
        for attempt in 1..=attempts {
            let probe = tokio::time::timeout(self.config.message_timeout(), self.tabs.send_message(tab_id, &ping));
            match probe.await {
                Ok(Ok(result)) if result.ok => {
                    debug!(tab_id, attempt, "Executor ready");
                    return Ok(());
                }
                Ok(Ok(result)) => debug!(tab_id, attempt, error = ?result.error, "Ping refused"),
                Ok(Err(e)) => debug!(tab_id, attempt, error = %e, "Executor not reachable"),
                Err(_) => debug!(tab_id, attempt, "Ping timed out"),
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.ready_probe_interval()).await;
            }
        }
        Err(Error::NotReady("not ready".to_string()))
    }
}
