//! Boundary to the presentation layer.
//!
//! The panel submits `ui_task` / `ui_status` requests and listens for
//! notifications. Task submissions go straight to the controller; they never
//! enter the action-routing path.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tabrelay_core::message::task_frame;
use tabrelay_core::ActionResult;
use tabrelay_transport::FrameSink;
use tokio::sync::broadcast;
use tracing::debug;

use crate::tabs::TabInfo;

/// Where a runtime message came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOrigin {
    /// The presentation panel itself.
    Panel,
    /// A page context inside a tab.
    Content { tab_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum UiRequest {
    #[serde(rename = "ui_task")]
    Task {
        #[serde(default, deserialize_with = "lenient_task")]
        task: String,
    },
    #[serde(rename = "ui_status")]
    Status,
}

/// Any task value is accepted; null and non-scalar values become empty.
fn lenient_task<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(true) => "true".to_string(),
        _ => String::new(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum UiNotification {
    #[serde(rename = "ws_status")]
    WsStatus { connected: bool, url: String },
    #[serde(rename = "ws_message")]
    WsMessage { message: Value },
    #[serde(rename = "ws_error")]
    WsError { error: String },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "activeTab")]
    ActiveTab { tab: Option<TabInfo> },
    #[serde(rename = "result")]
    Result { action: String, result: ActionResult },
    #[serde(rename = "fromContent")]
    FromContent { tab_id: i64, msg: Value },
}

#[derive(Clone)]
pub struct UiBridge {
    notifications: broadcast::Sender<UiNotification>,
    sink: Arc<dyn FrameSink>,
}

impl UiBridge {
    pub fn new(sink: Arc<dyn FrameSink>, capacity: usize) -> Self {
        let (notifications, _) = broadcast::channel(capacity.max(1));
        Self {
            notifications,
            sink,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiNotification> {
        self.notifications.subscribe()
    }

    /// Fire-and-forget; nobody listening is fine.
    pub fn notify(&self, notification: UiNotification) {
        let _ = self.notifications.send(notification);
    }

    pub async fn handle_request(&self, request: UiRequest) -> UiResponse {
        match request {
            UiRequest::Task { task } => {
                if !self.sink.is_open() {
                    return UiResponse {
                        ok: false,
                        connected: None,
                        error: Some("WebSocket not connected".to_string()),
                    };
                }
                if self.sink.send_frame(&task_frame(&task)).await {
                    UiResponse {
                        ok: true,
                        connected: None,
                        error: None,
                    }
                } else {
                    UiResponse {
                        ok: false,
                        connected: None,
                        error: Some("send failed".to_string()),
                    }
                }
            }
            UiRequest::Status => UiResponse {
                ok: true,
                connected: Some(self.sink.is_open()),
                error: None,
            },
        }
    }

    /// Route a message posted on the runtime channel.
    ///
    /// UI requests are answered. Anything else from the panel, or carrying a
    /// `ui_` type, is dropped so it cannot echo back out. Content messages are
    /// passed to the panel only.
    pub async fn handle_runtime_message(&self, origin: MessageOrigin, message: &Value) -> Option<UiResponse> {
        if !message.is_object() {
            return None;
        }
        if let Ok(request) = serde_json::from_value::<UiRequest>(message.clone()) {
            return Some(self.handle_request(request).await);
        }

        let is_ui_type = message
            .get("type")
            .and_then(Value::as_str)
            .map(|t| t.starts_with("ui_"))
            .unwrap_or(false);
        match origin {
            MessageOrigin::Panel => {
                debug!("Ignoring panel message");
                None
            }
            _ if is_ui_type => None,
            MessageOrigin::Content { tab_id } => {
                self.notify(UiNotification::FromContent {
                    tab_id,
                    msg: message.clone(),
                });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;
    use serde_json::json;

    #[tokio::test]
    async fn test_ui_task_forwarded_as_task_frame() {
        let sink = RecordingSink::open();
        let ui = UiBridge::new(sink.clone(), 16);
        let resp = ui
            .handle_runtime_message(MessageOrigin::Panel, &json!({"type": "ui_task", "task": "buy milk"}))
            .await;
        assert_eq!(resp.map(|r| r.ok), Some(true));
        assert_eq!(sink.frames(), vec![json!({"type": "task", "task": "buy milk"})]);
    }

    #[tokio::test]
    async fn test_ui_task_with_odd_task_values_still_answered() {
        let sink = RecordingSink::open();
        let ui = UiBridge::new(sink.clone(), 16);
        for message in [
            json!({"type": "ui_task", "task": null}),
            json!({"type": "ui_task"}),
            json!({"type": "ui_task", "task": 42}),
        ] {
            let resp = ui.handle_runtime_message(MessageOrigin::Panel, &message).await;
            assert_eq!(resp.map(|r| r.ok), Some(true));
        }
        assert_eq!(
            sink.frames(),
            vec![
                json!({"type": "task", "task": ""}),
                json!({"type": "task", "task": ""}),
                json!({"type": "task", "task": "42"}),
            ]
        );
    }

    #[tokio::test]
    async fn test_ui_task_when_disconnected() {
        let sink = RecordingSink::closed();
        let ui = UiBridge::new(sink.clone(), 16);
        let resp = ui
            .handle_request(UiRequest::Task {
                task: "x".to_string(),
            })
            .await;
        assert!(!resp.ok);
        assert_eq!(resp.error.as_deref(), Some("WebSocket not connected"));
        assert!(sink.frames().is_empty());
    }

    #[tokio::test]
    async fn test_ui_status_reports_connection() {
        let sink = RecordingSink::open();
        let ui = UiBridge::new(sink.clone(), 16);
        let resp = ui.handle_request(UiRequest::Status).await;
        assert_eq!(resp.connected, Some(true));

        sink.set_open(false);
        let resp = ui.handle_request(UiRequest::Status).await;
        assert_eq!(resp.connected, Some(false));
    }

    #[tokio::test]
    async fn test_panel_and_ui_messages_not_echoed() {
        let sink = RecordingSink::open();
        let ui = UiBridge::new(sink.clone(), 16);
        let mut rx = ui.subscribe();

        assert!(ui
            .handle_runtime_message(MessageOrigin::Panel, &json!({"type": "log", "text": "hi"}))
            .await
            .is_none());
        assert!(ui
            .handle_runtime_message(MessageOrigin::Content { tab_id: 1 }, &json!({"type": "ui_refresh"}))
            .await
            .is_none());
        assert!(sink.frames().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_content_messages_reach_panel_only() {
        let sink = RecordingSink::open();
        let ui = UiBridge::new(sink.clone(), 16);
        let mut rx = ui.subscribe();

        ui.handle_runtime_message(MessageOrigin::Content { tab_id: 4 }, &json!({"type": "progress", "pct": 50}))
            .await;
        assert_eq!(
            rx.try_recv().unwrap(),
            UiNotification::FromContent {
                tab_id: 4,
                msg: json!({"type": "progress", "pct": 50}),
            }
        );
        assert!(sink.frames().is_empty());
    }

    #[test]
    fn test_notification_wire_shape() {
        let n = UiNotification::WsStatus {
            connected: true,
            url: "ws://127.0.0.1:8765".into(),
        };
        assert_eq!(
            serde_json::to_value(&n).unwrap(),
            json!({"type": "ws_status", "connected": true, "url": "ws://127.0.0.1:8765"})
        );
        assert_eq!(serde_json::to_value(UiNotification::Pong).unwrap(), json!({"type": "pong"}));
    }
}
