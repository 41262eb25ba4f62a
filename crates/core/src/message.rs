use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

use crate::error::{Error, Result};

/// Reserved executor action used only for readiness probing.
pub const PING_ACTION: &str = "ping";

/// A local endpoint the controller may be listening on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An action request from the controller: `{id?, action, payload?, tabId?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    #[serde(default, deserialize_with = "lenient_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, deserialize_with = "lenient_tab_id", skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
}

impl ActionRequest {
    pub fn new(action: &str) -> Self {
        Self {
            id: None,
            action: action.to_string(),
            payload: None,
            tab_id: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_tab(mut self, tab_id: i64) -> Self {
        self.tab_id = Some(tab_id);
        self
    }

    /// Look up a string field of the payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.as_ref()?.get(key)?.as_str()
    }

    pub fn to_executor_message(&self) -> ExecutorMessage {
        ExecutorMessage {
            action: self.action.clone(),
            payload: self.payload.clone().unwrap_or(Value::Null),
        }
    }
}

/// Ids may arrive as strings or numbers; anything else counts as absent.
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Only numeric tab ids address a tab.
fn lenient_tab_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<i64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_i64()))
}

/// Message passed from the dispatcher to a page executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorMessage {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

impl ExecutorMessage {
    pub fn new(action: &str, payload: Value) -> Self {
        Self {
            action: action.to_string(),
            payload,
        }
    }

    pub fn ping() -> Self {
        Self::new(PING_ACTION, Value::Null)
    }

    pub fn is_ping(&self) -> bool {
        self.action == PING_ACTION
    }
}

/// Outcome of an action. Failures are data, never a closed channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ActionResult {
    pub fn success() -> Self {
        Self {
            ok: true,
            error: None,
            fields: Map::new(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            fields: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Frame sent back to the controller: `{type:"<action>Result", action, id?, ok, ...}`.
    pub fn reply_frame(&self, action: &str, id: Option<&str>) -> Value {
        let mut frame = Map::new();
        frame.insert("type".to_string(), json!(format!("{}Result", action)));
        frame.insert("action".to_string(), json!(action));
        if let Some(id) = id {
            frame.insert("id".to_string(), json!(id));
        }
        frame.insert("ok".to_string(), json!(self.ok));
        if let Some(error) = &self.error {
            frame.insert("error".to_string(), json!(error));
        }
        for (key, value) in &self.fields {
            frame.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(frame)
    }
}

impl From<Error> for ActionResult {
    fn from(err: Error) -> Self {
        ActionResult::failure(err.to_string())
    }
}

/// Outbound task submission from the presentation layer.
pub fn task_frame(task: &str) -> Value {
    json!({ "type": "task", "task": task })
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// `{type:"plan", ...}`; forwarded to the presentation layer only.
    Plan(Value),
    Action(ActionRequest),
    /// Any other well-formed object, e.g. `{type:"task_complete"}`.
    Control(Value),
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| Error::Parse(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Parse("frame is not a JSON object".to_string()))?;

        if obj.get("type").and_then(|t| t.as_str()) == Some("plan") {
            return Ok(InboundFrame::Plan(value));
        }
        if obj.get("action").map(|a| a.is_string()).unwrap_or(false) {
            let request: ActionRequest = serde_json::from_value(value)
                .map_err(|e| Error::Parse(format!("invalid action request: {}", e)))?;
            return Ok(InboundFrame::Action(request));
        }
        Ok(InboundFrame::Control(value))
    }

    pub fn to_value(&self) -> Value {
        match self {
            InboundFrame::Plan(v) | InboundFrame::Control(v) => v.clone(),
            InboundFrame::Action(req) => serde_json::to_value(req).unwrap_or(Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action_request() {
        let frame = InboundFrame::parse(
            r##"{"id":"a1","action":"click","payload":{"selector":"#go"},"tabId":7}"##,
        )
        .unwrap();
        match frame {
            InboundFrame::Action(req) => {
                assert_eq!(req.id.as_deref(), Some("a1"));
                assert_eq!(req.action, "click");
                assert_eq!(req.payload_str("selector"), Some("#go"));
                assert_eq!(req.tab_id, Some(7));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_parse_lenient_ids() {
        let frame = InboundFrame::parse(r#"{"id":42,"action":"find","tabId":"3"}"#).unwrap();
        let InboundFrame::Action(req) = frame else {
            panic!("expected action");
        };
        assert_eq!(req.id.as_deref(), Some("42"));
        assert_eq!(req.tab_id, None);
    }

    #[test]
    fn test_parse_plan_and_control() {
        let plan = InboundFrame::parse(r#"{"type":"plan","task":"x","count":2}"#).unwrap();
        assert!(matches!(plan, InboundFrame::Plan(_)));

        let control = InboundFrame::parse(r#"{"type":"task_complete","actions_count":3}"#).unwrap();
        assert!(matches!(control, InboundFrame::Control(_)));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(InboundFrame::parse("{not json"), Err(Error::Parse(_))));
        assert!(matches!(InboundFrame::parse("[1,2]"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_reply_frame_shape() {
        let result = ActionResult::success().with("tabId", 12);
        let frame = result.reply_frame("navigate", Some("n1"));
        assert_eq!(frame["type"], "navigateResult");
        assert_eq!(frame["action"], "navigate");
        assert_eq!(frame["id"], "n1");
        assert_eq!(frame["ok"], true);
        assert_eq!(frame["tabId"], 12);
        assert!(frame.get("error").is_none());
    }

    #[test]
    fn test_result_flattened_fields() {
        let raw = r##"{"ok":false,"error":"not found","selector":"#x"}"##;
        let result: ActionResult = serde_json::from_str(raw).unwrap();
        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("not found"));
        assert_eq!(result.get("selector"), Some(&json!("#x")));
    }

    #[test]
    fn test_error_into_result() {
        let result: ActionResult = Error::NotReady("not ready".into()).into();
        assert_eq!(result, ActionResult::failure("not ready"));
    }
}
