use serde_json::Value;
use tabrelay_core::config::ExecutorConfig;
use tabrelay_core::message::PING_ACTION;
use tabrelay_core::{ActionResult, Error, ExecutorMessage, Result};
use tracing::debug;

use crate::dom::{Document, DomEvent};

/// Stateless DOM action executor.
#[derive(Debug, Clone, Default)]
pub struct PageExecutor {
    config: ExecutorConfig,
}

impl PageExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Run one action. Every failure comes back as `{ok:false, error}`.
    pub fn handle<D: Document>(&self, doc: &mut D, message: &ExecutorMessage) -> ActionResult {
        debug!(action = %message.action, "Executing page action");
        match self.execute(doc, message) {
            Ok(result) => result,
            Err(e) => ActionResult::failure(e.to_string()),
        }
    }

    fn execute<D: Document>(&self, doc: &mut D, message: &ExecutorMessage) -> Result<ActionResult> {
        let payload = &message.payload;
        match message.action.as_str() {
            PING_ACTION => Ok(ActionResult::success()),
            "find" => {
                let selector = selector(payload)?;
                let nodes: Vec<Value> = doc
                    .query_all(selector)?
                    .iter()
                    .map(|el| {
                        let mut d = doc.describe(el);
                        d.text = truncate(&d.text, self.config.max_text_length);
                        serde_json::to_value(d).unwrap_or(Value::Null)
                    })
                    .collect();
                Ok(ActionResult::success().with("nodes", nodes))
            }
            "click" => {
                let el = require(doc, selector(payload)?)?;
                doc.click(&el)?;
                Ok(ActionResult::success())
            }
            "type" => {
                let el = require(doc, selector(payload)?)?;
                let text = match payload.get("text") {
                    Some(Value::String(s)) => s.clone(),
                    None | Some(Value::Null) => String::new(),
                    Some(other) => other.to_string(),
                };
                doc.focus(&el)?;
                doc.set_value(&el, &text)?;
                doc.dispatch_event(&el, DomEvent::Input)?;
                doc.dispatch_event(&el, DomEvent::Change)?;
                Ok(ActionResult::success())
            }
            "submit" => {
                let el = require(doc, selector(payload)?)?;
                match doc.closest_form(&el) {
                    Some(form) => doc.submit_form(&form)?,
                    None => doc.dispatch_event(
                        &el,
                        DomEvent::KeyDown {
                            key: "Enter".to_string(),
                        },
                    )?,
                }
                Ok(ActionResult::success())
            }
            "scroll" => {
                let top = payload.get("top").and_then(Value::as_f64).unwrap_or(0.0);
                let left = payload.get("left").and_then(Value::as_f64).unwrap_or(0.0);
                doc.scroll_by(left, top);
                Ok(ActionResult::success())
            }
            "getHTML" => {
                let html = truncate(&doc.outer_html(), self.config.max_html_length);
                Ok(ActionResult::success().with("html", html))
            }
            "upload" => Err(Error::Unsupported(
                "upload not supported: file selection requires a user gesture".to_string(),
            )),
            other => Err(Error::Unsupported(format!("unknown action: {}", other))),
        }
    }
}

fn selector(payload: &Value) -> Result<&str> {
    payload
        .get("selector")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Other("missing selector".to_string()))
}

fn require<D: Document>(doc: &D, selector: &str) -> Result<D::Element> {
    doc.query(selector)?
        .ok_or_else(|| Error::TargetNotFound("not found".to_string()))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
