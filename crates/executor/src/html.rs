//! Static HTML document backed by `scraper`.
//!
//! The parsed tree is never mutated. Values, focus, scroll position and
//! dispatched events are tracked alongside it. There is no layout engine, so
//! every bounding rectangle is zero-sized.

use ego_tree::NodeId;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use tabrelay_core::{Error, Result};

use crate::dom::{Document, DomEvent, ElementDescriptor, Rect};

/// An event dispatched on an element, recorded for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub tag: String,
    pub id: Option<String>,
    pub event: DomEvent,
}

pub struct HtmlDocument {
    html: Html,
    values: HashMap<NodeId, String>,
    focused: Option<NodeId>,
    scroll: (f64, f64),
    events: Vec<RecordedEvent>,
}

impl HtmlDocument {
    pub fn parse(source: &str) -> Self {
        Self {
            html: Html::parse_document(source),
            values: HashMap::new(),
            focused: None,
            scroll: (0.0, 0.0),
            events: Vec::new(),
        }
    }

    pub fn blank() -> Self {
        Self::parse("<html><head></head><body></body></html>")
    }

    pub fn title(&self) -> Option<String> {
        let selector = Selector::parse("title").ok()?;
        self.html
            .select(&selector)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// Current value: the last one set, else the `value` attribute.
    pub fn value(&self, element: NodeId) -> Option<String> {
        if let Some(v) = self.values.get(&element) {
            return Some(v.clone());
        }
        self.element(element)
            .and_then(|el| el.value().attr("value"))
            .map(str::to_string)
    }

    pub fn value_of(&self, selector: &str) -> Option<String> {
        let element = self.query(selector).ok()??;
        self.value(element)
    }

    pub fn focused(&self) -> Option<NodeId> {
        self.focused
    }

    /// Horizontal and vertical scroll offset.
    pub fn scroll_position(&self) -> (f64, f64) {
        self.scroll
    }

    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }

    fn record(&mut self, id: NodeId, event: DomEvent) -> Result<()> {
        let el = self
            .element(id)
            .ok_or_else(|| Error::TargetNotFound("element detached".into()))?;
        let recorded = RecordedEvent {
            tag: el.value().name().to_string(),
            id: el.value().id().map(str::to_string),
            event,
        };
        self.events.push(recorded);
        Ok(())
    }
}

impl Document for HtmlDocument {
    type Element = NodeId;

    fn query_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        let parsed = Selector::parse(selector)
            .map_err(|e| Error::Other(format!("invalid selector '{}': {:?}", selector, e)))?;
        Ok(self.html.select(&parsed).map(|el| el.id()).collect())
    }

    fn describe(&self, element: &NodeId) -> ElementDescriptor {
        let Some(el) = self.element(*element) else {
            return ElementDescriptor::default();
        };
        let text = el.text().collect::<Vec<_>>().join(" ");
        ElementDescriptor {
            tag: el.value().name().to_ascii_uppercase(),
            id: el.value().id().map(str::to_string),
            classes: el
                .value()
                .attr("class")
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            text: text.split_whitespace().collect::<Vec<_>>().join(" "),
            rect: Rect::default(),
        }
    }

    fn click(&mut self, element: &NodeId) -> Result<()> {
        self.record(*element, DomEvent::Click)
    }

    fn focus(&mut self, element: &NodeId) -> Result<()> {
        self.record(*element, DomEvent::Focus)?;
        self.focused = Some(*element);
        Ok(())
    }

    fn set_value(&mut self, element: &NodeId, value: &str) -> Result<()> {
        if self.element(*element).is_none() {
            return Err(Error::TargetNotFound("element detached".into()));
        }
        self.values.insert(*element, value.to_string());
        Ok(())
    }

    fn dispatch_event(&mut self, element: &NodeId, event: DomEvent) -> Result<()> {
        self.record(*element, event)
    }

    fn closest_form(&self, element: &NodeId) -> Option<NodeId> {
        let el = self.element(*element)?;
        if el.value().name() == "form" {
            return Some(el.id());
        }
        el.ancestors()
            .filter_map(ElementRef::wrap)
            .find(|a| a.value().name() == "form")
            .map(|form| form.id())
    }

    fn submit_form(&mut self, form: &NodeId) -> Result<()> {
        self.record(*form, DomEvent::Submit)
    }

    fn scroll_by(&mut self, left: f64, top: f64) {
        self.scroll = ((self.scroll.0 + left).max(0.0), (self.scroll.1 + top).max(0.0));
    }

    fn outer_html(&self) -> String {
        self.html.root_element().html()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title> Shop </title></head><body>
        <form id="search"><input id="q" name="q" value="initial"><button class="btn primary">Go</button></form>
        <input id="loose">
    </body></html>"#;

    #[test]
    fn test_query_and_describe() {
        let doc = HtmlDocument::parse(PAGE);
        let buttons = doc.query_all("button").unwrap();
        assert_eq!(buttons.len(), 1);
        let d = doc.describe(&buttons[0]);
        assert_eq!(d.tag, "BUTTON");
        assert_eq!(d.classes.as_deref(), Some("btn primary"));
        assert_eq!(d.text, "Go");
        assert_eq!(doc.title().as_deref(), Some("Shop"));
    }

    #[test]
    fn test_invalid_selector_is_error() {
        let doc = HtmlDocument::blank();
        assert!(doc.query_all("div[").is_err());
    }

    #[test]
    fn test_closest_form() {
        let doc = HtmlDocument::parse(PAGE);
        let q = doc.query("#q").unwrap().unwrap();
        let form = doc.query("#search").unwrap().unwrap();
        assert_eq!(doc.closest_form(&q), Some(form));
        assert_eq!(doc.closest_form(&form), Some(form));
        let loose = doc.query("#loose").unwrap().unwrap();
        assert_eq!(doc.closest_form(&loose), None);
    }

    #[test]
    fn test_value_overlay() {
        let mut doc = HtmlDocument::parse(PAGE);
        assert_eq!(doc.value_of("#q").as_deref(), Some("initial"));
        let q = doc.query("#q").unwrap().unwrap();
        doc.set_value(&q, "boots").unwrap();
        assert_eq!(doc.value_of("#q").as_deref(), Some("boots"));
    }

    #[test]
    fn test_scroll_never_negative() {
        let mut doc = HtmlDocument::blank();
        doc.scroll_by(0.0, 300.0);
        doc.scroll_by(-50.0, -500.0);
        assert_eq!(doc.scroll_position(), (0.0, 0.0));
    }
}
