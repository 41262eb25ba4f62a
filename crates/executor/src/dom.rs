use serde::{Deserialize, Serialize};
use tabrelay_core::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Bounded description of an element returned by `find`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Option<String>,
    pub text: String,
    pub rect: Rect,
}

/// Events page-side listeners can observe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DomEvent {
    Click,
    Focus,
    Input,
    Change,
    KeyDown { key: String },
    Submit,
}

/// DOM primitives the executor is built on.
pub trait Document {
    type Element: Clone;

    fn query_all(&self, selector: &str) -> Result<Vec<Self::Element>>;

    fn query(&self, selector: &str) -> Result<Option<Self::Element>> {
        Ok(self.query_all(selector)?.into_iter().next())
    }

    fn describe(&self, element: &Self::Element) -> ElementDescriptor;

    fn click(&mut self, element: &Self::Element) -> Result<()>;

    fn focus(&mut self, element: &Self::Element) -> Result<()>;

    fn set_value(&mut self, element: &Self::Element, value: &str) -> Result<()>;

    fn dispatch_event(&mut self, element: &Self::Element, event: DomEvent) -> Result<()>;

    /// Nearest form containing the element, the element itself included.
    fn closest_form(&self, element: &Self::Element) -> Option<Self::Element>;

    fn submit_form(&mut self, form: &Self::Element) -> Result<()>;

    fn scroll_by(&mut self, left: f64, top: f64);

    fn outer_html(&self) -> String;
}
