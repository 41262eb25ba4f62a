//! Page executor: a fixed vocabulary of DOM operations run against a page.
//!
//! The executor holds no state between invocations; everything it touches
//! lives in the [`Document`] it is handed.

pub mod dom;
pub mod executor;
pub mod html;

pub use dom::{Document, DomEvent, ElementDescriptor, Rect};
pub use executor::PageExecutor;
pub use html::HtmlDocument;
