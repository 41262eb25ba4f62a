//! Action dispatcher: routes controller requests to tab operations or to the
//! page executor, and bridges the presentation layer to the transport.

pub mod dedup;
pub mod dispatcher;
pub mod relay;
pub mod tabs;
pub mod ui;

#[cfg(test)]
pub(crate) mod testing;

pub use dedup::{NavigationDebouncer, ProcessedIdSet};
pub use dispatcher::{Admission, Dispatcher};
pub use relay::Relay;
pub use tabs::{TabApi, TabInfo, TabQuery, WindowKind, WindowScope};
pub use ui::{MessageOrigin, UiBridge, UiNotification, UiRequest, UiResponse};
