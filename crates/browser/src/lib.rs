//! A headless [`TabApi`](tabrelay_dispatcher::TabApi) implementation.
//!
//! Each tab owns a page context thread holding its parsed document; the
//! dispatcher reaches it only through messages.

pub mod browser;
mod page;

pub use browser::HeadlessBrowser;
