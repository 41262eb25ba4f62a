//! Transport adapter: the single outbound connection to the controller.
//!
//! `ConnectionManager` owns the socket and the connection state. Everything
//! else talks to it through [`FrameSink`] and [`ConnectionManager::subscribe`].

pub mod connector;
pub mod manager;

pub use connector::{Connection, Connector, WebSocketConnector};
pub use manager::{ConnectionManager, ConnectionState, FrameSink, TransportEvent};
