//! Socket establishment, kept behind a trait so the connection manager can be
//! driven by in-memory doubles.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tabrelay_core::{Endpoint, Error, Result};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, warn};

/// An open duplex text link.
///
/// Sending on `outgoing` writes a frame. `incoming` yields `None` once the
/// peer closes or the link fails. Dropping `outgoing` closes the link.
pub struct Connection {
    pub outgoing: mpsc::Sender<String>,
    pub incoming: mpsc::Receiver<String>,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection>;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection> {
        let url = endpoint.url();
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("WebSocket connection to {} failed: {}", url, e)))?;

        let (mut ws_sink, mut ws_read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        let (in_tx, in_rx) = mpsc::channel::<String>(256);

        // Writer task: owns the sink, closes it once every sender is gone.
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_sink.send(WsMessage::Text(text)).await {
                    warn!(error = %e, "WebSocket write error");
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        // Reader task: forwards text frames until close or error.
        tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if in_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => {
                            if in_tx.send(text).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
                    },
                    Ok(WsMessage::Close(_)) => {
                        debug!("WebSocket closed by peer");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "WebSocket read error");
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Connection {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
