use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tabrelay_core::config::TransportConfig;
use tabrelay_core::{Endpoint, Error, InboundFrame};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connector::{Connection, Connector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug)]
struct ConnectionStatus {
    state: ConnectionState,
    /// Endpoint of the current or most recent attempt.
    endpoint: Option<Endpoint>,
}

/// Events delivered to observers registered through `subscribe`.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected { endpoint: Endpoint },
    Disconnected { endpoint: Endpoint, reason: String },
    Frame(InboundFrame),
    ParseError { raw: String, error: String },
}

/// Outbound half of the transport as seen by other components.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Best-effort send. Returns false when the frame was dropped.
    async fn send_frame(&self, frame: &Value) -> bool;

    fn is_open(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    /// Index into the candidate list.
    Probing(usize),
    Reconnecting,
}

/// Owns the single outbound connection to the controller.
pub struct ConnectionManager {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    status: StdMutex<ConnectionStatus>,
    outgoing: Mutex<Option<mpsc::Sender<String>>>,
    observers: StdMutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
    cancel: StdMutex<Option<CancellationToken>>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ConnectionManager {
    pub fn new(config: TransportConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        Arc::new(Self {
            config,
            connector,
            status: StdMutex::new(ConnectionStatus {
                state: ConnectionState::Closed,
                endpoint: None,
            }),
            outgoing: Mutex::new(None),
            observers: StdMutex::new(Vec::new()),
            cancel: StdMutex::new(None),
            task: StdMutex::new(None),
        })
    }

    /// Register an observer. Events emitted before registration are not replayed.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.observers).push(tx);
        rx
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.status).state
    }

    /// Endpoint of the open connection, if any.
    pub fn bound_endpoint(&self) -> Option<Endpoint> {
        let status = lock(&self.status);
        match status.state {
            ConnectionState::Open => status.endpoint.clone(),
            _ => None,
        }
    }

    /// Start the connection loop. Calling it while the loop runs is a no-op.
    pub fn connect(self: &Arc<Self>) {
        let mut cancel_slot = lock(&self.cancel);
        if cancel_slot.as_ref().map(|c| !c.is_cancelled()).unwrap_or(false) {
            debug!("Connection loop already running");
            return;
        }
        let token = CancellationToken::new();
        *cancel_slot = Some(token.clone());
        drop(cancel_slot);

        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move { manager.run(token).await });
        *lock(&self.task) = Some(handle);
    }

    /// Stop the loop and close the socket.
    pub async fn disconnect(&self) {
        if let Some(token) = lock(&self.cancel).take() {
            token.cancel();
        }
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        *self.outgoing.lock().await = None;
        self.set_state(ConnectionState::Closed);
    }

    /// Serialize and send. Dropped when the socket is not open.
    pub async fn send<T: Serialize>(&self, message: &T) -> bool {
        match serde_json::to_value(message) {
            Ok(value) => self.send_frame(&value).await,
            Err(e) => {
                warn!(error = %e, "Failed to serialize outbound frame");
                false
            }
        }
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let candidates = self.config.candidates();
        let mut phase = Phase::Probing(0);
        let mut bound: Option<Endpoint> = None;

        loop {
            let endpoint = match phase {
                Phase::Probing(index) => candidates[index].clone(),
                Phase::Reconnecting => bound
                    .clone()
                    .unwrap_or_else(|| self.config.base_endpoint()),
            };
            self.set_status(ConnectionState::Connecting, Some(endpoint.clone()));
            debug!(endpoint = %endpoint, "Connecting to controller");

            let attempt = tokio::select! {
                _ = cancel.cancelled() => break,
                r = tokio::time::timeout(self.config.connect_timeout(), self.connector.connect(&endpoint)) => r,
            };
            let result = attempt.unwrap_or_else(|_| {
                Err(Error::Timeout(format!("connect to {} timed out", endpoint)))
            });

            match result {
                Ok(conn) => {
                    bound = Some(endpoint.clone());
                    let reason = self.serve(conn, &endpoint, &cancel).await;
                    self.set_status(ConnectionState::Closed, Some(endpoint.clone()));
                    self.emit(TransportEvent::Disconnected {
                        endpoint: endpoint.clone(),
                        reason,
                    });
                    if cancel.is_cancelled() {
                        break;
                    }
                    warn!(
                        endpoint = %endpoint,
                        retry_ms = self.config.reconnect_interval_ms,
                        "Disconnected from controller; retrying"
                    );
                    phase = Phase::Reconnecting;
                }
                Err(e) => {
                    self.set_status(ConnectionState::Closed, Some(endpoint.clone()));
                    self.emit(TransportEvent::Disconnected {
                        endpoint: endpoint.clone(),
                        reason: e.to_string(),
                    });
                    if let Phase::Probing(index) = phase {
                        if index + 1 < candidates.len() {
                            info!(
                                failed_port = endpoint.port,
                                next_port = candidates[index + 1].port,
                                "Controller not reachable; trying next port"
                            );
                            phase = Phase::Probing(index + 1);
                            if !Self::pause(self.config.port_probe_delay(), &cancel).await {
                                break;
                            }
                            continue;
                        }
                        warn!(
                            attempts = candidates.len(),
                            "Port probe exhausted; falling back to timed reconnect"
                        );
                        phase = Phase::Reconnecting;
                    } else {
                        debug!(endpoint = %endpoint, error = %e, "Reconnect attempt failed");
                    }
                }
            }

            if !Self::pause(self.config.reconnect_interval(), &cancel).await {
                break;
            }
        }

        self.set_state(ConnectionState::Closed);
        debug!("Connection loop stopped");
    }

    /// Pump inbound frames until the link closes. Returns the close reason.
    async fn serve(&self, conn: Connection, endpoint: &Endpoint, cancel: &CancellationToken) -> String {
        let Connection {
            outgoing,
            mut incoming,
        } = conn;
        *self.outgoing.lock().await = Some(outgoing);
        self.set_status(ConnectionState::Open, Some(endpoint.clone()));
        info!(url = %endpoint.url(), "Connected to controller");
        self.emit(TransportEvent::Connected {
            endpoint: endpoint.clone(),
        });

        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => break "disconnect requested".to_string(),
                frame = incoming.recv() => match frame {
                    Some(text) => self.handle_text(text),
                    None => break "connection closed".to_string(),
                },
            }
        };

        *self.outgoing.lock().await = None;
        reason
    }

    fn handle_text(&self, text: String) {
        match InboundFrame::parse(&text) {
            Ok(frame) => self.emit(TransportEvent::Frame(frame)),
            Err(e) => {
                warn!(error = %e, "Invalid inbound frame");
                self.emit(TransportEvent::ParseError {
                    raw: text,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn emit(&self, event: TransportEvent) {
        lock(&self.observers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_status(&self, state: ConnectionState, endpoint: Option<Endpoint>) {
        let mut status = lock(&self.status);
        status.state = state;
        if endpoint.is_some() {
            status.endpoint = endpoint;
        }
    }

    fn set_state(&self, state: ConnectionState) {
        lock(&self.status).state = state;
    }
}

#[async_trait]
impl FrameSink for ConnectionManager {
    async fn send_frame(&self, frame: &Value) -> bool {
        if !self.is_open() {
            debug!("Dropping outbound frame; controller not connected");
            return false;
        }
        let Some(tx) = self.outgoing.lock().await.clone() else {
            return false;
        };
        // At-most-once: a peer that stops reading loses frames, it never stalls us.
        match tx.try_send(frame.to_string()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound buffer full; dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }
}
