use std::sync::Arc;
use tabrelay_core::InboundFrame;
use tabrelay_transport::TransportEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;
use crate::ui::{UiBridge, UiNotification};

/// Pumps transport events into the dispatcher and the presentation layer.
pub struct Relay {
    dispatcher: Arc<Dispatcher>,
    ui: UiBridge,
}

impl Relay {
    pub fn new(dispatcher: Arc<Dispatcher>, ui: UiBridge) -> Self {
        Self { dispatcher, ui }
    }

    /// Runs until the event stream ends or `cancel` fires.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Relay cancelled");
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => self.on_event(event),
                    None => {
                        debug!("Transport event stream closed");
                        break;
                    }
                },
            }
        }
    }

    pub fn on_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { endpoint } => {
                info!(endpoint = %endpoint, "Controller connected");
                self.ui.notify(UiNotification::WsStatus {
                    connected: true,
                    url: endpoint.url(),
                });
            }
            TransportEvent::Disconnected { endpoint, reason } => {
                debug!(endpoint = %endpoint, reason = %reason, "Controller not connected");
                self.ui.notify(UiNotification::WsStatus {
                    connected: false,
                    url: endpoint.url(),
                });
            }
            TransportEvent::ParseError { raw, error } => {
                warn!(error = %error, len = raw.len(), "Discarding malformed frame");
                self.ui.notify(UiNotification::WsError { error });
            }
            TransportEvent::Frame(frame) => self.on_frame(frame),
        }
    }

    fn on_frame(&self, frame: InboundFrame) {
        self.ui.notify(UiNotification::WsMessage {
            message: frame.to_value(),
        });
        match frame {
            InboundFrame::Plan(_) => debug!("Plan forwarded to panel"),
            InboundFrame::Action(request) => {
                self.dispatcher.dispatch(request);
            }
            InboundFrame::Control(value) => {
                let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or("");
                debug!(kind = %kind, "Control frame");
            }
        }
    }
}
