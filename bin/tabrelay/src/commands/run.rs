use serde_json::json;
use std::sync::Arc;
use tabrelay_browser::HeadlessBrowser;
use tabrelay_core::{Config, Paths};
use tabrelay_dispatcher::{Dispatcher, MessageOrigin, Relay, UiBridge, UiNotification, WindowKind};
use tabrelay_transport::{ConnectionManager, FrameSink, WebSocketConnector};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const UI_CHANNEL_CAPACITY: usize = 256;

/// Connect to the controller and relay until ctrl-c.
pub async fn run(host: Option<String>, port: Option<u16>, start_url: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    let mut config = Config::load_or_default(&paths)?;
    if let Some(host) = host {
        config.transport.host = host;
    }
    if let Some(port) = port {
        config.transport.base_port = port;
    }
    config.validate()?;

    let browser = HeadlessBrowser::new(config.browser.clone(), config.executor.clone())?;
    let window = browser.open_window(WindowKind::Normal);
    let tab = browser.open_tab(window, start_url).await?;
    info!(tab_id = tab.id, url = %tab.url, "Initial tab opened");

    let manager = ConnectionManager::new(config.transport.clone(), Arc::new(WebSocketConnector::new()));
    let events = manager.subscribe();
    let sink: Arc<dyn FrameSink> = manager.clone();

    let ui = UiBridge::new(Arc::clone(&sink), UI_CHANNEL_CAPACITY);
    let dispatcher = Dispatcher::new(config.dispatcher.clone(), Arc::new(browser), sink, ui.clone());
    let relay = Relay::new(dispatcher, ui.clone());
    let cancel = CancellationToken::new();

    spawn_notification_log(&ui, cancel.clone());
    spawn_task_prompt(ui.clone(), cancel.clone());

    manager.connect();
    let ports: Vec<String> = config
        .transport
        .candidates()
        .iter()
        .map(|e| e.port.to_string())
        .collect();
    info!(host = %config.transport.host, ports = %ports.join(","), "tabrelay running; type a task and press Enter");

    let relay_cancel = cancel.clone();
    let relay_task = tokio::spawn(async move { relay.run(events, relay_cancel).await });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    cancel.cancel();
    let _ = relay_task.await;
    manager.disconnect().await;
    Ok(())
}

/// Stand-in for the side panel: every notification becomes a log line.
fn spawn_notification_log(ui: &UiBridge, cancel: CancellationToken) {
    let mut notifications = ui.subscribe();
    tokio::spawn(async move {
        loop {
            let notification = tokio::select! {
                _ = cancel.cancelled() => break,
                n = notifications.recv() => n,
            };
            match notification {
                Ok(n) => log_notification(&n),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notification log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn log_notification(notification: &UiNotification) {
    match notification {
        UiNotification::WsStatus { connected: true, url } => info!(url = %url, "Connected to controller"),
        UiNotification::WsStatus { connected: false, url } => debug!(url = %url, "Controller unavailable"),
        UiNotification::WsError { error } => warn!(error = %error, "Controller sent a malformed frame"),
        UiNotification::Pong => info!("pong"),
        UiNotification::Result { action, result } if result.ok => info!(action = %action, "Action succeeded"),
        UiNotification::Result { action, result } => {
            warn!(action = %action, error = ?result.error, "Action failed")
        }
        other => match serde_json::to_string(other) {
            Ok(line) => info!(notification = %line, "panel"),
            Err(e) => warn!(error = %e, "Unprintable notification"),
        },
    }
}

/// Each stdin line is submitted as a task, as if typed into the panel.
fn spawn_task_prompt(ui: UiBridge, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    break;
                }
            };
            let task = line.trim();
            if task.is_empty() {
                continue;
            }
            let request = json!({ "type": "ui_task", "task": task });
            match ui.handle_runtime_message(MessageOrigin::Panel, &request).await {
                Some(resp) if resp.ok => info!(task = %task, "Task submitted"),
                Some(resp) => warn!(error = ?resp.error, "Task not submitted"),
                None => {}
            }
        }
    });
}
