//! Page contexts. Each tab's document lives on its own thread and is only
//! reachable through messages, the way a content script is.

use tabrelay_core::config::ExecutorConfig;
use tabrelay_core::{ActionResult, Error, ExecutorMessage, Result};
use tabrelay_executor::{HtmlDocument, PageExecutor};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Loaded {
    Ready { title: Option<String> },
    /// A newer navigation started while this one was in flight.
    Superseded,
}

enum PageCommand {
    Unload {
        seq: u64,
    },
    Load {
        seq: u64,
        url: String,
        html: String,
        done: oneshot::Sender<Loaded>,
    },
    Execute {
        message: ExecutorMessage,
        reply: oneshot::Sender<Result<ActionResult>>,
    },
}

#[derive(Clone)]
pub(crate) struct PageHandle {
    tx: mpsc::UnboundedSender<PageCommand>,
}

impl PageHandle {
    /// Start the page thread. It exits once every handle is dropped.
    pub fn spawn(tab_id: i64, config: ExecutorConfig) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name(format!("tab-{}", tab_id))
            .spawn(move || run_page(tab_id, rx, PageExecutor::new(config)))
            .map_err(|e| Error::Browser(format!("failed to start page context: {}", e)))?;
        Ok(Self { tx })
    }

    /// Drop the current document. Messages fail until load `seq` arrives.
    pub fn unload(&self, seq: u64) -> Result<()> {
        self.send(PageCommand::Unload { seq })
    }

    pub async fn load(&self, seq: u64, url: &str, html: String) -> Result<Loaded> {
        let (done, rx) = oneshot::channel();
        self.send(PageCommand::Load {
            seq,
            url: url.to_string(),
            html,
            done,
        })?;
        rx.await.map_err(|_| closed())
    }

    pub async fn execute(&self, message: &ExecutorMessage) -> Result<ActionResult> {
        let (reply, rx) = oneshot::channel();
        self.send(PageCommand::Execute {
            message: message.clone(),
            reply,
        })?;
        rx.await.map_err(|_| closed())?
    }

    fn send(&self, command: PageCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| closed())
    }
}

fn closed() -> Error {
    Error::Browser("page context closed".to_string())
}

fn run_page(tab_id: i64, mut rx: mpsc::UnboundedReceiver<PageCommand>, executor: PageExecutor) {
    let mut expected_seq = 0u64;
    let mut document: Option<HtmlDocument> = None;

    while let Some(command) = rx.blocking_recv() {
        match command {
            PageCommand::Unload { seq } => {
                expected_seq = seq;
                document = None;
            }
            PageCommand::Load {
                seq,
                url,
                html,
                done,
            } => {
                if seq != expected_seq {
                    let _ = done.send(Loaded::Superseded);
                    continue;
                }
                let doc = HtmlDocument::parse(&html);
                let title = doc.title();
                document = Some(doc);
                debug!(tab_id, url = %url, "Page loaded");
                let _ = done.send(Loaded::Ready { title });
            }
            PageCommand::Execute { message, reply } => {
                let result = match document.as_mut() {
                    Some(doc) => Ok(executor.handle(doc, &message)),
                    None => Err(Error::NotReady(
                        "could not establish connection: receiving end does not exist".to_string(),
                    )),
                };
                let _ = reply.send(result);
            }
        }
    }
    debug!(tab_id, "Page context closed");
}
