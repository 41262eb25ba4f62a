use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Connection refused, closed or failed mid-session. Always retried.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed inbound frame. Reported to observers and dropped.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("{0}")]
    TargetNotFound(String),

    #[error("{0}")]
    NotReady(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
