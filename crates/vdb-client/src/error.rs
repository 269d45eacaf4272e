use std::time::Duration;
use thiserror::Error;
use vdb_core::WireError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{detail}")]
    Rejected { status: u16, detail: String },
    #[error("invalid service url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported url scheme: {0}")]
    Scheme(String),
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocket(err.to_string())
    }
}

/// Failures of the stream channel itself, reported on the orchestrator's
/// error signal and never folded into the run record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection lost: {0}")]
    Dropped(String),
    #[error("malformed stream message: {0}")]
    Malformed(String),
    #[error("stream closed before the run finished")]
    ClosedEarly,
    #[error("no stream message for {}s", .0.as_secs())]
    Stalled(Duration),
    #[error("could not open stream: {0}")]
    Open(String),
}
