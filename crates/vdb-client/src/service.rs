use std::future::Future;
use tokio::sync::{mpsc, oneshot};
use vdb_core::{CreateRunRequest, CreateRunResponse, RunMode};

use crate::error::ClientError;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelFrame {
    Text(String),
    Error(String),
    Closed,
}

#[derive(Debug)]
pub struct TransportChannel {
    frames: mpsc::Receiver<ChannelFrame>,
    shutdown: Option<oneshot::Sender<()>>,
}

#[derive(Debug)]
pub struct ChannelFeed {
    pub frames: mpsc::Sender<ChannelFrame>,
    pub shutdown: oneshot::Receiver<()>,
}

impl TransportChannel {
    pub fn pair(capacity: usize) -> (ChannelFeed, TransportChannel) {
        let (frames_tx, frames_rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        (
            ChannelFeed {
                frames: frames_tx,
                shutdown: shutdown_rx,
            },
            TransportChannel {
                frames: frames_rx,
                shutdown: Some(shutdown_tx),
            },
        )
    }

    pub async fn recv(&mut self) -> ChannelFrame {
        if self.is_closed() {
            return ChannelFrame::Closed;
        }
        self.frames.recv().await.unwrap_or(ChannelFrame::Closed)
    }

    /// Idempotent.
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
            self.frames.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_none()
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.close();
    }
}

pub trait RunService {
    fn create_run(
        &self,
        request: &CreateRunRequest,
    ) -> impl Future<Output = Result<CreateRunResponse, ClientError>> + Send;

    fn open_stream(
        &self,
        mode: RunMode,
        run_id: &str,
    ) -> impl Future<Output = Result<TransportChannel, ClientError>> + Send;
}
