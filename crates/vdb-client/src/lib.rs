pub mod error;
pub mod http;
pub mod orchestrator;
pub mod service;
pub mod ws;

pub use error::{ClientError, TransportError};
pub use http::{ServiceClient, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SERVER_URL};
pub use orchestrator::{
    ChannelEvent, ChannelEventKind, ChannelId, EventOutcome, RunOrchestrator, RunSnapshot,
};
pub use service::{ChannelFeed, ChannelFrame, RunService, TransportChannel};
