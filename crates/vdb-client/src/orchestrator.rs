use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vdb_core::{
    reconcile, CreateRunRequest, DerivedMetrics, ReconcileOutcome, RunRecord, RunStatus,
    StreamMessage,
};

use crate::error::TransportError;
use crate::service::{ChannelFrame, RunService, TransportChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEventKind {
    Message(String),
    Error(String),
    Closed,
    Stalled(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub channel: ChannelId,
    pub kind: ChannelEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Ignored,
    Applied(ReconcileOutcome),
    Finished(RunStatus),
    TransportFailed,
}

impl EventOutcome {
    pub fn is_final(&self) -> bool {
        matches!(self, EventOutcome::Finished(_) | EventOutcome::TransportFailed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub record: RunRecord,
    pub metrics: DerivedMetrics,
}

impl RunSnapshot {
    pub fn of(record: &RunRecord) -> Self {
        Self {
            record: record.clone(),
            metrics: DerivedMetrics::from_record(record),
        }
    }
}

#[derive(Debug)]
struct ActiveChannel {
    id: ChannelId,
    channel: TransportChannel,
}

pub struct RunOrchestrator<S> {
    service: S,
    record: RunRecord,
    active: Option<ActiveChannel>,
    next_channel: u64,
    stall_timeout: Option<Duration>,
    subscribers: Vec<mpsc::UnboundedSender<RunSnapshot>>,
    error_subscribers: Vec<mpsc::UnboundedSender<TransportError>>,
}

impl<S: RunService> RunOrchestrator<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            record: RunRecord::default(),
            active: None,
            next_channel: 0,
            stall_timeout: None,
            subscribers: Vec::new(),
            error_subscribers: Vec::new(),
        }
    }

    pub fn with_stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stall_timeout = timeout.filter(|limit| !limit.is_zero());
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot::of(&self.record)
    }

    pub fn active_channel(&self) -> Option<ChannelId> {
        self.active.as_ref().map(|active| active.id)
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<RunSnapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(self.snapshot());
        self.subscribers.push(tx);
        rx
    }

    pub fn subscribe_errors(&mut self) -> mpsc::UnboundedReceiver<TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.error_subscribers.push(tx);
        rx
    }

    /// Create a run and attach to its stream. Any live channel is closed
    /// first; its buffered frames are lost. Failures end up in the record
    /// (`status = failed`, `error` set) and `None` is returned.
    pub async fn start(&mut self, request: CreateRunRequest) -> Option<ChannelId> {
        if let Some(previous) = self.retire_channel() {
            info!(channel = %previous, "run_superseded");
        }
        let mode = request.mode;
        self.set_record(RunRecord::starting(mode, Utc::now()));

        if let Err(err) = request.validate() {
            warn!("run_rejected: {err}");
            self.set_record(self.record.failed(err.to_string()));
            return None;
        }

        let created = match self.service.create_run(&request).await {
            Ok(created) => created,
            Err(err) => {
                warn!(mode = %mode, "run_create_error: {err}");
                self.set_record(self.record.failed(err.to_string()));
                return None;
            }
        };
        let run_id = created.run_id;
        self.set_record(self.record.clone().with_run_id(run_id.clone()));

        match self.service.open_stream(mode, &run_id).await {
            Ok(channel) => {
                self.next_channel += 1;
                let id = ChannelId(self.next_channel);
                self.active = Some(ActiveChannel { id, channel });
                info!(run_id = %run_id, channel = %id, mode = %mode, "run_started");
                Some(id)
            }
            Err(err) => {
                warn!(run_id = %run_id, "channel_open_error: {err}");
                let message = err.to_string();
                self.set_record(self.record.failed(message.clone()));
                self.publish_error(TransportError::Open(message));
                None
            }
        }
    }

    pub fn stop(&mut self) {
        if let Some(id) = self.retire_channel() {
            info!(channel = %id, "run_detached");
        }
        let detached = self.record.detached();
        self.set_record(detached);
    }

    pub fn reset(&mut self) {
        self.retire_channel();
        self.set_record(RunRecord::default());
    }

    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        let stall_timeout = self.stall_timeout;
        let active = self.active.as_mut()?;
        let channel = active.id;
        let frame = match stall_timeout {
            Some(limit) => match tokio::time::timeout(limit, active.channel.recv()).await {
                Ok(frame) => frame,
                Err(_) => {
                    return Some(ChannelEvent {
                        channel,
                        kind: ChannelEventKind::Stalled(limit),
                    })
                }
            },
            None => active.channel.recv().await,
        };
        let kind = match frame {
            ChannelFrame::Text(text) => ChannelEventKind::Message(text),
            ChannelFrame::Error(err) => ChannelEventKind::Error(err),
            ChannelFrame::Closed => ChannelEventKind::Closed,
        };
        Some(ChannelEvent { channel, kind })
    }

    pub fn handle_event(&mut self, event: ChannelEvent) -> EventOutcome {
        if self.active_channel() != Some(event.channel) {
            debug!(channel = %event.channel, "stale_channel_event");
            return EventOutcome::Ignored;
        }
        match event.kind {
            ChannelEventKind::Message(text) => match StreamMessage::decode(&text) {
                Ok(message) => self.apply(&message),
                Err(err) => {
                    warn!("stream_decode_error: {err}");
                    self.fail_transport(TransportError::Malformed(err.to_string()))
                }
            },
            ChannelEventKind::Error(err) => self.fail_transport(TransportError::Dropped(err)),
            ChannelEventKind::Closed => self.fail_transport(TransportError::ClosedEarly),
            ChannelEventKind::Stalled(limit) => self.fail_transport(TransportError::Stalled(limit)),
        }
    }

    pub async fn pump(&mut self) -> Option<EventOutcome> {
        let event = self.next_event().await?;
        Some(self.handle_event(event))
    }

    pub async fn run_to_completion(&mut self) -> EventOutcome {
        loop {
            match self.pump().await {
                Some(outcome) if outcome.is_final() => return outcome,
                Some(_) => {}
                None => return EventOutcome::Ignored,
            }
        }
    }

    fn apply(&mut self, message: &StreamMessage) -> EventOutcome {
        let reconciled = reconcile(&self.record, message);
        debug!(
            iteration = self.record.iteration,
            outcome = ?reconciled.outcome,
            "stream_message_applied"
        );
        if reconciled.changed {
            self.set_record(reconciled.record);
        }
        if self.record.terminal {
            let status = self.record.status;
            self.retire_channel();
            info!(
                run_id = self.record.run_id.as_deref().unwrap_or_default(),
                status = %status,
                iterations = self.record.iteration,
                "run_finished"
            );
            return EventOutcome::Finished(status);
        }
        EventOutcome::Applied(reconciled.outcome)
    }

    fn fail_transport(&mut self, error: TransportError) -> EventOutcome {
        if let Some(id) = self.retire_channel() {
            warn!(channel = %id, "channel_failed: {error}");
        }
        self.publish_error(error);
        EventOutcome::TransportFailed
    }

    fn retire_channel(&mut self) -> Option<ChannelId> {
        let mut active = self.active.take()?;
        active.channel.close();
        Some(active.id)
    }

    fn set_record(&mut self, record: RunRecord) {
        if record == self.record {
            return;
        }
        self.record = record;
        let snapshot = self.snapshot();
        self.subscribers
            .retain(|subscriber| subscriber.send(snapshot.clone()).is_ok());
    }

    fn publish_error(&mut self, error: TransportError) {
        self.error_subscribers
            .retain(|subscriber| subscriber.send(error.clone()).is_ok());
    }
}
