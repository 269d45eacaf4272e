use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::wire::{EditApplied, StreamMessage};
use crate::{RunMode, RunStatus};

const DEFAULT_REMOTE_FAILURE: &str = "remote run reported a failure";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default)]
    pub status: RunStatus,
    #[serde(default)]
    pub iteration: u64,
    #[serde(default)]
    pub iteration_seen: bool,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub series: Vec<f64>,
    #[serde(default)]
    pub narrative: Option<String>,
    #[serde(default)]
    pub passed: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub terminal: bool,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub last_edit: Option<EditApplied>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn starting(mode: RunMode, started_at: DateTime<Utc>) -> Self {
        Self {
            mode,
            status: RunStatus::Starting,
            started_at: Some(started_at),
            ..Self::default()
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn failed(&self, error: impl Into<String>) -> Self {
        if self.terminal {
            return self.clone();
        }
        Self {
            status: RunStatus::Failed,
            error: Some(error.into()),
            terminal: true,
            ..self.clone()
        }
    }

    pub fn detached(&self) -> Self {
        if self.terminal {
            return self.clone();
        }
        Self {
            status: RunStatus::Idle,
            ..self.clone()
        }
    }

    pub fn is_live(&self) -> bool {
        !self.terminal && matches!(self.status, RunStatus::Starting | RunStatus::Running)
    }

    pub fn latest_metric(&self) -> Option<f64> {
        self.series.last().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Advanced,
    Current,
    Stale,
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub record: RunRecord,
    pub outcome: ReconcileOutcome,
    pub changed: bool,
}

/// Fold one stream message into `record`, returning the next record.
///
/// Sparse fields never erase earlier values. `series` only grows: a
/// `seriesSoFar` list contributes the elements beyond the current length,
/// and a bare `metric` is appended only when the message advances the
/// iteration, so redelivering a step cannot double-append it. Once the
/// record is terminal every message is discarded.
pub fn reconcile(record: &RunRecord, message: &StreamMessage) -> Reconciled {
    if record.terminal {
        return Reconciled {
            record: record.clone(),
            outcome: ReconcileOutcome::Discarded,
            changed: false,
        };
    }

    let outcome = match message.iteration {
        Some(iteration) if !record.iteration_seen || iteration > record.iteration => {
            ReconcileOutcome::Advanced
        }
        Some(iteration) if iteration == record.iteration => ReconcileOutcome::Current,
        Some(_) => ReconcileOutcome::Stale,
        None => ReconcileOutcome::Current,
    };

    let mut next = record.clone();
    if let Some(iteration) = message.iteration {
        next.iteration = next.iteration.max(iteration);
        next.iteration_seen = true;
    }

    if let Some(history) = message.series_so_far.as_deref() {
        extend_series(&mut next.series, history);
    } else if outcome == ReconcileOutcome::Advanced {
        if let Some(metric) = message.metric.filter(|value| value.is_finite()) {
            next.series.push(metric);
        }
    }

    if outcome != ReconcileOutcome::Stale {
        if let Some(code) = &message.code {
            next.code = Some(code.clone());
        }
        if let Some(narrative) = message.narrative.as_deref() {
            if !narrative.trim().is_empty() {
                next.narrative = Some(narrative.to_string());
            }
        }
        if let Some(passed) = message.passed {
            next.passed = Some(passed);
        }
        if let Some(phase) = &message.phase {
            next.phase = Some(phase.clone());
        }
        if let Some(action) = &message.action {
            next.action = Some(action.clone());
        }
        if let Some(edit) = &message.edit_applied {
            next.last_edit = Some(edit.clone());
        }
    }

    if matches!(next.status, RunStatus::Idle | RunStatus::Starting) {
        next.status = RunStatus::Running;
    }
    if let Some(error) = message.failure() {
        let error = if error.trim().is_empty() {
            DEFAULT_REMOTE_FAILURE
        } else {
            error
        };
        next.error = Some(error.to_string());
        next.status = RunStatus::Failed;
        next.terminal = true;
    } else if message.terminal {
        next.status = RunStatus::Completed;
        next.terminal = true;
    }

    let changed = next != *record;
    Reconciled {
        record: next,
        outcome,
        changed,
    }
}

pub fn replay(mode: RunMode, run_id: &str, history: &[StreamMessage]) -> RunRecord {
    let seed = RunRecord {
        run_id: Some(run_id.to_string()),
        mode,
        status: RunStatus::Starting,
        ..RunRecord::default()
    };
    history
        .iter()
        .fold(seed, |record, message| reconcile(&record, message).record)
}

fn extend_series(series: &mut Vec<f64>, history: &[f64]) {
    if history.len() > series.len() {
        series.extend(
            history[series.len()..]
                .iter()
                .copied()
                .filter(|value| value.is_finite()),
        );
    }
}
