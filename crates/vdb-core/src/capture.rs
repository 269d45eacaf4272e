use serde::{Deserialize, Serialize};

use crate::waveform::{SignalTimeline, SignalValue, StepPath, ValueBox, ValueChange};
use crate::wire::{CaptureResponse, CaptureSignal};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalTrace {
    pub name: String,
    pub width: u32,
    pub timeline: SignalTimeline,
}

impl SignalTrace {
    pub fn new(name: impl Into<String>, width: u32, events: Vec<ValueChange>) -> Self {
        Self {
            name: name.into(),
            width: width.max(1),
            timeline: SignalTimeline::new(events),
        }
    }

    pub fn is_single_bit(&self) -> bool {
        self.width == 1
    }

    pub fn path(&self, max_time: u64) -> StepPath {
        self.timeline.single_bit_path(max_time)
    }

    pub fn boxes(&self, max_time: u64) -> Vec<ValueBox> {
        self.timeline.multi_bit_boxes(max_time)
    }
}

impl From<CaptureSignal> for SignalTrace {
    fn from(signal: CaptureSignal) -> Self {
        SignalTrace::new(signal.name, signal.width, signal.values)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorValue {
    pub name: String,
    pub width: u32,
    pub value: SignalValue,
    pub display: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureState {
    signals: Vec<SignalTrace>,
    cursor: u64,
    max_time: u64,
    passed: Option<bool>,
    capture_path: Option<String>,
    error: Option<String>,
}

impl CaptureState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn populate(&mut self, response: CaptureResponse) {
        let signals: Vec<SignalTrace> = if response.success {
            response.signals.into_iter().map(SignalTrace::from).collect()
        } else {
            Vec::new()
        };
        let max_time = window_end(&signals, 0);
        *self = Self {
            signals,
            cursor: 0,
            max_time,
            passed: response.passed,
            capture_path: response.capture_path,
            error: if response.success {
                None
            } else {
                Some(
                    response
                        .error
                        .unwrap_or_else(|| "capture failed".to_string()),
                )
            },
        };
    }

    pub fn load(&mut self, signals: Vec<SignalTrace>, end_time: u64) {
        *self = Self {
            max_time: window_end(&signals, end_time),
            signals,
            ..Self::default()
        };
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn signals(&self) -> &[SignalTrace] {
        &self.signals
    }

    pub fn signal(&self, name: &str) -> Option<&SignalTrace> {
        self.signals.iter().find(|signal| signal.name == name)
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn max_time(&self) -> u64 {
        self.max_time
    }

    pub fn passed(&self) -> Option<bool> {
        self.passed
    }

    pub fn capture_path(&self) -> Option<&str> {
        self.capture_path.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_cursor(&mut self, time: u64) -> u64 {
        self.cursor = time.min(self.max_time);
        self.cursor
    }

    pub fn values_at_cursor(&self) -> Vec<CursorValue> {
        self.signals
            .iter()
            .map(|signal| {
                let value = signal.timeline.value_at_clamped(self.cursor, self.max_time);
                CursorValue {
                    name: signal.name.clone(),
                    width: signal.width,
                    display: value.display(signal.width),
                    value,
                }
            })
            .collect()
    }

    pub fn next_transition(&mut self) -> Option<u64> {
        let target = self
            .signals
            .iter()
            .filter_map(|signal| signal.timeline.next_change_after(self.cursor))
            .filter(|time| *time <= self.max_time)
            .min()?;
        self.cursor = target;
        Some(target)
    }

    pub fn previous_transition(&mut self) -> Option<u64> {
        let target = self
            .signals
            .iter()
            .filter_map(|signal| signal.timeline.previous_change_before(self.cursor))
            .max()?;
        self.cursor = target;
        Some(target)
    }
}

/// `end_time` when it lies past every change; otherwise the last change plus
/// a tenth of its time (at least 1), so the final value has a visible span.
fn window_end(signals: &[SignalTrace], end_time: u64) -> u64 {
    let Some(last_event) = signals
        .iter()
        .filter_map(|signal| signal.timeline.last_time())
        .max()
    else {
        return end_time;
    };
    if end_time > last_event {
        end_time
    } else {
        last_event + (last_event / 10).max(1)
    }
}
