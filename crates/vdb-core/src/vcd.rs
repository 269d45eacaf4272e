use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::capture::SignalTrace;
use crate::waveform::{SignalTimeline, ValueChange};

pub const DEFAULT_TIMESCALE: &str = "1ns";
pub const DEFAULT_TRACE_WINDOW: u64 = 100;
pub const TRACE_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VcdError {
    #[error("`{0}` section is missing its $end")]
    Unterminated(String),
    #[error("invalid $var declaration: {0}")]
    InvalidVar(String),
    #[error("invalid time marker: {0}")]
    InvalidTime(String),
    #[error("value change `{0}` has no identifier")]
    MissingIdentifier(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcdSignal {
    pub id: String,
    pub name: String,
    pub scope: String,
    pub width: u32,
    pub kind: String,
    pub changes: Vec<ValueChange>,
}

impl VcdSignal {
    pub fn path(&self) -> String {
        if self.scope.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.scope, self.name)
        }
    }

    pub fn timeline(&self) -> SignalTimeline {
        SignalTimeline::new(self.changes.iter().cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcdWaveform {
    pub timescale: String,
    pub end_time: u64,
    pub signals: Vec<VcdSignal>,
}

impl Default for VcdWaveform {
    fn default() -> Self {
        Self {
            timescale: DEFAULT_TIMESCALE.to_string(),
            end_time: 0,
            signals: Vec::new(),
        }
    }
}

impl VcdWaveform {
    pub fn find(&self, name: &str) -> Option<&VcdSignal> {
        self.signals.iter().find(|signal| {
            signal.name == name || signal.path() == name || signal.path().ends_with(&format!(".{name}"))
        })
    }

    pub fn into_signals(self) -> Vec<SignalTrace> {
        self.signals
            .into_iter()
            .map(|signal| {
                let name = signal.path();
                SignalTrace::new(name, signal.width, signal.changes)
            })
            .collect()
    }
}

pub fn parse_vcd(text: &str) -> Result<VcdWaveform, VcdError> {
    let mut waveform = VcdWaveform::default();
    // several $var lines may share one identifier
    let mut by_id: HashMap<String, Vec<usize>> = HashMap::new();
    let mut scopes: Vec<String> = Vec::new();
    let mut now: u64 = 0;
    let mut tokens = text.split_whitespace();

    while let Some(token) = tokens.next() {
        match token {
            "$timescale" => {
                let body = section_body(&mut tokens, token)?;
                if !body.is_empty() {
                    waveform.timescale = body.concat();
                }
            }
            "$scope" => {
                let body = section_body(&mut tokens, token)?;
                if let Some(name) = body.get(1) {
                    scopes.push((*name).to_string());
                }
            }
            "$upscope" => {
                section_body(&mut tokens, token)?;
                scopes.pop();
            }
            "$var" => {
                let body = section_body(&mut tokens, token)?;
                let [kind, width, id, name, ..] = body.as_slice() else {
                    return Err(VcdError::InvalidVar(body.join(" ")));
                };
                let width: u32 = width
                    .parse()
                    .ok()
                    .filter(|width| *width > 0)
                    .ok_or_else(|| VcdError::InvalidVar(body.join(" ")))?;
                by_id
                    .entry((*id).to_string())
                    .or_default()
                    .push(waveform.signals.len());
                waveform.signals.push(VcdSignal {
                    id: (*id).to_string(),
                    name: (*name).to_string(),
                    scope: scopes.join("."),
                    width,
                    kind: (*kind).to_string(),
                    changes: Vec::new(),
                });
            }
            "$dumpvars" | "$dumpall" | "$dumpon" | "$dumpoff" | "$end" => {}
            keyword if keyword.starts_with('$') => {
                section_body(&mut tokens, keyword)?;
            }
            marker if marker.starts_with('#') => {
                now = marker[1..]
                    .parse()
                    .map_err(|_| VcdError::InvalidTime(marker.to_string()))?;
                waveform.end_time = waveform.end_time.max(now);
            }
            vector if vector.starts_with(['b', 'B', 'r', 'R']) => {
                let id = tokens
                    .next()
                    .ok_or_else(|| VcdError::MissingIdentifier(vector.to_string()))?;
                record_change(&mut waveform, &by_id, id, now, &vector[1..]);
            }
            scalar if scalar.starts_with(['0', '1', 'x', 'X', 'z', 'Z']) => {
                let (value, id) = scalar.split_at(1);
                if id.is_empty() {
                    return Err(VcdError::MissingIdentifier(scalar.to_string()));
                }
                record_change(&mut waveform, &by_id, id, now, value);
            }
            _ => {}
        }
    }

    Ok(waveform)
}

fn section_body<'a>(
    tokens: &mut impl Iterator<Item = &'a str>,
    keyword: &str,
) -> Result<Vec<&'a str>, VcdError> {
    let mut body = Vec::new();
    for token in tokens.by_ref() {
        if token == "$end" {
            return Ok(body);
        }
        body.push(token);
    }
    Err(VcdError::Unterminated(keyword.to_string()))
}

fn record_change(
    waveform: &mut VcdWaveform,
    by_id: &HashMap<String, Vec<usize>>,
    id: &str,
    time: u64,
    value: &str,
) {
    let Some(indices) = by_id.get(id) else {
        return;
    };
    for idx in indices {
        waveform.signals[*idx]
            .changes
            .push(ValueChange::new(time, value.to_lowercase()));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub signal: String,
    pub time: u64,
    pub value: String,
    pub delta: u64,
}

pub fn trace_failure(waveform: &VcdWaveform, failure_time: u64, window: u64) -> Vec<TraceEntry> {
    let start = failure_time.saturating_sub(window);
    let mut entries: Vec<TraceEntry> = waveform
        .signals
        .iter()
        .flat_map(|signal| {
            let path = signal.path();
            signal
                .changes
                .iter()
                .filter(|change| change.time >= start && change.time <= failure_time)
                .map(move |change| TraceEntry {
                    signal: path.clone(),
                    time: change.time,
                    value: change.value.clone(),
                    delta: failure_time - change.time,
                })
        })
        .collect();
    entries.sort_by_key(|entry| entry.delta);
    entries.truncate(TRACE_LIMIT);
    entries
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalSummary {
    pub id: String,
    pub name: String,
    pub path: String,
    pub width: u32,
    pub changes: usize,
    pub transitions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveformSummary {
    pub timescale: String,
    pub end_time: u64,
    pub signal_count: usize,
    pub signals: Vec<SignalSummary>,
}

pub fn summary(waveform: &VcdWaveform) -> WaveformSummary {
    WaveformSummary {
        timescale: waveform.timescale.clone(),
        end_time: waveform.end_time,
        signal_count: waveform.signals.len(),
        signals: waveform
            .signals
            .iter()
            .map(|signal| SignalSummary {
                id: signal.id.clone(),
                name: signal.name.clone(),
                path: signal.path(),
                width: signal.width,
                changes: signal.changes.len(),
                transitions: signal.timeline().transition_count(),
            })
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalToggle {
    pub path: String,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToggleCoverage {
    pub signals: Vec<SignalToggle>,
    pub overall_percent: f64,
    pub untoggled: Vec<String>,
}

pub fn toggle_coverage(waveform: &VcdWaveform) -> ToggleCoverage {
    let mut signals = Vec::with_capacity(waveform.signals.len());
    let mut untoggled = Vec::new();
    for signal in &waveform.signals {
        let path = signal.path();
        let toggled = signal.timeline().transition_count() > 0;
        if !toggled {
            untoggled.push(path.clone());
        }
        signals.push(SignalToggle {
            path,
            percent: if toggled { 100.0 } else { 0.0 },
        });
    }
    let overall_percent = if signals.is_empty() {
        0.0
    } else {
        (signals.len() - untoggled.len()) as f64 / signals.len() as f64 * 100.0
    };
    ToggleCoverage {
        signals,
        overall_percent,
        untoggled,
    }
}
