use serde::{Deserialize, Serialize};
use std::borrow::Cow;

pub const UNKNOWN_MARKER: &str = "X";
pub const HIGH_Z_MARKER: &str = "Z";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueChange {
    #[serde(alias = "time_ns")]
    pub time: u64,
    #[serde(deserialize_with = "crate::wire::deserialize_token")]
    pub value: String,
}

impl ValueChange {
    pub fn new(time: u64, value: impl Into<String>) -> Self {
        Self {
            time,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "token", rename_all = "snake_case")]
pub enum SignalValue {
    Known(String),
    Unknown,
}

impl SignalValue {
    pub fn is_unknown(&self) -> bool {
        matches!(self, SignalValue::Unknown)
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            SignalValue::Known(token) => Some(token.as_str()),
            SignalValue::Unknown => None,
        }
    }

    pub fn level(&self) -> Level {
        match self {
            SignalValue::Known(token) => Level::from_token(token),
            SignalValue::Unknown => Level::Unknown,
        }
    }

    pub fn display(&self, width: u32) -> String {
        match self {
            SignalValue::Known(token) if width <= 1 => match Level::from_token(token) {
                Level::High => "1".to_string(),
                Level::Low => "0".to_string(),
                Level::Unknown => UNKNOWN_MARKER.to_string(),
            },
            SignalValue::Known(token) => decode_hex_display(token, width),
            SignalValue::Unknown => UNKNOWN_MARKER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    High,
    Low,
    Unknown,
}

impl Level {
    pub fn from_token(token: &str) -> Self {
        match strip_bits_prefix(token.trim()) {
            "1" => Level::High,
            "0" => Level::Low,
            _ => Level::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSegment {
    pub start: u64,
    pub end: u64,
    pub level: Level,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepPath {
    pub segments: Vec<LevelSegment>,
}

impl StepPath {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn vertices(&self) -> Vec<(u64, Level)> {
        let mut points = Vec::with_capacity(self.segments.len() * 2);
        for segment in &self.segments {
            points.push((segment.start, segment.level));
            points.push((segment.end, segment.level));
        }
        points
    }

    pub fn transitions(&self) -> Vec<u64> {
        self.segments.iter().skip(1).map(|segment| segment.start).collect()
    }

    fn push(&mut self, start: u64, end: u64, level: Level) {
        if end <= start {
            return;
        }
        if let Some(last) = self.segments.last_mut() {
            if last.level == level && last.end == start {
                last.end = end;
                return;
            }
        }
        self.segments.push(LevelSegment { start, end, level });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueBox {
    pub start: u64,
    pub end: u64,
    pub value: String,
}

impl ValueBox {
    pub fn duration(&self) -> u64 {
        self.end - self.start
    }

    pub fn label(&self, width: u32) -> String {
        decode_hex_display(&self.value, width)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalTimeline {
    events: Vec<ValueChange>,
}

impl SignalTimeline {
    pub fn new(events: impl IntoIterator<Item = ValueChange>) -> Self {
        let mut events: Vec<ValueChange> = events.into_iter().collect();
        // stable: equal times keep input order, so the later event wins lookups
        events.sort_by_key(|event| event.time);
        Self { events }
    }

    pub fn events(&self) -> &[ValueChange] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn first_time(&self) -> Option<u64> {
        self.events.first().map(|event| event.time)
    }

    pub fn last_time(&self) -> Option<u64> {
        self.events.last().map(|event| event.time)
    }

    pub fn value_at(&self, t: u64) -> SignalValue {
        lookup_sorted(&self.events, t)
    }

    pub fn value_at_clamped(&self, t: u64, max_time: u64) -> SignalValue {
        self.value_at(t.min(max_time))
    }

    pub fn next_change_after(&self, t: u64) -> Option<u64> {
        let idx = self.events.partition_point(|event| event.time <= t);
        self.events.get(idx).map(|event| event.time)
    }

    pub fn previous_change_before(&self, t: u64) -> Option<u64> {
        let idx = self.events.partition_point(|event| event.time < t);
        idx.checked_sub(1).map(|i| self.events[i].time)
    }

    pub fn transition_count(&self) -> usize {
        let mut count = 0;
        let mut held: Option<&str> = None;
        for (idx, event) in self.events.iter().enumerate() {
            let superseded = self
                .events
                .get(idx + 1)
                .map(|next| next.time == event.time)
                .unwrap_or(false);
            if superseded {
                continue;
            }
            if let Some(prev) = held {
                if prev != event.value {
                    count += 1;
                }
            }
            held = Some(event.value.as_str());
        }
        count
    }

    pub fn single_bit_path(&self, max_time: u64) -> StepPath {
        let mut path = StepPath::default();
        let Some(first) = self.first_time() else {
            return path;
        };
        path.push(0, first.min(max_time), Level::Unknown);
        for (idx, event) in self.events.iter().enumerate() {
            let end = self.hold_end(idx, max_time);
            path.push(event.time, end, Level::from_token(&event.value));
        }
        path
    }

    pub fn multi_bit_boxes(&self, max_time: u64) -> Vec<ValueBox> {
        let mut boxes = Vec::with_capacity(self.events.len());
        for (idx, event) in self.events.iter().enumerate() {
            let end = self.hold_end(idx, max_time);
            if end <= event.time {
                continue;
            }
            boxes.push(ValueBox {
                start: event.time,
                end,
                value: event.value.clone(),
            });
        }
        boxes
    }

    fn hold_end(&self, idx: usize, max_time: u64) -> u64 {
        self.events
            .get(idx + 1)
            .map(|next| next.time)
            .unwrap_or(max_time)
            .min(max_time)
    }
}

impl FromIterator<ValueChange> for SignalTimeline {
    fn from_iter<I: IntoIterator<Item = ValueChange>>(iter: I) -> Self {
        Self::new(iter)
    }
}

pub fn decode_single_bit(events: &[ValueChange], max_time: u64) -> StepPath {
    SignalTimeline::new(events.iter().cloned()).single_bit_path(max_time)
}

pub fn decode_multi_bit(events: &[ValueChange], max_time: u64) -> Vec<ValueBox> {
    SignalTimeline::new(events.iter().cloned()).multi_bit_boxes(max_time)
}

/// One-off lookup over raw events. Checking the order costs `O(n)` per call
/// and unsorted input is also copied and sorted, so only a
/// [`SignalTimeline`] lookup is `O(log n)`. Build one for repeated queries.
pub fn value_at(events: &[ValueChange], t: u64) -> SignalValue {
    let sorted = events.windows(2).all(|pair| pair[0].time <= pair[1].time);
    let events: Cow<'_, [ValueChange]> = if sorted {
        Cow::Borrowed(events)
    } else {
        let mut owned = events.to_vec();
        owned.sort_by_key(|event| event.time);
        Cow::Owned(owned)
    };
    lookup_sorted(&events, t)
}

/// Render a bus token as zero-padded upper-case hex (`ceil(width / 4)`
/// digits). Tokens with unknown bits render as [`UNKNOWN_MARKER`], fully
/// floating tokens as [`HIGH_Z_MARKER`]; nothing is parsed numerically.
pub fn decode_hex_display(token: &str, width: u32) -> String {
    let bits: String = strip_bits_prefix(token.trim())
        .chars()
        .filter(|ch| *ch != '_')
        .collect();
    if bits.is_empty() {
        return UNKNOWN_MARKER.to_string();
    }
    if bits.chars().all(|ch| ch == '0' || ch == '1') {
        return bits_to_hex(&bits, width as usize);
    }
    if bits.chars().all(|ch| ch == 'z' || ch == 'Z') {
        return HIGH_Z_MARKER.to_string();
    }
    UNKNOWN_MARKER.to_string()
}

fn bits_to_hex(bits: &str, width: usize) -> String {
    let total_bits = width.max(bits.len()).max(1);
    let digits = (total_bits + 3) / 4;
    let mut padded = "0".repeat(digits * 4 - bits.len());
    padded.push_str(bits);
    padded
        .as_bytes()
        .chunks(4)
        .map(|nibble| {
            let value = nibble
                .iter()
                .fold(0u32, |acc, bit| (acc << 1) | u32::from(*bit == b'1'));
            char::from_digit(value, 16)
                .map(|ch| ch.to_ascii_uppercase())
                .unwrap_or('?')
        })
        .collect()
}

fn strip_bits_prefix(token: &str) -> &str {
    token
        .strip_prefix("0b")
        .or_else(|| token.strip_prefix('b'))
        .or_else(|| token.strip_prefix('B'))
        .unwrap_or(token)
}

fn lookup_sorted(events: &[ValueChange], t: u64) -> SignalValue {
    let idx = events.partition_point(|event| event.time <= t);
    match idx.checked_sub(1).map(|i| &events[i]) {
        Some(event) if !event.value.trim().is_empty() => SignalValue::Known(event.value.clone()),
        _ => SignalValue::Unknown,
    }
}
