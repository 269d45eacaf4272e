use vdb_client::RunSnapshot;
use vdb_core::capture::{CaptureState, CursorValue, SignalTrace};
use vdb_core::metrics::DerivedMetrics;
use vdb_core::vcd::{ToggleCoverage, TraceEntry, WaveformSummary};
use vdb_core::waveform::Level;

pub const DEFAULT_WAVE_COLUMNS: usize = 64;
const BAR_COLUMNS: usize = 40;
const NARRATIVE_CHARS: usize = 72;

pub fn progress_line(snapshot: &RunSnapshot) -> String {
    let record = &snapshot.record;
    let mut parts = vec![format!("[{}]", record.status)];
    if record.iteration_seen {
        parts.push(format!("iter {}", record.iteration));
    }
    if let Some(latest) = snapshot.metrics.latest {
        let mut metric = format!("metric {latest}");
        if let Some(pct) = snapshot.metrics.reduction_percent {
            metric.push_str(&format!(" ({pct:.1}% reduction)"));
        }
        parts.push(metric);
    }
    if let Some(phase) = &record.phase {
        match &record.action {
            Some(action) => parts.push(format!("{phase}/{action}")),
            None => parts.push(phase.clone()),
        }
    }
    if let Some(narrative) = &record.narrative {
        parts.push(truncate(narrative.lines().next().unwrap_or_default(), NARRATIVE_CHARS));
    }
    if let Some(error) = &record.error {
        parts.push(format!("error: {error}"));
    }
    parts.join(" | ")
}

pub fn banner(metrics: &DerivedMetrics) -> String {
    let banner = &metrics.banner;
    match &banner.detail {
        Some(detail) => format!("{} [{}]: {}", banner.headline, banner.tone.as_str(), detail),
        None => format!("{} [{}]", banner.headline, banner.tone.as_str()),
    }
}

pub fn bar_chart(metrics: &DerivedMetrics) -> String {
    let mut out = String::new();
    for bar in &metrics.bars {
        let filled = (bar.height * BAR_COLUMNS as f64).round() as usize;
        let mut marks = Vec::new();
        if bar.is_best {
            marks.push("best");
        }
        if bar.is_latest {
            marks.push("latest");
        }
        let marks = if marks.is_empty() {
            String::new()
        } else {
            format!(" ({})", marks.join(", "))
        };
        out.push_str(&format!(
            "{:>4} {:<width$} {}{}\n",
            bar.step,
            "#".repeat(filled.max(1)),
            bar.value,
            marks,
            width = BAR_COLUMNS
        ));
    }
    out
}

pub fn waveform(state: &CaptureState, columns: usize) -> String {
    let columns = columns.max(8);
    let span = state.max_time().max(1);
    let label_width = state
        .signals()
        .iter()
        .map(|signal| signal.name.len())
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    let cursor_col = column(state.cursor(), span, columns).min(columns - 1);
    out.push_str(&format!(
        "{:<label_width$} {}v t={}\n",
        "",
        " ".repeat(cursor_col),
        state.cursor()
    ));
    for signal in state.signals() {
        let row = if signal.is_single_bit() {
            level_row(signal, span, columns)
        } else {
            bus_row(signal, span, columns)
        };
        out.push_str(&format!("{:<label_width$} {}\n", signal.name, row));
    }
    out.push_str(&format!("{:<label_width$} 0{:>width$}\n", "", span, width = columns - 1));
    out
}

fn level_row(signal: &SignalTrace, span: u64, columns: usize) -> String {
    let mut row = vec![' '; columns];
    let path = signal.path(span);
    for segment in &path.segments {
        let start = column(segment.start, span, columns);
        let end = column(segment.end, span, columns).max(start + 1).min(columns);
        let glyph = match segment.level {
            Level::High => '-',
            Level::Low => '_',
            Level::Unknown => 'x',
        };
        for cell in row.iter_mut().take(end).skip(start) {
            *cell = glyph;
        }
    }
    for time in path.transitions() {
        let col = column(time, span, columns);
        if col < columns {
            row[col] = '|';
        }
    }
    row.into_iter().collect()
}

fn bus_row(signal: &SignalTrace, span: u64, columns: usize) -> String {
    let mut row = vec![' '; columns];
    if let Some(first) = signal.timeline.first_time() {
        for cell in row.iter_mut().take(column(first, span, columns)) {
            *cell = 'x';
        }
    }
    for value_box in signal.boxes(span) {
        let start = column(value_box.start, span, columns);
        let end = column(value_box.end, span, columns).max(start + 1).min(columns);
        if start >= columns {
            continue;
        }
        row[start] = '<';
        let label = value_box.label(signal.width);
        let inner = end.saturating_sub(start + 1);
        let text: Vec<char> = if label.chars().count() <= inner {
            label.chars().collect()
        } else if inner > 0 {
            let mut clipped: Vec<char> = label.chars().take(inner.saturating_sub(1)).collect();
            clipped.push('~');
            clipped
        } else {
            Vec::new()
        };
        for (offset, cell) in row.iter_mut().take(end).skip(start + 1).enumerate() {
            *cell = text.get(offset).copied().unwrap_or('=');
        }
    }
    row.into_iter().collect()
}

fn column(time: u64, span: u64, columns: usize) -> usize {
    ((time.min(span) as u128 * columns as u128) / span.max(1) as u128) as usize
}

pub fn cursor_table(values: &[CursorValue]) -> String {
    let label_width = values.iter().map(|value| value.name.len()).max().unwrap_or(0);
    values
        .iter()
        .map(|value| format!("{:<label_width$} = {}\n", value.name, value.display))
        .collect()
}

pub fn summary_table(summary: &WaveformSummary, coverage: &ToggleCoverage) -> String {
    let mut out = format!(
        "timescale {} | end time {} | {} signals | toggle coverage {:.1}%\n",
        summary.timescale, summary.end_time, summary.signal_count, coverage.overall_percent
    );
    for signal in &summary.signals {
        out.push_str(&format!(
            "  {:<32} width {:>3} transitions {:>5}\n",
            signal.path, signal.width, signal.transitions
        ));
    }
    if !coverage.untoggled.is_empty() {
        out.push_str(&format!("never toggled: {}\n", coverage.untoggled.join(", ")));
    }
    out
}

pub fn trace_table(entries: &[TraceEntry]) -> String {
    if entries.is_empty() {
        return "no transitions in window\n".to_string();
    }
    entries
        .iter()
        .map(|entry| {
            format!(
                "  t={:<8} -{:<6} {:<32} {}\n",
                entry.time, entry.delta, entry.signal, entry.value
            )
        })
        .collect()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max.saturating_sub(3)).collect();
    clipped.push_str("...");
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdb_core::waveform::ValueChange;
    use vdb_core::{RunRecord, RunStatus};

    fn capture() -> CaptureState {
        let mut state = CaptureState::new();
        state.load(
            vec![
                SignalTrace::new(
                    "clk",
                    1,
                    vec![ValueChange::new(0, "0"), ValueChange::new(4, "1"), ValueChange::new(8, "0")],
                ),
                SignalTrace::new(
                    "bus",
                    8,
                    vec![ValueChange::new(4, "00001111"), ValueChange::new(12, "11110000")],
                ),
            ],
            16,
        );
        state
    }

    #[test]
    fn level_rows_mark_edges() {
        let state = capture();
        let row = level_row(&state.signals()[0], 16, 16);
        assert_eq!(row, "____|---|_______");
    }

    #[test]
    fn bus_rows_show_hex_labels() {
        let state = capture();
        let row = bus_row(&state.signals()[1], 16, 16);
        assert_eq!(row, "xxxx<0F=====<F0=");
    }

    #[test]
    fn waveform_has_cursor_and_scale_rows() {
        let mut state = capture();
        state.set_cursor(8);
        let text = waveform(&state, 16);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].ends_with("v t=8"));
        assert!(lines[1].starts_with("clk "));
        assert!(lines[3].trim_end().ends_with("16"));
    }

    #[test]
    fn progress_line_summarizes_the_record() {
        let record = RunRecord {
            status: RunStatus::Running,
            iteration: 2,
            iteration_seen: true,
            series: vec![200.0, 150.0],
            phase: Some("optimize".to_string()),
            action: Some("synthesize".to_string()),
            narrative: Some("Synthesis: 150 LUTs\nmore detail".to_string()),
            ..RunRecord::default()
        };
        let line = progress_line(&RunSnapshot::of(&record));
        assert_eq!(
            line,
            "[running] | iter 2 | metric 150 (25.0% reduction) | optimize/synthesize | Synthesis: 150 LUTs"
        );
    }

    #[test]
    fn bar_chart_flags_best_and_latest() {
        let record = RunRecord {
            series: vec![200.0, 100.0],
            ..RunRecord::default()
        };
        let chart = bar_chart(&DerivedMetrics::from_record(&record));
        let lines: Vec<&str> = chart.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("   1 ########"));
        assert!(lines[1].ends_with("100 (best, latest)"));
    }

    #[test]
    fn long_text_is_clipped() {
        assert_eq!(truncate("abcdefghij", 6), "abc...");
        assert_eq!(truncate("short", 6), "short");
    }
}
