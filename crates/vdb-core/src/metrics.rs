use serde::{Deserialize, Serialize};

use crate::record::RunRecord;
use crate::{RunMode, RunStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BannerTone {
    Neutral,
    Progress,
    Success,
    Failure,
}

impl BannerTone {
    pub fn as_str(&self) -> &'static str {
        match self {
            BannerTone::Neutral => "neutral",
            BannerTone::Progress => "progress",
            BannerTone::Success => "success",
            BannerTone::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultBanner {
    pub tone: BannerTone,
    pub headline: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BarPoint {
    pub step: usize,
    pub value: f64,
    pub height: f64,
    pub is_best: bool,
    pub is_latest: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DerivedMetrics {
    pub steps: usize,
    pub baseline: Option<f64>,
    pub latest: Option<f64>,
    pub best: Option<f64>,
    pub best_index: Option<usize>,
    pub reduction_percent: Option<f64>,
    pub delta_from_previous: Option<f64>,
    pub banner: ResultBanner,
    pub bars: Vec<BarPoint>,
}

impl DerivedMetrics {
    pub fn from_record(record: &RunRecord) -> Self {
        let series = &record.series;
        let baseline = series.first().copied();
        let latest = series.last().copied();
        let best_index = best_index(series);
        let best = best_index.map(|idx| series[idx]);
        let reduction_percent = reduction_percent(series);
        let delta_from_previous = match series.as_slice() {
            [.., previous, last] => Some(last - previous),
            _ => None,
        };
        let bars = bars(series, best_index);
        let banner = banner(record, reduction_percent);

        Self {
            steps: series.len(),
            baseline,
            latest,
            best,
            best_index,
            reduction_percent,
            delta_from_previous,
            banner,
            bars,
        }
    }
}

pub fn reduction_percent(series: &[f64]) -> Option<f64> {
    match series {
        [first, .., last] if *first > 0.0 => Some((first - last) / first * 100.0),
        _ => None,
    }
}

fn best_index(series: &[f64]) -> Option<usize> {
    series
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (idx, value)| match best {
            Some((_, current)) if current <= *value => best,
            _ => Some((idx, *value)),
        })
        .map(|(idx, _)| idx)
}

fn bars(series: &[f64], best_index: Option<usize>) -> Vec<BarPoint> {
    let max = series.iter().copied().fold(0.0_f64, f64::max);
    let last = series.len().saturating_sub(1);
    series
        .iter()
        .enumerate()
        .map(|(idx, value)| BarPoint {
            step: idx + 1,
            value: *value,
            height: if max > 0.0 {
                (value / max).clamp(0.0, 1.0)
            } else {
                0.0
            },
            is_best: best_index == Some(idx),
            is_latest: idx == last,
        })
        .collect()
}

fn banner(record: &RunRecord, reduction: Option<f64>) -> ResultBanner {
    let noun = match record.mode {
        RunMode::Optimize => "Optimization",
        RunMode::Testgen => "Test generation",
    };
    match record.status {
        RunStatus::Failed => ResultBanner {
            tone: BannerTone::Failure,
            headline: format!("{noun} failed"),
            detail: record.error.clone(),
        },
        RunStatus::Completed if record.passed == Some(false) => ResultBanner {
            tone: BannerTone::Failure,
            headline: format!("{noun} finished with failing tests"),
            detail: record.narrative.clone(),
        },
        RunStatus::Completed => ResultBanner {
            tone: BannerTone::Success,
            headline: format!("{noun} complete"),
            detail: summary_line(record, reduction).or_else(|| record.narrative.clone()),
        },
        RunStatus::Running => ResultBanner {
            tone: BannerTone::Progress,
            headline: format!("Iteration {}", record.iteration),
            detail: summary_line(record, reduction),
        },
        RunStatus::Starting => ResultBanner {
            tone: BannerTone::Progress,
            headline: format!("Starting {}", noun.to_lowercase()),
            detail: None,
        },
        RunStatus::Idle if record.run_id.is_some() => ResultBanner {
            tone: BannerTone::Neutral,
            headline: "Detached from run".to_string(),
            detail: summary_line(record, reduction),
        },
        RunStatus::Idle => ResultBanner {
            tone: BannerTone::Neutral,
            headline: "No active run".to_string(),
            detail: None,
        },
    }
}

fn summary_line(record: &RunRecord, reduction: Option<f64>) -> Option<String> {
    let first = record.series.first()?;
    let last = record.series.last()?;
    match reduction {
        Some(pct) => Some(format!("{first} -> {last} ({pct:.1}% reduction)")),
        None => Some(format!("latest {last}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: RunStatus, series: &[f64]) -> RunRecord {
        RunRecord {
            run_id: Some("ab12cd34".to_string()),
            status,
            terminal: status.is_terminal(),
            iteration: series.len() as u64,
            iteration_seen: !series.is_empty(),
            series: series.to_vec(),
            ..RunRecord::default()
        }
    }

    #[test]
    fn reduction_requires_two_entries_and_positive_baseline() {
        assert_eq!(reduction_percent(&[]), None);
        assert_eq!(reduction_percent(&[120.0]), None);
        assert_eq!(reduction_percent(&[0.0, 10.0]), None);
        assert_eq!(reduction_percent(&[200.0, 150.0]), Some(25.0));
        assert_eq!(reduction_percent(&[100.0, 125.0]), Some(-25.0));
    }

    #[test]
    fn best_is_earliest_minimum() {
        let metrics = DerivedMetrics::from_record(&record(
            RunStatus::Running,
            &[140.0, 96.0, 120.0, 96.0],
        ));
        assert_eq!(metrics.best, Some(96.0));
        assert_eq!(metrics.best_index, Some(1));
        assert_eq!(metrics.latest, Some(96.0));
        assert_eq!(metrics.delta_from_previous, Some(-24.0));
        assert_eq!(metrics.steps, 4);
    }

    #[test]
    fn bars_scale_against_largest_value() {
        let metrics = DerivedMetrics::from_record(&record(RunStatus::Running, &[200.0, 100.0, 150.0]));
        let heights: Vec<f64> = metrics.bars.iter().map(|bar| bar.height).collect();
        assert_eq!(heights, vec![1.0, 0.5, 0.75]);
        assert_eq!(metrics.bars[0].step, 1);
        assert!(metrics.bars[1].is_best);
        assert!(metrics.bars[2].is_latest);
        assert!(!metrics.bars[0].is_latest);

        let zeros = DerivedMetrics::from_record(&record(RunStatus::Running, &[0.0, 0.0]));
        assert!(zeros.bars.iter().all(|bar| bar.height == 0.0));
    }

    #[test]
    fn banner_follows_status_and_outcome() {
        let empty = DerivedMetrics::from_record(&RunRecord::default());
        assert_eq!(empty.banner.tone, BannerTone::Neutral);
        assert_eq!(empty.banner.headline, "No active run");
        assert!(empty.bars.is_empty());

        let done = DerivedMetrics::from_record(&RunRecord {
            passed: Some(true),
            ..record(RunStatus::Completed, &[200.0, 150.0])
        });
        assert_eq!(done.banner.tone, BannerTone::Success);
        assert_eq!(done.banner.headline, "Optimization complete");
        assert_eq!(done.banner.detail.as_deref(), Some("200 -> 150 (25.0% reduction)"));

        let failing_tests = DerivedMetrics::from_record(&RunRecord {
            passed: Some(false),
            ..record(RunStatus::Completed, &[200.0])
        });
        assert_eq!(failing_tests.banner.tone, BannerTone::Failure);

        let failed = DerivedMetrics::from_record(&RunRecord {
            error: Some("Compilation failed".to_string()),
            mode: RunMode::Testgen,
            ..record(RunStatus::Failed, &[])
        });
        assert_eq!(failed.banner.headline, "Test generation failed");
        assert_eq!(failed.banner.detail.as_deref(), Some("Compilation failed"));

        let running = DerivedMetrics::from_record(&record(RunStatus::Running, &[140.0]));
        assert_eq!(running.banner.tone, BannerTone::Progress);
        assert_eq!(running.banner.headline, "Iteration 1");
        assert_eq!(running.banner.detail.as_deref(), Some("latest 140"));
    }
}
