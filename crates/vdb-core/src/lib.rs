use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod capture;
pub mod metrics;
pub mod record;
pub mod vcd;
pub mod waveform;
pub mod wire;

pub use capture::{CaptureState, CursorValue, SignalTrace};
pub use metrics::{BannerTone, BarPoint, DerivedMetrics, ResultBanner};
pub use record::{reconcile, replay, ReconcileOutcome, Reconciled, RunRecord};
pub use vcd::{parse_vcd, VcdError, VcdWaveform};
pub use waveform::{
    decode_hex_display, decode_multi_bit, decode_single_bit, value_at, Level, LevelSegment,
    SignalTimeline, SignalValue, StepPath, ValueBox, ValueChange,
};
pub use wire::{
    CaptureRequest, CaptureResponse, CaptureSignal, CreateRunRequest, CreateRunResponse,
    EditApplied, HealthResponse, RunStatusResponse, StreamMessage, WireError,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Optimize,
    Testgen,
}

impl Default for RunMode {
    fn default() -> Self {
        Self::Optimize
    }
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Optimize => "optimize",
            RunMode::Testgen => "testgen",
        }
    }

    pub fn start_path(&self) -> &'static str {
        match self {
            RunMode::Optimize => "start",
            RunMode::Testgen => "testgen/start",
        }
    }

    pub fn stream_path(&self, run_id: &str) -> String {
        match self {
            RunMode::Optimize => format!("stream/{run_id}"),
            RunMode::Testgen => format!("testgen/stream/{run_id}"),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "optimize" | "optimise" | "opt" => Ok(RunMode::Optimize),
            "testgen" | "test-gen" | "test_gen" => Ok(RunMode::Testgen),
            other => Err(format!("Unknown mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Starting,
    Running,
    Completed,
    Failed,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Starting => "starting",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "idle" => Ok(RunStatus::Idle),
            "starting" | "pending" => Ok(RunStatus::Starting),
            "running" => Ok(RunStatus::Running),
            "completed" | "complete" | "done" => Ok(RunStatus::Completed),
            "failed" | "error" => Ok(RunStatus::Failed),
            other => Err(format!("Unknown status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_paths_follow_service_routes() {
        assert_eq!(RunMode::Optimize.start_path(), "start");
        assert_eq!(RunMode::Testgen.start_path(), "testgen/start");
        assert_eq!(RunMode::Optimize.stream_path("ab12"), "stream/ab12");
        assert_eq!(RunMode::Testgen.stream_path("ab12"), "testgen/stream/ab12");
    }

    #[test]
    fn status_parses_server_spellings() {
        assert_eq!("pending".parse::<RunStatus>(), Ok(RunStatus::Starting));
        assert_eq!("error".parse::<RunStatus>(), Ok(RunStatus::Failed));
        assert_eq!(" Completed ".parse::<RunStatus>(), Ok(RunStatus::Completed));
        assert!("disconnected".parse::<RunStatus>().is_err());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }
}
