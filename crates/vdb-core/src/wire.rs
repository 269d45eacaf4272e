use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::waveform::ValueChange;
use crate::{RunMode, RunStatus};

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const DEFAULT_TESTGEN_ITERATIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("malformed message: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateRunRequest {
    pub design_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub testbench_code: Option<String>,
    pub max_iterations: u32,
    #[serde(skip)]
    pub mode: RunMode,
}

impl CreateRunRequest {
    pub fn optimize(
        design_code: impl Into<String>,
        testbench_code: impl Into<String>,
        max_iterations: u32,
    ) -> Self {
        Self {
            design_code: design_code.into(),
            testbench_code: Some(testbench_code.into()),
            max_iterations,
            mode: RunMode::Optimize,
        }
    }

    pub fn testgen(design_code: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            design_code: design_code.into(),
            testbench_code: None,
            max_iterations,
            mode: RunMode::Testgen,
        }
    }

    pub fn validate(&self) -> Result<(), WireError> {
        if self.design_code.trim().is_empty() {
            return Err(WireError::InvalidRequest("design code is empty".to_string()));
        }
        if self.max_iterations == 0 {
            return Err(WireError::InvalidRequest(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.mode == RunMode::Optimize
            && self
                .testbench_code
                .as_deref()
                .map(|tb| tb.trim().is_empty())
                .unwrap_or(true)
        {
            return Err(WireError::InvalidRequest(
                "optimize runs need a testbench".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateRunResponse {
    pub run_id: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EditApplied {
    #[serde(default, alias = "editType", skip_serializing_if = "Option::is_none")]
    pub edit_type: Option<String>,
    #[serde(default, alias = "lineStart", skip_serializing_if = "Option::is_none")]
    pub line_start: Option<u64>,
    #[serde(default, alias = "lineEnd", skip_serializing_if = "Option::is_none")]
    pub line_end: Option<u64>,
    #[serde(default, alias = "newContent", skip_serializing_if = "Option::is_none")]
    pub new_content: Option<String>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<f64>,
    #[serde(default, alias = "lut_history", skip_serializing_if = "Option::is_none")]
    pub series_so_far: Option<Vec<f64>>,
    #[serde(default, alias = "reasoning", skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, alias = "done", deserialize_with = "deserialize_null_default")]
    pub terminal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, alias = "edit_applied", skip_serializing_if = "Option::is_none")]
    pub edit_applied: Option<EditApplied>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl StreamMessage {
    pub fn decode(text: &str) -> Result<Self, WireError> {
        let value: Value =
            serde_json::from_str(text.trim()).map_err(|err| WireError::Decode(err.to_string()))?;
        if !value.is_object() {
            return Err(WireError::Decode("expected a JSON object".to_string()));
        }
        serde_json::from_value(value).map_err(|err| WireError::Decode(err.to_string()))
    }

    /// Failure text carried by the frame. The legacy loop reports an
    /// exception as a terminal `action: "error"` step with the message in
    /// `reasoning` and no `error` field.
    pub fn failure(&self) -> Option<&str> {
        if let Some(error) = self.error.as_deref() {
            return Some(error);
        }
        if self.terminal && self.action.as_deref() == Some("error") {
            return Some(self.narrative.as_deref().unwrap_or_default());
        }
        None
    }

    pub fn ends_run(&self) -> bool {
        self.terminal || self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunStatusResponse {
    pub run_id: String,
    pub status: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub history: Vec<StreamMessage>,
    #[serde(default)]
    pub latest: Option<StreamMessage>,
}

impl RunStatusResponse {
    pub fn status_kind(&self) -> Option<RunStatus> {
        self.status.parse().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureRequest {
    pub design_code: String,
    pub testbench_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureSignal {
    pub name: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(
        default,
        alias = "events",
        alias = "transitions",
        deserialize_with = "deserialize_null_default"
    )]
    pub values: Vec<ValueChange>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CaptureResponse {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub success: bool,
    #[serde(
        default,
        alias = "vcd_path",
        alias = "capturePath",
        skip_serializing_if = "Option::is_none"
    )]
    pub capture_path: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub signals: Vec<CaptureSignal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

pub fn parse_error_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::String(detail) => Some(detail.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

pub fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, WireError> {
    serde_json::from_str(text).map_err(|err| WireError::Decode(err.to_string()))
}

fn default_width() -> u32 {
    1
}

fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    let value = Option::<T>::deserialize(deserializer)?;
    Ok(value.unwrap_or_default())
}

pub(crate) fn deserialize_token<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val: Value = Value::deserialize(deserializer)?;
    match val {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(if b { "1" } else { "0" }.to_string()),
        Value::Null => Ok(String::new()),
        // Arrays and objects read as unknown rather than failing the capture.
        _ => Ok(String::new()),
    }
}
