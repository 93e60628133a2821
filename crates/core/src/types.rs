//! Identifiers and decoded wire records shared across the workspace.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Upper bound on function identifier length.
pub const MAX_FUNCTION_ID_LEN: usize = 64;

/// Wire format of the `selected_date` form field (what an HTML date input emits).
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Allowed function id characters: alphanumeric, hyphen, underscore.
/// The id is interpolated into request paths.
fn is_safe_function_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_FUNCTION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

// ---------------------------------------------------------------------------
// FunctionId
// ---------------------------------------------------------------------------

/// Identifier selecting which transformation the remote service runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FunctionId(String);

impl FunctionId {
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        if !is_safe_function_id(&id) {
            return Err(CoreError::Validation(format!(
                "Invalid function id '{id}': expected 1-{MAX_FUNCTION_ID_LEN} characters from [A-Za-z0-9_-]"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FunctionId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// ResultHandle
// ---------------------------------------------------------------------------

/// Opaque server-side reference to a completed job's output artifact.
///
/// Usually a path such as `backend/uploads/merged.xlsx`; only the last
/// segment is meaningful to the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultHandle(String);

impl ResultHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filename component used to address the artifact on the export route.
    ///
    /// Accepts both `/` and `\` separators. Returns `None` when the last
    /// segment is empty or a relative directory marker.
    pub fn file_name(&self) -> Option<&str> {
        let name = self.0.rsplit(|c: char| c == '/' || c == '\\').next()?;
        match name {
            "" | "." | ".." => None,
            name => Some(name),
        }
    }
}

impl fmt::Display for ResultHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// StatusEvent
// ---------------------------------------------------------------------------

/// One progress update pushed by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawStatusEvent")]
pub struct StatusEvent {
    /// Completion percentage, clamped to 0-100.
    pub progress: u8,
    pub message: String,
}

/// Wire shape: `progress` is any JSON number.
#[derive(Deserialize)]
struct RawStatusEvent {
    progress: f64,
    #[serde(default)]
    message: String,
}

impl From<RawStatusEvent> for StatusEvent {
    fn from(raw: RawStatusEvent) -> Self {
        Self {
            progress: raw.progress.clamp(0.0, 100.0).round() as u8,
            message: raw.message,
        }
    }
}

impl StatusEvent {
    pub fn new(progress: u8, message: impl Into<String>) -> Self {
        Self {
            progress: progress.min(100),
            message: message.into(),
        }
    }

    /// Decode one `data:` payload from the progress stream.
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

// ---------------------------------------------------------------------------
// FormFields
// ---------------------------------------------------------------------------

/// Scalar parameters submitted alongside the files.
///
/// The service does not interpret them on the client's behalf; they are
/// an immutable snapshot taken when the job is submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormFields {
    pub text1: String,
    pub text2: String,
    pub text3: String,
    pub selected_date: NaiveDate,
}

impl FormFields {
    /// Parse a `YYYY-MM-DD` date as produced by a date input.
    pub fn parse_date(value: &str) -> Result<NaiveDate, CoreError> {
        NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|e| {
            CoreError::Validation(format!("Invalid date '{value}' (expected YYYY-MM-DD): {e}"))
        })
    }

    /// The date as sent in the `selected_date` part.
    pub fn date_string(&self) -> String {
        self.selected_date.format(DATE_FORMAT).to_string()
    }
}
