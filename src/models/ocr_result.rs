use crate::models::signal::SignalValue;
use serde::{Deserialize, Serialize};

/// Outcome of one recognition request.
///
/// `ok == false` with no `error` means no candidate image produced
/// readable text; a set `error` signals an engine-level failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResult {
    pub request_id: u64,
    pub ok: bool,
    pub raw_text: Option<String>,
    pub value: Option<SignalValue>,
    pub unit: Option<String>,
    pub error: Option<String>,
}

impl RecognitionResult {
    pub fn success(request_id: u64, raw_text: String, value: SignalValue, unit: Option<&str>) -> Self {
        Self {
            request_id,
            ok: true,
            raw_text: Some(raw_text),
            value: Some(value),
            unit: unit.map(str::to_string),
            error: None,
        }
    }

    /// No candidate parsed; keeps the first non-empty raw text for diagnostics
    pub fn unreadable(request_id: u64, raw_text: Option<String>, unit: Option<&str>) -> Self {
        Self {
            request_id,
            ok: false,
            raw_text,
            value: None,
            unit: unit.map(str::to_string),
            error: None,
        }
    }

    pub fn engine_failure(request_id: u64, error: String) -> Self {
        Self {
            request_id,
            ok: false,
            raw_text: None,
            value: None,
            unit: None,
            error: Some(error),
        }
    }

    pub fn is_engine_failure(&self) -> bool {
        self.error.is_some()
    }
}
