use crate::models::element::Element;
use crate::models::signal::{SignalKind, SignalValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Published view of one profile's cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub values: BTreeMap<SignalKind, SignalValue>,
    pub updated_at: Option<DateTime<Utc>>,
    pub element: Option<Element>,
    /// Enemy name with the detected element, e.g. `Red-Eye Bat (fire)`
    pub enemy_label: Option<String>,
    /// The level value comes from a manual override
    pub manual_level: bool,
}

impl TelemetrySnapshot {
    pub fn get(&self, kind: SignalKind) -> Option<&SignalValue> {
        self.values.get(&kind)
    }
}

/// Provenance of a published value
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventMeta {
    /// Entered by the user instead of recognized
    Manual,
    /// Stale value cleared after failed reads
    Cleared,
}

/// One accepted update, as seen by subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub profile_id: String,
    pub signal: SignalKind,
    pub value: Option<SignalValue>,
    pub snapshot: TelemetrySnapshot,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<EventMeta>,
}
