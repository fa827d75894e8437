use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod logging;

// ============================================================================
// Envelope Types
// ============================================================================

/// Action tag carried by every ingress envelope.
///
/// Unknown tags are a routing outcome, not a decode failure: they land in
/// `Other` and round-trip unchanged, so an unrecognized envelope can be
/// republished verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionTag {
    CycleTimeAverage,
    ShiftCounter,
    #[serde(untagged)]
    Other(String),
}

impl std::fmt::Display for ActionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionTag::CycleTimeAverage => write!(f, "CycleTimeAverage"),
            ActionTag::ShiftCounter => write!(f, "ShiftCounter"),
            ActionTag::Other(tag) => write!(f, "{}", tag),
        }
    }
}

/// Message delivered by the transport on the ingress topic.
///
/// Immutable once received; the request payload and passthrough payload are
/// opaque documents interpreted only by the selected action logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressEnvelope {
    pub correlation_id: String,
    pub action: ActionTag,
    pub action_request_payload: serde_json::Value,
    #[serde(default)]
    pub passthrough_payload: Option<serde_json::Value>,
}

/// Message published to the egress topic.
///
/// Always carries the ingress envelope's correlation id for traceability,
/// whether it holds a computed response or an error description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressEnvelope {
    pub correlation_id: String,
    pub action_response_payload: serde_json::Value,
    #[serde(default)]
    pub passthrough_payload: Option<serde_json::Value>,
}

impl EgressEnvelope {
    /// Build the synthetic envelope published when an action fails.
    ///
    /// The failure description goes into an `Error` field and the complete
    /// ingress envelope rides along as the passthrough payload so downstream
    /// consumers can inspect what was being processed.
    pub fn error(ingress: &IngressEnvelope, description: &str) -> Self {
        Self {
            correlation_id: ingress.correlation_id.clone(),
            action_response_payload: serde_json::json!({ "Error": description }),
            passthrough_payload: serde_json::to_value(ingress).ok(),
        }
    }
}

// ============================================================================
// Reference Data & Aggregate State
// ============================================================================

/// A recurring time-of-week work period scoped to a site/area/equipment.
///
/// Loaded from the state store on every action invocation — never cached —
/// so operator updates to the reference data take effect immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftReference {
    pub id: Uuid,
    pub name: String,
    pub equipment_id: Uuid,
    pub area_id: Uuid,
    pub site_id: Uuid,
    /// 0 covers both Saturday and Sunday, 1..5 is Monday..Friday.
    pub from_day_of_week: u8,
    pub from_time_of_day_seconds: u32,
    pub to_time_of_day_seconds: u32,
}

/// A single counter/cycle-time observation extracted from a request payload.
///
/// PascalCase on the wire, matching the `CycleTime` / `TotalCounter`
/// documents the upstream publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CounterSample {
    pub source_timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Persisted shift-counter state: used for both the last-known-value key and
/// the previous-shift-baseline key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftCounterRecord {
    /// Identity of the shift the value was observed in.
    pub shift_number: Uuid,
    pub day_of_week: u8,
    pub start_time: u32,
    pub end_time: u32,
    pub value: f64,
}

// ============================================================================
// Error Taxonomy
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum InflectorError {
    /// Request payload missing an expected field or malformed. Not retried.
    #[error("Invalid request payload: {0}")]
    Validation(String),

    /// Required reference/aggregate key absent or wrong shape in the store.
    /// Not retried at the logic layer; a later message may succeed once the
    /// reference data is populated.
    #[error("Reference data missing or malformed: {0}")]
    ReferenceData(String),

    /// Timestamp does not fall in any configured shift window.
    #[error("No shift window matches timestamp '{0}'")]
    NoMatch(DateTime<Utc>),

    /// State store unreachable after exhausting the retry policy.
    #[error("State store unavailable after {attempts} attempts: {reason}")]
    StoreUnavailable { attempts: u32, reason: String },

    /// Egress publish failed after exhausting the retry policy.
    #[error("Publish failed after {attempts} attempts: {reason}")]
    PublishUnavailable { attempts: u32, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Not a failure: shutdown was requested mid-operation.
    #[error("Cancelled")]
    Cancelled,
}

impl InflectorError {
    /// Cancellation is clean shutdown and must never be reported as a
    /// per-message failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, InflectorError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, InflectorError>;
