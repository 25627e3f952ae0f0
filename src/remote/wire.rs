//! Request and response bodies exchanged with the remote source.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::DeliveryStatus;
use crate::types::TimeGroupId;

/// Processing result as reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireStatus {
    Success,
    Failure,
    RetriableFailure,
}

impl WireStatus {
    /// The upstream form of a result. `None` for statuses with nothing to
    /// report: in-progress claims and results already acknowledged.
    pub fn from_status(status: DeliveryStatus) -> Option<Self> {
        match status {
            DeliveryStatus::Success => Some(WireStatus::Success),
            DeliveryStatus::PermanentFailure => Some(WireStatus::Failure),
            DeliveryStatus::TransientFailure => Some(WireStatus::RetriableFailure),
            _ => None,
        }
    }
}

/// Tells the remote source how a time group was handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acknowledgement {
    pub time_group_id: TimeGroupId,
    pub status: WireStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Reason reported when the connector considers itself unhealthy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthFailure {
    pub message: String,
}

impl HealthFailure {
    pub fn new(message: impl Into<String>) -> Self {
        HealthFailure {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for HealthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Identifies this connector when asking for its managed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedConfigRequest {
    pub connector_type: String,
    pub runtime_version: String,
    /// Epoch milliseconds on the connector's clock.
    pub client_timestamp: i64,
}

/// Managed configuration issued by the remote source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedConfig {
    /// When the credentials in this configuration stop working.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}
