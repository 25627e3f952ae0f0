//! Delivery status values and the rules built on them.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Outcome, TimeGroupId};

/// A status string that is not one of the known values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown delivery status: {0}")]
pub struct UnknownStatus(pub String);

/// Processing state of one time group.
///
/// A row moves from `InProgress` to a result, and from a result to its
/// `*Sent` form once the remote source has been told.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    InProgress,
    Success,
    PermanentFailure,
    TransientFailure,
    SuccessSent,
    PermanentFailureSent,
    TransientFailureSent,
}

impl DeliveryStatus {
    pub const ALL: [DeliveryStatus; 7] = [
        DeliveryStatus::InProgress,
        DeliveryStatus::Success,
        DeliveryStatus::PermanentFailure,
        DeliveryStatus::TransientFailure,
        DeliveryStatus::SuccessSent,
        DeliveryStatus::PermanentFailureSent,
        DeliveryStatus::TransientFailureSent,
    ];

    /// The persisted form.
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::InProgress => "IN_PROGRESS",
            DeliveryStatus::Success => "SUCCESS",
            DeliveryStatus::PermanentFailure => "PERMANENT_FAILURE",
            DeliveryStatus::TransientFailure => "TRANSIENT_FAILURE",
            DeliveryStatus::SuccessSent => "SUCCESS_SENT",
            DeliveryStatus::PermanentFailureSent => "PERMANENT_FAILURE_SENT",
            DeliveryStatus::TransientFailureSent => "TRANSIENT_FAILURE_SENT",
        }
    }

    /// The status a processing outcome is recorded as.
    pub fn from_outcome(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Success => DeliveryStatus::Success,
            Outcome::TransientFailure(_) => DeliveryStatus::TransientFailure,
            Outcome::PermanentFailure(_) => DeliveryStatus::PermanentFailure,
        }
    }

    /// The status after the remote source acknowledged this result.
    ///
    /// `None` for `InProgress` and for statuses that are already acknowledged.
    pub fn acknowledged(self) -> Option<Self> {
        match self {
            DeliveryStatus::Success => Some(DeliveryStatus::SuccessSent),
            DeliveryStatus::PermanentFailure => Some(DeliveryStatus::PermanentFailureSent),
            DeliveryStatus::TransientFailure => Some(DeliveryStatus::TransientFailureSent),
            _ => None,
        }
    }

    pub fn is_acknowledged(self) -> bool {
        matches!(
            self,
            DeliveryStatus::SuccessSent
                | DeliveryStatus::PermanentFailureSent
                | DeliveryStatus::TransientFailureSent
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, DeliveryStatus::Success | DeliveryStatus::SuccessSent)
    }

    /// True if seeing the event again must not process it again.
    ///
    /// Applies to statuses returned by a staleness-filtered lookup, so an
    /// `InProgress` here is always a live claim. Failures are always
    /// reprocessed.
    pub fn blocks_reprocessing(self) -> bool {
        matches!(
            self,
            DeliveryStatus::Success | DeliveryStatus::SuccessSent | DeliveryStatus::InProgress
        )
    }

    /// True if the acknowledgement sweep should report this status.
    pub fn awaits_acknowledgement(self) -> bool {
        matches!(
            self,
            DeliveryStatus::Success | DeliveryStatus::PermanentFailure
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeliveryStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

impl ToSql for DeliveryStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for DeliveryStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: UnknownStatus| FromSqlError::Other(Box::new(e)))
    }
}

/// Status and message of a ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub status: DeliveryStatus,
    pub message: String,
}

impl LedgerEntry {
    pub fn new(status: DeliveryStatus, message: impl Into<String>) -> Self {
        LedgerEntry {
            status,
            message: message.into(),
        }
    }

    /// The processing outcome this entry records, if processing finished.
    pub fn outcome(&self) -> Option<Outcome> {
        match self.status {
            DeliveryStatus::InProgress => None,
            DeliveryStatus::Success | DeliveryStatus::SuccessSent => Some(Outcome::Success),
            DeliveryStatus::PermanentFailure | DeliveryStatus::PermanentFailureSent => {
                Some(Outcome::PermanentFailure(self.message.clone()))
            }
            DeliveryStatus::TransientFailure | DeliveryStatus::TransientFailureSent => {
                Some(Outcome::TransientFailure(self.message.clone()))
            }
        }
    }
}

/// A full ledger row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub event_id: TimeGroupId,
    pub status: DeliveryStatus,
    pub message: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds.
    pub updated_at: i64,
}

/// A result that the remote source has not yet been told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAck {
    pub event_id: TimeGroupId,
    pub status: DeliveryStatus,
    pub message: String,
}
