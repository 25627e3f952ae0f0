//! Posted-time webhook endpoint.
//!
//! Unlike the fetch loop, the caller waits for the outcome: the response
//! status tells the remote source whether to retry.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error};

use super::AppState;
use crate::ingest::{EventProcessor, IngestError};
use crate::remote::RemoteClient;
use crate::types::{Outcome, TimeGroup};

/// Status for a transient failure; the remote source retries these.
const TRANSIENT_FAILURE_STATUS: u16 = 420;

/// Errors that stop a posted time group from being handled at all.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// The body is not a time group.
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The ledger could not be read or written.
    #[error("{0}")]
    Ingest(#[from] IngestError),
}

impl IntoResponse for ReceiveError {
    fn into_response(self) -> Response {
        let status = match &self {
            ReceiveError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            ReceiveError::Ingest(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        message_response(status, &self.to_string())
    }
}

/// Maps an outcome to the response status the remote source expects.
pub fn outcome_status(outcome: &Outcome) -> StatusCode {
    match outcome {
        Outcome::Success => StatusCode::OK,
        Outcome::TransientFailure(_) => {
            StatusCode::from_u16(TRANSIENT_FAILURE_STATUS).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
        }
        Outcome::PermanentFailure(_) => StatusCode::PRECONDITION_REQUIRED,
    }
}

/// Handles `POST /receiveTimePostedEvent`.
///
/// # Response
///
/// - 200 OK: processed (or previously processed) successfully
/// - 420: transient failure, retry later
/// - 428 Precondition Required: permanent failure
/// - 400 Bad Request: body is not a time group
/// - 500 Internal Server Error: ledger failure
///
/// Every response body is `{"message": "..."}`.
pub async fn receive_time_posted_handler<C: RemoteClient, P: EventProcessor>(
    State(state): State<AppState<C, P>>,
    body: Bytes,
) -> Result<Response, ReceiveError> {
    let time_group: TimeGroup = serde_json::from_slice(&body)?;
    debug!(time_group_id = %time_group.group_id, "Received posted time");

    let result = state.ingestor().handle(time_group).await.map_err(|e| {
        error!(error = %e, "Could not handle posted time");
        e
    })?;

    Ok(message_response(
        outcome_status(&result.outcome),
        result.outcome.display_message(),
    ))
}

fn message_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "message": message }))).into_response()
}
