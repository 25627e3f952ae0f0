//! HTTP server for receiving posted time by webhook.
//!
//! # Endpoints
//!
//! - `POST /receiveTimePostedEvent` - Processes one time group and answers
//!   with its outcome:
//!   `200` success, `420` transient failure, `428` permanent failure.
//! - `GET /ping` - Returns `pong` while the server is up.

use std::sync::Arc;

pub mod health;
pub mod webhook;

pub use health::{PING_TIMEOUT, ping_handler, ping_local};
pub use webhook::{ReceiveError, outcome_status, receive_time_posted_handler};

use crate::ingest::{EventProcessor, WebhookIngestor};
use crate::remote::RemoteClient;

/// Path the remote source posts time groups to.
pub const RECEIVE_PATH: &str = "/receiveTimePostedEvent";

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
pub struct AppState<C, P> {
    inner: Arc<AppStateInner<C, P>>,
}

struct AppStateInner<C, P> {
    ingestor: Arc<WebhookIngestor<C, P>>,
}

impl<C, P> Clone for AppState<C, P> {
    fn clone(&self) -> Self {
        AppState {
            inner: self.inner.clone(),
        }
    }
}

impl<C, P> AppState<C, P> {
    pub fn new(ingestor: Arc<WebhookIngestor<C, P>>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { ingestor }),
        }
    }

    pub fn ingestor(&self) -> &WebhookIngestor<C, P> {
        &self.inner.ingestor
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<C: RemoteClient, P: EventProcessor>(app_state: AppState<C, P>) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route(RECEIVE_PATH, post(receive_time_posted_handler::<C, P>))
        .route("/ping", get(ping_handler))
        .with_state(app_state)
}
