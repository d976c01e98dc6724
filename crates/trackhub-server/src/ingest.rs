//! Ingestion gateway.
//!
//! Drivers `POST` their position to the ingestion path with their bus id in the
//! query string. A valid post is appended to the durable log; the hub is never
//! touched from here.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response as HttpResponse},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};
use trackhub_log::LogPublisher;
use trackhub_protocol::{LocationEvent, LocationRequest, ProtocolError, Response};

use crate::metrics;

/// Shared state of the ingestion listener.
pub struct IngestState {
    pub publisher: Arc<dyn LogPublisher>,
}

/// Why a location post was refused.
#[derive(Debug, Error)]
pub enum IngestRejection {
    #[error("invalid request body")]
    InvalidBody,

    #[error("invalid bus_id value")]
    InvalidBusId,

    #[error("invalid timestamp value")]
    InvalidTimestamp,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("internal server error")]
    Internal,
}

impl IngestRejection {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidBody | Self::InvalidBusId | Self::InvalidTimestamp => {
                StatusCode::BAD_REQUEST
            }
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Metric label.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidBody => "invalid_body",
            Self::InvalidBusId => "invalid_bus_id",
            Self::InvalidTimestamp => "invalid_timestamp",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::Internal => "internal",
        }
    }
}

impl From<ProtocolError> for IngestRejection {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidBody(_) => Self::InvalidBody,
            ProtocolError::MissingSource(_) => Self::InvalidBusId,
            ProtocolError::InvalidTimestamp(_) => Self::InvalidTimestamp,
            _ => Self::Internal,
        }
    }
}

impl IntoResponse for IngestRejection {
    fn into_response(self) -> HttpResponse {
        metrics::record_rejected(self.reason());
        (self.status(), Json(Response::error(self.to_string()))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct LocationQuery {
    #[serde(default)]
    pub bus_id: String,
}

/// Build the ingestion router for `path`.
pub fn router(path: &str, state: Arc<IngestState>) -> Router {
    Router::new()
        .route(path, post(send_location).fallback(method_not_allowed))
        .with_state(state)
}

/// Validate one post and append it to the log.
///
/// Checks run in order: body, bus id, timestamp.
///
/// # Errors
///
/// Returns the first failed check, or [`IngestRejection::Internal`] when the
/// log refuses the append.
pub async fn ingest(
    publisher: &dyn LogPublisher,
    bus_id: &str,
    body: &[u8],
    received_at: DateTime<Utc>,
) -> Result<LocationEvent, IngestRejection> {
    let request = LocationRequest::from_json(body)?;
    let event = request.into_event(bus_id, received_at)?;

    if let Err(e) = publisher.publish(&event).await {
        error!(bus_id, backend = publisher.name(), error = %e, "Failed to append location");
        metrics::record_error("publish");
        return Err(IngestRejection::Internal);
    }

    Ok(event)
}

async fn send_location(
    State(state): State<Arc<IngestState>>,
    query: Option<Query<LocationQuery>>,
    body: Bytes,
) -> Result<Json<Response>, IngestRejection> {
    let bus_id = query.map(|Query(q)| q.bus_id).unwrap_or_default();
    let event = ingest(state.publisher.as_ref(), &bus_id, &body, Utc::now()).await?;

    metrics::record_ingested();
    debug!(
        bus_id = %event.source_id(),
        long = event.longitude(),
        lat = event.latitude(),
        "Location ingested"
    );

    Ok(Json(Response::data("success")))
}

async fn method_not_allowed() -> IngestRejection {
    IngestRejection::MethodNotAllowed
}
