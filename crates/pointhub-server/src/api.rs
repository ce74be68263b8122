//! HTTP API handlers.
//!
//! Query endpoints encode missing points inline and never fail for them.
//! Control failures map one-to-one onto status codes.

use crate::handlers::AppState;
use crate::metrics;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pointhub_core::{ControlError, DriverError};
use pointhub_protocol::api::{
    BatchEntry, BatchRequest, BatchResponse, ControlRequest, ControlResponse, HealthResponse,
    PointsResponse, PrefixQuery, ReportResponse, ValueReport,
};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body or query string could not be understood.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Too many IDs in one batch.
    #[error("Batch of {size} IDs exceeds the limit of {limit}")]
    BatchTooLarge {
        /// Requested IDs.
        size: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// Control command failed.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// Reports for a driver that is not registered.
    #[error("Unknown driver: {0}")]
    UnknownDriver(String),
}

impl ApiError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) | Self::BatchTooLarge { .. } => StatusCode::BAD_REQUEST,
            Self::UnknownDriver(_) => StatusCode::NOT_FOUND,
            Self::Control(e) => match e {
                ControlError::NotFound(_) => StatusCode::NOT_FOUND,
                ControlError::NotWritable(_) => StatusCode::FORBIDDEN,
                ControlError::InvalidValue(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ControlError::DispatchFailed { .. } => StatusCode::BAD_GATEWAY,
                ControlError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            },
        }
    }

    /// Get the error code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) | Self::BatchTooLarge { .. } => "MALFORMED_REQUEST",
            Self::UnknownDriver(_) => "NOT_FOUND",
            Self::Control(e) => e.code(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::MalformedRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::MalformedRequest(rejection.body_text())
    }
}

impl From<DriverError> for ApiError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::NotRegistered(name) => Self::UnknownDriver(name),
            other => Self::MalformedRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = ControlResponse::failure(self.code(), self.to_string());
        if let Self::Control(
            ControlError::NotFound(id) | ControlError::NotWritable(id),
        ) = &self
        {
            body.point_id = Some(id.clone());
        }

        warn!(
            error_code = self.code(),
            error_message = %body.message,
            status = %status,
            "API error"
        );

        (status, Json(body)).into_response()
    }
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = state.hub.store().stats();
    let registry = state.hub.registry().stats();
    metrics::set_points(store.total_points);

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        points: store.total_points,
        connections: registry.connection_count,
        subscriptions: registry.total_subscriptions,
        reads: store.reads,
        writes: store.writes,
        last_write_ts: store.last_write_ts,
    })
}

/// `POST /api/v1/points/batch`
pub async fn batch_points(
    State(state): State<Arc<AppState>>,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> Result<Json<BatchResponse>, ApiError> {
    let Json(request) = body?;
    let limit = state.config.limits.max_batch_size;
    if request.point_ids.len() > limit {
        return Err(ApiError::BatchTooLarge {
            size: request.point_ids.len(),
            limit,
        });
    }

    let points = state
        .hub
        .store()
        .get_batch(request.point_ids.as_slice())
        .into_iter()
        .map(|(id, point)| {
            let entry = match point {
                Some(p) => BatchEntry::Found(p.view()),
                None => BatchEntry::missing(),
            };
            (id, entry)
        })
        .collect();

    debug!(requested = request.point_ids.len(), "Batch query");
    Ok(Json(BatchResponse { points }))
}

/// `GET /api/v1/points?prefix=P`
pub async fn list_points(
    State(state): State<Arc<AppState>>,
    query: Result<Query<PrefixQuery>, QueryRejection>,
) -> Result<Json<PointsResponse>, ApiError> {
    let Query(query) = query?;
    let points: Vec<_> = state
        .hub
        .store()
        .query_by_prefix(&query.prefix)
        .iter()
        .map(pointhub_core::Point::view)
        .collect();

    debug!(prefix = %query.prefix, matched = points.len(), "Prefix query");
    Ok(Json(PointsResponse { points }))
}

/// `POST /api/v1/control`
pub async fn control(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ControlRequest>, JsonRejection>,
) -> Result<Json<ControlResponse>, ApiError> {
    let Json(request) = body?;
    let start = Instant::now();

    let outcome = state.hub.control(&request.point_id, &request.value).await;
    let label = match &outcome {
        Ok(_) => "ok",
        Err(e) => e.code(),
    };
    metrics::record_control(label, start.elapsed().as_secs_f64());

    let ack = outcome?;
    debug!(point = %ack.point_id, value = %ack.value, changed = ack.changed, "Control acknowledged");
    Ok(Json(ControlResponse {
        success: true,
        message: "Control command acknowledged".to_string(),
        error: None,
        point_id: Some(ack.point_id),
        value: Some(ack.value),
        timestamp: Some(ack.timestamp),
    }))
}

/// `POST /api/v1/drivers/{driver}/reports`
pub async fn driver_reports(
    State(state): State<Arc<AppState>>,
    Path(driver): Path<String>,
    body: Result<Json<Vec<ValueReport>>, JsonRejection>,
) -> Result<Json<ReportResponse>, ApiError> {
    let Json(reports) = body?;
    let response = state.hub.report(&driver, reports)?;
    metrics::record_reports(&driver, response.accepted);
    Ok(Json(response))
}
