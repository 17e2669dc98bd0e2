// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API contract types and server implementation for the HTTP and
//! WebSocket transports.

pub mod http;
pub mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::bus::Bus;
use crate::error::WorkflowError;
use crate::store::SessionStore;

/// Shared application value passed to all handlers via the axum `State`
/// extractor.  Tests construct fresh instances; a long-lived process holds
/// exactly one.
pub struct App {
    pub store: Arc<SessionStore>,
    pub bus: Arc<Bus>,
    pub upload_dir: PathBuf,
    /// Identifier returned to upload clients; one per process lifetime.
    pub session_id: String,
    pub shutdown: CancellationToken,
}

/// Top-level error response envelope shared across HTTP and WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body containing a machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl WorkflowError {
    /// Convert this error into a transport [`ErrorBody`].
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody { code: self.kind.as_str().to_owned(), message: self.message.clone() }
    }

    /// Convert this error into an axum JSON error response.
    pub fn to_http_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        let status = StatusCode::from_u16(self.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse { error: self.to_error_body() }))
    }
}

/// Build the axum `Router` with all HTTP and WebSocket routes.
pub fn build_router(app: Arc<App>) -> Router {
    Router::new()
        .route("/api/health", get(http::health))
        .route("/api/ready", get(http::ready))
        .route("/api/upload", post(http::upload))
        .route("/api/start-conversion", post(http::start_conversion))
        .route("/api/chat", post(http::chat))
        .route("/api/user-input", post(http::user_input))
        .route("/api/retry-approval", post(http::retry_approval))
        .route("/api/improvement-decision", post(http::improvement_decision))
        .route("/api/status", get(http::status))
        .route("/api/validation", get(http::validation))
        .route("/api/download/nwb", get(http::download_nwb))
        .route("/api/download/report", get(http::download_report))
        .route("/api/reset", post(http::reset))
        .route("/events", get(ws::events_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app)
}
