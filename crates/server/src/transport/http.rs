// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP request/response types and axum handler implementations.

mod chat;
mod download;
mod status;
mod upload;
mod workflow;

pub use chat::*;
pub use download::*;
pub use status::*;
pub use upload::*;
pub use workflow::*;

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::transport::App;

// -- Lifecycle ----------------------------------------------------------------

/// `GET /api/health` — process liveness.
pub async fn health(State(app): State<Arc<App>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "running",
        "session_id": app.session_id,
    }))
}

/// `GET /api/ready` — ready to accept uploads.
pub async fn ready(State(app): State<Arc<App>>) -> impl IntoResponse {
    let session = app.store.snapshot();
    Json(serde_json::json!({
        "ready": crate::policy::can_accept_upload(&session),
        "status": session.status,
    }))
}

#[cfg(test)]
mod chat_tests;


#[cfg(test)]
mod status_tests;


#[cfg(test)]
mod workflow_tests;
