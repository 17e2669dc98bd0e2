// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Artifact downloads: the current NWB file and its report.

use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

use crate::error::WorkflowError;
use crate::report::report_base;
use crate::transport::{App, ErrorResponse};

type HandlerError = (StatusCode, Json<ErrorResponse>);

/// `GET /api/download/nwb` — stream the current output version.
pub async fn download_nwb(State(app): State<Arc<App>>) -> Result<impl IntoResponse, HandlerError> {
    let session = app.store.snapshot();
    let path = session
        .output_path
        .ok_or_else(|| WorkflowError::not_found("no output file yet").to_http_response())?;
    serve_file(&path, "application/x-nwb").await
}

/// `GET /api/download/report` — stream the current report (JSON rendition).
pub async fn download_report(
    State(app): State<Arc<App>>,
) -> Result<impl IntoResponse, HandlerError> {
    let session = app.store.snapshot();
    let output = session
        .output_path
        .ok_or_else(|| WorkflowError::not_found("no report yet").to_http_response())?;
    let path = report_base(&output).with_extension("report.json");
    serve_file(&path, "application/json").await
}

async fn serve_file(path: &Path, content_type: &str) -> Result<impl IntoResponse, HandlerError> {
    let bytes = tokio::fs::read(path).await.map_err(|_| {
        WorkflowError::not_found(format!("{} not found", path.display())).to_http_response()
    })?;
    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("download");
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    ))
}
