// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upload handler: accepts the recording as base64 JSON, stores it under
//! the upload directory, and seeds the session.

use std::path::Path;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::convert::sha256_hex;
use crate::error::WorkflowError;
use crate::metadata;
use crate::policy;
use crate::session::{epoch_ms, ConversionStatus, Session};
use crate::store::Expect;
use crate::transport::App;

/// Maximum decoded upload size: 512 MiB.
const MAX_FILE_SIZE: usize = 512 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    /// Base64-encoded file contents (standard or URL-safe alphabet).
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub session_id: String,
    pub status: ConversionStatus,
    pub checksum: String,
}

/// `POST /api/upload` — accept a recording; sets `input_path` and
/// `input_checksum`.  Returns 409 while a workflow step is in flight.
pub async fn upload(
    State(app): State<Arc<App>>,
    Json(req): Json<UploadRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<crate::transport::ErrorResponse>)> {
    let sanitized = sanitize_filename(&req.filename)
        .ok_or_else(|| WorkflowError::bad_request("invalid filename").to_http_response())?;

    let decoded = base64_decode(&req.data).map_err(|e| {
        WorkflowError::bad_request(format!("invalid base64: {e}")).to_http_response()
    })?;

    if decoded.len() > MAX_FILE_SIZE {
        return Err(WorkflowError::bad_request(format!(
            "file too large: {} bytes (max {MAX_FILE_SIZE})",
            decoded.len(),
        ))
        .to_http_response());
    }

    // Claim the upload slot atomically: the precondition check and the
    // move to `uploading` happen under one transition.
    let snapshot = app.store.snapshot();
    if !policy::can_accept_upload(&snapshot) {
        return Err(WorkflowError::bad_transition(ConversionStatus::Idle, snapshot.status)
            .to_http_response());
    }
    app.store
        .transition(Expect::At(snapshot.status), ConversionStatus::Uploading, |_| {})
        .map_err(|e| e.to_http_response())?;

    let result = write_upload(&app, &sanitized, &decoded).await;
    match result {
        Ok(response) => Ok((StatusCode::ACCEPTED, Json(response))),
        Err(error) => {
            // Release the upload slot before surfacing the error.
            let _ = app.store.transition(
                Expect::At(ConversionStatus::Uploading),
                snapshot.status,
                |_| {},
            );
            Err(error.to_http_response())
        }
    }
}

async fn write_upload(
    app: &App,
    filename: &str,
    decoded: &[u8],
) -> Result<UploadResponse, WorkflowError> {
    tokio::fs::create_dir_all(&app.upload_dir)
        .await
        .map_err(|e| WorkflowError::fatal(format!("failed to create upload dir: {e}")))?;

    let dest = app.upload_dir.join(filename);
    tokio::fs::write(&dest, decoded)
        .await
        .map_err(|e| WorkflowError::fatal(format!("failed to write upload: {e}")))?;

    let checksum = sha256_hex(decoded);
    let auto = metadata::scan_input(&dest).await;
    let filename = filename.to_owned();

    app.store.transition(
        Expect::At(ConversionStatus::Uploading),
        ConversionStatus::Uploaded,
        |s| {
            // A new upload starts a new workflow: everything but identity
            // and conversation carries over from the zero value.
            let created_at = if s.created_at == 0 { epoch_ms() } else { s.created_at };
            let mut fresh = Session { created_at, ..Session::default() };
            fresh.uploaded_filenames = s.uploaded_filenames.clone();
            fresh.uploaded_filenames.push(filename.clone());
            fresh.input_path = Some(dest.clone());
            fresh.input_checksum = Some(checksum.clone());
            fresh.auto_extracted_metadata = auto.clone();
            *s = fresh;
        },
    )?;

    Ok(UploadResponse {
        session_id: app.session_id.clone(),
        status: ConversionStatus::Uploaded,
        checksum,
    })
}

/// Decode base64 (standard or URL-safe, with or without padding).
fn base64_decode(input: &str) -> Result<Vec<u8>, String> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(input)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(input))
        .map_err(|e| e.to_string())
}

/// Sanitize a user-provided filename to prevent path traversal.
///
/// Extracts `Path::file_name()`, rejects `.` / `..` / empty, replaces
/// null bytes and path separators, and truncates to 255 bytes.
fn sanitize_filename(raw: &str) -> Option<String> {
    let name = Path::new(raw).file_name()?.to_str()?;

    if name.is_empty() || name == "." || name == ".." {
        return None;
    }

    let clean: String =
        name.chars().map(|c| if c == '\0' || c == '/' || c == '\\' { '_' } else { c }).collect();

    if clean.is_empty() {
        return None;
    }

    let truncated = if clean.len() > 255 {
        let mut end = 255;
        while end > 0 && !clean.is_char_boundary(end) {
            end -= 1;
        }
        &clean[..end]
    } else {
        &clean
    };

    Some(truncated.to_owned())
}
