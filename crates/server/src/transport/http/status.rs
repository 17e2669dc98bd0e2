// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session status and validation report snapshots.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::WorkflowError;
use crate::policy;
use crate::session::{
    ConversationPhase, ConversionStatus, IssueCounts, MetadataRequestPolicy, TriagedIssue,
    ValidationIssue, ValidationOutcome,
};
use crate::transport::{App, ErrorResponse};

/// Snapshot payload for `GET /api/status`.  Every field derives from the
/// session value, so two reads with no intervening mutation are
/// byte-identical.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: ConversionStatus,
    pub phase: ConversationPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_outcome: Option<ValidationOutcome>,
    pub metadata_policy: MetadataRequestPolicy,
    pub correction_attempt: u32,
    pub can_retry: bool,
    pub in_active_conversation: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_counts: Option<IssueCounts>,
    pub updated_at: u64,
}

/// `GET /api/status` — current session snapshot.
pub async fn status(State(app): State<Arc<App>>) -> impl IntoResponse {
    let session = app.store.snapshot();
    let history_len = app.store.history_snapshot().len();
    Json(StatusResponse {
        status: session.status,
        phase: session.conversation_phase,
        validation_outcome: session.validation_outcome,
        metadata_policy: session.metadata_policy,
        correction_attempt: session.correction_attempt,
        can_retry: policy::can_retry(&session, false),
        in_active_conversation: policy::is_in_active_conversation(&session, history_len),
        input_path: session.input_path.as_ref().map(|p| p.display().to_string()),
        input_checksum: session.input_checksum.clone(),
        output_path: session.output_path.as_ref().map(|p| p.display().to_string()),
        detected_format: session.detected_format.clone(),
        validation_counts: session.validation_report.as_ref().map(|r| r.counts),
        updated_at: session.updated_at,
    })
}

#[derive(Debug, Serialize)]
pub struct ValidationResponse {
    pub outcome: ValidationOutcome,
    pub counts: IssueCounts,
    pub correction_attempt: u32,
    /// Raw validator output, verbatim.
    pub issues: Vec<ValidationIssue>,
    /// Model-enriched triage list.
    pub triaged: Vec<TriagedIssue>,
}

/// `GET /api/validation` — the last enriched validation report.
pub async fn validation(
    State(app): State<Arc<App>>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let session = app.store.snapshot();
    let report = session
        .validation_report
        .ok_or_else(|| WorkflowError::not_found("no validation report yet").to_http_response())?;
    Ok(Json(ValidationResponse {
        outcome: report.outcome,
        counts: report.counts,
        correction_attempt: session.correction_attempt,
        issues: report.issues,
        triaged: report.triaged,
    }))
}
