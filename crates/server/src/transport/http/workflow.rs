// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow decision handlers: start, user input, retry approval,
//! improvement decision, reset.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::bus::{
    AgentRequest, AgentResponse, ConversationAction, ImprovementAction, MetadataRequest,
    RequestContext,
};
use crate::session::{ConversionStatus, MetadataMap};
use crate::transport::{App, ErrorResponse};

type HandlerError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Serialize)]
pub struct StartConversionResponse {
    pub status: ConversionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_request: Option<MetadataRequest>,
}

/// `POST /api/start-conversion` — begin the workflow.
pub async fn start_conversion(
    State(app): State<Arc<App>>,
) -> Result<impl IntoResponse, HandlerError> {
    let response = app
        .bus
        .send(
            AgentRequest::Conversation(ConversationAction::StartConversion),
            RequestContext::default(),
        )
        .await
        .map_err(|e| e.to_http_response())?;
    let outcome = response.into_started().map_err(|e| e.to_http_response())?;
    Ok(Json(StartConversionResponse {
        status: outcome.status,
        metadata_request: outcome.metadata_request,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UserInputRequest {
    #[serde(default)]
    pub fields: MetadataMap,
    #[serde(default)]
    pub cancel: bool,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub status: ConversionStatus,
}

/// `POST /api/user-input` — structured metadata submission, or
/// `{cancel: true}` to abandon the workflow.
pub async fn user_input(
    State(app): State<Arc<App>>,
    Json(req): Json<UserInputRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let response = app
        .bus
        .send(
            AgentRequest::Conversation(ConversationAction::UserInput {
                fields: req.fields,
                cancel: req.cancel,
            }),
            RequestContext::default(),
        )
        .await
        .map_err(|e| e.to_http_response())?;
    match response.status() {
        Some(status) => Ok(Json(AckResponse { status })),
        None => Err(crate::error::WorkflowError::fatal("unexpected response shape")
            .to_http_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct RetryApprovalRequest {
    pub approve: bool,
    #[serde(default)]
    pub retry_anyway: bool,
}

#[derive(Debug, Serialize)]
pub struct RetryApprovalResponse {
    pub status: ConversionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_progress_warning: Option<bool>,
}

/// `POST /api/retry-approval` — approve or decline a correction attempt.
pub async fn retry_approval(
    State(app): State<Arc<App>>,
    Json(req): Json<RetryApprovalRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let response = app
        .bus
        .send(
            AgentRequest::Conversation(ConversationAction::RetryDecision {
                approve: req.approve,
                retry_anyway: req.retry_anyway,
            }),
            RequestContext::default(),
        )
        .await
        .map_err(|e| e.to_http_response())?;
    Ok(Json(match response {
        AgentResponse::Retry(outcome) => RetryApprovalResponse {
            status: outcome.status,
            no_progress_warning: outcome.no_progress_warning.then_some(true),
        },
        other => RetryApprovalResponse {
            status: other.status().unwrap_or(ConversionStatus::Failed),
            no_progress_warning: None,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct ImprovementDecisionRequest {
    pub action: ImprovementAction,
}

/// `POST /api/improvement-decision` — accept the file as is, or improve.
pub async fn improvement_decision(
    State(app): State<Arc<App>>,
    Json(req): Json<ImprovementDecisionRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let response = app
        .bus
        .send(
            AgentRequest::Conversation(ConversationAction::ImprovementDecision {
                action: req.action,
            }),
            RequestContext::default(),
        )
        .await
        .map_err(|e| e.to_http_response())?;
    match response.status() {
        Some(status) => Ok(Json(AckResponse { status })),
        None => Err(crate::error::WorkflowError::fatal("unexpected response shape")
            .to_http_response()),
    }
}

/// `POST /api/reset` — zero the session.  409 while a step is in flight.
pub async fn reset(State(app): State<Arc<App>>) -> Result<impl IntoResponse, HandlerError> {
    app.store.reset().map_err(|e| e.to_http_response())?;
    Ok(Json(AckResponse { status: ConversionStatus::Idle }))
}
