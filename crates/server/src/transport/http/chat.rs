// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Conversational turn handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::bus::{AgentRequest, ChatStatus, ConversationAction, RequestContext};
use crate::transport::{App, ErrorResponse};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// `POST /api/chat` — one conversational turn.
///
/// The response `status` is always one of `conversation_continues`,
/// `ready_to_convert`, `busy`, or `error`; a held single-flight guard
/// answers 503 with an explicit `busy` body, and a model deadline miss
/// becomes 504.
pub async fn chat(
    State(app): State<Arc<App>>,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let response = app
        .bus
        .send(
            AgentRequest::Conversation(ConversationAction::ChatMessage { text: req.message }),
            RequestContext::default(),
        )
        .await
        .map_err(|e| e.to_http_response())?;
    let turn = response.into_chat().map_err(|e| e.to_http_response())?;

    let status = match turn.status {
        ChatStatus::Busy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    Ok((status, Json(turn)))
}
