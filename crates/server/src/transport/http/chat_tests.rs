// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;

use crate::model::ChatTurnOutput;
use crate::test_support::AppBuilder;
use crate::transport::build_router;

const ALLOWED_STATUSES: [&str; 4] =
    ["conversation_continues", "ready_to_convert", "busy", "error"];

#[tokio::test]
async fn chat_returns_an_enumerated_status() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    let res = server
        .post("/api/chat")
        .json(&serde_json::json!({ "message": "hello" }))
        .await;
    res.assert_status_ok();
    let body: serde_json::Value = res.json();
    let status = body["status"].as_str().unwrap_or_default();
    assert!(ALLOWED_STATUSES.contains(&status), "unexpected status {status:?}");
    assert_eq!(status, "conversation_continues");
    assert!(body.get("needs_more_info").is_some());
    assert!(body.get("ready_to_proceed").is_some());
    Ok(())
}

#[tokio::test]
async fn chat_echoes_extracted_metadata() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    let mut extracted = crate::session::MetadataMap::new();
    extracted.insert("subject_id".to_owned(), "mouse-7".into());
    ctx.model.push_chat(ChatTurnOutput {
        message: "recorded".to_owned(),
        extracted_metadata: Some(extracted),
        ready_to_proceed: false,
        needs_more_info: true,
        declined_fields: None,
    });
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    let res = server
        .post("/api/chat")
        .json(&serde_json::json!({ "message": "subject is mouse-7" }))
        .await;
    res.assert_status_ok();
    let body: serde_json::Value = res.json();
    assert_eq!(body["extracted_metadata"]["subject_id"], "mouse-7");
    Ok(())
}

#[tokio::test]
async fn concurrent_chat_is_503_busy() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    let gate = ctx.model.hold_chat();
    let server = std::sync::Arc::new(axum_test::TestServer::new(build_router(ctx.app.clone()))?);

    let parked = {
        let server = std::sync::Arc::clone(&server);
        tokio::spawn(async move {
            server
                .post("/api/chat")
                .json(&serde_json::json!({ "message": "first" }))
                .await
        })
    };

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while ctx.model.chat_calls() == 0 {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let res = server
        .post("/api/chat")
        .json(&serde_json::json!({ "message": "second" }))
        .await;
    res.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = res.json();
    assert_eq!(body["status"], "busy");

    gate.add_permits(1);
    parked.await?.assert_status_ok();
    Ok(())
}

#[tokio::test]
async fn chat_model_failure_is_error_status_not_processed() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    ctx.model.fail_next_chat("provider down");
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    let res = server
        .post("/api/chat")
        .json(&serde_json::json!({ "message": "hello" }))
        .await;
    res.assert_status_ok();
    let body: serde_json::Value = res.json();
    assert_eq!(body["status"], "error");
    Ok(())
}
