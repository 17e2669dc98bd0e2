// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use axum::http::StatusCode;

use crate::session::{ConversionStatus, Session};
use crate::store::Expect;
use crate::test_support::{complete_metadata, confident_guess, AppBuilder};
use crate::transport::build_router;

#[tokio::test]
async fn start_without_input_is_400() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    let res = server.post("/api/start-conversion").await;
    res.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json();
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    Ok(())
}

#[tokio::test]
async fn start_in_flight_is_409() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    ctx.app
        .store
        .transition(Expect::Any, ConversionStatus::Converting, |s| {
            s.input_path = Some("/tmp/rec.dat".into());
        })
        .map_err(|e| anyhow::anyhow!(e))?;
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    let res = server.post("/api/start-conversion").await;
    res.assert_status(StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn start_with_missing_metadata_returns_the_field_list() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    ctx.seed_upload("rec.dat", b"raw", Default::default()).await;
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    let res = server.post("/api/start-conversion").await;
    res.assert_status_ok();
    let body: serde_json::Value = res.json();
    assert_eq!(body["status"], "awaiting_user_input");
    let fields = body["metadata_request"]["fields"].as_array().unwrap();
    assert_eq!(fields.len(), crate::policy::DANDI_REQUIRED_FIELDS.len());
    assert!(fields.iter().all(|f| f.get("display_name").is_some()));
    Ok(())
}

#[tokio::test]
async fn full_workflow_over_http_reaches_completed() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    ctx.seed_upload("rec.dat", b"raw", complete_metadata()).await;
    ctx.model.push_format(confident_guess("spikeglx"));
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    let res = server.post("/api/start-conversion").await;
    res.assert_status_ok();

    ctx.wait_for_status(ConversionStatus::Completed, Duration::from_secs(5)).await;
    Ok(())
}

#[tokio::test]
async fn user_input_wrong_phase_is_409() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    let res = server
        .post("/api/user-input")
        .json(&serde_json::json!({ "fields": { "sex": "M" } }))
        .await;
    res.assert_status(StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn retry_approval_wrong_phase_is_409_and_attempt_unchanged() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    let res = server
        .post("/api/retry-approval")
        .json(&serde_json::json!({ "approve": true }))
        .await;
    res.assert_status(StatusCode::CONFLICT);
    assert_eq!(ctx.app.store.snapshot().correction_attempt, 0);
    Ok(())
}

#[tokio::test]
async fn improvement_decision_wrong_phase_is_409() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    let res = server
        .post("/api/improvement-decision")
        .json(&serde_json::json!({ "action": "accept_as_is" }))
        .await;
    res.assert_status(StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn reset_zeroes_the_session() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    ctx.seed_upload("rec.dat", b"raw", complete_metadata()).await;
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    let res = server.post("/api/reset").await;
    res.assert_status_ok();
    let body: serde_json::Value = res.json();
    assert_eq!(body["status"], "idle");
    assert_eq!(ctx.app.store.snapshot(), Session::default());
    Ok(())
}

#[tokio::test]
async fn reset_refused_while_in_flight() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    ctx.app
        .store
        .transition(Expect::Any, ConversionStatus::Validating, |_| {})
        .map_err(|e| anyhow::anyhow!(e))?;
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    let res = server.post("/api/reset").await;
    res.assert_status(StatusCode::CONFLICT);
    assert_eq!(ctx.app.store.snapshot().status, ConversionStatus::Validating);
    Ok(())
}

#[tokio::test]
async fn health_and_ready_report_the_session() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    let health: serde_json::Value = server.get("/api/health").await.json();
    assert_eq!(health["status"], "running");

    let ready: serde_json::Value = server.get("/api/ready").await.json();
    assert_eq!(ready["ready"], true);

    ctx.app
        .store
        .transition(Expect::Any, ConversionStatus::Converting, |_| {})
        .map_err(|e| anyhow::anyhow!(e))?;
    let busy: serde_json::Value = server.get("/api/ready").await.json();
    assert_eq!(busy["ready"], false);
    Ok(())
}
