// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;

use crate::session::{ConversionStatus, IssueCounts, Severity, ValidationOutcome, ValidationReport};
use crate::store::Expect;
use crate::test_support::{issue, AppBuilder};
use crate::transport::build_router;

#[tokio::test]
async fn status_snapshot_reflects_the_session() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    ctx.seed_upload("rec.dat", b"raw", Default::default()).await;
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    let body: serde_json::Value = server.get("/api/status").await.json();
    assert_eq!(body["status"], "uploaded");
    assert_eq!(body["phase"], "idle");
    assert_eq!(body["correction_attempt"], 0);
    assert_eq!(body["can_retry"], false);
    assert!(body["input_checksum"].is_string());
    Ok(())
}

#[tokio::test]
async fn consecutive_status_reads_are_byte_equal() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    ctx.seed_upload("rec.dat", b"raw", Default::default()).await;
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    let first = server.get("/api/status").await.text();
    let second = server.get("/api/status").await.text();
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn validation_404_before_any_report() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    server.get("/api/validation").await.assert_status(StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn validation_returns_raw_and_triaged_lists() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    let raw = issue(Severity::Warning, "check_times", "/acquisition");
    let report = ValidationReport {
        outcome: ValidationOutcome::PassedWithIssues,
        counts: IssueCounts::tally(std::slice::from_ref(&raw)),
        issues: vec![raw.clone()],
        triaged: vec![crate::session::TriagedIssue {
            issue: raw,
            priority: crate::session::IssuePriority::BestPractices,
            user_fixable: false,
            dandi_requirement: false,
            explanation: "timestamps look irregular".to_owned(),
            suggested_fix: None,
        }],
    };
    ctx.app.store.set_validation_result(report);
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    let res = server.get("/api/validation").await;
    res.assert_status_ok();
    let body: serde_json::Value = res.json();
    assert_eq!(body["outcome"], "passed_with_issues");
    assert_eq!(body["issues"][0]["code"], "check_times");
    assert_eq!(body["triaged"][0]["explanation"], "timestamps look irregular");
    assert_eq!(body["counts"]["warning"], 1);
    Ok(())
}

#[tokio::test]
async fn status_shows_outcome_after_validation() -> anyhow::Result<()> {
    let ctx = AppBuilder::new().build();
    let raw = issue(Severity::Error, "missing_sex", "/subject");
    ctx.app.store.set_validation_result(ValidationReport {
        outcome: ValidationOutcome::Failed,
        counts: IssueCounts::tally(std::slice::from_ref(&raw)),
        issues: vec![raw],
        triaged: vec![],
    });
    ctx.app
        .store
        .transition(Expect::Any, ConversionStatus::AwaitingRetryApproval, |_| {})
        .map_err(|e| anyhow::anyhow!(e))?;
    let server = axum_test::TestServer::new(build_router(ctx.app.clone()))?;

    let body: serde_json::Value = server.get("/api/status").await.json();
    assert_eq!(body["status"], "awaiting_retry_approval");
    assert_eq!(body["validation_outcome"], "failed");
    assert_eq!(body["validation_counts"]["error"], 1);
    Ok(())
}
