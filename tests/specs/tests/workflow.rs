// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end workflow scenarios over real HTTP and WebSocket transports.

use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;

use axon::session::Severity;
use axon::test_support::{confident_guess, issue};
use axon_specs::Harness;

const WAIT: Duration = Duration::from_secs(10);

/// Sidecar JSON covering every DANDI-required field, so upload
/// auto-extraction satisfies the metadata policy.
async fn write_complete_sidecar(h: &Harness, stem: &str) -> anyhow::Result<()> {
    let sidecar = serde_json::json!({
        "experimenter": "O'Keefe, John",
        "institution": "University College London",
        "subject_id": "rat-11",
        "species": "Rattus norvegicus",
        "sex": "M",
    });
    tokio::fs::write(
        h.ctx.upload_dir.join(format!("{stem}.metadata.json")),
        serde_json::to_vec(&sidecar)?,
    )
    .await?;
    Ok(())
}

/// Drain a WS stream until a `finalized` event or timeout; returns the
/// terminal statuses seen.
async fn collect_finalized(
    ws: &mut (impl futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
          + Unpin),
) -> Vec<String> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        let frame = tokio::time::timeout_at(deadline, ws.next()).await;
        let Ok(Some(Ok(Message::Text(text)))) = frame else {
            break;
        };
        let event: serde_json::Value = match serde_json::from_str(&text) {
            Ok(event) => event,
            Err(_) => continue,
        };
        if event["kind"] == "finalized" {
            if let Some(status) = event["payload"]["terminal_status"].as_str() {
                seen.push(status.to_owned());
            }
            break;
        }
    }
    seen
}

// -- S1: happy path, no metadata needed ---------------------------------------

#[tokio::test]
async fn s1_happy_path_without_metadata_collection() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    write_complete_sidecar(&h, "rec").await?;
    h.ctx.model.push_format(confident_guess("spikeglx"));

    let (mut ws, _) = tokio_tungstenite::connect_async(h.ws_url("")).await?;

    let upload = h.upload("rec.dat", b"raw recording bytes").await?;
    assert_eq!(upload["status"], "uploaded");
    assert!(!upload["checksum"].as_str().unwrap_or_default().is_empty());

    let (status, body) = h.post("/api/start-conversion", serde_json::json!({})).await?;
    assert_eq!(status, 200);
    // Straight into the pipeline, no metadata request.
    assert!(body.get("metadata_request").is_none());

    let done = h.wait_status("completed", WAIT).await?;
    assert_eq!(done["correction_attempt"], 0);
    assert!(done["output_path"].as_str().unwrap_or_default().ends_with("rec_v1.nwb"));

    let (status, validation) = h.get("/api/validation").await?;
    assert_eq!(status, 200);
    assert_eq!(validation["outcome"], "passed");

    assert_eq!(collect_finalized(&mut ws).await, vec!["passed"]);
    Ok(())
}

// -- S2: metadata collection, then happy path ---------------------------------

#[tokio::test]
async fn s2_metadata_collection_then_happy_path() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    h.upload("bare.dat", b"no companions at all").await?;

    let (status, body) = h.post("/api/start-conversion", serde_json::json!({})).await?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "awaiting_user_input");
    let names: Vec<&str> = body["metadata_request"]["fields"]
        .as_array()
        .map(|fields| fields.iter().filter_map(|f| f["name"].as_str()).collect())
        .unwrap_or_default();
    for expected in ["experimenter", "institution", "subject_id", "species", "sex"] {
        assert!(names.contains(&expected), "missing field {expected}");
    }

    h.ctx.model.push_format(confident_guess("openephys"));
    let (status, body) = h
        .post(
            "/api/user-input",
            serde_json::json!({
                "fields": {
                    "experimenter": "Scoville, William",
                    "institution": "Hartford Hospital",
                    "subject_id": "subj-27",
                    "species": "Homo sapiens",
                    "sex": "F",
                }
            }),
        )
        .await?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "detecting_format");

    h.wait_status("completed", WAIT).await?;
    let (_, validation) = h.get("/api/validation").await?;
    assert_eq!(validation["outcome"], "passed");
    Ok(())
}

// -- S3: improvement-accept flow ----------------------------------------------

#[tokio::test]
async fn s3_accept_as_is_after_best_practice_issue() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    write_complete_sidecar(&h, "rec").await?;
    h.ctx.model.push_format(confident_guess("spikeglx"));
    h.ctx
        .validator
        .push_issues(vec![issue(Severity::BestPractice, "add_session_description", "/general")]);

    let (mut ws, _) = tokio_tungstenite::connect_async(h.ws_url("kinds=finalized")).await?;

    h.upload("rec.dat", b"raw").await?;
    h.post("/api/start-conversion", serde_json::json!({})).await?;
    h.wait_status("awaiting_improvement_decision", WAIT).await?;

    let (status, body) = h
        .post("/api/improvement-decision", serde_json::json!({ "action": "accept_as_is" }))
        .await?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "completed");

    // Output and report are downloadable.
    let nwb = h
        .client
        .get(format!("{}/api/download/nwb", h.base_url))
        .send()
        .await?;
    assert_eq!(nwb.status().as_u16(), 200);
    let report = h
        .client
        .get(format!("{}/api/download/report", h.base_url))
        .send()
        .await?;
    assert_eq!(report.status().as_u16(), 200);

    assert_eq!(collect_finalized(&mut ws).await, vec!["passed_accepted"]);
    Ok(())
}

// -- S4: correction loop succeeds ---------------------------------------------

#[tokio::test]
async fn s4_correction_loop_reaches_passed_improved() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    write_complete_sidecar(&h, "rec").await?;
    h.ctx.model.push_format(confident_guess("spikeglx"));
    h.ctx.validator.push_issues(vec![issue(Severity::Error, "missing_subject_sex", "/subject")]);

    h.upload("rec.dat", b"raw").await?;
    h.post("/api/start-conversion", serde_json::json!({})).await?;
    h.wait_status("awaiting_retry_approval", WAIT).await?;

    let v1_bytes = tokio::fs::read(h.ctx.output_dir.join("rec_v1.nwb")).await?;

    // User supplies the fix, then approves the retry.
    let (status, _) = h
        .post("/api/user-input", serde_json::json!({ "fields": { "sex": "M" } }))
        .await?;
    assert_eq!(status, 200);

    let (status, body) = h
        .post("/api/retry-approval", serde_json::json!({ "approve": true }))
        .await?;
    assert_eq!(status, 200);
    assert!(body.get("no_progress_warning").is_none());

    let done = h.wait_status("completed", WAIT).await?;
    assert_eq!(done["correction_attempt"], 1);
    assert!(done["output_path"].as_str().unwrap_or_default().ends_with("rec_v2.nwb"));

    // Older versions stay byte-identical.
    let v1_after = tokio::fs::read(h.ctx.output_dir.join("rec_v1.nwb")).await?;
    assert_eq!(v1_bytes, v1_after);
    assert!(h.ctx.output_dir.join("rec_v2.nwb").exists());

    let (_, validation) = h.get("/api/validation").await?;
    assert_eq!(validation["outcome"], "passed");
    Ok(())
}

// -- S5: no-progress warning --------------------------------------------------

#[tokio::test]
async fn s5_no_progress_warning_blocks_until_retry_anyway() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    write_complete_sidecar(&h, "rec").await?;
    h.ctx.model.push_format(confident_guess("spikeglx"));
    h.ctx.validator.push_issues(vec![issue(Severity::Error, "missing_subject_sex", "/subject")]);
    h.ctx.validator.push_issues(vec![issue(Severity::Error, "missing_subject_sex", "/subject")]);

    h.upload("rec.dat", b"raw").await?;
    h.post("/api/start-conversion", serde_json::json!({})).await?;
    h.wait_status("awaiting_retry_approval", WAIT).await?;

    // First approval runs; the identical issue comes back.
    let (status, first) = h
        .post("/api/retry-approval", serde_json::json!({ "approve": true }))
        .await?;
    assert_eq!(status, 200);
    assert!(first.get("no_progress_warning").is_none());
    h.wait_status("awaiting_retry_approval", WAIT).await?;

    // Second approval with nothing changed: warned, no new attempt.
    let (status, warned) = h
        .post("/api/retry-approval", serde_json::json!({ "approve": true }))
        .await?;
    assert_eq!(status, 200);
    assert_eq!(warned["no_progress_warning"], true);
    assert_eq!(warned["status"], "awaiting_retry_approval");
    let parked = h.get("/api/status").await?.1;
    assert_eq!(parked["correction_attempt"], 1);

    // retry_anyway forces the attempt; the queue is empty now, so it
    // validates clean.
    let (status, forced) = h
        .post(
            "/api/retry-approval",
            serde_json::json!({ "approve": true, "retry_anyway": true }),
        )
        .await?;
    assert_eq!(status, 200);
    assert_eq!(forced["status"], "converting");

    let done = h.wait_status("completed", WAIT).await?;
    assert_eq!(done["correction_attempt"], 2);
    Ok(())
}

// -- S6: user declines retry --------------------------------------------------

#[tokio::test]
async fn s6_declined_retry_keeps_artifacts_downloadable() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    write_complete_sidecar(&h, "rec").await?;
    h.ctx.model.push_format(confident_guess("spikeglx"));
    h.ctx.validator.push_issues(vec![issue(Severity::Error, "missing_electrode_table", "/ecephys")]);

    let (mut ws, _) = tokio_tungstenite::connect_async(h.ws_url("kinds=finalized")).await?;

    h.upload("rec.dat", b"raw").await?;
    h.post("/api/start-conversion", serde_json::json!({})).await?;
    h.wait_status("awaiting_retry_approval", WAIT).await?;

    let (status, body) = h
        .post("/api/retry-approval", serde_json::json!({ "approve": false }))
        .await?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "failed");

    assert_eq!(collect_finalized(&mut ws).await, vec!["failed_user_declined"]);

    // The most recent version and its report remain downloadable.
    let nwb = h
        .client
        .get(format!("{}/api/download/nwb", h.base_url))
        .send()
        .await?;
    assert_eq!(nwb.status().as_u16(), 200);
    let report = h
        .client
        .get(format!("{}/api/download/report", h.base_url))
        .send()
        .await?;
    assert_eq!(report.status().as_u16(), 200);
    let report: serde_json::Value = report.json().await?;
    assert_eq!(report["outcome"], "failed");
    Ok(())
}

// -- Event stream contract ----------------------------------------------------

#[tokio::test]
async fn events_stream_backfills_and_filters() -> anyhow::Result<()> {
    let h = Harness::start().await?;

    // A late joiner immediately learns the current status.
    let (mut ws, _) = tokio_tungstenite::connect_async(h.ws_url("")).await?;
    let first = tokio::time::timeout(WAIT, ws.next()).await?;
    let Some(Ok(Message::Text(text))) = first else {
        anyhow::bail!("no backfill frame");
    };
    let event: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(event["kind"], "status_update");
    assert_eq!(event["payload"]["status"], "idle");
    assert!(event["timestamp"].as_u64().unwrap_or_default() > 0);

    // A filtered subscriber only sees the requested kinds.
    let (mut filtered, _) =
        tokio_tungstenite::connect_async(h.ws_url("kinds=conversation_message")).await?;
    h.upload("rec.dat", b"raw").await?;
    h.post("/api/start-conversion", serde_json::json!({})).await?;
    h.wait_status("awaiting_user_input", WAIT).await?;

    let frame = tokio::time::timeout(WAIT, filtered.next()).await?;
    let Some(Ok(Message::Text(text))) = frame else {
        anyhow::bail!("no conversation frame");
    };
    let event: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(event["kind"], "conversation_message");
    assert_eq!(event["payload"]["role"], "assistant");
    Ok(())
}

// -- Busy / boundary checks over the wire -------------------------------------

#[tokio::test]
async fn upload_while_parked_is_accepted_and_restarts() -> anyhow::Result<()> {
    let h = Harness::start().await?;
    h.upload("first.dat", b"one").await?;
    h.post("/api/start-conversion", serde_json::json!({})).await?;
    h.wait_status("awaiting_user_input", WAIT).await?;

    // Parked sessions accept a new upload, which restarts the workflow.
    let body = h.upload("second.dat", b"two").await?;
    assert_eq!(body["status"], "uploaded");
    let status = h.get("/api/status").await?.1;
    assert_eq!(status["metadata_policy"], "not_asked");
    Ok(())
}
