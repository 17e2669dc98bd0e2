// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end harness: an in-process axon server with scripted
//! capabilities, driven over real HTTP and WebSocket connections.

use std::time::Duration;

use base64::Engine;

use axon::test_support::{AppBuilder, AppCtx};

pub struct Harness {
    pub ctx: AppCtx,
    pub base_url: String,
    pub client: reqwest::Client,
    _server: tokio::task::JoinHandle<()>,
}

impl Harness {
    /// Build a fresh application and serve it on a random local port.
    pub async fn start() -> anyhow::Result<Self> {
        let ctx = AppBuilder::new().build();
        let (addr, server) = axon::test_support::spawn_http_server(ctx.app.clone()).await?;
        Ok(Self {
            ctx,
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            _server: server,
        })
    }

    pub fn ws_url(&self, query: &str) -> String {
        let ws_base = self.base_url.replacen("http://", "ws://", 1);
        if query.is_empty() {
            format!("{ws_base}/events")
        } else {
            format!("{ws_base}/events?{query}")
        }
    }

    pub async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> anyhow::Result<(u16, serde_json::Value)> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(&body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        Ok((status, body))
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<(u16, serde_json::Value)> {
        let response = self.client.get(format!("{}{path}", self.base_url)).send().await?;
        let status = response.status().as_u16();
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        Ok((status, body))
    }

    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> anyhow::Result<serde_json::Value> {
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        let (status, body) = self
            .post("/api/upload", serde_json::json!({ "filename": filename, "data": data }))
            .await?;
        anyhow::ensure!(status == 202, "upload returned {status}: {body}");
        Ok(body)
    }

    /// Poll `/api/status` until it reports `status` or the deadline hits.
    pub async fn wait_status(&self, status: &str, timeout: Duration) -> anyhow::Result<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let (_, body) = self.get("/api/status").await?;
            if body["status"] == status {
                return Ok(body);
            }
            anyhow::ensure!(
                tokio::time::Instant::now() < deadline,
                "never reached {status}, still {}",
                body["status"],
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
