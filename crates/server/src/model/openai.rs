// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OpenAI-compatible structured-output driver.
//!
//! Talks to any `/chat/completions` endpoint that supports
//! `response_format: json_schema`.  Every call carries a deadline; a
//! timeout or non-2xx response surfaces as an error for the caller's
//! fallback path.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::WorkflowError;
use crate::format::{FormatEvidence, FormatGuess};
use crate::session::{Role, ValidationIssue};

use super::{
    ChatTurnOutput, ChatTurnRequest, ErrorExplanation, IssueTriage, LanguageModel,
    MetadataPrompt, MetadataPromptRequest,
};

pub struct OpenAiModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl OpenAiModel {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            timeout,
        }
    }

    /// One structured-output round trip: system prompt, prior messages,
    /// a JSON payload as the final user turn, and a response schema.
    async fn structured<T: DeserializeOwned>(
        &self,
        schema_name: &str,
        schema: serde_json::Value,
        system: &str,
        prior: Vec<serde_json::Value>,
        payload: serde_json::Value,
    ) -> anyhow::Result<T> {
        let mut messages = vec![json!({ "role": "system", "content": system })];
        messages.extend(prior);
        messages.push(json!({ "role": "user", "content": payload.to_string() }));

        let body = json!({
            "model": self.model,
            "messages": messages,
            "response_format": {
                "type": "json_schema",
                "json_schema": { "name": schema_name, "schema": schema, "strict": true },
            },
        });

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| anyhow::anyhow!("language model call timed out after {:?}", self.timeout))?
            .context("language model request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("language model returned {status}: {detail}");
        }

        let value: serde_json::Value = response.json().await?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .context("model response carried no content")?;
        serde_json::from_str(content).context("model output did not match the schema")
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn chat_turn(&self, req: ChatTurnRequest) -> anyhow::Result<ChatTurnOutput> {
        let prior: Vec<serde_json::Value> = req
            .history
            .iter()
            .map(|entry| json!({ "role": role_str(entry.role), "content": entry.content }))
            .collect();

        let schema = json!({
            "type": "object",
            "properties": {
                "message": { "type": "string" },
                "extracted_metadata": { "type": ["object", "null"] },
                "ready_to_proceed": { "type": "boolean" },
                "needs_more_info": { "type": "boolean" },
                "declined_fields": {
                    "type": ["array", "null"],
                    "items": { "type": "string" },
                },
            },
            "required": ["message", "ready_to_proceed", "needs_more_info"],
            "additionalProperties": false,
        });

        self.structured(
            "chat_turn",
            schema,
            "You help a neuroscientist prepare an NWB conversion. Extract any metadata \
             values the user states into extracted_metadata, note fields they refuse in \
             declined_fields, and set ready_to_proceed once conversion should start.",
            prior,
            json!({
                "user_message": req.user_message,
                "current_metadata": req.current_metadata,
                "missing_fields": req.missing_fields,
            }),
        )
        .await
    }

    async fn guess_format(&self, evidence: FormatEvidence) -> anyhow::Result<FormatGuess> {
        let schema = json!({
            "type": "object",
            "properties": {
                "format": { "type": "string" },
                "confidence": { "type": "integer", "minimum": 0, "maximum": 100 },
                "indicators": { "type": "array", "items": { "type": "string" } },
                "alternatives": { "type": "array", "items": { "type": "string" } },
                "ambiguous": { "type": "boolean" },
            },
            "required": ["format", "confidence", "ambiguous"],
            "additionalProperties": false,
        });

        self.structured(
            "format_guess",
            schema,
            "Identify the neurophysiology recording format (spikeglx, openephys, \
             blackrock, intan, ...) from the file listing, sizes, and header samples. \
             Set ambiguous when more than one format fits the evidence.",
            vec![],
            serde_json::to_value(&evidence)?,
        )
        .await
    }

    async fn triage_issue(&self, issue: &ValidationIssue) -> anyhow::Result<IssueTriage> {
        let schema = json!({
            "type": "object",
            "properties": {
                "priority": {
                    "type": "string",
                    "enum": ["dandi_blocking", "best_practices", "nice_to_have"],
                },
                "user_fixable": { "type": "boolean" },
                "dandi_requirement": { "type": "boolean" },
                "explanation": { "type": "string" },
                "suggested_fix": {
                    "type": ["object", "null"],
                    "properties": {
                        "field": { "type": "string" },
                        "value": {},
                    },
                    "required": ["field", "value"],
                },
            },
            "required": ["priority", "user_fixable", "dandi_requirement", "explanation"],
            "additionalProperties": false,
        });

        self.structured(
            "issue_triage",
            schema,
            "Classify this NWB validation issue. user_fixable means the fix needs a \
             value only the experimenter knows; suggested_fix is a converter \
             configuration field we can set mechanically.",
            vec![],
            serde_json::to_value(issue)?,
        )
        .await
    }

    async fn metadata_prompt(&self, req: MetadataPromptRequest) -> anyhow::Result<MetadataPrompt> {
        let schema = json!({
            "type": "object",
            "properties": {
                "fields": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "display_name": { "type": "string" },
                            "description": { "type": "string" },
                            "why_needed": { "type": "string" },
                            "example": { "type": "string" },
                            "field_type": { "type": "string" },
                            "inferred_value": {},
                        },
                        "required": [
                            "name", "display_name", "description",
                            "why_needed", "example", "field_type",
                        ],
                        "additionalProperties": false,
                    },
                },
                "suggestions": { "type": "string" },
                "detected_data_type": { "type": "string" },
            },
            "required": ["fields", "suggestions", "detected_data_type"],
            "additionalProperties": false,
        });

        self.structured(
            "metadata_prompt",
            schema,
            "Refine the metadata request for the user. Keep exactly the given field \
             names; improve descriptions and examples, and fill inferred_value from \
             the auto-extracted metadata where justified.",
            vec![],
            serde_json::to_value(&req)?,
        )
        .await
    }

    async fn explain_error(&self, error: &WorkflowError) -> anyhow::Result<ErrorExplanation> {
        let schema = json!({
            "type": "object",
            "properties": {
                "explanation": { "type": "string" },
                "likely_cause": { "type": "string" },
                "actions": { "type": "array", "items": { "type": "string" } },
                "recoverable": { "type": "boolean" },
            },
            "required": ["explanation", "likely_cause", "actions", "recoverable"],
            "additionalProperties": false,
        });

        self.structured(
            "error_explanation",
            schema,
            "Explain this conversion-workflow error to a neuroscientist in plain \
             language, with concrete next actions.",
            vec![],
            serde_json::to_value(error)?,
        )
        .await
    }
}
