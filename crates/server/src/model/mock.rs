// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-scripted language model for deterministic tests.
//!
//! Each call pops the next script for that method; an empty queue yields a
//! safe default.  `hold_chat` installs a zero-permit gate so tests can keep
//! a chat turn parked inside the provider while probing the single-flight
//! guard.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::error::WorkflowError;
use crate::format::{FormatEvidence, FormatGuess};
use crate::session::ValidationIssue;

use super::{
    fallback_triage, ChatTurnOutput, ChatTurnRequest, ErrorExplanation, IssueTriage,
    LanguageModel, MetadataPrompt, MetadataPromptRequest,
};

#[derive(Default)]
struct Scripts {
    chat: VecDeque<Result<ChatTurnOutput, String>>,
    format: VecDeque<Result<FormatGuess, String>>,
    triage: VecDeque<Result<IssueTriage, String>>,
    prompt: VecDeque<Result<MetadataPrompt, String>>,
    explain: VecDeque<Result<ErrorExplanation, String>>,
}

/// Deterministic scripted model.
#[derive(Default)]
pub struct ScriptedModel {
    scripts: Mutex<Scripts>,
    chat_gate: Mutex<Option<Arc<Semaphore>>>,
    chat_calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_chat(&self, output: ChatTurnOutput) {
        self.scripts.lock().chat.push_back(Ok(output));
    }

    pub fn fail_next_chat(&self, message: impl Into<String>) {
        self.scripts.lock().chat.push_back(Err(message.into()));
    }

    pub fn push_format(&self, guess: FormatGuess) {
        self.scripts.lock().format.push_back(Ok(guess));
    }

    pub fn push_triage(&self, triage: IssueTriage) {
        self.scripts.lock().triage.push_back(Ok(triage));
    }

    pub fn fail_next_triage(&self, message: impl Into<String>) {
        self.scripts.lock().triage.push_back(Err(message.into()));
    }

    pub fn push_prompt(&self, prompt: MetadataPrompt) {
        self.scripts.lock().prompt.push_back(Ok(prompt));
    }

    pub fn push_explanation(&self, explanation: ErrorExplanation) {
        self.scripts.lock().explain.push_back(Ok(explanation));
    }

    pub fn fail_next_explanation(&self, message: impl Into<String>) {
        self.scripts.lock().explain.push_back(Err(message.into()));
    }

    /// Install a gate the next chat turns must pass.  Returns the
    /// semaphore; tests call `add_permits` to release parked turns.
    pub fn hold_chat(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.chat_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// How many chat turns actually reached the provider.
    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::Acquire)
    }
}

fn lift<T>(scripted: Option<Result<T, String>>, default: T) -> anyhow::Result<T> {
    match scripted {
        Some(Ok(value)) => Ok(value),
        Some(Err(message)) => Err(anyhow::anyhow!(message)),
        None => Ok(default),
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat_turn(&self, req: ChatTurnRequest) -> anyhow::Result<ChatTurnOutput> {
        self.chat_calls.fetch_add(1, Ordering::AcqRel);
        let gate = self.chat_gate.lock().clone();
        if let Some(gate) = gate {
            let permit = gate.acquire().await?;
            permit.forget();
        }
        let scripted = self.scripts.lock().chat.pop_front();
        lift(
            scripted,
            ChatTurnOutput {
                message: format!("noted: {}", req.user_message),
                extracted_metadata: None,
                ready_to_proceed: false,
                needs_more_info: true,
                declined_fields: None,
            },
        )
    }

    async fn guess_format(&self, _evidence: FormatEvidence) -> anyhow::Result<FormatGuess> {
        let scripted = self.scripts.lock().format.pop_front();
        lift(
            scripted,
            FormatGuess {
                format: "unknown".to_owned(),
                confidence: 0,
                indicators: vec![],
                alternatives: vec![],
                ambiguous: true,
            },
        )
    }

    async fn triage_issue(&self, issue: &ValidationIssue) -> anyhow::Result<IssueTriage> {
        let scripted = self.scripts.lock().triage.pop_front();
        lift(scripted, fallback_triage(issue))
    }

    async fn metadata_prompt(&self, req: MetadataPromptRequest) -> anyhow::Result<MetadataPrompt> {
        let scripted = self.scripts.lock().prompt.pop_front();
        lift(
            scripted,
            MetadataPrompt {
                fields: req.missing,
                suggestions: String::new(),
                detected_data_type: "electrophysiology".to_owned(),
            },
        )
    }

    async fn explain_error(&self, error: &WorkflowError) -> anyhow::Result<ErrorExplanation> {
        let scripted = self.scripts.lock().explain.pop_front();
        lift(scripted, super::fallback_explanation(error))
    }
}
