// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Language-model capability.
//!
//! The core consumes a small set of structured-output calls; providers
//! implement them however they like.  `OpenAiModel` drives any
//! OpenAI-compatible chat-completions endpoint; `ScriptedModel` is the
//! deterministic test double.  Callers own their deterministic fallbacks —
//! a provider error never takes the workflow down.

mod mock;
mod openai;

pub use mock::ScriptedModel;
pub use openai::OpenAiModel;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;
use crate::format::{FormatEvidence, FormatGuess};
use crate::metadata::FieldSpec;
use crate::session::{ChatEntry, IssuePriority, MetadataMap, SuggestedFix, ValidationIssue};

/// One conversational turn sent to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurnRequest {
    pub user_message: String,
    /// Bounded history snapshot (the rolling window, never the live list).
    pub history: Vec<ChatEntry>,
    pub current_metadata: MetadataMap,
    pub missing_fields: Vec<String>,
}

/// Structured output of a conversational turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurnOutput {
    pub message: String,
    #[serde(default)]
    pub extracted_metadata: Option<MetadataMap>,
    pub ready_to_proceed: bool,
    pub needs_more_info: bool,
    #[serde(default)]
    pub declined_fields: Option<Vec<String>>,
}

/// Structured triage of one validator issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueTriage {
    pub priority: IssuePriority,
    pub user_fixable: bool,
    pub dandi_requirement: bool,
    pub explanation: String,
    #[serde(default)]
    pub suggested_fix: Option<SuggestedFix>,
}

/// Request for the metadata-collection prompt.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataPromptRequest {
    pub missing: Vec<FieldSpec>,
    pub auto_extracted: MetadataMap,
}

/// Model-refined metadata prompt: the fixed field set with descriptions,
/// examples, and inferred values filled in, plus free-text suggestions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataPrompt {
    pub fields: Vec<FieldSpec>,
    pub suggestions: String,
    pub detected_data_type: String,
}

/// User-facing explanation of a workflow error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorExplanation {
    pub explanation: String,
    pub likely_cause: String,
    pub actions: Vec<String>,
    pub recoverable: bool,
}

/// Structured-output language model capability.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider name for logs and status display.
    fn name(&self) -> &str;

    /// One conversational turn with metadata extraction.
    async fn chat_turn(&self, req: ChatTurnRequest) -> anyhow::Result<ChatTurnOutput>;

    /// Guess the recording format from directory evidence.
    async fn guess_format(&self, evidence: FormatEvidence) -> anyhow::Result<FormatGuess>;

    /// Prioritise and explain one validator issue.
    async fn triage_issue(&self, issue: &ValidationIssue) -> anyhow::Result<IssueTriage>;

    /// Refine the metadata-request field list.
    async fn metadata_prompt(&self, req: MetadataPromptRequest) -> anyhow::Result<MetadataPrompt>;

    /// Turn a typed workflow error into a user-facing explanation.
    async fn explain_error(&self, error: &WorkflowError) -> anyhow::Result<ErrorExplanation>;
}

/// Deterministic fallback when the model cannot explain an error.
pub fn fallback_explanation(error: &WorkflowError) -> ErrorExplanation {
    ErrorExplanation {
        explanation: format!("The conversion service hit a problem: {}", error.message),
        likely_cause: format!("{} from a workflow dependency", error.kind),
        actions: vec![
            "Review the message above".to_owned(),
            "Retry the operation, or reset the session and start over".to_owned(),
        ],
        recoverable: error.kind != crate::error::ErrorKind::Fatal,
    }
}

/// Deterministic fallback triage derived from the issue severity alone.
pub fn fallback_triage(issue: &ValidationIssue) -> IssueTriage {
    use crate::session::Severity;
    let priority = match issue.severity {
        Severity::Critical | Severity::Error => IssuePriority::DandiBlocking,
        Severity::Warning | Severity::BestPractice => IssuePriority::BestPractices,
        Severity::Info => IssuePriority::NiceToHave,
    };
    IssueTriage {
        priority,
        user_fixable: false,
        dandi_requirement: issue.severity.is_blocking(),
        explanation: issue.message.clone(),
        suggested_fix: None,
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
