// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session value and the workflow enums.
//!
//! A process holds exactly one [`Session`], owned by
//! [`SessionStore`](crate::store::SessionStore).  Everything here is plain
//! data: agents read snapshots and mutate through the store's transition
//! API, never through shared references.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Workflow status of the single active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    #[default]
    Idle,
    Uploading,
    Uploaded,
    DetectingFormat,
    AwaitingUserInput,
    Converting,
    Validating,
    AwaitingRetryApproval,
    AwaitingImprovementDecision,
    Completed,
    Failed,
}

impl ConversionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Uploading => "uploading",
            Self::Uploaded => "uploaded",
            Self::DetectingFormat => "detecting_format",
            Self::AwaitingUserInput => "awaiting_user_input",
            Self::Converting => "converting",
            Self::Validating => "validating",
            Self::AwaitingRetryApproval => "awaiting_retry_approval",
            Self::AwaitingImprovementDecision => "awaiting_improvement_decision",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the workflow is mid-step: uploads and resets are refused and
    /// no second conversion may start while one of these is held.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Uploading | Self::DetectingFormat | Self::Converting | Self::Validating
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of validating one output version.  Produced only by the
/// evaluation agent; distinct from the terminal status recorded at
/// finalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    Passed,
    PassedWithIssues,
    Failed,
}

/// Which stage of the user-facing conversation the session is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    #[default]
    Idle,
    MetadataCollection,
    ValidationAnalysis,
    ImprovementDecision,
}

/// Where the metadata-collection dialogue stands.  Asked at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetadataRequestPolicy {
    #[default]
    NotAsked,
    AskedOnce,
    UserProvided,
    UserDeclined,
    ProceedingMinimal,
}

/// Terminal disposition recorded in the `finalized` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Passed,
    PassedImproved,
    PassedAccepted,
    FailedUserDeclined,
    FailedUserAbandoned,
}

impl TerminalStatus {
    /// Any `passed_*` disposition completes the session; the rest fail it.
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed | Self::PassedImproved | Self::PassedAccepted)
    }

    pub fn final_status(&self) -> ConversionStatus {
        if self.is_passed() {
            ConversionStatus::Completed
        } else {
            ConversionStatus::Failed
        }
    }
}

/// Chat participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry in the rolling conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: Role,
    pub content: String,
}

/// Validator issue severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    BestPractice,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// `ERROR` and above fail the validation outright.
    pub fn is_blocking(&self) -> bool {
        *self >= Self::Error
    }
}

/// One issue as reported by the external validator, verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    /// Stable issue code used for no-progress comparison.
    pub code: String,
    pub message: String,
    pub location: String,
}

impl ValidationIssue {
    /// Canonical identity used for set-equality between attempts.
    pub fn key(&self) -> (String, String) {
        (self.code.clone(), self.location.clone())
    }
}

/// Triage priority assigned by the language model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuePriority {
    DandiBlocking,
    BestPractices,
    NiceToHave,
}

/// A machine-applicable fix suggested for an issue: set one converter
/// configuration field to a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedFix {
    pub field: String,
    pub value: serde_json::Value,
}

/// A validator issue enriched by the language-model triage pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriagedIssue {
    #[serde(flatten)]
    pub issue: ValidationIssue,
    pub priority: IssuePriority,
    pub user_fixable: bool,
    pub dandi_requirement: bool,
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<SuggestedFix>,
}

/// Issue counts by severity, for the status snapshot and event summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IssueCounts {
    pub critical: usize,
    pub error: usize,
    pub warning: usize,
    pub best_practice: usize,
    pub info: usize,
}

impl IssueCounts {
    pub fn tally(issues: &[ValidationIssue]) -> Self {
        let mut counts = Self::default();
        for issue in issues {
            match issue.severity {
                Severity::Critical => counts.critical += 1,
                Severity::Error => counts.error += 1,
                Severity::Warning => counts.warning += 1,
                Severity::BestPractice => counts.best_practice += 1,
                Severity::Info => counts.info += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.critical + self.error + self.warning + self.best_practice + self.info
    }
}

/// Full validation result for one output version: the raw validator list
/// retained verbatim, plus the triaged list from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub outcome: ValidationOutcome,
    pub counts: IssueCounts,
    pub issues: Vec<ValidationIssue>,
    pub triaged: Vec<TriagedIssue>,
}

impl ValidationReport {
    /// Canonical `(code, location)` set for no-progress detection.
    pub fn issue_keys(&self) -> BTreeSet<(String, String)> {
        self.issues.iter().map(ValidationIssue::key).collect()
    }
}

/// Metadata layer: field name to JSON value.  `BTreeMap` keeps snapshots
/// and serialised payloads byte-stable across reads.
pub type MetadataMap = BTreeMap<String, serde_json::Value>;

/// The single process-wide session value.
///
/// `Default` is the zero value: `reset` replaces the whole session with it
/// in one step, and every field below is covered by that contract.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Session {
    // Identity & lifecycle (epoch milliseconds; 0 = never).
    pub created_at: u64,
    pub updated_at: u64,

    // Workflow status.
    pub status: ConversionStatus,
    pub validation_outcome: Option<ValidationOutcome>,
    pub conversation_phase: ConversationPhase,
    pub metadata_policy: MetadataRequestPolicy,

    // Inputs.
    pub input_path: Option<PathBuf>,
    pub uploaded_filenames: Vec<String>,
    pub pending_conversion_input_path: Option<PathBuf>,
    pub input_checksum: Option<String>,

    // Metadata layers.  `effective_metadata` is derived, never stored.
    pub auto_extracted_metadata: MetadataMap,
    pub user_provided_metadata: MetadataMap,

    // Detected input format, once accepted.
    pub detected_format: Option<String>,

    // Conversion output.
    pub output_path: Option<PathBuf>,
    pub output_checksums: BTreeMap<String, String>,
    pub correction_attempt: u32,

    // Converter configuration accumulated from applied corrections.
    pub parameter_changes: MetadataMap,

    // Validation result for the current output version.
    pub validation_report: Option<ValidationReport>,

    // Retry / no-progress tracking.
    pub previous_validation_issues: BTreeSet<(String, String)>,
    pub user_provided_input_this_attempt: bool,
    pub auto_corrections_applied_this_attempt: bool,

    // Conversation.
    pub declined_fields: BTreeSet<String>,
}

impl Session {
    /// Merge the metadata layers: auto-extracted values overlaid by
    /// user-provided ones.  Pure; recomputed per request.
    pub fn effective_metadata(&self) -> MetadataMap {
        let mut merged = self.auto_extracted_metadata.clone();
        for (key, value) in &self.user_provided_metadata {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }
}

/// Return the current UTC time as milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
