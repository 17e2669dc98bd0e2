// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Evaluation agent: runs the external validator, derives the outcome,
//! and enriches issues through the language-model triage pass.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::bus::{
    AgentRequest, Bus, BusResult, ConversationAction, EvaluationAction, RequestContext,
};
use crate::error::WorkflowError;
use crate::model::{fallback_triage, LanguageModel};
use crate::session::{
    IssueCounts, Severity, TriagedIssue, ValidationIssue, ValidationOutcome, ValidationReport,
};
use crate::store::SessionStore;

/// External NWB validation capability.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, path: &Path) -> anyhow::Result<Vec<ValidationIssue>>;
}

/// Validator that shells out to a configured command with the NWB path as
/// its final argument and reads a JSON issue list from stdout.
pub struct CommandValidator {
    program: String,
    args: Vec<String>,
}

impl CommandValidator {
    pub fn new(command: &[String]) -> Result<Self, WorkflowError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| WorkflowError::bad_request("validator command is empty"))?;
        Ok(Self { program: program.clone(), args: args.to_vec() })
    }
}

#[async_trait]
impl Validator for CommandValidator {
    async fn validate(&self, path: &Path) -> anyhow::Result<Vec<ValidationIssue>> {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("validator exited with {}: {}", output.status, stderr.trim());
        }
        parse_issues(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse a validator's JSON issue list, tolerating unknown severities.
/// An unrecognised severity is logged and read as `warning` — never
/// guessed into a pass or a fail.
pub fn parse_issues(stdout: &str) -> anyhow::Result<Vec<ValidationIssue>> {
    let values: Vec<serde_json::Value> = serde_json::from_str(stdout.trim())?;
    let mut issues = Vec::with_capacity(values.len());
    for value in values {
        let severity_raw = value["severity"].as_str().unwrap_or("warning").to_owned();
        let severity = match severity_raw.to_lowercase().as_str() {
            "info" => Severity::Info,
            "best_practice" | "best_practice_violation" => Severity::BestPractice,
            "warning" => Severity::Warning,
            "error" => Severity::Error,
            "critical" => Severity::Critical,
            other => {
                warn!(severity = other, "unknown validator severity, treating as warning");
                Severity::Warning
            }
        };
        issues.push(ValidationIssue {
            severity,
            code: value["code"].as_str().unwrap_or("unspecified").to_owned(),
            message: value["message"].as_str().unwrap_or_default().to_owned(),
            location: value["location"].as_str().unwrap_or("/").to_owned(),
        });
    }
    Ok(issues)
}

/// Outcome rule: any issue at `error` or above fails; only
/// warning/best-practice/info passes with issues; an empty list passes.
pub fn derive_outcome(issues: &[ValidationIssue]) -> ValidationOutcome {
    if issues.is_empty() {
        ValidationOutcome::Passed
    } else if issues.iter().any(|i| i.severity.is_blocking()) {
        ValidationOutcome::Failed
    } else {
        ValidationOutcome::PassedWithIssues
    }
}

/// The synthetic issue emitted when the validator itself is unusable.
pub fn validator_unavailable_issue() -> ValidationIssue {
    ValidationIssue {
        severity: Severity::Error,
        code: "validator_unavailable".to_owned(),
        message: "validator_unavailable".to_owned(),
        location: "/".to_owned(),
    }
}

pub struct EvaluationAgent {
    store: Arc<SessionStore>,
    model: Arc<dyn LanguageModel>,
    validator: Arc<dyn Validator>,
    validator_timeout: Duration,
    model_timeout: Duration,
}

impl EvaluationAgent {
    pub fn new(
        store: Arc<SessionStore>,
        model: Arc<dyn LanguageModel>,
        validator: Arc<dyn Validator>,
        validator_timeout: Duration,
        model_timeout: Duration,
    ) -> Self {
        Self { store, model, validator, validator_timeout, model_timeout }
    }

    pub async fn handle(
        &self,
        action: EvaluationAction,
        bus: &Arc<Bus>,
        ctx: RequestContext,
    ) -> BusResult {
        match action {
            EvaluationAction::RunValidation => self.run_validation(bus, ctx).await,
        }
    }

    async fn run_validation(&self, bus: &Arc<Bus>, ctx: RequestContext) -> BusResult {
        let session = self.store.snapshot();
        let output_path = session
            .output_path
            .clone()
            .ok_or_else(|| WorkflowError::fatal("validation requested with no output file"))?;

        let deadline = ctx.deadline.unwrap_or(self.validator_timeout);
        let issues =
            match tokio::time::timeout(deadline, self.validator.validate(&output_path)).await {
                Ok(Ok(issues)) => issues,
                Ok(Err(e)) => {
                    warn!(error = %e, "validator failed, emitting synthetic failure");
                    vec![validator_unavailable_issue()]
                }
                Err(_) => {
                    warn!("validator timed out, emitting synthetic failure");
                    vec![validator_unavailable_issue()]
                }
            };

        let outcome = derive_outcome(&issues);
        let triaged = self.triage_all(&issues).await;

        let report = ValidationReport {
            outcome,
            counts: IssueCounts::tally(&issues),
            issues,
            triaged,
        };

        self.store.set_validation_result(report.clone());

        bus.send(
            AgentRequest::Conversation(ConversationAction::ReceiveValidationResult { report }),
            ctx,
        )
        .await
    }

    /// Enrich each raw issue through the model; a triage failure falls
    /// back to the severity-derived default rather than dropping the
    /// issue.  Determinism is not required here — the raw list is what
    /// no-progress comparison uses.
    async fn triage_all(&self, issues: &[ValidationIssue]) -> Vec<TriagedIssue> {
        let mut triaged = Vec::with_capacity(issues.len());
        for issue in issues {
            let result =
                tokio::time::timeout(self.model_timeout, self.model.triage_issue(issue)).await;
            let triage = match result {
                Ok(Ok(triage)) => triage,
                Ok(Err(e)) => {
                    warn!(code = %issue.code, error = %e, "triage failed, using fallback");
                    fallback_triage(issue)
                }
                Err(_) => {
                    warn!(code = %issue.code, "triage timed out, using fallback");
                    fallback_triage(issue)
                }
            };
            triaged.push(TriagedIssue {
                issue: issue.clone(),
                priority: triage.priority,
                user_fixable: triage.user_fixable,
                dandi_requirement: triage.dandi_requirement,
                explanation: triage.explanation,
                suggested_fix: triage.suggested_fix,
            });
        }
        triaged
    }
}

#[cfg(test)]
#[path = "evaluate_tests.rs"]
mod tests;
