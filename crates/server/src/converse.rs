// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Conversation agent: the user-facing workflow orchestrator.
//!
//! Owns metadata collection, retry and improvement decisions, error
//! surfacing, finalisation, and report rendering.  Long pipeline stages
//! (detect → convert → validate) are dispatched onto the bus from a
//! background task; the recovery wrapper guarantees the session never
//! stays stuck in `converting`/`validating` after a failure.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::bus::{
    AgentRequest, AgentResponse, Bus, BusResult, ChatStatus, ChatTurn, ConversationAction,
    ConversionAction, Corrections, ImprovementAction, MetadataRequest, RequestContext,
    RetryOutcome, StartOutcome,
};
use crate::error::WorkflowError;
use crate::events::WorkflowEvent;
use crate::metadata::{self, FieldSpec};
use crate::model::{
    fallback_explanation, ChatTurnRequest, LanguageModel, MetadataPrompt, MetadataPromptRequest,
};
use crate::policy;
use crate::report::Reporter;
use crate::session::{
    ConversationPhase, ConversionStatus, IssueCounts, MetadataMap, MetadataRequestPolicy, Role,
    Session, Severity, TerminalStatus, ValidationIssue, ValidationOutcome, ValidationReport,
};
use crate::store::{Expect, SessionStore};

pub struct ConversationAgent {
    store: Arc<SessionStore>,
    model: Arc<dyn LanguageModel>,
    reporter: Arc<dyn Reporter>,
    model_timeout: Duration,
}

impl ConversationAgent {
    pub fn new(
        store: Arc<SessionStore>,
        model: Arc<dyn LanguageModel>,
        reporter: Arc<dyn Reporter>,
        model_timeout: Duration,
    ) -> Self {
        Self { store, model, reporter, model_timeout }
    }

    pub async fn handle(
        &self,
        action: ConversationAction,
        bus: &Arc<Bus>,
        ctx: RequestContext,
    ) -> BusResult {
        match action {
            ConversationAction::StartConversion => self.start_conversion(bus).await,
            ConversationAction::ChatMessage { text } => self.chat_message(text, bus, ctx).await,
            ConversationAction::UserInput { fields, cancel } => {
                self.user_input(fields, cancel, bus).await
            }
            ConversationAction::RetryDecision { approve, retry_anyway } => {
                self.retry_decision(approve, retry_anyway, bus).await
            }
            ConversationAction::ImprovementDecision { action } => {
                self.improvement_decision(action, bus).await
            }
            ConversationAction::ReceiveValidationResult { report } => {
                self.receive_validation_result(report).await
            }
        }
    }

    // -- start_conversion -----------------------------------------------------

    async fn start_conversion(&self, bus: &Arc<Bus>) -> BusResult {
        let snapshot = self.store.snapshot();
        if snapshot.input_path.is_none() {
            return Err(WorkflowError::bad_request("no input uploaded"));
        }
        if !policy::can_start_conversion(&snapshot) {
            return Err(WorkflowError::bad_transition(
                ConversionStatus::Uploaded,
                snapshot.status,
            ));
        }

        if policy::should_request_metadata(&snapshot) {
            let prompt = self.build_metadata_prompt(&snapshot).await;
            let parked = self.store.transition(
                Expect::At(snapshot.status),
                ConversionStatus::AwaitingUserInput,
                |s| {
                    s.conversation_phase = ConversationPhase::MetadataCollection;
                    s.metadata_policy = MetadataRequestPolicy::AskedOnce;
                },
            )?;
            self.store.append_message(
                Role::Assistant,
                metadata_request_message(&prompt),
            );
            return Ok(AgentResponse::Started(StartOutcome {
                status: parked.status,
                metadata_request: Some(MetadataRequest {
                    fields: prompt.fields,
                    suggestions: prompt.suggestions,
                    detected_data_type: prompt.detected_data_type,
                }),
            }));
        }

        let started = self.store.transition(
            Expect::At(snapshot.status),
            ConversionStatus::DetectingFormat,
            |s| {
                s.conversation_phase = ConversationPhase::Idle;
            },
        )?;
        self.spawn_pipeline(bus, AgentRequest::Conversion(ConversionAction::DetectFormat));
        Ok(AgentResponse::Started(StartOutcome { status: started.status, metadata_request: None }))
    }

    /// Refine the missing-field list through the model; the fixed field
    /// set and baseline descriptions stand in when the model is down.
    async fn build_metadata_prompt(&self, session: &Session) -> MetadataPrompt {
        let missing = policy::missing_dandi_fields(session);
        let specs: Vec<FieldSpec> = metadata::baseline_field_specs()
            .into_iter()
            .filter(|spec| missing.contains(&spec.name.as_str()))
            .collect();
        let request = MetadataPromptRequest {
            missing: specs.clone(),
            auto_extracted: session.auto_extracted_metadata.clone(),
        };
        match tokio::time::timeout(self.model_timeout, self.model.metadata_prompt(request)).await {
            Ok(Ok(mut prompt)) => {
                // The required set is fixed by DANDI rules: drop any field
                // the model invented, restore any it dropped.
                prompt.fields.retain(|f| missing.contains(&f.name.as_str()));
                for spec in specs {
                    if !prompt.fields.iter().any(|f| f.name == spec.name) {
                        prompt.fields.push(spec);
                    }
                }
                prompt
            }
            Ok(Err(e)) => {
                warn!(error = %e, "metadata prompt generation failed, using baseline");
                baseline_prompt(specs)
            }
            Err(_) => {
                warn!("metadata prompt generation timed out, using baseline");
                baseline_prompt(specs)
            }
        }
    }

    // -- chat_message ---------------------------------------------------------

    async fn chat_message(&self, text: String, bus: &Arc<Bus>, ctx: RequestContext) -> BusResult {
        // Single-flight: a held guard answers busy without queueing or
        // touching the session.
        let Some(_guard) = self.store.try_begin_chat() else {
            return Ok(AgentResponse::Chat(ChatTurn {
                message: "another message is being processed".to_owned(),
                status: ChatStatus::Busy,
                needs_more_info: false,
                ready_to_proceed: false,
                extracted_metadata: None,
            }));
        };

        self.store.append_message(Role::User, text.clone());
        let snapshot = self.store.snapshot();
        let history = self.store.history_snapshot();

        let request = ChatTurnRequest {
            user_message: text,
            history,
            current_metadata: snapshot.effective_metadata(),
            missing_fields: policy::missing_dandi_fields(&snapshot)
                .into_iter()
                .map(str::to_owned)
                .collect(),
        };

        let deadline = ctx.deadline.unwrap_or(self.model_timeout);
        let output = match tokio::time::timeout(deadline, self.model.chat_turn(request)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                let turn = self.chat_error_turn(
                    WorkflowError::dependency("language model", e.to_string()),
                ).await;
                return Ok(AgentResponse::Chat(turn));
            }
            // A deadline miss maps to 504 at the HTTP edge.
            Err(_) => return Err(WorkflowError::timeout("language model")),
        };

        // Persist extracted metadata before anything branches on
        // ready_to_proceed; a retried turn is a no-op on persisted keys.
        let extracted = output.extracted_metadata.clone().unwrap_or_default();
        if !extracted.is_empty() {
            self.store.mutate(|s| {
                for (key, value) in &extracted {
                    s.user_provided_metadata.insert(key.clone(), value.clone());
                }
                s.user_provided_input_this_attempt = true;
                s.metadata_policy = MetadataRequestPolicy::UserProvided;
            });
        }
        if let Some(declined) = &output.declined_fields {
            if !declined.is_empty() {
                self.store.mutate(|s| {
                    s.declined_fields.extend(declined.iter().cloned());
                    s.metadata_policy = MetadataRequestPolicy::UserDeclined;
                });
            }
        }

        self.store.append_message(Role::Assistant, output.message.clone());

        let status = if output.ready_to_proceed {
            let current = self.store.snapshot();
            if policy::can_start_conversion(&current) {
                self.store.transition(
                    Expect::At(current.status),
                    ConversionStatus::DetectingFormat,
                    |s| {
                        s.conversation_phase = ConversationPhase::Idle;
                    },
                )?;
                self.spawn_pipeline(
                    bus,
                    AgentRequest::Conversion(ConversionAction::DetectFormat),
                );
                ChatStatus::ReadyToConvert
            } else {
                ChatStatus::ConversationContinues
            }
        } else {
            ChatStatus::ConversationContinues
        };

        Ok(AgentResponse::Chat(ChatTurn {
            message: output.message,
            status,
            needs_more_info: output.needs_more_info,
            ready_to_proceed: output.ready_to_proceed,
            extracted_metadata: if extracted.is_empty() { None } else { Some(extracted) },
        }))
    }

    /// Build the explicit error turn for a failed model call.  The chat
    /// status is `error` — never a silent success.
    async fn chat_error_turn(&self, cause: WorkflowError) -> ChatTurn {
        let explanation = self.explain(&cause).await;
        ChatTurn {
            message: explanation.explanation,
            status: ChatStatus::Error,
            needs_more_info: false,
            ready_to_proceed: false,
            extracted_metadata: None,
        }
    }

    // -- user_input -----------------------------------------------------------

    async fn user_input(
        &self,
        fields: MetadataMap,
        cancel: bool,
        bus: &Arc<Bus>,
    ) -> BusResult {
        let snapshot = self.store.snapshot();
        let awaiting = matches!(
            snapshot.status,
            ConversionStatus::AwaitingUserInput
                | ConversionStatus::AwaitingRetryApproval
                | ConversionStatus::AwaitingImprovementDecision
        );
        if !awaiting {
            return Err(WorkflowError::bad_transition(
                ConversionStatus::AwaitingUserInput,
                snapshot.status,
            ));
        }

        if cancel {
            let finalized = self.finalize(TerminalStatus::FailedUserAbandoned)?;
            return Ok(AgentResponse::Ack { status: finalized });
        }

        self.store.mutate(|s| {
            for (key, value) in &fields {
                s.user_provided_metadata.insert(key.clone(), value.clone());
            }
            s.user_provided_input_this_attempt = true;
            s.metadata_policy = MetadataRequestPolicy::UserProvided;
        });

        // Only the metadata-collection park resumes the pipeline; input
        // supplied while awaiting a decision is held for the next attempt.
        if snapshot.status == ConversionStatus::AwaitingUserInput {
            let resumed = self.store.transition(
                Expect::At(ConversionStatus::AwaitingUserInput),
                ConversionStatus::DetectingFormat,
                |s| {
                    s.conversation_phase = ConversationPhase::Idle;
                },
            )?;
            self.spawn_pipeline(bus, AgentRequest::Conversion(ConversionAction::DetectFormat));
            return Ok(AgentResponse::Ack { status: resumed.status });
        }

        Ok(AgentResponse::Ack { status: snapshot.status })
    }

    // -- retry / improvement decisions ---------------------------------------

    async fn retry_decision(&self, approve: bool, retry_anyway: bool, bus: &Arc<Bus>) -> BusResult {
        let snapshot = self.store.snapshot();
        if snapshot.status != ConversionStatus::AwaitingRetryApproval {
            return Err(WorkflowError::bad_transition(
                ConversionStatus::AwaitingRetryApproval,
                snapshot.status,
            ));
        }

        if !approve {
            let finalized = self.finalize(TerminalStatus::FailedUserDeclined)?;
            return Ok(AgentResponse::Ack { status: finalized });
        }

        self.begin_retry(snapshot, ConversionStatus::AwaitingRetryApproval, retry_anyway, bus)
    }

    async fn improvement_decision(&self, action: ImprovementAction, bus: &Arc<Bus>) -> BusResult {
        let snapshot = self.store.snapshot();
        if snapshot.status != ConversionStatus::AwaitingImprovementDecision {
            return Err(WorkflowError::bad_transition(
                ConversionStatus::AwaitingImprovementDecision,
                snapshot.status,
            ));
        }

        match action {
            ImprovementAction::AcceptAsIs => {
                let finalized = self.finalize(TerminalStatus::PassedAccepted)?;
                Ok(AgentResponse::Ack { status: finalized })
            }
            ImprovementAction::Improve => self.begin_retry(
                snapshot,
                ConversionStatus::AwaitingImprovementDecision,
                false,
                bus,
            ),
        }
    }

    /// Shared retry path: no-progress guard, safety valve, attempt
    /// accounting, then a background `apply_corrections` dispatch.
    fn begin_retry(
        &self,
        snapshot: Session,
        from: ConversionStatus,
        retry_anyway: bool,
        bus: &Arc<Bus>,
    ) -> BusResult {
        let current_keys = snapshot
            .validation_report
            .as_ref()
            .map(ValidationReport::issue_keys)
            .unwrap_or_default();
        let no_progress = policy::detect_no_progress(&snapshot, &current_keys);

        if no_progress && !retry_anyway {
            return Ok(AgentResponse::Retry(RetryOutcome {
                status: snapshot.status,
                no_progress_warning: true,
            }));
        }

        // Safety valve, never a silent cap: the user can always override.
        if snapshot.correction_attempt >= policy::RETRY_SAFETY_CAP && !retry_anyway {
            return Err(WorkflowError::new(
                crate::error::ErrorKind::NoProgress,
                format!(
                    "{} correction attempts without success; pass retry_anyway to continue",
                    snapshot.correction_attempt
                ),
            ));
        }

        let corrections = build_corrections(&snapshot);

        self.store.transition(Expect::At(from), ConversionStatus::Converting, |s| {
            s.correction_attempt += 1;
            s.user_provided_input_this_attempt = false;
            s.auto_corrections_applied_this_attempt = false;
            s.conversation_phase = ConversationPhase::Idle;
        })?;

        self.spawn_pipeline(
            bus,
            AgentRequest::Conversion(ConversionAction::ApplyCorrections { corrections }),
        );

        Ok(AgentResponse::Retry(RetryOutcome {
            status: ConversionStatus::Converting,
            no_progress_warning: no_progress,
        }))
    }

    // -- receive_validation_result -------------------------------------------

    async fn receive_validation_result(&self, report: ValidationReport) -> BusResult {
        let snapshot = self.store.snapshot();

        // Render reports before any finalized event fires, so artifacts
        // exist the moment clients hear about the outcome.
        if let Some(output_path) = snapshot.output_path.clone() {
            if let Err(e) = self.reporter.render(&output_path, &snapshot, &report).await {
                warn!(error = %e, "report rendering failed");
            }
        }

        match report.outcome {
            ValidationOutcome::Passed => {
                let terminal = if snapshot.correction_attempt == 0 {
                    TerminalStatus::Passed
                } else {
                    TerminalStatus::PassedImproved
                };
                self.store.append_message(
                    Role::Assistant,
                    "Validation passed. Your NWB file and report are ready to download."
                        .to_owned(),
                );
                let finalized = self.finalize(terminal)?;
                Ok(AgentResponse::Ack { status: finalized })
            }
            ValidationOutcome::PassedWithIssues => {
                let parked = self.store.transition(
                    Expect::At(ConversionStatus::Validating),
                    ConversionStatus::AwaitingImprovementDecision,
                    |s| {
                        s.conversation_phase = ConversationPhase::ImprovementDecision;
                    },
                )?;
                self.store.append_message(
                    Role::Assistant,
                    format!(
                        "Validation passed with {} advisory issue(s). You can accept the \
                         file as is, or try to improve it.",
                        report.counts.total(),
                    ),
                );
                Ok(AgentResponse::Ack { status: parked.status })
            }
            ValidationOutcome::Failed => {
                let parked = self.store.transition(
                    Expect::At(ConversionStatus::Validating),
                    ConversionStatus::AwaitingRetryApproval,
                    |s| {
                        s.conversation_phase = ConversationPhase::ValidationAnalysis;
                    },
                )?;
                self.store.append_message(
                    Role::Assistant,
                    format!(
                        "Validation failed with {} blocking issue(s). Supply missing \
                         values if any, then approve a retry, or decline to stop here.",
                        report.counts.critical + report.counts.error,
                    ),
                );
                Ok(AgentResponse::Ack { status: parked.status })
            }
        }
    }

    // -- shared helpers -------------------------------------------------------

    /// Publish the finalized event and move to the terminal status.
    fn finalize(&self, terminal: TerminalStatus) -> Result<ConversionStatus, WorkflowError> {
        let status = terminal.final_status();
        self.store.transition(Expect::Any, status, |s| {
            s.conversation_phase = ConversationPhase::Idle;
        })?;
        self.store.events().publish(WorkflowEvent::Finalized { terminal_status: terminal });
        Ok(status)
    }

    /// Explain an error via the model, falling back deterministically.
    async fn explain(&self, cause: &WorkflowError) -> crate::model::ErrorExplanation {
        match tokio::time::timeout(self.model_timeout, self.model.explain_error(cause)).await {
            Ok(Ok(explanation)) => explanation,
            _ => fallback_explanation(cause),
        }
    }

    /// Dispatch a pipeline stage in the background.
    ///
    /// The recovery arm is the finally-equivalent path: any error surfaces
    /// to the user and parks the session in `awaiting_retry_approval` with
    /// a synthetic failed report, never a stuck `converting`/`validating`.
    fn spawn_pipeline(&self, bus: &Arc<Bus>, request: AgentRequest) {
        let bus = Arc::clone(bus);
        let store = Arc::clone(&self.store);
        let model = Arc::clone(&self.model);
        let model_timeout = self.model_timeout;
        tokio::spawn(async move {
            let result = bus.send(request, RequestContext::default()).await;
            if let Err(cause) = result {
                error!(kind = %cause.kind, message = %cause.message, "pipeline stage failed");
                let explanation =
                    match tokio::time::timeout(model_timeout, model.explain_error(&cause)).await {
                        Ok(Ok(explanation)) => explanation,
                        _ => fallback_explanation(&cause),
                    };
                store.events().publish(WorkflowEvent::Log {
                    level: "error".to_owned(),
                    message: cause.message.clone(),
                    context: cause.context.clone(),
                });
                store.append_message(Role::Assistant, explanation.explanation);

                let issue = ValidationIssue {
                    severity: Severity::Error,
                    code: format!("pipeline_{}", cause.kind.as_str().to_lowercase()),
                    message: cause.message.clone(),
                    location: "/".to_owned(),
                };
                store.set_validation_result(ValidationReport {
                    outcome: ValidationOutcome::Failed,
                    counts: IssueCounts::tally(std::slice::from_ref(&issue)),
                    issues: vec![issue],
                    triaged: vec![],
                });
                let _ = store.transition(
                    Expect::Any,
                    ConversionStatus::AwaitingRetryApproval,
                    |s| {
                        s.conversation_phase = ConversationPhase::ValidationAnalysis;
                    },
                );
            }
        });
    }
}

/// Collect machine-applicable fixes from the triaged issues.  Fixes that
/// need experimenter knowledge (`user_fixable`) arrive via `user_input`
/// instead and are already merged into the session metadata.
fn build_corrections(session: &Session) -> Corrections {
    let mut corrections = Corrections::default();
    if let Some(report) = &session.validation_report {
        for triaged in &report.triaged {
            if triaged.user_fixable {
                continue;
            }
            if let Some(fix) = &triaged.suggested_fix {
                corrections
                    .parameter_changes
                    .insert(fix.field.clone(), fix.value.clone());
            }
        }
    }
    corrections
}

fn baseline_prompt(specs: Vec<FieldSpec>) -> MetadataPrompt {
    MetadataPrompt {
        fields: specs,
        suggestions: String::new(),
        detected_data_type: "electrophysiology".to_owned(),
    }
}

fn metadata_request_message(prompt: &MetadataPrompt) -> String {
    let names: Vec<&str> = prompt.fields.iter().map(|f| f.display_name.as_str()).collect();
    let mut message = format!(
        "Before converting, DANDI needs a few details: {}.",
        names.join(", "),
    );
    if !prompt.suggestions.is_empty() {
        message.push(' ');
        message.push_str(&prompt.suggestions);
    }
    message
}

#[cfg(test)]
#[path = "converse_tests.rs"]
mod tests;
