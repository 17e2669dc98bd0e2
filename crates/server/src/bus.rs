// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed message router between the three agents.
//!
//! Agents never call each other directly: every hop (conversation →
//! conversion → evaluation → conversation) goes through [`Bus::send`], so
//! tracing is uniform and implementations swap freely.  The bus owns the
//! agents; handlers receive `&Arc<Bus>` so a spawned pipeline stage can
//! re-enter the bus without reference cycles.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::converse::ConversationAgent;
use crate::convert::ConversionAgent;
use crate::error::WorkflowError;
use crate::evaluate::EvaluationAgent;
use crate::metadata::FieldSpec;
use crate::session::{ConversionStatus, MetadataMap, ValidationReport};

/// Deadline and cancellation carried with every bus request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Overrides the per-capability deadline when set.
    pub deadline: Option<Duration>,
    pub cancel: CancellationToken,
}

/// Requests routed to the conversation agent.
#[derive(Debug, Clone)]
pub enum ConversationAction {
    StartConversion,
    ChatMessage { text: String },
    UserInput { fields: MetadataMap, cancel: bool },
    RetryDecision { approve: bool, retry_anyway: bool },
    ImprovementDecision { action: ImprovementAction },
    ReceiveValidationResult { report: ValidationReport },
}

/// The user's choice when validation passed with issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImprovementAction {
    AcceptAsIs,
    Improve,
}

/// Requests routed to the conversion agent.
#[derive(Debug, Clone)]
pub enum ConversionAction {
    DetectFormat,
    ApplyCorrections { corrections: Corrections },
}

/// Changes folded into the converter configuration for a retry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Corrections {
    pub parameter_changes: MetadataMap,
    pub additional_metadata: MetadataMap,
}

impl Corrections {
    pub fn is_empty(&self) -> bool {
        self.parameter_changes.is_empty() && self.additional_metadata.is_empty()
    }
}

/// Requests routed to the evaluation agent.
#[derive(Debug, Clone)]
pub enum EvaluationAction {
    RunValidation,
}

/// A request addressed to one agent.
#[derive(Debug, Clone)]
pub enum AgentRequest {
    Conversation(ConversationAction),
    Conversion(ConversionAction),
    Evaluation(EvaluationAction),
}

/// Chat response status — exactly these four, never a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    ConversationContinues,
    ReadyToConvert,
    Busy,
    Error,
}

/// Response to one conversational turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub message: String,
    pub status: ChatStatus,
    pub needs_more_info: bool,
    pub ready_to_proceed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_metadata: Option<MetadataMap>,
}

/// Response to `start_conversion`: either the pipeline was dispatched, or
/// the session parked awaiting metadata with the field list to show.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartOutcome {
    pub status: ConversionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_request: Option<MetadataRequest>,
}

/// The metadata-collection prompt handed to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataRequest {
    pub fields: Vec<FieldSpec>,
    pub suggestions: String,
    pub detected_data_type: String,
}

/// Response to a retry decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryOutcome {
    pub status: ConversionStatus,
    pub no_progress_warning: bool,
}

/// Typed response from an agent handler.
#[derive(Debug, Clone)]
pub enum AgentResponse {
    Ack { status: ConversionStatus },
    Started(StartOutcome),
    Chat(ChatTurn),
    Retry(RetryOutcome),
}

impl AgentResponse {
    pub fn into_chat(self) -> Result<ChatTurn, WorkflowError> {
        match self {
            Self::Chat(turn) => Ok(turn),
            other => Err(WorkflowError::fatal(format!("expected chat response, got {other:?}"))),
        }
    }

    pub fn into_started(self) -> Result<StartOutcome, WorkflowError> {
        match self {
            Self::Started(outcome) => Ok(outcome),
            other => Err(WorkflowError::fatal(format!("expected start outcome, got {other:?}"))),
        }
    }

    pub fn into_retry(self) -> Result<RetryOutcome, WorkflowError> {
        match self {
            Self::Retry(outcome) => Ok(outcome),
            other => Err(WorkflowError::fatal(format!("expected retry outcome, got {other:?}"))),
        }
    }

    pub fn status(&self) -> Option<ConversionStatus> {
        match self {
            Self::Ack { status } => Some(*status),
            Self::Started(outcome) => Some(outcome.status),
            Self::Retry(outcome) => Some(outcome.status),
            Self::Chat(_) => None,
        }
    }
}

pub type BusResult = Result<AgentResponse, WorkflowError>;
type BoxedBusFuture = Pin<Box<dyn Future<Output = BusResult> + Send>>;

/// Registry of the three agent handlers.
pub struct Bus {
    conversation: OnceLock<Arc<ConversationAgent>>,
    conversion: OnceLock<Arc<ConversionAgent>>,
    evaluation: OnceLock<Arc<EvaluationAgent>>,
}

impl Bus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            conversation: OnceLock::new(),
            conversion: OnceLock::new(),
            evaluation: OnceLock::new(),
        })
    }

    pub fn register_conversation(&self, agent: Arc<ConversationAgent>) {
        let _ = self.conversation.set(agent);
    }

    pub fn register_conversion(&self, agent: Arc<ConversionAgent>) {
        let _ = self.conversion.set(agent);
    }

    pub fn register_evaluation(&self, agent: Arc<EvaluationAgent>) {
        let _ = self.evaluation.set(agent);
    }

    /// Dispatch a request to its registered handler.
    ///
    /// Boxed so handlers can re-enter the bus (the conversation →
    /// conversion → evaluation → conversation chain is recursive through
    /// this method).
    pub fn send(self: &Arc<Self>, req: AgentRequest, ctx: RequestContext) -> BoxedBusFuture {
        let bus = Arc::clone(self);
        Box::pin(async move {
            match req {
                AgentRequest::Conversation(action) => {
                    let agent = bus
                        .conversation
                        .get()
                        .ok_or_else(|| WorkflowError::fatal("conversation agent not registered"))?
                        .clone();
                    agent.handle(action, &bus, ctx).await
                }
                AgentRequest::Conversion(action) => {
                    let agent = bus
                        .conversion
                        .get()
                        .ok_or_else(|| WorkflowError::fatal("conversion agent not registered"))?
                        .clone();
                    agent.handle(action, &bus, ctx).await
                }
                AgentRequest::Evaluation(action) => {
                    let agent = bus
                        .evaluation
                        .get()
                        .ok_or_else(|| WorkflowError::fatal("evaluation agent not registered"))?
                        .clone();
                    agent.handle(action, &bus, ctx).await
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
