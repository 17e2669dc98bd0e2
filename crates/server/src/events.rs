// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workflow event types and the broadcast fan-out hub.
//!
//! Events use internally-tagged JSON (`{"kind": "status_update", ...}`) for
//! the payload, wrapped on the wire in `{kind, timestamp, payload}`.  The
//! hub is a `tokio::sync::broadcast` channel: publishing never blocks, and
//! a slow subscriber drops its oldest events and observes a `lagged` marker
//! at the next delivery.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::session::{
    ConversationPhase, ConversionStatus, IssueCounts, Role, TerminalStatus, ValidationOutcome,
};

/// Per-subscriber queue depth.  Beyond this the oldest events are dropped
/// and the subscriber sees a lag marker.
const SUBSCRIBER_QUEUE: usize = 256;

/// Events emitted by the workflow core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// The session status changed.
    StatusUpdate { status: ConversionStatus, phase: ConversationPhase },
    /// Conversion progress.
    Progress { percent: u8, message: String },
    /// Operational log line for dashboard clients.
    Log { level: String, message: String, context: serde_json::Value },
    /// A conversation turn was appended to the history.
    ConversationMessage { role: Role, content: String },
    /// A validation pass finished.
    ValidationReport { outcome: ValidationOutcome, counts: IssueCounts, attempt: u32 },
    /// The workflow reached one of the five terminal dispositions.
    Finalized { terminal_status: TerminalStatus },
    /// The session was zeroed.
    Reset,
}

impl WorkflowEvent {
    /// The wire `kind` tag for this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StatusUpdate { .. } => "status_update",
            Self::Progress { .. } => "progress",
            Self::Log { .. } => "log",
            Self::ConversationMessage { .. } => "conversation_message",
            Self::ValidationReport { .. } => "validation_report",
            Self::Finalized { .. } => "finalized",
            Self::Reset => "reset",
        }
    }
}

/// An event stamped at publication time.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub timestamp: u64,
    pub event: WorkflowEvent,
}

/// Fan-out hub for workflow events.
#[derive(Clone)]
pub struct EventBus {
    event_tx: broadcast::Sender<Published>,
}

impl EventBus {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(SUBSCRIBER_QUEUE);
        Self { event_tx }
    }

    /// Publish an event to all subscribers.  Never blocks; events published
    /// with no subscribers are discarded.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self
            .event_tx
            .send(Published { timestamp: crate::session::epoch_ms(), event });
    }

    /// Subscribe to the event stream.  Dropping the receiver detaches.
    pub fn subscribe(&self) -> broadcast::Receiver<Published> {
        self.event_tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Parsed subscription preferences for one `/events` connection.
///
/// Built from the `?kinds=` query parameter: a comma-separated list of
/// event kinds, or empty/`all` for everything.  `lagged` markers are always
/// delivered.
pub struct EventFilter {
    all: bool,
    kinds: Vec<String>,
}

impl EventFilter {
    pub fn new(kinds_csv: &str) -> Self {
        let trimmed = kinds_csv.trim();
        if trimmed.is_empty() || trimmed == "all" {
            return Self { all: true, kinds: vec![] };
        }
        Self {
            all: false,
            kinds: trimmed.split(',').map(|k| k.trim().to_owned()).collect(),
        }
    }

    /// Whether the filter accepts this event.
    pub fn wants(&self, event: &WorkflowEvent) -> bool {
        self.all || self.kinds.iter().any(|k| k == event.kind())
    }
}

impl Published {
    /// Serialise to the `{kind, timestamp, payload}` wire form.  The tag is
    /// lifted out of the payload so it appears exactly once.
    pub fn to_wire_json(&self) -> Result<String, serde_json::Error> {
        let mut payload = serde_json::to_value(&self.event)?;
        if let Some(obj) = payload.as_object_mut() {
            obj.remove("kind");
        }
        serde_json::to_string(&serde_json::json!({
            "kind": self.event.kind(),
            "timestamp": self.timestamp,
            "payload": payload,
        }))
    }
}

/// Wire form of a lag marker: `n` events were dropped for this subscriber.
pub fn lagged_wire_json(n: u64, timestamp: u64) -> String {
    serde_json::json!({
        "kind": "lagged",
        "timestamp": timestamp,
        "payload": { "n": n },
    })
    .to_string()
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
