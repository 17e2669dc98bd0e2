// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single owner of the active [`Session`].
//!
//! Two independent lock groups, per the concurrency contract:
//! - the status lock guards the session value itself and is held only
//!   around one `transition`/`mutate`, never across an external call;
//! - the conversation lock guards the rolling history.
//!
//! The same task never holds both at once.  Readers take deep-copy
//! snapshots under the lock so downstream agent logic operates on
//! immutable data.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::WorkflowError;
use crate::events::{EventBus, WorkflowEvent};
use crate::session::{epoch_ms, ChatEntry, ConversionStatus, Role, Session, ValidationReport};

/// Rolling conversation window: appends beyond this drop from the head.
pub const HISTORY_WINDOW: usize = 50;

/// Status precondition for [`SessionStore::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Any current status is acceptable.
    Any,
    /// The transition is valid only from this status.
    At(ConversionStatus),
}

/// Owns the process-wide session and serialises every mutation.
pub struct SessionStore {
    session: Mutex<Session>,
    history: Mutex<Vec<ChatEntry>>,
    /// Single-flight guard for the chat pipeline.  Held across the whole
    /// `chat_message` path including the model call; concurrent callers
    /// observe `busy` instead of queueing.
    llm_inflight: AtomicBool,
    events: EventBus,
}

impl SessionStore {
    pub fn new(events: EventBus) -> Self {
        Self {
            session: Mutex::new(Session::default()),
            history: Mutex::new(Vec::new()),
            llm_inflight: AtomicBool::new(false),
            events,
        }
    }

    /// Deep copy of the current session; safe for concurrent readers.
    pub fn snapshot(&self) -> Session {
        self.session.lock().clone()
    }

    /// Verify the status precondition, run `mutate` on the live session,
    /// set the new status, bump `updated_at`, and publish a
    /// `status_update` — all under the status lock.
    ///
    /// Returns the post-transition snapshot so callers can branch on the
    /// mutated state without re-locking.
    pub fn transition(
        &self,
        from: Expect,
        to: ConversionStatus,
        mutate: impl FnOnce(&mut Session),
    ) -> Result<Session, WorkflowError> {
        let snapshot = {
            let mut session = self.session.lock();
            if let Expect::At(expected) = from {
                if session.status != expected {
                    return Err(WorkflowError::bad_transition(expected, session.status));
                }
            }
            mutate(&mut session);
            session.status = to;
            session.updated_at = epoch_ms();
            session.clone()
        };
        self.events.publish(WorkflowEvent::StatusUpdate {
            status: snapshot.status,
            phase: snapshot.conversation_phase,
        });
        Ok(snapshot)
    }

    /// Mutate session fields without changing status (no event).  Used for
    /// mid-action bookkeeping such as persisting extracted metadata.
    pub fn mutate(&self, mutate: impl FnOnce(&mut Session)) -> Session {
        let mut session = self.session.lock();
        mutate(&mut session);
        session.updated_at = epoch_ms();
        session.clone()
    }

    /// Store a validation result atomically.  Does not change `status`.
    ///
    /// The canonical issue set of the report being *replaced* shifts into
    /// `previous_validation_issues`: at decision time the new report is
    /// compared against the attempt before it, so the very first failure
    /// never reads as no-progress.
    pub fn set_validation_result(&self, report: ValidationReport) {
        let (outcome, counts, attempt) = {
            let mut session = self.session.lock();
            session.validation_outcome = Some(report.outcome);
            session.previous_validation_issues = session
                .validation_report
                .as_ref()
                .map(ValidationReport::issue_keys)
                .unwrap_or_default();
            let counts = report.counts;
            let outcome = report.outcome;
            session.validation_report = Some(report);
            session.updated_at = epoch_ms();
            (outcome, counts, session.correction_attempt)
        };
        self.events.publish(WorkflowEvent::ValidationReport { outcome, counts, attempt });
    }

    /// Append a turn to the history, enforcing the rolling window, and
    /// publish it to streaming clients.
    pub fn append_message(&self, role: Role, content: impl Into<String>) {
        let content = content.into();
        {
            let mut history = self.history.lock();
            history.push(ChatEntry { role, content: content.clone() });
            if history.len() > HISTORY_WINDOW {
                let excess = history.len() - HISTORY_WINDOW;
                history.drain(..excess);
            }
        }
        self.events.publish(WorkflowEvent::ConversationMessage { role, content });
    }

    /// Copy of the conversation history.  Iteration always uses this,
    /// never the live list.
    pub fn history_snapshot(&self) -> Vec<ChatEntry> {
        self.history.lock().clone()
    }

    /// Zero the session and the history.  Rejected while a workflow step
    /// is in flight.  The two locks are taken one after the other, never
    /// together.
    pub fn reset(&self) -> Result<(), WorkflowError> {
        {
            let mut session = self.session.lock();
            if session.status.is_in_flight() {
                return Err(WorkflowError::new(
                    crate::error::ErrorKind::BadTransition,
                    format!("cannot reset while {}", session.status),
                ));
            }
            *session = Session::default();
        }
        self.history.lock().clear();
        self.events.publish(WorkflowEvent::Reset);
        Ok(())
    }

    /// Try to enter the chat critical section.  `None` means another chat
    /// request holds the guard; the caller must answer `busy` without
    /// waiting.  The guard releases on drop.
    pub fn try_begin_chat(&self) -> Option<ChatGuard<'_>> {
        self.llm_inflight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ChatGuard { store: self })
    }

    /// Whether a chat request currently holds the single-flight guard.
    pub fn chat_in_flight(&self) -> bool {
        self.llm_inflight.load(Ordering::Acquire)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}

/// RAII guard for the chat single-flight section.
pub struct ChatGuard<'a> {
    store: &'a SessionStore,
}

impl Drop for ChatGuard<'_> {
    fn drop(&mut self) {
        self.store.llm_inflight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
