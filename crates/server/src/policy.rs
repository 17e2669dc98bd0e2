// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure workflow guards.
//!
//! These functions are the sole authority over workflow preconditions; no
//! agent or handler duplicates this logic.  Everything here takes a
//! [`Session`] snapshot and returns a decision, with no side effects.

use std::collections::BTreeSet;

use crate::session::{ConversationPhase, ConversionStatus, MetadataRequestPolicy, Session};

/// Metadata fields DANDI requires before an upload is accepted there.
/// Fixed by archive rules, not by the language model.
pub const DANDI_REQUIRED_FIELDS: [&str; 5] =
    ["experimenter", "institution", "subject_id", "species", "sex"];

/// Soft safety valve on retries.  Not a design cap: hitting it surfaces an
/// explicit error telling the user to pass `retry_anyway`; it never
/// silently stops the loop.
pub const RETRY_SAFETY_CAP: u32 = 5;

/// DANDI-required fields absent from the effective metadata.
pub fn missing_dandi_fields(session: &Session) -> Vec<&'static str> {
    let effective = session.effective_metadata();
    DANDI_REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| !effective.contains_key(*field))
        .collect()
}

/// Ask for metadata at most once, and only when something DANDI-blocking
/// is actually missing.
pub fn should_request_metadata(session: &Session) -> bool {
    session.metadata_policy == MetadataRequestPolicy::NotAsked
        && !missing_dandi_fields(session).is_empty()
}

/// Uploads are refused only while a workflow step is mid-flight.
pub fn can_accept_upload(session: &Session) -> bool {
    !matches!(
        session.status,
        ConversionStatus::Uploading
            | ConversionStatus::DetectingFormat
            | ConversionStatus::Converting
            | ConversionStatus::Validating
    )
}

/// A conversion can start from a freshly uploaded, parked, or finished
/// session, provided an input exists.  The in-flight statuses are outside
/// the allowed set, which is what "no conversion already in flight" means.
pub fn can_start_conversion(session: &Session) -> bool {
    session.input_path.is_some()
        && matches!(
            session.status,
            ConversionStatus::Uploaded
                | ConversionStatus::AwaitingUserInput
                | ConversionStatus::Completed
                | ConversionStatus::Failed
                | ConversionStatus::Idle
        )
}

/// Whether the session is in an active user dialogue.
pub fn is_in_active_conversation(session: &Session, history_len: usize) -> bool {
    session.status == ConversionStatus::AwaitingUserInput
        && (history_len > 0 || session.conversation_phase == ConversationPhase::MetadataCollection)
}

/// A retry is meaningful iff something changed since the last attempt:
/// the user supplied input, or auto-corrections were applied.  Otherwise
/// only an explicit `retry_anyway` overrides.
pub fn can_retry(session: &Session, retry_anyway: bool) -> bool {
    retry_anyway
        || session.user_provided_input_this_attempt
        || session.auto_corrections_applied_this_attempt
}

/// True iff the new issue set equals the previous one on `(code,
/// location)` pairs and no per-attempt change flag is set.
pub fn detect_no_progress(session: &Session, new_issues: &BTreeSet<(String, String)>) -> bool {
    *new_issues == session.previous_validation_issues
        && !session.user_provided_input_this_attempt
        && !session.auto_corrections_applied_this_attempt
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
