// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn effective_metadata_user_wins() {
    let mut session = Session::default();
    session.auto_extracted_metadata.insert("species".to_owned(), "Rattus norvegicus".into());
    session.auto_extracted_metadata.insert("institution".to_owned(), "Auto U".into());
    session.user_provided_metadata.insert("species".to_owned(), "Mus musculus".into());

    let effective = session.effective_metadata();
    assert_eq!(effective["species"], "Mus musculus");
    assert_eq!(effective["institution"], "Auto U");
}

#[test]
fn effective_metadata_is_pure() {
    let mut session = Session::default();
    session.auto_extracted_metadata.insert("sex".to_owned(), "M".into());
    let first = session.effective_metadata();
    let second = session.effective_metadata();
    assert_eq!(first, second);
    assert!(session.user_provided_metadata.is_empty());
}

#[test]
fn terminal_status_maps_to_final_status() {
    assert_eq!(TerminalStatus::Passed.final_status(), ConversionStatus::Completed);
    assert_eq!(TerminalStatus::PassedImproved.final_status(), ConversionStatus::Completed);
    assert_eq!(TerminalStatus::PassedAccepted.final_status(), ConversionStatus::Completed);
    assert_eq!(TerminalStatus::FailedUserDeclined.final_status(), ConversionStatus::Failed);
    assert_eq!(TerminalStatus::FailedUserAbandoned.final_status(), ConversionStatus::Failed);
}

#[test]
fn severity_ordering_and_blocking() {
    assert!(Severity::Critical > Severity::Error);
    assert!(Severity::Error > Severity::Warning);
    assert!(Severity::Warning > Severity::BestPractice);
    assert!(Severity::BestPractice > Severity::Info);

    assert!(Severity::Critical.is_blocking());
    assert!(Severity::Error.is_blocking());
    assert!(!Severity::Warning.is_blocking());
    assert!(!Severity::BestPractice.is_blocking());
    assert!(!Severity::Info.is_blocking());
}

#[test]
fn issue_counts_tally() {
    let issues = vec![
        ValidationIssue {
            severity: Severity::Error,
            code: "a".to_owned(),
            message: String::new(),
            location: "/".to_owned(),
        },
        ValidationIssue {
            severity: Severity::Error,
            code: "b".to_owned(),
            message: String::new(),
            location: "/".to_owned(),
        },
        ValidationIssue {
            severity: Severity::Info,
            code: "c".to_owned(),
            message: String::new(),
            location: "/".to_owned(),
        },
    ];
    let counts = IssueCounts::tally(&issues);
    assert_eq!(counts.error, 2);
    assert_eq!(counts.info, 1);
    assert_eq!(counts.total(), 3);
}

#[test]
fn status_serialises_snake_case() {
    let json = serde_json::to_string(&ConversionStatus::AwaitingRetryApproval).unwrap();
    assert_eq!(json, "\"awaiting_retry_approval\"");
    let back: ConversionStatus = serde_json::from_str(&json).unwrap();
    assert_eq!(back, ConversionStatus::AwaitingRetryApproval);
}

#[test]
fn in_flight_statuses() {
    for status in [
        ConversionStatus::Uploading,
        ConversionStatus::DetectingFormat,
        ConversionStatus::Converting,
        ConversionStatus::Validating,
    ] {
        assert!(status.is_in_flight(), "{status} should be in flight");
    }
    for status in [
        ConversionStatus::Idle,
        ConversionStatus::Uploaded,
        ConversionStatus::AwaitingUserInput,
        ConversionStatus::AwaitingRetryApproval,
        ConversionStatus::AwaitingImprovementDecision,
        ConversionStatus::Completed,
        ConversionStatus::Failed,
    ] {
        assert!(!status.is_in_flight(), "{status} should not be in flight");
    }
}

#[test]
fn report_issue_keys_are_canonical() {
    let report = ValidationReport {
        outcome: ValidationOutcome::Failed,
        counts: IssueCounts::default(),
        issues: vec![
            ValidationIssue {
                severity: Severity::Error,
                code: "missing_sex".to_owned(),
                message: "first".to_owned(),
                location: "/subject".to_owned(),
            },
            ValidationIssue {
                severity: Severity::Error,
                code: "missing_sex".to_owned(),
                message: "duplicate with different message".to_owned(),
                location: "/subject".to_owned(),
            },
        ],
        triaged: vec![],
    };
    let keys = report.issue_keys();
    assert_eq!(keys.len(), 1);
    assert!(keys.contains(&("missing_sex".to_owned(), "/subject".to_owned())));
}

#[test]
fn zero_session_is_default() {
    let session = Session::default();
    assert_eq!(session.status, ConversionStatus::Idle);
    assert_eq!(session.conversation_phase, ConversationPhase::Idle);
    assert_eq!(session.metadata_policy, MetadataRequestPolicy::NotAsked);
    assert_eq!(session.correction_attempt, 0);
    assert!(session.input_path.is_none());
    assert!(session.validation_report.is_none());
    assert!(session.previous_validation_issues.is_empty());
}
