// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::session::ConversionStatus;

/// Unified error kinds shared across the bus and the HTTP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    BadRequest,
    Busy,
    Timeout,
    DependencyFailed,
    NoProgress,
    BadTransition,
    NotFound,
    Fatal,
}

impl ErrorKind {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Busy => 503,
            Self::Timeout => 504,
            Self::DependencyFailed => 502,
            Self::NoProgress => 409,
            Self::BadTransition => 409,
            Self::NotFound => 404,
            Self::Fatal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Busy => "BUSY",
            Self::Timeout => "TIMEOUT",
            Self::DependencyFailed => "DEPENDENCY_FAILED",
            Self::NoProgress => "NO_PROGRESS",
            Self::BadTransition => "BAD_TRANSITION",
            Self::NotFound => "NOT_FOUND",
            Self::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed error value returned from bus handlers and store operations.
///
/// Carries a machine-readable kind, a human-readable message, and optional
/// structured context for logging.  Never stringly-typed: HTTP status and
/// wire code both derive from `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null", default)]
    pub context: serde_json::Value,
}

impl WorkflowError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), context: serde_json::Value::Null }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// The chat single-flight guard is held by another request.
    pub fn busy() -> Self {
        Self::new(ErrorKind::Busy, "another request is in flight")
    }

    pub fn timeout(what: &str) -> Self {
        Self::new(ErrorKind::Timeout, format!("{what} exceeded its deadline"))
    }

    pub fn dependency(what: &str, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyFailed, format!("{what} failed: {}", detail.into()))
    }

    pub fn no_progress() -> Self {
        Self::new(
            ErrorKind::NoProgress,
            "nothing changed since the last attempt; pass retry_anyway to force a retry",
        )
    }

    pub fn bad_transition(expected: ConversionStatus, actual: ConversionStatus) -> Self {
        Self::new(
            ErrorKind::BadTransition,
            format!("expected status {expected}, session is {actual}"),
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for WorkflowError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
