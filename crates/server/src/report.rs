// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Report rendering beside each output version.
//!
//! The capability stays behind a trait (a PDF renderer can slot in);
//! [`FileReporter`] produces the machine (`.report.json`) and human
//! (`.report.txt`) renditions.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::session::{epoch_ms, Session, ValidationReport};

/// External report-rendering capability.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Render the report(s) for `output_path`, returning the files written.
    async fn render(
        &self,
        output_path: &Path,
        session: &Session,
        report: &ValidationReport,
    ) -> anyhow::Result<Vec<PathBuf>>;
}

/// Base path for report files: `<stem>_vN.report` beside the output.
pub fn report_base(output_path: &Path) -> PathBuf {
    let stem = output_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    output_path.with_file_name(format!("{stem}.report"))
}

/// Writes `.report.json` and `.report.txt` next to the NWB file.
pub struct FileReporter;

#[async_trait]
impl Reporter for FileReporter {
    async fn render(
        &self,
        output_path: &Path,
        session: &Session,
        report: &ValidationReport,
    ) -> anyhow::Result<Vec<PathBuf>> {
        let base = report_base(output_path);
        let json_path = base.with_extension("report.json");
        let txt_path = base.with_extension("report.txt");

        let checksum = session
            .output_checksums
            .get(&output_path.display().to_string())
            .cloned()
            .unwrap_or_default();

        let json = serde_json::json!({
            "generated_at": epoch_ms(),
            "input": session.input_path,
            "output": output_path,
            "output_checksum": checksum,
            "correction_attempt": session.correction_attempt,
            "outcome": report.outcome,
            "counts": report.counts,
            "issues": report.issues,
            "triaged": report.triaged,
        });
        tokio::fs::write(&json_path, serde_json::to_vec_pretty(&json)?).await?;

        tokio::fs::write(&txt_path, render_text(output_path, session, report)).await?;

        Ok(vec![json_path, txt_path])
    }
}

fn render_text(output_path: &Path, session: &Session, report: &ValidationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "NWB conversion report");
    let _ = writeln!(out, "=====================");
    let _ = writeln!(out, "output:  {}", output_path.display());
    let _ = writeln!(out, "attempt: {}", session.correction_attempt);
    let _ = writeln!(out, "outcome: {:?}", report.outcome);
    let _ = writeln!(
        out,
        "issues:  {} ({} blocking)",
        report.counts.total(),
        report.counts.critical + report.counts.error,
    );
    if !report.triaged.is_empty() {
        let _ = writeln!(out);
        for triaged in &report.triaged {
            let _ = writeln!(
                out,
                "- [{:?}] {} at {}: {}",
                triaged.issue.severity,
                triaged.issue.code,
                triaged.issue.location,
                triaged.explanation,
            );
        }
    }
    out
}

#[cfg(test)]
#[path = "report_tests.rs"]
mod tests;
