// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Conversion agent: format detection and converter invocation with
//! versioned, never-overwritten output files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::bus::{
    AgentRequest, AgentResponse, Bus, BusResult, ConversionAction, Corrections, EvaluationAction,
    RequestContext,
};
use crate::error::WorkflowError;
use crate::events::WorkflowEvent;
use crate::format;
use crate::model::LanguageModel;
use crate::session::{ConversionStatus, MetadataMap, Role};
use crate::store::{Expect, SessionStore};

/// Everything the external converter needs for one attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ConvertRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub format: String,
    pub metadata: MetadataMap,
    pub parameters: MetadataMap,
}

/// External NWB-writing capability.  Implementations write
/// `req.output_path` and return once the file is complete.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, req: ConvertRequest) -> anyhow::Result<()>;
}

/// Converter that shells out to a configured command, passing the request
/// as JSON on stdin.  Exit status 0 means the output file was written.
pub struct CommandConverter {
    program: String,
    args: Vec<String>,
}

impl CommandConverter {
    pub fn new(command: &[String]) -> Result<Self, WorkflowError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| WorkflowError::bad_request("converter command is empty"))?;
        Ok(Self { program: program.clone(), args: args.to_vec() })
    }
}

#[async_trait]
impl Converter for CommandConverter {
    async fn convert(&self, req: ConvertRequest) -> anyhow::Result<()> {
        use tokio::io::AsyncWriteExt;

        let payload = serde_json::to_vec(&req)?;
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "converter exited with {}: {}",
                output.status,
                stderr.trim(),
            );
        }
        Ok(())
    }
}

/// Output path for a given attempt: `<stem>_v<attempt + 1>.nwb`.
pub fn versioned_output_path(output_dir: &Path, input_path: &Path, attempt: u32) -> PathBuf {
    let stem = input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    output_dir.join(format!("{stem}_v{}.nwb", attempt + 1))
}

/// SHA-256 of a file, hex-encoded.
pub async fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(sha256_hex(&bytes))
}

/// SHA-256 of a byte slice, hex-encoded.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Progress narration template, keyed by the milestone percent.
fn narrate(percent: u8) -> &'static str {
    match percent {
        0 => "starting conversion",
        25 => "recording format confirmed, configuring converter",
        55 => "converter running, writing NWB file",
        75 => "output written, computing checksum",
        _ => "conversion complete, handing off to validation",
    }
}

/// Format detection plus converter invocation.
pub struct ConversionAgent {
    store: Arc<SessionStore>,
    model: Arc<dyn LanguageModel>,
    converter: Arc<dyn Converter>,
    output_dir: PathBuf,
    converter_timeout: Duration,
    model_timeout: Duration,
}

impl ConversionAgent {
    pub fn new(
        store: Arc<SessionStore>,
        model: Arc<dyn LanguageModel>,
        converter: Arc<dyn Converter>,
        output_dir: PathBuf,
        converter_timeout: Duration,
        model_timeout: Duration,
    ) -> Self {
        Self { store, model, converter, output_dir, converter_timeout, model_timeout }
    }

    pub async fn handle(
        &self,
        action: ConversionAction,
        bus: &Arc<Bus>,
        ctx: RequestContext,
    ) -> BusResult {
        match action {
            ConversionAction::DetectFormat => self.detect_format(bus, ctx).await,
            ConversionAction::ApplyCorrections { corrections } => {
                self.apply_corrections(corrections, bus, ctx).await
            }
        }
    }

    /// Deterministic companion scan first; the model only on a miss, and
    /// only accepted above the confidence threshold.  An unresolvable
    /// format parks the session awaiting a user choice.
    async fn detect_format(&self, bus: &Arc<Bus>, ctx: RequestContext) -> BusResult {
        let session = self.store.snapshot();
        // A resume after a format-selection prompt picks up the parked input.
        let input_path = session
            .pending_conversion_input_path
            .clone()
            .or_else(|| session.input_path.clone())
            .ok_or_else(|| WorkflowError::bad_request("no input uploaded"))?;

        // A user-chosen format (from a previous selection prompt) wins.
        let chosen = session
            .effective_metadata()
            .get("format")
            .and_then(|v| v.as_str().map(str::to_owned));

        let detected = match chosen {
            Some(fmt) => Some(fmt),
            None => format::detect_on_disk(&input_path).await.map(str::to_owned),
        };

        let format_name = match detected {
            Some(name) => name,
            None => {
                let evidence = format::collect_evidence(&input_path).await;
                let deadline = ctx.deadline.unwrap_or(self.model_timeout);
                let guess = tokio::time::timeout(deadline, self.model.guess_format(evidence))
                    .await
                    .map_err(|_| WorkflowError::timeout("format detection"))?
                    .map_err(|e| WorkflowError::dependency("language model", e.to_string()))?;

                if !guess.acceptable() {
                    return self.request_format_choice(&input_path, &guess.alternatives);
                }
                info!(format = %guess.format, confidence = guess.confidence, "format accepted");
                guess.format
            }
        };

        self.store.transition(
            Expect::At(ConversionStatus::DetectingFormat),
            ConversionStatus::Converting,
            |s| {
                s.detected_format = Some(format_name.clone());
                s.pending_conversion_input_path = None;
            },
        )?;

        self.run_conversion(bus, ctx).await
    }

    /// Park the session awaiting a user format selection.
    fn request_format_choice(&self, input_path: &Path, alternatives: &[String]) -> BusResult {
        let options = if alternatives.is_empty() {
            "spikeglx, openephys, blackrock, intan".to_owned()
        } else {
            alternatives.join(", ")
        };
        let snapshot = self.store.transition(
            Expect::At(ConversionStatus::DetectingFormat),
            ConversionStatus::AwaitingUserInput,
            |s| {
                s.pending_conversion_input_path = Some(input_path.to_path_buf());
            },
        )?;
        self.store.append_message(
            Role::Assistant,
            format!(
                "I could not identify the recording format with confidence. \
                 Please provide a `format` value; likely candidates: {options}."
            ),
        );
        Ok(AgentResponse::Ack { status: snapshot.status })
    }

    /// Merge corrections into the session, mark the auto-corrections flag,
    /// and reconvert under the already-incremented attempt counter.
    async fn apply_corrections(
        &self,
        corrections: Corrections,
        bus: &Arc<Bus>,
        ctx: RequestContext,
    ) -> BusResult {
        let auto_applied = !corrections.parameter_changes.is_empty();
        self.store.mutate(|s| {
            for (key, value) in &corrections.parameter_changes {
                s.parameter_changes.insert(key.clone(), value.clone());
            }
            for (key, value) in &corrections.additional_metadata {
                s.user_provided_metadata.insert(key.clone(), value.clone());
            }
            if auto_applied {
                s.auto_corrections_applied_this_attempt = true;
            }
        });
        self.run_conversion(bus, ctx).await
    }

    /// One conversion attempt: versioned output, checksum, then hand off
    /// to validation.  The session must already be `Converting`.
    async fn run_conversion(&self, bus: &Arc<Bus>, ctx: RequestContext) -> BusResult {
        let session = self.store.snapshot();
        let input_path = session
            .input_path
            .clone()
            .ok_or_else(|| WorkflowError::bad_request("no input uploaded"))?;
        let format_name = session
            .detected_format
            .clone()
            .ok_or_else(|| WorkflowError::fatal("conversion started without a format"))?;

        let output_path =
            versioned_output_path(&self.output_dir, &input_path, session.correction_attempt);
        if tokio::fs::try_exists(&output_path).await.unwrap_or(false) {
            // Versions are immutable once written; an existing file here is
            // an accounting bug, not something to silently replace.
            return Err(WorkflowError::fatal(format!(
                "output version already exists: {}",
                output_path.display()
            ))
            .with_context(serde_json::json!({
                "attempt": session.correction_attempt,
            })));
        }

        self.progress(0);
        self.progress(25);

        let request = ConvertRequest {
            input_path,
            output_path: output_path.clone(),
            format: format_name,
            metadata: session.effective_metadata(),
            parameters: session.parameter_changes.clone(),
        };

        let deadline = ctx.deadline.unwrap_or(self.converter_timeout);
        let converted = match tokio::time::timeout(deadline, self.converter.convert(request)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WorkflowError::dependency("converter", e.to_string())),
            Err(_) => Err(WorkflowError::timeout("converter")),
        };

        if let Err(error) = converted {
            // A truncated partial is recoverable: drop it so the version
            // number stays free for the retry.  Older versions untouched.
            if tokio::fs::try_exists(&output_path).await.unwrap_or(false) {
                warn!(path = %output_path.display(), "removing partial output after converter failure");
                let _ = tokio::fs::remove_file(&output_path).await;
            }
            return Err(error.with_context(serde_json::json!({
                "attempt": session.correction_attempt,
            })));
        }

        self.progress(55);

        let checksum = sha256_file(&output_path)
            .await
            .map_err(|e| WorkflowError::dependency("checksum", e.to_string()))?;

        self.progress(75);

        self.store.mutate(|s| {
            s.output_path = Some(output_path.clone());
            s.output_checksums
                .insert(output_path.display().to_string(), checksum.clone());
        });

        self.store.transition(
            Expect::At(ConversionStatus::Converting),
            ConversionStatus::Validating,
            |_| {},
        )?;

        self.progress(100);

        bus.send(AgentRequest::Evaluation(EvaluationAction::RunValidation), ctx).await
    }

    fn progress(&self, percent: u8) {
        self.store.events().publish(WorkflowEvent::Progress {
            percent,
            message: narrate(percent).to_owned(),
        });
    }
}

#[cfg(test)]
#[path = "convert_tests.rs"]
mod tests;
