// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recording-format detection.
//!
//! Deterministic companion-file rules run first; the language model is a
//! fallback tier consulted only when the rules miss, and its guess is
//! accepted only above a confidence threshold and without ambiguity.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Minimum model confidence (percent) to accept a format guess.
pub const CONFIDENCE_THRESHOLD: u32 = 70;

/// Structured format guess returned by the language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatGuess {
    pub format: String,
    pub confidence: u32,
    #[serde(default)]
    pub indicators: Vec<String>,
    #[serde(default)]
    pub alternatives: Vec<String>,
    #[serde(default)]
    pub ambiguous: bool,
}

impl FormatGuess {
    /// Accept iff confident and unambiguous.
    pub fn acceptable(&self) -> bool {
        self.confidence >= CONFIDENCE_THRESHOLD && !self.ambiguous
    }
}

/// Deterministic detection over the file names in the upload directory.
///
/// `files` is the directory listing (base names).  `input` is the uploaded
/// file's base name.
pub fn detect_from_files(input: &str, files: &[String]) -> Option<&'static str> {
    let has = |name: &str| files.iter().any(|f| f == name);
    let any_ext = |ext: &str| files.iter().any(|f| f.ends_with(ext));

    // SpikeGLX: .ap.meta companion beside the .ap.bin payload.
    if input.ends_with(".ap.bin") {
        let meta = format!("{}.ap.meta", input.trim_end_matches(".ap.bin"));
        if has(&meta) {
            return Some("spikeglx");
        }
    }
    if any_ext(".ap.bin") && any_ext(".ap.meta") {
        return Some("spikeglx");
    }

    // OpenEphys: a structure.oebin manifest in the session directory.
    if has("structure.oebin") {
        return Some("openephys");
    }

    // Blackrock: .ns5 continuous data or .nev event files.
    if input.ends_with(".ns5") || input.ends_with(".nev") || any_ext(".ns5") || any_ext(".nev") {
        return Some("blackrock");
    }

    // Intan: .rhd / .rhs recordings.
    if input.ends_with(".rhd") || input.ends_with(".rhs") {
        return Some("intan");
    }

    None
}

/// List the upload directory and run the deterministic rules.
pub async fn detect_on_disk(input_path: &Path) -> Option<&'static str> {
    let input = input_path.file_name()?.to_str()?.to_owned();
    let dir = input_path.parent()?;
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Ok(name) = entry.file_name().into_string() {
            files.push(name);
        }
    }
    detect_from_files(&input, &files)
}

/// Evidence handed to the model when the deterministic rules miss.
#[derive(Debug, Clone, Serialize)]
pub struct FormatEvidence {
    pub file_list: Vec<String>,
    pub sizes: Vec<u64>,
    pub sample_headers: Vec<String>,
}

/// Collect the evidence bundle: names, sizes, and the first bytes of the
/// uploaded file rendered as a lossy string.
pub async fn collect_evidence(input_path: &Path) -> FormatEvidence {
    let mut file_list = Vec::new();
    let mut sizes = Vec::new();
    if let Some(dir) = input_path.parent() {
        if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if let Ok(name) = entry.file_name().into_string() {
                    let size =
                        entry.metadata().await.map(|m| m.len()).unwrap_or_default();
                    file_list.push(name);
                    sizes.push(size);
                }
            }
        }
    }

    let mut sample_headers = Vec::new();
    if let Ok(bytes) = tokio::fs::read(input_path).await {
        let head = &bytes[..bytes.len().min(256)];
        sample_headers.push(String::from_utf8_lossy(head).into_owned());
    }

    FormatEvidence { file_list, sizes, sample_headers }
}

#[cfg(test)]
#[path = "format_tests.rs"]
mod tests;
