// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DANDI field descriptors and metadata auto-extraction.
//!
//! Extraction is split into pure parsers over file contents and a thin
//! filesystem wrapper, so the parsers are unit-testable without fixtures.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::session::MetadataMap;

/// Static descriptor for one DANDI-required metadata field.  The required
/// set itself is fixed by archive rules; the language model may refine
/// descriptions and infer values but never changes the set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub why_needed: String,
    pub example: String,
    pub field_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inferred_value: Option<serde_json::Value>,
}

/// Baseline descriptors for the DANDI-required fields.  Used verbatim when
/// the model is unavailable, and as the seed the model refines.
pub fn baseline_field_specs() -> Vec<FieldSpec> {
    let spec = |name: &str, display: &str, description: &str, why: &str, example: &str| FieldSpec {
        name: name.to_owned(),
        display_name: display.to_owned(),
        description: description.to_owned(),
        why_needed: why.to_owned(),
        example: example.to_owned(),
        field_type: "string".to_owned(),
        inferred_value: None,
    };
    vec![
        spec(
            "experimenter",
            "Experimenter",
            "Name of the person who performed the recording session.",
            "DANDI requires an attributable experimenter for every dataset.",
            "Lonsdorf, Elizabeth",
        ),
        spec(
            "institution",
            "Institution",
            "Institution where the recording was made.",
            "Required for DANDI dataset provenance.",
            "University of Example",
        ),
        spec(
            "subject_id",
            "Subject ID",
            "Lab identifier of the recorded subject.",
            "DANDI indexes sessions by subject; files without one are rejected.",
            "mouse-042",
        ),
        spec(
            "species",
            "Species",
            "Species of the subject, as a latin binomial.",
            "Required subject metadata for DANDI.",
            "Mus musculus",
        ),
        spec(
            "sex",
            "Sex",
            "Sex of the subject: M, F, U (unknown), or O (other).",
            "Required subject metadata for DANDI.",
            "M",
        ),
    ]
}

/// Parse a SpikeGLX `.meta` companion (INI-style `key=value` lines) into
/// metadata fields we can seed the session with.
pub fn parse_spikeglx_meta(contents: &str) -> MetadataMap {
    let mut out = MetadataMap::new();
    for line in contents.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        match key {
            "fileCreateTime" => {
                out.insert("session_start_time".to_owned(), value.into());
            }
            "typeThis" => {
                out.insert("device".to_owned(), value.into());
            }
            "imSampRate" | "niSampRate" => {
                if let Ok(rate) = value.parse::<f64>() {
                    out.insert("sampling_rate_hz".to_owned(), rate.into());
                }
            }
            _ => {}
        }
    }
    out
}

/// Parse a user-supplied sidecar `<stem>.metadata.json`, keeping only
/// string/number/bool entries.
pub fn parse_sidecar_json(contents: &str) -> MetadataMap {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str(contents) else {
        return MetadataMap::new();
    };
    map.into_iter()
        .filter(|(_, v)| v.is_string() || v.is_number() || v.is_boolean())
        .collect()
}

/// Scan the uploaded file's directory for companions and derive
/// auto-extracted metadata.  Missing or unreadable companions contribute
/// nothing; this never fails the upload.
pub async fn scan_input(input_path: &Path) -> MetadataMap {
    let mut out = MetadataMap::new();
    let Some(dir) = input_path.parent() else {
        return out;
    };
    let stem = input_path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();

    // SpikeGLX drops a .meta beside each .bin with the same stem.
    let meta_path = dir.join(format!("{stem}.meta"));
    if let Ok(contents) = tokio::fs::read_to_string(&meta_path).await {
        out.append(&mut parse_spikeglx_meta(&contents));
    }

    let sidecar_path = dir.join(format!("{stem}.metadata.json"));
    if let Ok(contents) = tokio::fs::read_to_string(&sidecar_path).await {
        for (key, value) in parse_sidecar_json(&contents) {
            out.insert(key, value);
        }
    }

    out
}

#[cfg(test)]
#[path = "metadata_tests.rs"]
mod tests;
