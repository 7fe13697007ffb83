//! Preset prompt translation.
//!
//! Presets are free-form JSON settings files. Only a known allowlist of
//! prompt-bearing keys is translated, wherever they appear in the tree;
//! every other value passes through untouched.

use crate::chunk;
use crate::orchestrator::{Orchestrator, SegmentStatus, TranslationReport};
use log::warn;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Keys whose string values carry translatable prompt text.
const TARGET_FIELDS: [&str; 12] = [
    "content",
    "new_chat_prompt",
    "new_group_chat_prompt",
    "new_example_chat_prompt",
    "continue_nudge_prompt",
    "wi_format",
    "personality_format",
    "group_nudge_prompt",
    "scenario_format",
    "impersonation_prompt",
    "bias_preset_selected",
    "assistant_impersonation",
];

#[derive(Debug, Error)]
pub enum PresetError {
    #[error("preset is not valid JSON: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Translates the allowlisted prompt fields of `preset`, returning the
/// updated document and a per-field report. Each field is split under
/// the configured bracket modes and protected spans, same as card
/// fields; failed pieces keep their original text.
pub async fn translate_preset(
    orchestrator: &Orchestrator,
    preset: &Value,
) -> (Value, TranslationReport) {
    let mut out = preset.clone();
    let mut report = TranslationReport::default();

    let mut targets = Vec::new();
    let mut pointer = String::new();
    collect_targets(preset, &mut pointer, &mut targets);

    for target in targets {
        let Some(slot) = out.pointer_mut(&target) else {
            continue;
        };
        let Some(text) = slot.as_str().map(str::to_string) else {
            continue;
        };
        let (updated, errors) = orchestrator.translate_text(&text).await;
        let changed = updated != text;
        if changed {
            *slot = Value::String(updated);
        }
        let status = if let Some(reason) = errors.first() {
            warn!("preset field {target}: some pieces kept original text: {reason}");
            SegmentStatus::Failed(reason.clone())
        } else if changed {
            SegmentStatus::Translated
        } else {
            SegmentStatus::SkippedUnchanged
        };
        report.statuses.push((target, status));
    }

    (out, report)
}

/// Translates a preset JSON file in place. The rewrite is atomic, so a
/// failure mid-run leaves the file as it was.
pub async fn translate_preset_file(
    orchestrator: &Orchestrator,
    path: &Path,
) -> Result<TranslationReport, PresetError> {
    let raw = fs::read_to_string(path)?;
    let preset: Value =
        serde_json::from_str(&raw).map_err(|err| PresetError::Malformed(err.to_string()))?;

    let (updated, report) = translate_preset(orchestrator, &preset).await;

    let serialized = serde_json::to_vec_pretty(&updated)
        .map_err(|err| PresetError::Malformed(err.to_string()))?;
    chunk::write_atomic(path, &serialized)?;
    Ok(report)
}

/// JSON Pointers (RFC 6901) of every allowlisted non-empty string field,
/// in document order.
fn collect_targets(value: &Value, pointer: &mut String, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let escaped = key.replace('~', "~0").replace('/', "~1");
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&escaped);
                if TARGET_FIELDS.contains(&key.as_str()) {
                    if let Value::String(text) = child {
                        if !text.trim().is_empty() {
                            out.push(pointer.clone());
                        }
                    }
                }
                collect_targets(child, pointer, out);
                pointer.truncate(len);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&index.to_string());
                collect_targets(child, pointer, out);
                pointer.truncate(len);
            }
        }
        _ => {}
    }
}
