//! Card metadata codec.
//!
//! Decodes the base64 JSON embedded in a card PNG into a [`CardRecord`]
//! and writes it back. Unknown keys survive the round trip untouched so a
//! translated card never loses metadata the host application relies on.

use crate::chunk::{self, ChunkError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io;
use std::path::Path;
use thiserror::Error;

/// Keyword of the tEXt chunk that carries the card metadata.
pub const CHARA_KEYWORD: &str = "chara";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("card metadata chunk is missing")]
    MissingChunk,
    #[error("card metadata is malformed: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<ChunkError> for CodecError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::MissingKeyword(_) => CodecError::MissingChunk,
            ChunkError::Io(err) => CodecError::Io(err),
            other => CodecError::Malformed(other.to_string()),
        }
    }
}

/// One character card's metadata. V1 fields live at the root; V2 cards
/// nest the full set under `data`. Absent fields are omitted on encode,
/// never defaulted, and unrecognized keys are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_mes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mes_example: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_history_instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternate_greetings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<CardData>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The V2 `data` block. Same text fields as the root plus the V2-only ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_mes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mes_example: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_history_instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternate_greetings: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Reads the card metadata embedded in `path`.
pub fn decode(path: &Path) -> Result<CardRecord, CodecError> {
    let payload = chunk::read_text_chunk(path, CHARA_KEYWORD)?;
    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|err| CodecError::Malformed(format!("invalid base64 payload: {err}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| CodecError::Malformed(format!("invalid card JSON: {err}")))
}

/// Serializes `record` back into the card chunk of `path`. The underlying
/// chunk write is atomic, so a failure leaves the file as it was.
pub fn encode(record: &CardRecord, path: &Path) -> Result<(), CodecError> {
    let json = serde_json::to_string(record)
        .map_err(|err| CodecError::Malformed(format!("card JSON serialization: {err}")))?;
    let payload = BASE64.encode(json.as_bytes());
    chunk::write_text_chunk(path, CHARA_KEYWORD, &payload)?;
    Ok(())
}

/// The character's display name: root `name`, falling back to `data.name`.
pub fn character_name(record: &CardRecord) -> Option<&str> {
    record
        .name
        .as_deref()
        .or_else(|| record.data.as_ref().and_then(|data| data.name.as_deref()))
}
