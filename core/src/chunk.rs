//! PNG text-chunk primitives.
//!
//! Character cards carry their metadata as a `tEXt` chunk (keyword
//! `chara`, base64 payload). Only the chunk stream is touched here;
//! pixel data passes through byte-for-byte.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
const TEXT_CHUNK: [u8; 4] = *b"tEXt";
const END_CHUNK: [u8; 4] = *b"IEND";

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("not a PNG file")]
    BadSignature,
    #[error("truncated chunk stream at offset {0}")]
    Truncated(usize),
    #[error("no tEXt chunk with keyword {0:?}")]
    MissingKeyword(String),
    #[error("tEXt payload contains non-Latin-1 character {0:?}")]
    NonLatin1(char),
    #[error(transparent)]
    Io(#[from] io::Error),
}

struct RawChunk<'a> {
    kind: [u8; 4],
    data: &'a [u8],
    /// Full span including length prefix and CRC, for pass-through copies.
    raw: &'a [u8],
}

fn parse_chunks(bytes: &[u8]) -> Result<Vec<RawChunk<'_>>, ChunkError> {
    if bytes.len() < PNG_SIGNATURE.len() || bytes[..PNG_SIGNATURE.len()] != PNG_SIGNATURE {
        return Err(ChunkError::BadSignature);
    }

    let mut chunks = Vec::new();
    let mut offset = PNG_SIGNATURE.len();
    while offset < bytes.len() {
        if offset + 8 > bytes.len() {
            return Err(ChunkError::Truncated(offset));
        }
        let length = u32::from_be_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]) as usize;
        let kind = [
            bytes[offset + 4],
            bytes[offset + 5],
            bytes[offset + 6],
            bytes[offset + 7],
        ];
        let end = offset + 12 + length;
        if end > bytes.len() {
            return Err(ChunkError::Truncated(offset));
        }
        chunks.push(RawChunk {
            kind,
            data: &bytes[offset + 8..offset + 8 + length],
            raw: &bytes[offset..end],
        });
        if kind == END_CHUNK {
            break;
        }
        offset = end;
    }
    Ok(chunks)
}

fn text_chunk_payload<'a>(chunk: &RawChunk<'a>, keyword: &str) -> Option<&'a [u8]> {
    if chunk.kind != TEXT_CHUNK {
        return None;
    }
    let split = chunk.data.iter().position(|&b| b == 0)?;
    if &chunk.data[..split] == keyword.as_bytes() {
        Some(&chunk.data[split + 1..])
    } else {
        None
    }
}

fn encode_text_chunk(keyword: &str, payload: &str) -> Result<Vec<u8>, ChunkError> {
    let mut data = Vec::with_capacity(keyword.len() + 1 + payload.len());
    data.extend_from_slice(keyword.as_bytes());
    data.push(0);
    // tEXt payloads are Latin-1; card payloads are base64 and stay ASCII.
    for ch in payload.chars() {
        let code = u32::from(ch);
        if code > 0xff {
            return Err(ChunkError::NonLatin1(ch));
        }
        data.push(code as u8);
    }

    let mut chunk = Vec::with_capacity(data.len() + 12);
    chunk.extend_from_slice(&(data.len() as u32).to_be_bytes());
    chunk.extend_from_slice(&TEXT_CHUNK);
    chunk.extend_from_slice(&data);

    let mut crc_input = Vec::with_capacity(data.len() + 4);
    crc_input.extend_from_slice(&TEXT_CHUNK);
    crc_input.extend_from_slice(&data);
    chunk.extend_from_slice(&crc32fast::hash(&crc_input).to_be_bytes());
    Ok(chunk)
}

/// Returns the payload of the `tEXt` chunk carrying `keyword`.
pub fn read_text_chunk(path: &Path, keyword: &str) -> Result<String, ChunkError> {
    let bytes = fs::read(path)?;
    let chunks = parse_chunks(&bytes)?;
    for chunk in &chunks {
        if let Some(payload) = text_chunk_payload(chunk, keyword) {
            return Ok(payload.iter().map(|&b| b as char).collect());
        }
    }
    Err(ChunkError::MissingKeyword(keyword.to_string()))
}

/// Rewrites the file with the keyword's `tEXt` chunk replaced, or inserted
/// before `IEND` when absent. The payload must be Latin-1 encodable (card
/// payloads are base64 and always are). The write is all-or-nothing:
/// contents go to a temporary file first and are renamed over the target
/// only once synced.
pub fn write_text_chunk(path: &Path, keyword: &str, payload: &str) -> Result<(), ChunkError> {
    let bytes = fs::read(path)?;
    let chunks = parse_chunks(&bytes)?;
    let replacement = encode_text_chunk(keyword, payload)?;

    let mut output = Vec::with_capacity(bytes.len() + replacement.len());
    output.extend_from_slice(&PNG_SIGNATURE);
    let mut inserted = false;
    for chunk in &chunks {
        if text_chunk_payload(chunk, keyword).is_some() {
            if !inserted {
                output.extend_from_slice(&replacement);
                inserted = true;
            }
            continue;
        }
        if chunk.kind == END_CHUNK && !inserted {
            output.extend_from_slice(&replacement);
            inserted = true;
        }
        output.extend_from_slice(chunk.raw);
    }

    write_atomic(path, &output)?;
    Ok(())
}

/// Writes `contents` to a sibling temporary file, syncs it, and renames it
/// over `target`, so readers never observe a partial file.
pub fn write_atomic(target: &Path, contents: &[u8]) -> io::Result<()> {
    let temp_path = build_temp_path(target);
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    #[cfg(target_os = "windows")]
    {
        use std::io::ErrorKind;
        if let Err(err) = fs::rename(&temp_path, target) {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(target)?;
                fs::rename(&temp_path, target)?;
            } else {
                return Err(err);
            }
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        fs::rename(&temp_path, target)?;
    }

    Ok(())
}

fn build_temp_path(target: &Path) -> PathBuf {
    let mut temp = target.to_path_buf();
    let pid = std::process::id();
    let suffix = format!("__tmp__pid_{}", pid);
    match temp.file_name() {
        Some(name) => {
            let mut os_string = name.to_os_string();
            os_string.push(suffix);
            temp.set_file_name(os_string);
        }
        None => {
            temp.push(format!("temp_{pid}"));
        }
    }
    temp
}
