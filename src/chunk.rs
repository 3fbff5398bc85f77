//! Sliding-window text chunker.
//!
//! Splits extracted document text into [`Chunk`]s of at most `window`
//! characters, where consecutive chunks share exactly `overlap` characters.
//! Windows are counted in Unicode scalar values, so a chunk boundary never
//! falls inside a multi-byte sequence.
//!
//! Each chunk receives a deterministic UUID derived from its document ID
//! and index, plus a SHA-256 hash of its text. Re-chunking the same document
//! therefore reproduces the same point identities, which lets the vector
//! index overwrite rather than duplicate on re-embedding.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Chunk;

/// Split text into overlapping windows.
///
/// Window `k` starts at character `k * (window - overlap)`. The sequence
/// ends with the first window that reaches the end of the text, so the last
/// chunk may be shorter than `window`. Empty text yields no chunks.
///
/// # Errors
///
/// Returns [`Error::Validation`] when `window` is zero or `overlap >= window`.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    window: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    if window == 0 {
        return Err(Error::Validation(
            "chunk window must be greater than zero".to_string(),
        ));
    }
    if overlap >= window {
        return Err(Error::Validation(format!(
            "chunk overlap ({}) must be smaller than the window ({})",
            overlap, window
        )));
    }

    // Byte offset of every char, plus the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = bounds.len() - 1;
    let step = window - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < char_count {
        let end = (start + window).min(char_count);
        let index = chunks.len() as i64;
        chunks.push(make_chunk(
            document_id,
            index,
            &text[bounds[start]..bounds[end]],
        ));
        if end == char_count {
            break;
        }
        start += step;
    }

    Ok(chunks)
}

/// Rebuild the source text from chunks produced with the given `overlap`.
pub fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(&chunk.text);
        } else {
            out.extend(chunk.text.chars().skip(overlap));
        }
    }
    out
}

/// Deterministic point id for chunk `index` of `document_id`.
///
/// Document ids are UUIDs, so the id is a v5 UUID in the document's own
/// namespace. Other ids fall back to the OID namespace.
pub fn chunk_point_id(document_id: &str, index: i64) -> String {
    match Uuid::parse_str(document_id) {
        Ok(namespace) => Uuid::new_v5(&namespace, index.to_string().as_bytes()).to_string(),
        Err(_) => Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("{}:{}", document_id, index).as_bytes(),
        )
        .to_string(),
    }
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_point_id(document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}
