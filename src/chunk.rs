//! Token-window text splitter.
//!
//! Text is tokenized on whitespace. Each chunk holds at most `chunk_tokens`
//! tokens and shares `overlap_tokens` tokens with the chunk before it. The
//! chunk text is the original slice between its first and last token, so
//! line breaks inside a chunk survive.
//!
//! Every record also gets a deterministic SHA-256 identity, used as the
//! entry key in the vector store.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::DocumentRecord;

/// Byte spans of whitespace-delimited tokens.
fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push((s, i));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Split `text` into overlapping windows. Empty or whitespace-only text
/// yields no chunks.
pub fn split_text(text: &str, chunk_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let spans = token_spans(text);
    if spans.is_empty() || chunk_tokens == 0 {
        return Vec::new();
    }
    let step = chunk_tokens.saturating_sub(overlap_tokens).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_tokens).min(spans.len());
        let (from, _) = spans[start];
        let (_, to) = spans[end - 1];
        chunks.push(text[from..to].to_string());
        if end == spans.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Split each record into chunk records carrying the parent's metadata plus
/// `chunk_index`.
pub fn split_documents(docs: &[DocumentRecord], config: &ChunkingConfig) -> Vec<DocumentRecord> {
    let mut out = Vec::new();
    for doc in docs {
        for (index, piece) in split_text(&doc.content, config.chunk_tokens, config.overlap_tokens)
            .into_iter()
            .enumerate()
        {
            let mut chunk = doc.clone();
            chunk.content = piece;
            chunk
                .metadata
                .insert("chunk_index".to_string(), Value::from(index as u64));
            out.push(chunk);
        }
    }
    out
}

/// Stable identity for a record: SHA-256 over source, chunk index and content.
pub fn record_id(record: &DocumentRecord) -> String {
    let chunk_index = record
        .metadata
        .get("chunk_index")
        .and_then(|v| v.as_u64())
        .map(|i| i.to_string())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(record.source_location.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(chunk_index.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(record.content.as_bytes());
    format!("{:x}", hasher.finalize())
}
