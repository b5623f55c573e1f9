//! Deterministic manuscript chunking.
//!
//! The splitter works on paragraph boundaries (`\n\n+`) and keeps every chunk
//! at or below `max_tokens_per_chunk * chars_per_token` characters. A single
//! paragraph larger than the budget is kept whole; the cap is a soft target,
//! not a hard ceiling. Each chunk after the first is seeded with the trailing
//! sentences of its predecessor so the correction engine sees cross-boundary
//! context.
//!
//! Positions are offsets into the normalized paragraph rejoin consumed by the
//! splitter, not byte-exact offsets into the raw upload; downstream position
//! translation relies on this approximate contract. Token estimation is a
//! fixed character divisor, deliberately not a real tokenizer: exact token
//! accounting would move chunk boundaries and break reproducibility.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\n+").expect("paragraph break pattern is valid"));

static SENTENCE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+").expect("sentence break pattern is valid"));

/// A bounded, position-tagged slice of the source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub index: usize,
    pub text: String,
    pub start_position: usize,
    pub end_position: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkingConfig {
    pub max_tokens_per_chunk: usize,
    pub chars_per_token: usize,
    pub overlap_sentences: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: 1000,
            chars_per_token: 4,
            overlap_sentences: 3,
        }
    }
}

impl ChunkingConfig {
    fn max_chars_per_chunk(&self) -> usize {
        self.max_tokens_per_chunk * self.chars_per_token
    }
}

/// Splits the document into ordered, overlapping chunks.
pub fn split_into_chunks(text: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    let max_chars = config.max_chars_per_chunk().max(1);

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut position = 0usize;
    let mut index = 0usize;

    for paragraph in PARAGRAPH_BREAK.split(text) {
        if !current.is_empty() && current.len() + paragraph.len() > max_chars {
            chunks.push(TextChunk {
                index,
                text: current.trim().to_string(),
                start_position: position,
                end_position: position + current.len(),
            });

            let overlap = last_sentences(&current, config.overlap_sentences);
            index += 1;
            position += current.len();
            current = overlap;
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }

    if !current.trim().is_empty() {
        chunks.push(TextChunk {
            index,
            text: current.trim().to_string(),
            start_position: position,
            end_position: position + current.len(),
        });
    }

    debug_assert!(chunks.windows(2).all(|w| w[0].index + 1 == w[1].index));
    debug_assert!(chunks
        .windows(2)
        .all(|w| w[0].start_position <= w[1].start_position));
    chunks
}

/// Extracts the final `count` sentences of `text` for overlap seeding.
///
/// When the text has `count` or fewer sentences the whole text is reused.
pub fn last_sentences(text: &str, count: usize) -> String {
    let sentences: Vec<&str> = SENTENCE_BREAK.split(text).collect();
    if sentences.len() <= count {
        return text.to_string();
    }

    let tail = sentences[sentences.len() - count..].join(". ");
    if text.ends_with('.') && !tail.ends_with('.') {
        format!("{tail}.")
    } else {
        tail
    }
}

/// Estimates tokens as `ceil(len / chars_per_token)`; a bounded-error
/// approximation, not a tokenizer.
pub fn estimate_tokens(text: &str, config: &ChunkingConfig) -> usize {
    let divisor = config.chars_per_token.max(1);
    text.len().div_ceil(divisor)
}
