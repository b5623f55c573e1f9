//! Correction domain types shared across the pipeline stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of an individual correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionKind {
    Spelling,
    Grammar,
    Punctuation,
    Syntax,
}

/// A single proposed edit, positioned against the full document once the
/// chunk offset has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub position: usize,
    pub original: String,
    pub correction: String,
    #[serde(rename = "type")]
    pub kind: CorrectionKind,
    pub explanation: String,
    /// None until the verification stage has seen this correction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    /// 1-based index of the chunk that produced this correction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
}

impl Correction {
    /// A correction is kept only when it actually changes the text.
    pub fn is_effective(&self) -> bool {
        self.original != self.correction && !self.correction.trim().is_empty()
    }

    /// Whether the replacement exceeds the configured word ceiling.
    pub fn exceeds_word_limit(&self, max_words: usize) -> bool {
        self.correction.split_whitespace().count() > max_words
    }
}

/// Summary stats attached to a finished correction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub job_id: String,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub file_size: u64,
    pub total_characters: usize,
    pub total_chunks: usize,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_tokens: u64,
    pub processing_time_seconds: f64,
}
