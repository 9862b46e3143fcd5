use super::question_block::QuestionBlock;
use crate::dto::generation_dto::BlockRequest;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TranscriptScore {
    pub readability: f64,
    pub word_count: f64,
    pub vocabulary: f64,
    pub similarity: f64,
    pub total: f64,
}

/// What the selection loop did for one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockReport {
    pub part: u8,
    pub type_code: String,
    pub attempts: u32,
    pub score: Option<TranscriptScore>,
    pub placeholder: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSet {
    /// Generation timestamp, `YYYY_MM_DD_HH_MM_SS`.
    pub key: String,
    pub blocks: Vec<QuestionBlock>,
    /// The request behind each block, index-aligned with `blocks`.
    #[serde(default)]
    pub requests: Vec<BlockRequest>,
    #[serde(default)]
    pub reports: Vec<BlockReport>,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl GeneratedSet {
    pub fn blocks_for_part(&self, part: u8) -> impl Iterator<Item = &QuestionBlock> {
        self.blocks
            .iter()
            .filter(move |b| b.part_number() == Some(part))
    }

    /// All transcripts of a part, one block after another, line structure kept.
    pub fn part_transcript(&self, part: u8) -> String {
        self.blocks_for_part(part)
            .map(|b| b.transcript.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn placeholder_count(&self) -> usize {
        self.reports.iter().filter(|r| r.placeholder).count()
    }
}
