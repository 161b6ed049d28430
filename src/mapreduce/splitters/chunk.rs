use super::Splitter;
use crate::mapreduce::types::WorkItem;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Where a chunk is allowed to end
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Anywhere, as long as it is a UTF-8 character boundary
    #[default]
    Character,
    /// Only after a newline; a line longer than the limit becomes its own chunk
    Line,
    /// Only at blank-line boundaries
    Paragraph,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInput {
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
}

impl ChunkInput {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkWorkItemData {
    pub content: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Byte offset of the chunk start in the original text
    pub start_offset: usize,
    /// Byte offset one past the chunk end
    pub end_offset: usize,
    pub source: Option<String>,
}

/// Splits text into chunks of at most `max_chunk_size` bytes
///
/// Consecutive chunks share up to `overlap_size` bytes. With the line and
/// paragraph strategies the overlap is made of whole lines or paragraphs.
#[derive(Debug, Clone)]
pub struct ChunkSplitter {
    max_chunk_size: usize,
    overlap_size: usize,
    strategy: ChunkStrategy,
}

impl Default for ChunkSplitter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_CHUNK_SIZE, Self::DEFAULT_OVERLAP_SIZE)
    }
}

impl ChunkSplitter {
    pub const DEFAULT_MAX_CHUNK_SIZE: usize = 4000;
    pub const DEFAULT_OVERLAP_SIZE: usize = 200;

    /// Overlap is clamped below the chunk size so splitting always advances
    pub fn new(max_chunk_size: usize, overlap_size: usize) -> Self {
        let max_chunk_size = max_chunk_size.max(1);
        Self {
            max_chunk_size,
            overlap_size: overlap_size.min(max_chunk_size - 1),
            strategy: ChunkStrategy::Character,
        }
    }

    pub fn line_preserving(max_chunk_size: usize, overlap_size: usize) -> Self {
        Self::new(max_chunk_size, overlap_size).with_strategy(ChunkStrategy::Line)
    }

    pub fn paragraph_preserving(max_chunk_size: usize, overlap_size: usize) -> Self {
        Self::new(max_chunk_size, overlap_size).with_strategy(ChunkStrategy::Paragraph)
    }

    pub fn with_strategy(mut self, strategy: ChunkStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    fn spans(&self, text: &str) -> Vec<(usize, usize)> {
        if text.is_empty() {
            return Vec::new();
        }
        match self.strategy {
            ChunkStrategy::Character => self.character_spans(text),
            ChunkStrategy::Line => self.pack_units(&line_units(text)),
            ChunkStrategy::Paragraph => self.pack_units(&paragraph_units(text)),
        }
    }

    fn character_spans(&self, text: &str) -> Vec<(usize, usize)> {
        let len = text.len();
        let mut spans = Vec::new();
        let mut start = 0;

        loop {
            let mut end = floor_char_boundary(text, (start + self.max_chunk_size).min(len));
            if end <= start {
                // A single character wider than the limit
                end = ceil_char_boundary(text, start + 1);
            }
            spans.push((start, end));
            if end >= len {
                break;
            }

            let next = floor_char_boundary(text, end.saturating_sub(self.overlap_size));
            start = if next > start { next } else { end };
        }

        spans
    }

    /// Greedily pack indivisible units into chunks
    fn pack_units(&self, units: &[(usize, usize)]) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut i = 0;

        while i < units.len() {
            let first = i;
            let start = units[i].0;
            let mut end = units[i].1;
            let mut next = i + 1;
            while next < units.len() && units[next].1 - start <= self.max_chunk_size {
                end = units[next].1;
                next += 1;
            }
            spans.push((start, end));
            if next >= units.len() {
                break;
            }

            // Carry trailing units into the next chunk, keeping at least one new unit
            let mut carry = next;
            while carry > first + 1 && end - units[carry - 1].0 <= self.overlap_size {
                carry -= 1;
            }
            if units[next].1 - units[carry].0 > self.max_chunk_size {
                carry = next;
            }
            i = carry;
        }

        spans
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Byte ranges of each line, newline included
fn line_units(text: &str) -> Vec<(usize, usize)> {
    let mut offset = 0;
    text.split_inclusive('\n')
        .map(|line| {
            let span = (offset, offset + line.len());
            offset += line.len();
            span
        })
        .collect()
}

/// Byte ranges of each paragraph, separators excluded
fn paragraph_units(text: &str) -> Vec<(usize, usize)> {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();
    let separator =
        SEPARATOR.get_or_init(|| Regex::new(r"\n[ \t\r]*\n\s*").expect("Invalid regex pattern"));

    let mut units = Vec::new();
    let mut start = 0;
    for m in separator.find_iter(text) {
        if !text[start..m.start()].trim().is_empty() {
            units.push((start, m.start()));
        }
        start = m.end();
    }
    if !text[start..].trim().is_empty() {
        units.push((start, text.len()));
    }
    units
}

impl Splitter<ChunkInput, ChunkWorkItemData> for ChunkSplitter {
    fn split(&self, input: &ChunkInput) -> Vec<WorkItem<ChunkWorkItemData>> {
        let spans = self.spans(&input.content);
        let total_chunks = spans.len();

        spans
            .into_iter()
            .enumerate()
            .map(|(chunk_index, (start, end))| {
                let mut item = WorkItem::new(
                    format!("chunk-{}", chunk_index),
                    ChunkWorkItemData {
                        content: input.content[start..end].to_string(),
                        chunk_index,
                        total_chunks,
                        start_offset: start,
                        end_offset: end,
                        source: input.source.clone(),
                    },
                )
                .with_metadata("chunkIndex", chunk_index)
                .with_metadata("totalChunks", total_chunks)
                .with_metadata("startOffset", start)
                .with_metadata("endOffset", end);
                if let Some(source) = &input.source {
                    item = item.with_metadata("source", source.clone());
                }
                item
            })
            .collect()
    }
}
