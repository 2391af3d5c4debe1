//! Sentence-aware text chunking with overlap

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// A slice of extracted text, ready for embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Position within the subject
    pub index: u32,
    pub text: String,
    /// Byte offset of the chunk start in the source text
    pub char_start: usize,
    pub char_end: usize,
}

/// Text chunker with configurable size and overlap
#[derive(Debug, Clone)]
pub struct TextChunker {
    /// Target chunk size in characters
    chunk_size: usize,
    /// Overlap between chunks
    overlap: usize,
    /// Minimum chunk size
    min_size: usize,
}

impl TextChunker {
    /// Create a new chunker
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap: overlap.min(chunk_size.saturating_sub(1)),
            min_size: 50,
        }
    }

    pub fn with_min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    /// Split text into overlapping chunks on sentence boundaries
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let mut chunks = Vec::new();

        let mut current_chunk = String::new();
        let mut current_start = 0usize;
        let mut char_pos = 0usize;

        for sentence in text.split_sentence_bounds() {
            // If adding this sentence exceeds chunk size, save current chunk
            if !current_chunk.is_empty() && current_chunk.len() + sentence.len() > self.chunk_size {
                if current_chunk.trim().len() >= self.min_size {
                    chunks.push(TextChunk {
                        index: chunks.len() as u32,
                        text: current_chunk.trim().to_string(),
                        char_start: current_start,
                        char_end: char_pos,
                    });
                }

                // Start new chunk with overlap
                current_chunk = self.overlap_text(&current_chunk);
                current_start = char_pos.saturating_sub(current_chunk.len());
            }

            current_chunk.push_str(sentence);
            char_pos += sentence.len();
        }

        if current_chunk.trim().len() >= self.min_size {
            chunks.push(TextChunk {
                index: chunks.len() as u32,
                text: current_chunk.trim().to_string(),
                char_start: current_start,
                char_end: char_pos,
            });
        }

        chunks
    }

    /// Tail of a chunk carried into the next one
    fn overlap_text(&self, text: &str) -> String {
        if self.overlap == 0 {
            return String::new();
        }
        if text.len() <= self.overlap {
            return text.to_string();
        }

        let mut start = text.len() - self.overlap;
        while start > 0 && !text.is_char_boundary(start) {
            start -= 1;
        }
        let tail = &text[start..];

        // Prefer a sentence boundary, then a word boundary
        if let Some(pos) = tail.find(". ").filter(|pos| pos + 2 < tail.len()) {
            return tail[pos + 2..].to_string();
        }
        if let Some(pos) = tail.find(' ') {
            return tail[pos + 1..].to_string();
        }
        tail.to_string()
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(1024, 200)
    }
}
