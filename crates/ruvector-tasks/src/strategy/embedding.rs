//! Embedding pipeline strategy: extract, chunk, embed, persist

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use crate::config::ChunkingConfig;
use crate::error::{ErrorKind, ProcessingError};
use crate::providers::{ContentExtractor, ContentSink, EmbeddedChunk, EmbeddingProvider};
use crate::types::{Subject, TaskOptions};

use super::{option_usize, ProcessingStrategy, ProgressReporter, StrategyOutput, TextChunk, TextChunker};

/// Chunks sent to the embedder per request
const EMBED_BATCH_SIZE: usize = 8;

/// Turns a subject into embedded chunks
///
/// Milestones: validate 10%, extract 30%, chunk 50%, embed 70%, persist 90%,
/// finalize 100%. Embedding reports intermediate progress between the chunk
/// and embed milestones and checks for cancellation before every batch.
///
/// Task config keys: `chunk_size`, `chunk_overlap`.
pub struct EmbeddingStrategy {
    extractor: Arc<dyn ContentExtractor>,
    embedder: Arc<dyn EmbeddingProvider>,
    sink: Arc<dyn ContentSink>,
    chunking: ChunkingConfig,
}

impl EmbeddingStrategy {
    pub fn new(
        extractor: Arc<dyn ContentExtractor>,
        embedder: Arc<dyn EmbeddingProvider>,
        sink: Arc<dyn ContentSink>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            extractor,
            embedder,
            sink,
            chunking,
        }
    }

    fn chunker_for(&self, config: &TaskOptions) -> Result<TextChunker, ProcessingError> {
        let size = option_usize(config, "chunk_size").unwrap_or(self.chunking.chunk_size);
        let overlap = option_usize(config, "chunk_overlap").unwrap_or(self.chunking.chunk_overlap);
        if size == 0 || overlap >= size {
            return Err(ProcessingError::new(
                ErrorKind::InvalidConfig,
                format!("chunk_overlap ({}) must be smaller than chunk_size ({})", overlap, size),
            ));
        }
        Ok(TextChunker::new(size, overlap).with_min_size(self.chunking.min_chunk_size))
    }
}

#[async_trait]
impl ProcessingStrategy for EmbeddingStrategy {
    fn name(&self) -> &str {
        "embedding"
    }

    async fn execute(
        &self,
        subject: &Subject,
        config: &TaskOptions,
        progress: &ProgressReporter,
    ) -> Result<StrategyOutput, ProcessingError> {
        let start = Instant::now();

        // Validate
        if !self.extractor.supports(&subject.content_type) {
            return Err(ProcessingError::unsupported(format!(
                "unsupported file format: {}",
                subject.content_type
            )));
        }
        let chunker = self.chunker_for(config)?;
        progress.report(10, "validate")?;

        // Extract
        let text = self.extractor.extract(subject).await?;
        if text.trim().is_empty() {
            return Err(ProcessingError::invalid_format(format!(
                "no text content extracted from {}",
                subject.display_name()
            )));
        }
        progress.report(30, "extract")?;

        // Chunk
        let mut chunks = chunker.chunk(&text);
        if chunks.is_empty() {
            // Shorter than the minimum chunk size: keep it whole
            chunks.push(TextChunk {
                index: 0,
                text: text.trim().to_string(),
                char_start: 0,
                char_end: text.len(),
            });
        }
        progress.report(50, "chunk")?;

        // Embed, one batch between checkpoints
        let total = chunks.len();
        let mut embedded = Vec::with_capacity(total);
        let mut reported = 50u8;
        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            progress.checkpoint()?;
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            if embeddings.len() != batch.len() {
                return Err(ProcessingError::internal(format!(
                    "{} returned {} embeddings for {} chunks",
                    self.embedder.name(),
                    embeddings.len(),
                    batch.len()
                )));
            }
            embedded.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(embeddings)
                    .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding }),
            );

            let done = embedded.len();
            let pct = 50 + (done * 20 / total) as u8;
            if pct > reported && pct < 70 {
                progress.report(pct, format!("embed {}/{}", done, total))?;
                reported = pct;
            }
        }
        progress.report(70, "embed")?;

        // Persist
        self.sink.store_text(&subject.file_id, &text).await?;
        let stored = self.sink.store_chunks(&subject.file_id, &embedded).await?;
        progress.report(90, "persist")?;

        tracing::info!(
            "Embedded {} ({} chunks, {} chars) with {} in {:?}",
            subject.display_name(),
            stored,
            text.len(),
            self.embedder.name(),
            start.elapsed()
        );
        progress.report(100, "finalize")?;

        Ok(StrategyOutput::new(json!({
            "chunks": stored,
            "characters": text.len(),
            "dimensions": self.embedder.dimensions(),
            "embedder": self.embedder.name(),
            "sink": self.sink.name(),
        })))
    }
}
