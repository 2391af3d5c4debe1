//! Collaborator abstractions used by the built-in strategies
//!
//! Content extraction, embedding and content storage are slow, fallible
//! operations owned by other systems. The built-in strategies only see these
//! traits, so the local (filesystem, in-memory) and Ollama backends can be
//! swapped for anything else. Failures are reported as [`ProcessingError`]s
//! so the retry classifier can act on their kind.

pub mod local;
pub mod ollama;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProcessingError;
use crate::strategy::TextChunk;
use crate::types::Subject;

pub use local::{FsContentExtractor, MemoryContentSink};
pub use ollama::OllamaEmbedder;

/// Result type for collaborator calls
pub type ProviderResult<T> = std::result::Result<T, ProcessingError>;

/// A chunk and its embedding vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk: TextChunk,
    pub embedding: Vec<f32>,
}

/// Turns a subject into plain text
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Extract the text content of a subject
    async fn extract(&self, subject: &Subject) -> ProviderResult<String>;

    /// Whether this extractor handles the given MIME type
    fn supports(&self, content_type: &str) -> bool;

    /// Get extractor name for logging
    fn name(&self) -> &str;
}

/// Trait for generating text embeddings
///
/// Implementations:
/// - `OllamaEmbedder`: Local Ollama server (nomic-embed-text)
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    ///
    /// Default implementation calls `embed` sequentially.
    async fn embed_batch(&self, texts: &[String]) -> ProviderResult<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Embedding dimensions (e.g., 768 for nomic-embed-text)
    fn dimensions(&self) -> usize;

    /// Check if the provider is reachable
    async fn health_check(&self) -> bool;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

/// Destination for processed content
#[async_trait]
pub trait ContentSink: Send + Sync {
    /// Store the extracted text of a subject
    async fn store_text(&self, file_id: &str, text: &str) -> ProviderResult<()>;

    /// Store embedded chunks, replacing any previous ones; returns the stored count
    async fn store_chunks(&self, file_id: &str, chunks: &[EmbeddedChunk]) -> ProviderResult<usize>;

    /// Get sink name for logging
    fn name(&self) -> &str;
}
