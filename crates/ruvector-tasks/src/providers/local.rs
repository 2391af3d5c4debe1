//! Local collaborator implementations: filesystem extraction and in-memory storage

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::Path;

use crate::error::ProcessingError;
use crate::types::Subject;

use super::{ContentExtractor, ContentSink, EmbeddedChunk, ProviderResult};

/// MIME types the filesystem extractor reads as UTF-8 text
const TEXT_CONTENT_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/x-yaml",
    "application/yaml",
    "application/toml",
    "application/javascript",
];

/// Reads text-like subjects straight from the local filesystem
#[derive(Debug, Clone)]
pub struct FsContentExtractor {
    /// Refuse subjects larger than this
    max_bytes: u64,
}

impl FsContentExtractor {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    /// Guess a MIME type from a file extension
    pub fn content_type_for(path: &Path) -> &'static str {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("txt") | Some("log") => "text/plain",
            Some("md") | Some("markdown") => "text/markdown",
            Some("csv") => "text/csv",
            Some("html") | Some("htm") => "text/html",
            Some("rs") | Some("py") | Some("go") | Some("c") | Some("h") => "text/x-source",
            Some("json") => "application/json",
            Some("xml") => "application/xml",
            Some("yaml") | Some("yml") => "application/yaml",
            Some("toml") => "application/toml",
            Some("js") => "application/javascript",
            Some("pdf") => "application/pdf",
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            _ => "application/octet-stream",
        }
    }
}

impl Default for FsContentExtractor {
    fn default() -> Self {
        Self::new(100 * 1024 * 1024) // 100MB
    }
}

#[async_trait]
impl ContentExtractor for FsContentExtractor {
    async fn extract(&self, subject: &Subject) -> ProviderResult<String> {
        if !self.supports(&subject.content_type) {
            return Err(ProcessingError::unsupported(format!(
                "unsupported file format: {}",
                subject.content_type
            )));
        }

        let metadata = tokio::fs::metadata(&subject.locator).await?;
        if metadata.len() > self.max_bytes {
            // Retrying cannot shrink the file
            return Err(ProcessingError::unsupported(format!(
                "{} is {} bytes, extractor limit is {}",
                subject.display_name(),
                metadata.len(),
                self.max_bytes
            )));
        }

        let bytes = tokio::fs::read(&subject.locator).await?;
        String::from_utf8(bytes).map_err(|e| {
            ProcessingError::invalid_format(format!(
                "invalid file format: {} is not valid UTF-8 ({})",
                subject.display_name(),
                e.utf8_error()
            ))
        })
    }

    fn supports(&self, content_type: &str) -> bool {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        essence.starts_with("text/") || TEXT_CONTENT_TYPES.contains(&essence.as_str())
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}

/// Keeps processed content in memory, keyed by file id
#[derive(Debug, Default)]
pub struct MemoryContentSink {
    texts: DashMap<String, String>,
    chunks: DashMap<String, Vec<EmbeddedChunk>>,
}

impl MemoryContentSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self, file_id: &str) -> Option<String> {
        self.texts.get(file_id).map(|t| t.clone())
    }

    pub fn chunks(&self, file_id: &str) -> Vec<EmbeddedChunk> {
        self.chunks
            .get(file_id)
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl ContentSink for MemoryContentSink {
    async fn store_text(&self, file_id: &str, text: &str) -> ProviderResult<()> {
        self.texts.insert(file_id.to_string(), text.to_string());
        Ok(())
    }

    async fn store_chunks(&self, file_id: &str, chunks: &[EmbeddedChunk]) -> ProviderResult<usize> {
        self.chunks.insert(file_id.to_string(), chunks.to_vec());
        Ok(chunks.len())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
