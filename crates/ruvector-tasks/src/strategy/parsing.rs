//! Parsing strategy: extract text and store it

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use crate::error::ProcessingError;
use crate::providers::{ContentExtractor, ContentSink};
use crate::types::{Subject, TaskOptions};

use super::{ProcessingStrategy, ProgressReporter, StrategyOutput};

/// Extracts plain text from a subject without embedding it
///
/// Milestones: validate 10%, extract 50%, persist 90%, finalize 100%.
pub struct ParsingStrategy {
    extractor: Arc<dyn ContentExtractor>,
    sink: Arc<dyn ContentSink>,
}

impl ParsingStrategy {
    pub fn new(extractor: Arc<dyn ContentExtractor>, sink: Arc<dyn ContentSink>) -> Self {
        Self { extractor, sink }
    }
}

#[async_trait]
impl ProcessingStrategy for ParsingStrategy {
    fn name(&self) -> &str {
        "parsing"
    }

    async fn execute(
        &self,
        subject: &Subject,
        _config: &TaskOptions,
        progress: &ProgressReporter,
    ) -> Result<StrategyOutput, ProcessingError> {
        if !self.extractor.supports(&subject.content_type) {
            return Err(ProcessingError::unsupported(format!(
                "unsupported file format: {}",
                subject.content_type
            )));
        }
        progress.report(10, "validate")?;

        let text = self.extractor.extract(subject).await?;
        progress.report(50, "extract")?;

        self.sink.store_text(&subject.file_id, &text).await?;
        progress.report(90, "persist")?;

        let summary = json!({
            "characters": text.chars().count(),
            "lines": text.lines().count(),
            "words": text.split_whitespace().count(),
            "extractor": self.extractor.name(),
        });
        progress.report(100, "finalize")?;

        Ok(StrategyOutput::new(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{FsContentExtractor, MemoryContentSink};
    use crate::strategy::testing::reporter;

    #[tokio::test]
    async fn test_parse_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readme.md");
        std::fs::write(&path, "# Title\n\nSome words here.\n").unwrap();

        let sink = Arc::new(MemoryContentSink::new());
        let strategy = ParsingStrategy::new(Arc::new(FsContentExtractor::default()), sink.clone());
        let subject = Subject::new("readme", path.to_string_lossy(), 26, "text/markdown");
        let (reporter, recorded, _) = reporter();

        let output = strategy
            .execute(&subject, &TaskOptions::new(), &reporter)
            .await
            .unwrap();

        assert_eq!(output.summary["lines"], 3);
        assert_eq!(output.summary["words"], 5);
        assert!(sink.text("readme").unwrap().starts_with("# Title"));

        let percentages: Vec<u8> = recorded.reports.lock().iter().map(|p| p.percentage).collect();
        assert_eq!(percentages, vec![10, 50, 90, 100]);
    }
}
