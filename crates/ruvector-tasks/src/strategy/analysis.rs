//! Text analysis strategy: word, sentence and script statistics

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::ProcessingError;
use crate::providers::ContentExtractor;
use crate::types::{Subject, TaskOptions};

use super::{option_usize, ProcessingStrategy, ProgressReporter, StrategyOutput};

/// Sentences between cancellation checks while analysing
const CHECKPOINT_EVERY: usize = 256;

/// Words shorter than this are left out of the top-term list
const MIN_TERM_LEN: usize = 4;

/// Describes the text content of a subject
///
/// Milestones: validate 10%, extract 40%, analyse 80%, finalize 100%.
///
/// Task config keys: `top_terms` (default 10).
pub struct AnalysisStrategy {
    extractor: Arc<dyn ContentExtractor>,
}

impl AnalysisStrategy {
    pub fn new(extractor: Arc<dyn ContentExtractor>) -> Self {
        Self { extractor }
    }
}

/// Statistics gathered from one text
#[derive(Debug, Default)]
struct TextStats {
    characters: usize,
    words: usize,
    sentences: usize,
    longest_sentence_words: usize,
    term_counts: HashMap<String, usize>,
    script_counts: HashMap<&'static str, usize>,
}

impl TextStats {
    fn add_sentence(&mut self, sentence: &str) {
        let mut words = 0;
        for word in sentence.unicode_words() {
            words += 1;
            let term = word.to_lowercase();
            if term.chars().count() >= MIN_TERM_LEN {
                *self.term_counts.entry(term).or_default() += 1;
            }
        }
        for c in sentence.chars().filter(|c| c.is_alphabetic()) {
            *self.script_counts.entry(script_of(c)).or_default() += 1;
        }

        self.characters += sentence.chars().count();
        if words > 0 {
            self.words += words;
            self.sentences += 1;
            self.longest_sentence_words = self.longest_sentence_words.max(words);
        }
    }

    fn dominant_script(&self) -> Option<&'static str> {
        self.script_counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(script, _)| *script)
    }

    fn top_terms(&self, limit: usize) -> Vec<(String, usize)> {
        let mut terms: Vec<(String, usize)> = self
            .term_counts
            .iter()
            .map(|(t, c)| (t.clone(), *c))
            .collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        terms.truncate(limit);
        terms
    }
}

/// Coarse writing-system guess for a letter
fn script_of(c: char) -> &'static str {
    match c as u32 {
        0x0000..=0x024F | 0x1E00..=0x1EFF => "latin",
        0x0370..=0x03FF => "greek",
        0x0400..=0x052F => "cyrillic",
        0x0590..=0x05FF => "hebrew",
        0x0600..=0x06FF | 0x0750..=0x077F => "arabic",
        0x0900..=0x097F => "devanagari",
        0x3040..=0x30FF => "kana",
        0x4E00..=0x9FFF | 0x3400..=0x4DBF => "han",
        0xAC00..=0xD7AF | 0x1100..=0x11FF => "hangul",
        _ => "other",
    }
}

#[async_trait]
impl ProcessingStrategy for AnalysisStrategy {
    fn name(&self) -> &str {
        "analysis"
    }

    async fn execute(
        &self,
        subject: &Subject,
        config: &TaskOptions,
        progress: &ProgressReporter,
    ) -> Result<StrategyOutput, ProcessingError> {
        if !self.extractor.supports(&subject.content_type) {
            return Err(ProcessingError::unsupported(format!(
                "unsupported file format: {}",
                subject.content_type
            )));
        }
        let top_terms = option_usize(config, "top_terms").unwrap_or(10);
        progress.report(10, "validate")?;

        let text = self.extractor.extract(subject).await?;
        progress.report(40, "extract")?;

        let mut stats = TextStats::default();
        for (i, sentence) in text.split_sentence_bounds().enumerate() {
            if i % CHECKPOINT_EVERY == 0 {
                progress.checkpoint()?;
            }
            stats.add_sentence(sentence);
        }
        progress.report(80, "analyse")?;

        let avg_sentence_words = if stats.sentences > 0 {
            stats.words as f64 / stats.sentences as f64
        } else {
            0.0
        };
        let terms: Vec<_> = stats
            .top_terms(top_terms)
            .into_iter()
            .map(|(term, count)| json!({ "term": term, "count": count }))
            .collect();

        tracing::debug!(
            "Analysed {}: {} words in {} sentences",
            subject.display_name(),
            stats.words,
            stats.sentences
        );
        progress.report(100, "finalize")?;

        Ok(StrategyOutput::new(json!({
            "characters": stats.characters,
            "words": stats.words,
            "sentences": stats.sentences,
            "avg_sentence_words": avg_sentence_words,
            "longest_sentence_words": stats.longest_sentence_words,
            "script": stats.dominant_script(),
            "top_terms": terms,
            "extractor": self.extractor.name(),
        })))
    }
}
