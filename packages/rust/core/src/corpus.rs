//! Bounded, threshold-filtered view of the corpus for synthesis.

use std::path::Path;

use tracing::{debug, instrument};

use paperscout_shared::{DEFAULT_MIN_SCORE, PipelineConfig, RelevantEntry, Result};
use paperscout_storage::CorpusStore;

/// Appended to the corpus text when it was cut to fit the budget.
pub const TRUNCATION_MARKER: &str = "\n\n[... corpus truncated to fit the synthesis budget ...]";

/// Default character budget for the synthesis view.
pub const DEFAULT_CHAR_BUDGET: usize = 12_000;

/// Render one entry as a text block.
pub fn format_entry(entry: &RelevantEntry) -> String {
    format!(
        "Paper ID: {}\nScore: {}\nSummary: {}\n---",
        entry.id, entry.relevance_score, entry.summary
    )
}

/// Render entries in the given order, one block per entry.
pub fn format_entries(entries: &[RelevantEntry]) -> String {
    entries
        .iter()
        .map(format_entry)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keep the first `budget` characters of `text`, marking the cut.
///
/// Counts Unicode scalar values, never bytes.
pub fn truncate_to_budget(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

/// Reads the relevant part of the corpus and bounds it for the synthesizer.
#[derive(Debug, Clone, Copy)]
pub struct BoundedCorpusReader {
    min_score: u8,
    budget: usize,
}

impl Default for BoundedCorpusReader {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SCORE, DEFAULT_CHAR_BUDGET)
    }
}

impl From<&PipelineConfig> for BoundedCorpusReader {
    fn from(config: &PipelineConfig) -> Self {
        Self::new(config.min_score, config.char_budget)
    }
}

impl BoundedCorpusReader {
    pub fn new(min_score: u8, budget: usize) -> Self {
        Self { min_score, budget }
    }

    pub fn min_score(&self) -> u8 {
        self.min_score
    }

    /// Bounded view over an open store.
    #[instrument(skip_all, fields(min_score = self.min_score, budget = self.budget))]
    pub async fn read(&self, store: &CorpusStore) -> Result<String> {
        let entries = store.read_relevant(self.min_score).await?;
        Ok(self.bound(&entries))
    }

    /// Bounded view over the store at `path`; a missing store reads as empty.
    pub async fn read_at(&self, path: &Path) -> Result<String> {
        let entries = CorpusStore::read_relevant_at(path, self.min_score).await?;
        Ok(self.bound(&entries))
    }

    /// Format and truncate already-filtered entries.
    pub fn bound(&self, entries: &[RelevantEntry]) -> String {
        let text = truncate_to_budget(&format_entries(entries), self.budget);
        debug!(
            entries = entries.len(),
            chars = text.chars().count(),
            "built bounded corpus view"
        );
        text
    }
}
