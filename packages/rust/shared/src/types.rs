//! Core domain types for PaperScout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PaperScoutError, Result};

/// Highest relevance score an evaluator may assign.
pub const MAX_RELEVANCE_SCORE: u8 = 10;

/// Default minimum score for a paper to appear in the bounded corpus view.
pub const DEFAULT_MIN_SCORE: u8 = 5;

// ---------------------------------------------------------------------------
// EvaluationRecord
// ---------------------------------------------------------------------------

/// An evaluator's verdict on one paper.
///
/// `is_relevant` is an independent signal and is never derived from
/// `relevance_score`; callers decide how the two combine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    /// Stable external identifier (e.g. an arXiv id). Primary key.
    pub id: String,
    /// 0..=10, higher is more relevant.
    pub relevance_score: u8,
    /// Whether the evaluator considers the paper worth including.
    pub is_relevant: bool,
    /// Free-text summary focused on the research topic.
    pub summary: String,
}

impl EvaluationRecord {
    /// Build a record and check the well-formedness invariant.
    pub fn new(
        id: impl Into<String>,
        relevance_score: u8,
        is_relevant: bool,
        summary: impl Into<String>,
    ) -> Result<Self> {
        let record = Self {
            id: id.into(),
            relevance_score,
            is_relevant,
            summary: summary.into(),
        };
        record.validate()?;
        Ok(record)
    }

    /// Check that `id` and `summary` are non-blank and the score is in range.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(PaperScoutError::validation("id must not be empty"));
        }
        if self.summary.trim().is_empty() {
            return Err(PaperScoutError::validation(format!(
                "summary must not be empty (id {})",
                self.id
            )));
        }
        if self.relevance_score > MAX_RELEVANCE_SCORE {
            return Err(PaperScoutError::validation(format!(
                "relevance_score {} out of range 0..={MAX_RELEVANCE_SCORE} (id {})",
                self.relevance_score, self.id
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CorpusEntry / RelevantEntry
// ---------------------------------------------------------------------------

/// The persisted form of an evaluation: the record plus its report location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusEntry {
    #[serde(flatten)]
    pub record: EvaluationRecord,
    /// Path of the rendered report, or empty if none was written.
    #[serde(default)]
    pub artifact_path: String,
}

impl CorpusEntry {
    pub fn new(record: EvaluationRecord, artifact_path: impl Into<String>) -> Self {
        Self {
            record,
            artifact_path: artifact_path.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }
}

/// Projection returned by the relevant-corpus read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevantEntry {
    pub id: String,
    pub summary: String,
    pub relevance_score: u8,
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A candidate paper as returned by search. In-memory only; never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    /// Paper identifier (arXiv id when it comes from arXiv).
    pub id: String,
    pub title: String,
    /// Canonical URL of the paper.
    pub url: String,
    /// Raw content handed to the evaluator (usually the abstract).
    pub content: String,
    /// Evaluation attached once the evaluator has looked at the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationRecord>,
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// The `run.json` written to the output directory after a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub topic: String,
    /// Well-formed records produced by extraction.
    pub extracted: usize,
    /// Records written to the corpus this run.
    pub stored: usize,
    /// Well-formed records skipped because they were not relevant.
    pub skipped_irrelevant: usize,
    /// Minimum score used for the synthesis view.
    pub min_score: u8,
    /// Characters handed to the synthesizer (before the marker, if any).
    pub corpus_chars: usize,
    /// Search/evaluation failure that was tolerated, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
